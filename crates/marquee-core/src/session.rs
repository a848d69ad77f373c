//! The upload transfer session.
//!
//! A session owns one [`DeviceLink`] and drives one payload through it:
//!
//! ```text
//! Idle -> Handshaking -> Transferring -> Finalizing -> Succeeded
//!              |              |              |
//!              +--------------+--------------+---------> Failed(cause)
//! ```
//!
//! Writes are strictly sequential with at most one frame outstanding. The
//! link is disconnected on every exit path.

use bytes::Bytes;
use marquee_protocol::{
    validate_size, Chunker, ControlFrame, DeviceProfile, EncodedPayload, PacketCodec,
    ProtocolError,
};
use marquee_transport::{DeviceLink, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::encoder::EncodingError;
use crate::metrics;

/// Why a session failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCause {
    /// The device never signalled readiness.
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// A write kept failing. `index` is `None` for control packets.
    #[error("Write failed at {}: {error}", describe_index(.index))]
    WriteError {
        index: Option<u16>,
        error: TransportError,
    },

    /// The payload exceeds the device limit.
    #[error("Payload of {actual} bytes exceeds maximum {max}")]
    PayloadTooLarge { actual: usize, max: usize },

    /// The link dropped mid-transfer.
    #[error("Device disconnected")]
    Disconnected,

    /// The caller cancelled the upload.
    #[error("Upload cancelled")]
    Cancelled,

    /// The payload cannot be framed at this write size.
    #[error("Chunking failed: {0}")]
    Chunking(ProtocolError),

    /// Could not open the link.
    #[error("Connection failed: {0}")]
    Connection(TransportError),

    /// The animation could not be encoded.
    #[error("Encoding failed: {0}")]
    Encoding(EncodingError),
}

fn describe_index(index: &Option<u16>) -> String {
    match index {
        Some(index) => format!("frame {index}"),
        None => "control packet".to_string(),
    }
}

impl FailureCause {
    /// Short label used for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            FailureCause::HandshakeTimeout(_) => "handshake_timeout",
            FailureCause::WriteError { .. } => "write_error",
            FailureCause::PayloadTooLarge { .. } => "payload_too_large",
            FailureCause::Disconnected => "disconnected",
            FailureCause::Cancelled => "cancelled",
            FailureCause::Chunking(_) => "chunking",
            FailureCause::Connection(_) => "connection",
            FailureCause::Encoding(_) => "encoding",
        }
    }
}

impl From<ProtocolError> for FailureCause {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::PayloadTooLarge { actual, max } => {
                FailureCause::PayloadTooLarge { actual, max }
            }
            other => FailureCause::Chunking(other),
        }
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Handshaking,
    Transferring,
    Finalizing,
    Succeeded,
    Failed(FailureCause),
}

impl SessionState {
    /// Check if the session has ended.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Succeeded | SessionState::Failed(_))
    }
}

/// How the session waits for the device after a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStrategy {
    /// Wait for any notification, failing after `timeout`.
    Notification { timeout: Duration },
    /// Wait a fixed delay; the device sends nothing.
    Settle { delay: Duration },
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Readiness after each handshake control packet.
    pub handshake_ack: AckStrategy,
    /// Acknowledgement after each data frame.
    pub data_ack: AckStrategy,
    /// Extra attempts per data frame.
    pub retry_limit: u32,
    /// Bound on a single write.
    pub write_timeout: Duration,
    /// Write size override. Defaults to the link's maximum.
    pub write_size: Option<usize>,
    /// Completion packet repeat override. Defaults to the profile's count.
    pub completion_repeats: Option<u8>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_ack: AckStrategy::Settle {
                delay: Duration::from_millis(500),
            },
            data_ack: AckStrategy::Notification {
                timeout: Duration::from_millis(750),
            },
            retry_limit: 2,
            write_timeout: Duration::from_secs(2),
            write_size: None,
            completion_repeats: None,
        }
    }
}

/// Cooperative cancellation flag, checked between frames.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The session stops before its next frame.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Snapshot published on the progress channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Progress {
    pub state: SessionState,
    pub frames_written: u16,
    pub total_frames: u16,
    pub bytes_sent: usize,
}

/// Counters for one session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStats {
    /// Data frames in the transfer.
    pub total_frames: u16,
    /// Data frames acknowledged.
    pub frames_written: u16,
    /// Bytes written, control packets and retries included.
    pub bytes_sent: usize,
    /// Data frame retries.
    pub retries: u32,
    /// Last notification received.
    pub last_ack: Option<Bytes>,
    pub elapsed: Duration,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResult {
    Succeeded(SessionStats),
    Failed {
        cause: FailureCause,
        stats: SessionStats,
    },
}

/// A failed upload, as an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Upload failed after {} of {} frames: {cause}", .stats.frames_written, .stats.total_frames)]
pub struct UploadError {
    pub cause: FailureCause,
    pub stats: SessionStats,
}

impl UploadResult {
    pub(crate) fn failed(cause: FailureCause) -> Self {
        UploadResult::Failed {
            cause,
            stats: SessionStats::default(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, UploadResult::Succeeded(_))
    }

    #[must_use]
    pub fn stats(&self) -> &SessionStats {
        match self {
            UploadResult::Succeeded(stats) | UploadResult::Failed { stats, .. } => stats,
        }
    }

    #[must_use]
    pub fn cause(&self) -> Option<&FailureCause> {
        match self {
            UploadResult::Succeeded(_) => None,
            UploadResult::Failed { cause, .. } => Some(cause),
        }
    }

    /// Convert into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the failure cause and stats if the upload failed.
    pub fn into_result(self) -> Result<SessionStats, UploadError> {
        match self {
            UploadResult::Succeeded(stats) => Ok(stats),
            UploadResult::Failed { cause, stats } => Err(UploadError { cause, stats }),
        }
    }
}

/// One upload attempt over one link.
pub struct TransferSession {
    link: Box<dyn DeviceLink>,
    codec: PacketCodec,
    config: SessionConfig,
    cancel: CancelToken,
    progress: Option<watch::Sender<Progress>>,
    state: SessionState,
    stats: SessionStats,
}

impl TransferSession {
    /// Create a session over an open link.
    #[must_use]
    pub fn new(link: Box<dyn DeviceLink>, profile: DeviceProfile, config: SessionConfig) -> Self {
        Self {
            link,
            codec: PacketCodec::new(profile),
            config,
            cancel: CancelToken::new(),
            progress: None,
            state: SessionState::Idle,
            stats: SessionStats::default(),
        }
    }

    /// Use a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Publish progress on a watch channel.
    #[must_use]
    pub fn with_progress(mut self, progress: watch::Sender<Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run the transfer to completion and release the link.
    pub async fn run(mut self, payload: &EncodedPayload) -> UploadResult {
        let span = info_span!("upload", device = %self.link.device_id());
        async move {
            let start = Instant::now();
            let outcome = self.drive(payload).await;

            if let Err(e) = self.link.disconnect().await {
                warn!("Failed to disconnect: {}", e);
            }
            self.stats.elapsed = start.elapsed();

            let result = match outcome {
                Ok(()) => {
                    info!(
                        "Upload complete: {} frames, {} bytes in {:?}",
                        self.stats.frames_written, self.stats.bytes_sent, self.stats.elapsed
                    );
                    self.transition(SessionState::Succeeded);
                    UploadResult::Succeeded(self.stats.clone())
                }
                Err(cause) => {
                    error!("Upload failed: {}", cause);
                    self.transition(SessionState::Failed(cause.clone()));
                    UploadResult::Failed {
                        cause,
                        stats: self.stats.clone(),
                    }
                }
            };
            metrics::record_upload(&result);
            result
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self, payload: &EncodedPayload) -> Result<(), FailureCause> {
        let profile = *self.codec.profile();
        validate_size(payload, profile.max_payload_bytes)?;

        let write_size = self
            .config
            .write_size
            .unwrap_or_else(|| self.link.max_write_len());
        let chunker = Chunker::new(payload, write_size, &profile)?;
        self.stats.total_frames = chunker.frame_count();
        debug!(
            "Planned {} frames of {} bytes at write size {}",
            chunker.frame_count(),
            chunker.chunk_len(),
            write_size
        );

        self.check_cancelled()?;
        self.transition(SessionState::Handshaking);
        for control in ControlFrame::HANDSHAKE {
            let packet = self.codec.encode_control(control)?;
            self.link.discard_pending_notifications();
            self.write(&packet)
                .await
                .map_err(|e| write_failure(None, e))?;
            debug!("Sent {}", control.name());

            match self.await_ack(self.config.handshake_ack).await {
                Ok(()) => {}
                Err(TransportError::Timeout(after)) => {
                    return Err(FailureCause::HandshakeTimeout(after))
                }
                Err(e) => return Err(write_failure(None, e)),
            }
        }

        self.transition(SessionState::Transferring);
        for frame in &chunker {
            self.check_cancelled()?;
            let packet = self.codec.encode_data(&frame)?;
            self.send_frame(frame.index, &packet).await?;

            self.stats.frames_written += 1;
            metrics::record_frame(packet.len());
            self.publish();
        }

        self.transition(SessionState::Finalizing);
        let complete = self.codec.encode_control(ControlFrame::UploadComplete)?;
        let repeats = self
            .config
            .completion_repeats
            .unwrap_or(profile.completion_repeats);
        for _ in 0..repeats {
            self.write(&complete)
                .await
                .map_err(|e| write_failure(None, e))?;
        }
        debug!("Sent {} x{}", ControlFrame::UploadComplete.name(), repeats);

        Ok(())
    }

    async fn send_frame(&mut self, index: u16, packet: &[u8]) -> Result<(), FailureCause> {
        let mut attempt = 0;
        loop {
            let stale = self.link.discard_pending_notifications();
            if stale > 0 {
                debug!(index, stale, "Discarded stale notifications");
            }

            let result = match self.write(packet).await {
                Ok(()) => self.await_ack(self.config.data_ack).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    debug!(index, attempt, bytes = packet.len(), "Frame acknowledged");
                    return Ok(());
                }
                Err(e) if e.is_fatal() || attempt >= self.config.retry_limit => {
                    return Err(write_failure(Some(index), e));
                }
                Err(e) => {
                    attempt += 1;
                    self.stats.retries += 1;
                    metrics::record_retry();
                    warn!(index, attempt, error = %e, "Retrying frame");
                }
            }
        }
    }

    async fn write(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        let timeout = self.config.write_timeout;
        tokio::time::timeout(timeout, self.link.write(packet))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        self.stats.bytes_sent += packet.len();
        Ok(())
    }

    async fn await_ack(&mut self, strategy: AckStrategy) -> Result<(), TransportError> {
        match strategy {
            AckStrategy::Settle { delay } => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            AckStrategy::Notification { timeout } => {
                let ack = self.link.await_notification(timeout).await?;
                self.stats.last_ack = Some(ack);
                Ok(())
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), FailureCause> {
        if self.cancel.is_cancelled() {
            info!("Upload cancelled");
            return Err(FailureCause::Cancelled);
        }
        Ok(())
    }

    fn transition(&mut self, state: SessionState) {
        debug!("Session {:?} -> {:?}", self.state, state);
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        if let Some(progress) = &self.progress {
            progress.send_replace(Progress {
                state: self.state.clone(),
                frames_written: self.stats.frames_written,
                total_frames: self.stats.total_frames,
                bytes_sent: self.stats.bytes_sent,
            });
        }
    }
}

fn write_failure(index: Option<u16>, error: TransportError) -> FailureCause {
    if error.is_fatal() {
        FailureCause::Disconnected
    } else {
        FailureCause::WriteError { index, error }
    }
}
