//! Upload entry points.
//!
//! These tie the pieces together: encode (optionally), check the size,
//! connect, and run a [`TransferSession`] on the new link.

use marquee_protocol::{validate_size, DeviceProfile, EncodedPayload};
use marquee_transport::{BleTransport, DeviceId};
use tokio::sync::watch;
use tracing::{error, info};

use crate::encoder::{AnimationFrame, FrameEncoder};
use crate::metrics;
use crate::session::{
    CancelToken, FailureCause, Progress, SessionConfig, TransferSession, UploadResult,
};

/// Options for one upload.
#[derive(Debug, Default)]
pub struct UploadOptions {
    pub profile: DeviceProfile,
    pub session: SessionConfig,
    pub cancel: Option<CancelToken>,
    pub progress: Option<watch::Sender<Progress>>,
}

impl UploadOptions {
    #[must_use]
    pub fn new(profile: DeviceProfile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: watch::Sender<Progress>) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Encode `frames` and upload them to `device`.
pub async fn upload(
    transport: &dyn BleTransport,
    device: &DeviceId,
    frames: &[AnimationFrame],
    options: UploadOptions,
) -> UploadResult {
    let payload = match FrameEncoder::new(options.profile).encode(frames) {
        Ok(payload) => payload,
        Err(e) => return finish_early(FailureCause::Encoding(e)),
    };
    info!("Encoded {} frames into {} bytes", frames.len(), payload.len());

    upload_payload(transport, device, &payload, options).await
}

/// Upload an already-encoded payload to `device`.
///
/// The size limit is checked before connecting.
pub async fn upload_payload(
    transport: &dyn BleTransport,
    device: &DeviceId,
    payload: &EncodedPayload,
    options: UploadOptions,
) -> UploadResult {
    if let Err(e) = validate_size(payload, options.profile.max_payload_bytes) {
        return finish_early(e.into());
    }

    info!("Connecting to {} over {}", device, transport.name());
    let link = match transport.connect(device).await {
        Ok(link) => link,
        Err(e) => return finish_early(FailureCause::Connection(e)),
    };

    let mut session = TransferSession::new(link, options.profile, options.session);
    if let Some(cancel) = options.cancel {
        session = session.with_cancel(cancel);
    }
    if let Some(progress) = options.progress {
        session = session.with_progress(progress);
    }
    session.run(payload).await
}

fn finish_early(cause: FailureCause) -> UploadResult {
    error!("Upload failed: {}", cause);
    let result = UploadResult::failed(cause);
    metrics::record_upload(&result);
    result
}
