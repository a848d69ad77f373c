//! In-memory transport.
//!
//! A scripted peripheral that records every write and answers with
//! notifications according to a per-write rule. Used by tests and by the
//! CLI's dry-run mode.

use async_trait::async_trait;
use bytes::Bytes;
use marquee_protocol::{DeviceProfile, PacketCodec, PacketKind, ProtocolError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use crate::traits::{BleTransport, DeviceId, DeviceLink, TransportError};

/// How the simulated peripheral answers one write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResponse {
    /// Accept the write and notify once.
    Ack,
    /// Accept the write and notify `n` times.
    Burst(usize),
    /// Accept the write and stay quiet.
    Silent,
    /// Reject the write.
    Fail(String),
    /// Drop the link instead of accepting the write.
    Disconnect,
    /// Hang for the given time, then give up without delivering the write.
    Stall(Duration),
}

/// Something that happened on a memory link, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Write(Bytes),
    WriteRejected(Bytes),
    Notification(Bytes),
    Disconnected,
}

/// Decides the response to write number `n` (counted across the transport).
pub type WriteHook = Box<dyn FnMut(usize, &[u8]) -> WriteResponse + Send>;

struct State {
    events: Vec<LinkEvent>,
    pending: VecDeque<Bytes>,
    hook: Option<WriteHook>,
    default_response: WriteResponse,
    ack_payload: Bytes,
    connect_error: Option<TransportError>,
    connected: bool,
    writes: usize,
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory transport. Clones share the same simulated peripheral.
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
    max_write_len: usize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// A peripheral that acknowledges every write with one notification.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    events: Vec::new(),
                    pending: VecDeque::new(),
                    hook: None,
                    default_response: WriteResponse::Ack,
                    ack_payload: Bytes::from_static(&[0x01]),
                    connect_error: None,
                    connected: false,
                    writes: 0,
                }),
                notify: Notify::new(),
            }),
            max_write_len: 243,
        }
    }

    /// Set the largest write the link accepts.
    #[must_use]
    pub fn with_max_write_len(mut self, len: usize) -> Self {
        self.max_write_len = len;
        self
    }

    /// Set the notification payload sent for each acknowledged write.
    #[must_use]
    pub fn with_ack_payload(self, payload: impl Into<Bytes>) -> Self {
        self.shared.lock().ack_payload = payload.into();
        self
    }

    /// Answer every write that has no hook decision with `response`.
    #[must_use]
    pub fn with_default_response(self, response: WriteResponse) -> Self {
        self.shared.lock().default_response = response;
        self
    }

    /// Decide each write's response with a closure.
    #[must_use]
    pub fn on_write<F>(self, hook: F) -> Self
    where
        F: FnMut(usize, &[u8]) -> WriteResponse + Send + 'static,
    {
        self.shared.lock().hook = Some(Box::new(hook));
        self
    }

    /// Make the next `connect` fail with `error`.
    #[must_use]
    pub fn failing_connect(self, error: TransportError) -> Self {
        self.shared.lock().connect_error = Some(error);
        self
    }

    /// Queue a notification as if the peripheral sent it unprompted.
    pub fn push_notification(&self, payload: impl Into<Bytes>) {
        let payload = payload.into();
        let mut state = self.shared.lock();
        state.events.push(LinkEvent::Notification(payload.clone()));
        state.pending.push_back(payload);
        drop(state);
        self.shared.notify.notify_one();
    }

    /// Everything that happened so far.
    #[must_use]
    pub fn events(&self) -> Vec<LinkEvent> {
        self.shared.lock().events.clone()
    }

    /// Accepted writes, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<Bytes> {
        self.shared
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                LinkEvent::Write(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Accepted writes, decoded against `profile`.
    ///
    /// # Errors
    ///
    /// Returns the first packet that fails to decode.
    pub fn decoded_writes(&self, profile: DeviceProfile) -> Result<Vec<PacketKind>, ProtocolError> {
        let codec = PacketCodec::new(profile);
        self.writes()
            .iter()
            .map(|data| codec.decode(data).map(|(_, kind)| kind))
            .collect()
    }

    /// Check if a link is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }
}

#[async_trait]
impl BleTransport for MemoryTransport {
    async fn connect(&self, device: &DeviceId) -> Result<Box<dyn DeviceLink>, TransportError> {
        let mut state = self.shared.lock();
        if let Some(error) = state.connect_error.take() {
            return Err(error);
        }
        state.connected = true;
        state.events.push(LinkEvent::Connected);
        drop(state);

        Ok(Box::new(MemoryLink {
            id: device.clone(),
            shared: Arc::clone(&self.shared),
            max_write_len: self.max_write_len,
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Link to a [`MemoryTransport`] peripheral.
pub struct MemoryLink {
    id: DeviceId,
    shared: Arc<Shared>,
    max_write_len: usize,
}

#[async_trait]
impl DeviceLink for MemoryLink {
    fn device_id(&self) -> &DeviceId {
        &self.id
    }

    fn max_write_len(&self) -> usize {
        self.max_write_len
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stall = 'locked: {
            let mut state = self.shared.lock();
            if !state.connected {
                return Err(TransportError::Disconnected);
            }

            let packet = Bytes::copy_from_slice(data);
            if data.len() > self.max_write_len {
                state.events.push(LinkEvent::WriteRejected(packet));
                return Err(TransportError::WriteFailed(format!(
                    "{} bytes exceeds write size {}",
                    data.len(),
                    self.max_write_len
                )));
            }

            let n = state.writes;
            state.writes += 1;
            let st = &mut *state;
            let response = match st.hook.as_mut() {
                Some(hook) => hook(n, data),
                None => st.default_response.clone(),
            };
            trace!("Write {} ({} bytes): {:?}", n, data.len(), response);

            let acks = match response {
                WriteResponse::Ack => 1,
                WriteResponse::Burst(count) => count,
                WriteResponse::Silent => 0,
                WriteResponse::Fail(reason) => {
                    state.events.push(LinkEvent::WriteRejected(packet));
                    return Err(TransportError::WriteFailed(reason));
                }
                WriteResponse::Stall(delay) => {
                    state.events.push(LinkEvent::WriteRejected(packet));
                    drop(state);
                    break 'locked delay;
                }
                WriteResponse::Disconnect => {
                    state.connected = false;
                    state.events.push(LinkEvent::Disconnected);
                    drop(state);
                    self.shared.notify.notify_waiters();
                    return Err(TransportError::Disconnected);
                }
            };

            state.events.push(LinkEvent::Write(packet));
            for _ in 0..acks {
                let ack = state.ack_payload.clone();
                state.events.push(LinkEvent::Notification(ack.clone()));
                state.pending.push_back(ack);
            }
            drop(state);

            if acks > 0 {
                self.shared.notify.notify_one();
            }
            return Ok(());
        };
        tokio::time::sleep(stall).await;
        Err(TransportError::Timeout(stall))
    }

    async fn await_notification(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.shared.lock();
                if let Some(notification) = state.pending.pop_front() {
                    return Ok(notification);
                }
                if !state.connected {
                    return Err(TransportError::Disconnected);
                }
            }

            // Stale permits wake us early; the loop re-checks the queue.
            if tokio::time::timeout_at(deadline, self.shared.notify.notified())
                .await
                .is_err()
            {
                return Err(TransportError::Timeout(timeout));
            }
        }
    }

    fn discard_pending_notifications(&mut self) -> usize {
        let mut state = self.shared.lock();
        let discarded = state.pending.len();
        state.pending.clear();
        discarded
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        if state.connected {
            state.connected = false;
            state.events.push(LinkEvent::Disconnected);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }
}
