//! Transport abstraction traits for marquee.
//!
//! The upload session depends on BLE only through these traits, so it can
//! run against a real adapter or a scripted in-memory link.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Identifier of a BLE peripheral (usually its MAC address).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Create a new device ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive match against an address string.
    #[must_use]
    pub fn matches(&self, address: &str) -> bool {
        self.0.eq_ignore_ascii_case(address)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No usable Bluetooth adapter.
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// The peripheral was not seen while scanning.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Connecting to the peripheral failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The peripheral lacks a required characteristic.
    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(String),

    /// The link dropped.
    #[error("Device disconnected")]
    Disconnected,

    /// An operation did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// A characteristic write failed.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Subscribing to or reading notifications failed.
    #[error("Notification failed: {0}")]
    NotifyFailed(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether the link is gone and further operations are pointless.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Disconnected)
    }
}

/// Something that can open links to BLE peripherals.
///
/// Discovery and GATT setup happen inside `connect`; the returned link is
/// ready to write.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Connect to a peripheral and prepare its upload characteristic.
    async fn connect(&self, device: &DeviceId) -> Result<Box<dyn DeviceLink>, TransportError>;

    /// Get the transport name (e.g., "btleplug", "memory").
    fn name(&self) -> &'static str;
}

/// An open link to one characteristic of one peripheral.
///
/// A link has a single owner and is used strictly sequentially.
#[async_trait]
pub trait DeviceLink: Send {
    /// The connected peripheral.
    fn device_id(&self) -> &DeviceId;

    /// Largest number of bytes one write may carry.
    fn max_write_len(&self) -> usize;

    /// Write one value to the upload characteristic.
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next notification from the peripheral.
    ///
    /// Returns [`TransportError::Timeout`] if none arrives within `timeout`.
    async fn await_notification(&mut self, timeout: Duration) -> Result<Bytes, TransportError>;

    /// Drop notifications that arrived before now. Returns how many.
    fn discard_pending_notifications(&mut self) -> usize;

    /// Disconnect from the peripheral. Disconnecting twice is a no-op.
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Check if the link is still up.
    fn is_connected(&self) -> bool;
}
