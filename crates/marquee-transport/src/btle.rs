//! BLE transport implementation.
//!
//! This module drives real hardware through btleplug: scan for the panel by
//! address, connect, pick the upload characteristic and subscribe to every
//! characteristic that can notify.

use async_trait::async_trait;
use btleplug::api::bleuuid::uuid_from_u16;
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures_util::stream::Stream;
use futures_util::{FutureExt, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::traits::{BleTransport, DeviceId, DeviceLink, TransportError};

/// Service that carries the panel's upload characteristic.
pub const UPLOAD_SERVICE: u16 = 0xFFF0;

/// Default write size: the largest packet the panel's firmware accepts.
pub const DEFAULT_WRITE_SIZE: usize = 243;

/// Parse a characteristic UUID, either full form or a 16-bit short form
/// such as `fff2`.
///
/// # Errors
///
/// Returns an error if the string is neither.
pub fn parse_characteristic(s: &str) -> Result<Uuid, TransportError> {
    let s = s.trim();
    let short = s.trim_start_matches("0x");
    if short.len() <= 4 {
        if let Ok(short) = u16::from_str_radix(short, 16) {
            return Ok(uuid_from_u16(short));
        }
    }
    Uuid::parse_str(s).map_err(|e| TransportError::Other(format!("Invalid UUID {s:?}: {e}")))
}

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// btleplug transport configuration.
#[derive(Debug, Clone)]
pub struct BtleConfig {
    /// How long to scan before giving up on the device.
    pub scan_duration: Duration,
    /// Explicit upload characteristic. When unset, the first
    /// write-without-response characteristic of the upload service is used.
    pub write_characteristic: Option<Uuid>,
    /// Largest write, in bytes.
    pub write_size: usize,
}

impl Default for BtleConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(5),
            write_characteristic: None,
            write_size: DEFAULT_WRITE_SIZE,
        }
    }
}

/// Transport backed by the first local Bluetooth adapter.
pub struct BtleTransport {
    adapter: Adapter,
    config: BtleConfig,
}

impl BtleTransport {
    /// Open the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter is available.
    pub async fn new(config: BtleConfig) -> Result<Self, TransportError> {
        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::AdapterUnavailable("no adapters found".into()))?;

        let info = adapter
            .adapter_info()
            .await
            .unwrap_or_else(|_| "unknown adapter".into());
        info!("Using Bluetooth adapter {}", info);

        Ok(Self { adapter, config })
    }

    /// Get the transport configuration.
    #[must_use]
    pub fn config(&self) -> &BtleConfig {
        &self.config
    }

    async fn find(&self, device: &DeviceId) -> Result<Peripheral, TransportError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;

        debug!("Scanning {:?} for {}", self.config.scan_duration, device);
        tokio::time::sleep(self.config.scan_duration).await;

        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        peripherals
            .into_iter()
            .find(|p| device.matches(&p.address().to_string()))
            .ok_or_else(|| TransportError::DeviceNotFound(device.to_string()))
    }

    fn select_write_characteristic(
        &self,
        characteristics: &[Characteristic],
    ) -> Result<Characteristic, TransportError> {
        if let Some(uuid) = self.config.write_characteristic {
            return characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| TransportError::CharacteristicNotFound(uuid.to_string()));
        }

        let service = uuid_from_u16(UPLOAD_SERVICE);
        let writable =
            |c: &&Characteristic| c.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE);

        characteristics
            .iter()
            .filter(|c| c.service_uuid == service)
            .find(writable)
            .or_else(|| characteristics.iter().find(writable))
            .cloned()
            .ok_or_else(|| {
                TransportError::CharacteristicNotFound("write-without-response".into())
            })
    }
}

#[async_trait]
impl BleTransport for BtleTransport {
    async fn connect(&self, device: &DeviceId) -> Result<Box<dyn DeviceLink>, TransportError> {
        let peripheral = self.find(device).await?;

        peripheral
            .connect()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let setup = async {
            peripheral
                .discover_services()
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

            let characteristics: Vec<_> = peripheral.characteristics().into_iter().collect();
            let write = self.select_write_characteristic(&characteristics)?;
            debug!("Writing to characteristic {}", write.uuid);

            for c in characteristics
                .iter()
                .filter(|c| c.properties.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE))
            {
                peripheral
                    .subscribe(c)
                    .await
                    .map_err(|e| TransportError::NotifyFailed(e.to_string()))?;
                debug!("Subscribed to {}", c.uuid);
            }

            let notifications = peripheral
                .notifications()
                .await
                .map_err(|e| TransportError::NotifyFailed(e.to_string()))?;
            Ok::<_, TransportError>((write, notifications))
        };

        let (write, notifications) =
            release_on_error(setup.await, device, || peripheral.disconnect()).await?;

        info!("Connected to {}", device);

        Ok(Box::new(BtleLink {
            id: device.clone(),
            peripheral,
            write,
            notifications,
            max_write_len: self.config.write_size,
            connected: true,
        }))
    }

    fn name(&self) -> &'static str {
        "btleplug"
    }
}

/// Drop a GATT connection whose setup failed so the panel advertises again.
async fn release_on_error<T, F, Fut>(
    result: Result<T, TransportError>,
    device: &DeviceId,
    disconnect: F,
) -> Result<T, TransportError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = btleplug::Result<()>>,
{
    if let Err(e) = &result {
        debug!("Setup of {} failed ({}), disconnecting", device, e);
        if let Err(e) = disconnect().await {
            warn!("Failed to release {} after setup error: {}", device, e);
        }
    }
    result
}

/// A connected peripheral.
pub struct BtleLink {
    id: DeviceId,
    peripheral: Peripheral,
    write: Characteristic,
    notifications: NotificationStream,
    max_write_len: usize,
    connected: bool,
}

fn write_error(e: btleplug::Error) -> TransportError {
    match e {
        btleplug::Error::NotConnected | btleplug::Error::DeviceNotFound => {
            TransportError::Disconnected
        }
        btleplug::Error::TimedOut(d) => TransportError::Timeout(d),
        other => TransportError::WriteFailed(other.to_string()),
    }
}

#[async_trait]
impl DeviceLink for BtleLink {
    fn device_id(&self) -> &DeviceId {
        &self.id
    }

    fn max_write_len(&self) -> usize {
        self.max_write_len
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }

        let result = self
            .peripheral
            .write(&self.write, data, WriteType::WithoutResponse)
            .await
            .map_err(write_error);

        if matches!(result, Err(TransportError::Disconnected)) {
            self.connected = false;
        }
        result
    }

    async fn await_notification(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }

        match tokio::time::timeout(timeout, self.notifications.next()).await {
            Ok(Some(notification)) => {
                debug!(
                    "Notification from {}: {} bytes",
                    notification.uuid,
                    notification.value.len()
                );
                Ok(Bytes::from(notification.value))
            }
            Ok(None) => {
                self.connected = false;
                Err(TransportError::Disconnected)
            }
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    fn discard_pending_notifications(&mut self) -> usize {
        let mut discarded = 0;
        while let Some(Some(_)) = self.notifications.next().now_or_never() {
            discarded += 1;
        }
        discarded
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;

        self.peripheral
            .disconnect()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to disconnect: {}", e)))?;
        info!("Disconnected from {}", self.id);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_parse_short_characteristic() {
        assert_eq!(
            parse_characteristic("fff2").unwrap().to_string(),
            "0000fff2-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_parse_full_characteristic() {
        let full = "0000fff2-0000-1000-8000-00805f9b34fb";
        assert_eq!(parse_characteristic(full).unwrap().to_string(), full);
        assert!(parse_characteristic("not-a-uuid").is_err());
    }

    #[tokio::test]
    async fn test_failed_setup_disconnects() {
        let id = DeviceId::new("FF:24:06:18:41:5F");
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = release_on_error(
            Err(TransportError::CharacteristicNotFound("fff9".into())),
            &id,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(btleplug::Error::NotConnected)
            },
        )
        .await;

        assert_eq!(
            result,
            Err(TransportError::CharacteristicNotFound("fff9".into()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_successful_setup_keeps_connection() {
        let id = DeviceId::new("FF:24:06:18:41:5F");
        let calls = AtomicUsize::new(0);

        let result = release_on_error(Ok(7), &id, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_write_error_mapping() {
        assert_eq!(
            write_error(btleplug::Error::NotConnected),
            TransportError::Disconnected
        );
        assert!(matches!(
            write_error(btleplug::Error::RuntimeError("busy".into())),
            TransportError::WriteFailed(_)
        ));
    }
}
