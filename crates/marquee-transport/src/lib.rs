//! # marquee-transport
//!
//! Transport abstraction layer for marquee uploads.
//!
//! This crate provides a unified interface over the ways a packet can reach
//! a panel:
//!
//! - **btleplug** - real BLE hardware through the platform Bluetooth stack
//! - **memory** - a scripted in-process peripheral for tests and dry runs
//!
//! ## Transport Abstraction
//!
//! All transports implement the `BleTransport` and `DeviceLink` traits,
//! allowing the upload session to be radio-agnostic.
//!
//! ```rust,ignore
//! use marquee_transport::{BleTransport, DeviceId};
//!
//! async fn send(transport: &dyn BleTransport, packet: &[u8]) {
//!     let mut link = transport.connect(&DeviceId::new("FF:24:06:18:41:5F")).await?;
//!     link.write(packet).await?;
//!     link.disconnect().await?;
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "btleplug")]
pub mod btle;

pub use memory::{LinkEvent, MemoryTransport, WriteResponse};
pub use traits::{BleTransport, DeviceId, DeviceLink, TransportError};

#[cfg(feature = "btleplug")]
pub use btle::{parse_characteristic, BtleConfig, BtleTransport};
