//! # marquee-core
//!
//! Animation encoding and the BLE upload session for marquee.
//!
//! This crate provides the pieces between an image and the radio:
//!
//! - **Encoder** - pixel frames to the panel's GIF payload
//! - **Decoder** - GIF files to composited pixel frames
//! - **Session** - the handshake / transfer / completion state machine
//! - **Upload** - one-call entry points over any [`BleTransport`]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Encoder   │────▶│   Chunker   │────▶│   Session   │────▶│ DeviceLink  │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! [`BleTransport`]: marquee_transport::BleTransport

pub mod decoder;
pub mod encoder;
pub mod metrics;
pub mod session;
pub mod upload;

pub use decoder::{DecodeError, Decoder, GifDecoder};
pub use encoder::{AnimationFrame, EncodingError, FrameEncoder, PixelFrame, Rgb};
pub use session::{
    AckStrategy, CancelToken, FailureCause, Progress, SessionConfig, SessionState, SessionStats,
    TransferSession, UploadError, UploadResult,
};
pub use upload::{upload, upload_payload, UploadOptions};
