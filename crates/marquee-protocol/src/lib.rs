//! # marquee-protocol
//!
//! Wire protocol definitions for uploading animations to the flexible
//! 96x20 LED matrix panel over BLE.
//!
//! This crate is pure: it builds and parses bytes, and never touches a
//! radio. It holds the device profile table, the packet envelope codec,
//! the pre-transfer size check and the chunker that turns one encoded
//! animation into an ordered run of data frames.
//!
//! ## Transfer shape
//!
//! - `ClearStorage`, `PrepareUpload` - start-of-transfer control packets
//! - data packets `0..n` - one payload chunk each
//! - `UploadComplete` - end-of-transfer control packet
//!
//! ## Example
//!
//! ```rust
//! use marquee_protocol::{codec, Chunker, EncodedPayload, FLEX_96X20_V1};
//!
//! let payload = EncodedPayload::from_gif_bytes(&b"GIF89a...."[..]).unwrap();
//! marquee_protocol::validate_size(&payload, FLEX_96X20_V1.max_payload_bytes).unwrap();
//!
//! let chunker = Chunker::new(&payload, 243, &FLEX_96X20_V1).unwrap();
//! for frame in &chunker {
//!     let packet = codec::encode_data(&FLEX_96X20_V1, &frame).unwrap();
//!     assert!(packet.len() <= 243);
//! }
//! ```

pub mod chunker;
pub mod codec;
pub mod frames;
pub mod payload;
pub mod profile;
pub mod version;

pub use chunker::{chunk_len_for, Chunker, Frames};
pub use codec::{PacketCodec, PacketKind, ProtocolError};
pub use frames::{ControlFrame, FrameMarker, ProtocolFrame};
pub use payload::{validate_size, EncodedPayload, MAX_PAYLOAD_BYTES};
pub use profile::{ColorTable, DeviceProfile, PanelSize, FLEX_96X20_V1};
pub use version::{ProfileVersion, PROFILE_VERSION};
