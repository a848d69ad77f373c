//! Codec for the panel's packet envelope.
//!
//! Every packet, control or data, shares one envelope:
//!
//! ```text
//! ┌──────────┬────────────┬────────────┬──────────────┬─────────────┐
//! │ magic 4B │ length u16 │ seq u16    │ body         │ sum u16     │
//! │ AA55FFFF │ LE         │ LE         │ C1 02 + TLVs │ LE          │
//! └──────────┴────────────┴────────────┴──────────────┴─────────────┘
//! ```
//!
//! `length` counts every byte after the length field, checksum included.
//! The checksum is the wrapping 16-bit sum of every byte before it.
//!
//! Data bodies carry a packet info record (frame count, index, chunk
//! length) and a chunk record whose length uses BER encoding.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::{ControlFrame, ProtocolFrame};
use crate::profile::DeviceProfile;
use crate::version::{ProfileVersion, PROFILE_VERSION};

/// Packet magic size in bytes.
pub const MAGIC_SIZE: usize = 4;

/// Length field size in bytes.
pub const LENGTH_FIELD_SIZE: usize = 2;

/// Sequence field size in bytes.
pub const SEQUENCE_FIELD_SIZE: usize = 2;

/// Checksum trailer size in bytes.
pub const CHECKSUM_SIZE: usize = 2;

/// Bytes every packet spends outside its body.
pub const ENVELOPE_OVERHEAD: usize =
    MAGIC_SIZE + LENGTH_FIELD_SIZE + SEQUENCE_FIELD_SIZE + CHECKSUM_SIZE;

/// Value length of the packet info record.
const PACKET_INFO_LEN: usize = 7;

/// Protocol errors that can occur while building or parsing packets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Encoded payload exceeds what the firmware stores intact.
    #[error("Payload size {actual} exceeds device maximum {max}")]
    PayloadTooLarge { actual: usize, max: usize },

    /// Negotiated write size cannot hold a single payload byte.
    #[error("Write size {write_size} leaves no room for payload after {overhead} header bytes")]
    Chunking { write_size: usize, overhead: usize },

    /// Frame count does not fit the 16-bit counter.
    #[error("Payload needs {0} frames, more than the frame counter can express")]
    TooManyFrames(usize),

    /// Packet length does not fit the 16-bit length field.
    #[error("Packet length {0} exceeds the length field")]
    PacketTooLarge(usize),

    /// Raw input is not a GIF stream.
    #[error("Input is not a GIF87a/GIF89a stream")]
    NotGif,

    /// Not enough data to decode a packet.
    #[error("Incomplete packet: need {0} more bytes")]
    Incomplete(usize),

    /// Checksum trailer does not match the packet contents.
    #[error("Checksum mismatch: computed {expected:#06x}, trailer {actual:#06x}")]
    Checksum { expected: u16, actual: u16 },

    /// Invalid packet data.
    #[error("Invalid packet: {0}")]
    Malformed(String),

    /// Profile uses a packet layout this crate cannot build.
    #[error("Unsupported profile version {0}, expected {}", PROFILE_VERSION)]
    UnsupportedProfile(ProfileVersion),
}

/// Wrapping 16-bit byte sum.
#[must_use]
pub fn checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |sum, &byte| sum.wrapping_add(u16::from(byte)))
}

/// Number of bytes a BER length takes.
#[must_use]
pub fn ber_length_size(len: usize) -> usize {
    match len {
        0..=0x7F => 1,
        0x80..=0xFF => 2,
        _ => 3,
    }
}

fn put_ber_length(buf: &mut BytesMut, len: usize) {
    match len {
        0..=0x7F => buf.put_u8(len as u8),
        0x80..=0xFF => {
            buf.put_u8(0x81);
            buf.put_u8(len as u8);
        }
        _ => {
            buf.put_u8(0x82);
            buf.put_u16(len as u16);
        }
    }
}

fn read_ber_length(data: &[u8]) -> Result<(usize, usize), ProtocolError> {
    match data {
        [first, ..] if *first < 0x80 => Ok((usize::from(*first), 1)),
        [0x81, len, ..] => Ok((usize::from(*len), 2)),
        [0x82, hi, lo, ..] => Ok((usize::from(u16::from_be_bytes([*hi, *lo])), 3)),
        _ => Err(ProtocolError::Malformed("bad chunk length".into())),
    }
}

/// Bytes a data packet spends outside its chunk, for a chunk of `chunk_len`.
#[must_use]
pub fn data_overhead(profile: &DeviceProfile, chunk_len: usize) -> usize {
    ENVELOPE_OVERHEAD
        + profile.command_class.len()
        + profile.upload_attributes.len()
        + 2
        + PACKET_INFO_LEN
        + 1
        + ber_length_size(chunk_len)
}

/// Wrap a body in the packet envelope.
///
/// # Errors
///
/// Returns an error if the body is too long for the length field.
pub fn encode_packet(
    profile: &DeviceProfile,
    sequence: u16,
    body: &[u8],
) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(ENVELOPE_OVERHEAD + body.len());
    encode_into(profile, sequence, body, &mut buf)?;
    Ok(buf.freeze())
}

/// Wrap a body in the packet envelope, appending to an existing buffer.
///
/// # Errors
///
/// Returns an error if the body is too long for the length field.
pub fn encode_into(
    profile: &DeviceProfile,
    sequence: u16,
    body: &[u8],
    buf: &mut BytesMut,
) -> Result<(), ProtocolError> {
    let length = SEQUENCE_FIELD_SIZE + body.len() + CHECKSUM_SIZE;
    let length_field =
        u16::try_from(length).map_err(|_| ProtocolError::PacketTooLarge(length))?;

    let start = buf.len();
    buf.reserve(MAGIC_SIZE + LENGTH_FIELD_SIZE + length);
    buf.put_slice(&profile.magic);
    buf.put_u16_le(length_field);
    buf.put_u16_le(sequence);
    buf.put_slice(body);
    let sum = checksum(&buf[start..]);
    buf.put_u16_le(sum);

    Ok(())
}

/// Encode a control packet.
///
/// # Errors
///
/// Returns an error if the profile's command records are too long.
pub fn encode_control(
    profile: &DeviceProfile,
    frame: ControlFrame,
) -> Result<Bytes, ProtocolError> {
    let command = frame.command(profile);
    let mut body = BytesMut::with_capacity(profile.command_class.len() + command.records.len());
    body.put_slice(&profile.command_class);
    body.put_slice(command.records);
    encode_packet(profile, command.sequence, &body)
}

/// Encode a data packet. The envelope sequence is the frame index.
///
/// # Errors
///
/// Returns an error if the chunk is too long for its length fields.
pub fn encode_data(profile: &DeviceProfile, frame: &ProtocolFrame) -> Result<Bytes, ProtocolError> {
    let chunk_len = frame.wire_chunk_len(profile).max(frame.payload.len());
    let chunk_len_field =
        u16::try_from(chunk_len).map_err(|_| ProtocolError::PacketTooLarge(chunk_len))?;

    let mut body = BytesMut::with_capacity(data_overhead(profile, chunk_len) + chunk_len);
    body.put_slice(&profile.command_class);
    body.put_slice(profile.upload_attributes);

    body.put_u8(profile.packet_info_tag);
    body.put_u8(PACKET_INFO_LEN as u8);
    body.put_u16_le(frame.total_frames);
    body.put_u16_le(frame.index);
    body.put_u16_le(chunk_len_field);
    body.put_u8(0x00);

    body.put_u8(profile.chunk_tag);
    put_ber_length(&mut body, chunk_len);
    body.put_slice(&frame.payload);
    body.put_bytes(0x00, chunk_len - frame.payload.len());

    encode_packet(profile, frame.index, &body)
}

/// A packet with a verified envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Envelope sequence number.
    pub sequence: u16,
    /// Body between the sequence and the checksum.
    pub body: Bytes,
}

/// Contents of a data packet body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRecord {
    pub index: u16,
    pub total_frames: u16,
    /// Chunk bytes as sent, padding included.
    pub chunk: Bytes,
}

/// What a packet carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketKind {
    Control(ControlFrame),
    Data(DataRecord),
}

impl Packet {
    /// Classify the packet body against a profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the body matches neither a control command nor
    /// the data layout.
    pub fn kind(&self, profile: &DeviceProfile) -> Result<PacketKind, ProtocolError> {
        let records = self
            .body
            .strip_prefix(&profile.command_class[..])
            .ok_or_else(|| ProtocolError::Malformed("unknown command class".into()))?;

        for control in [
            ControlFrame::ClearStorage,
            ControlFrame::PrepareUpload,
            ControlFrame::UploadComplete,
        ] {
            let command = control.command(profile);
            if command.sequence == self.sequence && records == command.records {
                return Ok(PacketKind::Control(control));
            }
        }

        let rest = records
            .strip_prefix(profile.upload_attributes)
            .ok_or_else(|| ProtocolError::Malformed("unknown command".into()))?;

        let (info, rest) = match rest {
            [tag, len, info @ ..]
                if *tag == profile.packet_info_tag
                    && usize::from(*len) == PACKET_INFO_LEN
                    && info.len() >= PACKET_INFO_LEN =>
            {
                info.split_at(PACKET_INFO_LEN)
            }
            _ => return Err(ProtocolError::Malformed("missing packet info".into())),
        };
        let total_frames = u16::from_le_bytes([info[0], info[1]]);
        let index = u16::from_le_bytes([info[2], info[3]]);
        let declared_len = usize::from(u16::from_le_bytes([info[4], info[5]]));

        let rest = match rest {
            [tag, rest @ ..] if *tag == profile.chunk_tag => rest,
            _ => return Err(ProtocolError::Malformed("missing chunk record".into())),
        };
        let (chunk_len, used) = read_ber_length(rest)?;
        let chunk = &rest[used..];
        if chunk.len() != chunk_len || chunk_len != declared_len {
            return Err(ProtocolError::Malformed(format!(
                "chunk of {} bytes, declared {declared_len}/{chunk_len}",
                chunk.len()
            )));
        }

        Ok(PacketKind::Data(DataRecord {
            index,
            total_frames,
            chunk: Bytes::copy_from_slice(chunk),
        }))
    }
}

/// Decode and verify one packet envelope.
///
/// # Errors
///
/// Returns an error if the data is incomplete, has the wrong magic, or
/// fails its checksum.
pub fn decode(profile: &DeviceProfile, data: &[u8]) -> Result<Packet, ProtocolError> {
    if data.len() < ENVELOPE_OVERHEAD {
        return Err(ProtocolError::Incomplete(ENVELOPE_OVERHEAD - data.len()));
    }
    if data[..MAGIC_SIZE] != profile.magic {
        return Err(ProtocolError::Malformed("bad magic".into()));
    }

    let length = usize::from(u16::from_le_bytes([data[4], data[5]]));
    if length < SEQUENCE_FIELD_SIZE + CHECKSUM_SIZE {
        return Err(ProtocolError::Malformed(format!("length field {length}")));
    }

    let total_size = MAGIC_SIZE + LENGTH_FIELD_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let (covered, trailer) = data[..total_size].split_at(total_size - CHECKSUM_SIZE);
    let actual = u16::from_le_bytes([trailer[0], trailer[1]]);
    let expected = checksum(covered);
    if expected != actual {
        return Err(ProtocolError::Checksum { expected, actual });
    }

    let header = MAGIC_SIZE + LENGTH_FIELD_SIZE;
    Ok(Packet {
        sequence: u16::from_le_bytes([data[header], data[header + 1]]),
        body: Bytes::copy_from_slice(&covered[header + SEQUENCE_FIELD_SIZE..]),
    })
}

/// Profile-bound packet codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketCodec {
    profile: DeviceProfile,
}

impl PacketCodec {
    /// Create a codec for a device profile.
    #[must_use]
    pub fn new(profile: DeviceProfile) -> Self {
        Self { profile }
    }

    /// The profile this codec encodes for.
    #[must_use]
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Encode a control packet.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode_control(&self, frame: ControlFrame) -> Result<Bytes, ProtocolError> {
        encode_control(&self.profile, frame)
    }

    /// Encode a data packet.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode_data(&self, frame: &ProtocolFrame) -> Result<Bytes, ProtocolError> {
        encode_data(&self.profile, frame)
    }

    /// Decode and classify a packet.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet is invalid.
    pub fn decode(&self, data: &[u8]) -> Result<(Packet, PacketKind), ProtocolError> {
        let packet = decode(&self.profile, data)?;
        let kind = packet.kind(&self.profile)?;
        Ok((packet, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::FLEX_96X20_V1;
    use data_encoding::HEXLOWER;

    fn hex(s: &str) -> Vec<u8> {
        HEXLOWER.decode(s.as_bytes()).unwrap()
    }

    #[test]
    fn test_control_packets_match_capture() {
        let profile = FLEX_96X20_V1;

        let clear = encode_control(&profile, ControlFrame::ClearStorage).unwrap();
        assert_eq!(&clear[..], &hex("aa55ffff0a000900c102080200ffdc04")[..]);

        let prepare = encode_control(&profile, ControlFrame::PrepareUpload).unwrap();
        assert_eq!(&prepare[..], &hex("aa55ffff0a000900c10208020000dd03")[..]);

        let complete = encode_control(&profile, ControlFrame::UploadComplete).unwrap();
        assert_eq!(&complete[..], &hex("aa55ffff0b000f00c10236030100001404")[..]);
    }

    #[test]
    fn test_data_packet_layout_matches_capture() {
        let profile = FLEX_96X20_V1;
        let payload = Bytes::from(vec![0x47u8; 196]);
        let frame = ProtocolFrame {
            index: 1,
            total_frames: 12,
            total_len: None,
            chunk_len: 196,
            payload: payload.clone(),
        };

        let packet = encode_data(&profile, &frame).unwrap();
        let header = hex(concat!(
            "aa55ffff",
            "ed",
            "000100",
            "c1020901010c01000d01000e0100140301090a11040001000a1207",
            "0c",
            "000100",
            "c4000013",
            "81c4",
        ));

        assert_eq!(packet.len(), header.len() + 196 + CHECKSUM_SIZE);
        assert_eq!(&packet[..header.len()], &header[..]);
        assert_eq!(&packet[header.len()..header.len() + 196], &payload[..]);

        let covered = &packet[..packet.len() - CHECKSUM_SIZE];
        let trailer = &packet[packet.len() - CHECKSUM_SIZE..];
        assert_eq!(u16::from_le_bytes([trailer[0], trailer[1]]), checksum(covered));
        assert_eq!(header.len(), data_overhead(&profile, 196) - CHECKSUM_SIZE);
    }

    #[test]
    fn test_final_chunk_is_padded_on_the_wire() {
        let profile = FLEX_96X20_V1;
        let frame = ProtocolFrame {
            index: 2,
            total_frames: 3,
            total_len: None,
            chunk_len: 196,
            payload: Bytes::from_static(b"tail"),
        };

        let packet = encode_data(&profile, &frame).unwrap();
        assert_eq!(packet.len(), data_overhead(&profile, 196) + 196);

        let (_, kind) = PacketCodec::new(profile).decode(&packet).unwrap();
        match kind {
            PacketKind::Data(record) => {
                assert_eq!(record.index, 2);
                assert_eq!(record.total_frames, 3);
                assert_eq!(&record.chunk[..4], b"tail");
                assert!(record.chunk[4..].iter().all(|&b| b == 0));
            }
            other => panic!("Expected data packet, got {:?}", other),
        }
    }

    #[test]
    fn test_short_chunk_uses_short_ber_length() {
        let mut profile = FLEX_96X20_V1;
        profile.pad_final_chunk = false;
        let frame = ProtocolFrame {
            index: 0,
            total_frames: 1,
            total_len: Some(5),
            chunk_len: 196,
            payload: Bytes::from_static(b"GIF89"),
        };

        let packet = encode_data(&profile, &frame).unwrap();
        assert_eq!(packet.len(), data_overhead(&profile, 5) + 5);
        assert_eq!(data_overhead(&profile, 5), 46);
        assert_eq!(data_overhead(&profile, 196), 47);

        let (packet, kind) = PacketCodec::new(profile).decode(&packet).unwrap();
        assert_eq!(packet.sequence, 0);
        assert!(matches!(kind, PacketKind::Data(ref r) if &r.chunk[..] == b"GIF89"));
    }

    #[test]
    fn test_control_packets_classify() {
        let codec = PacketCodec::new(FLEX_96X20_V1);
        for control in [
            ControlFrame::ClearStorage,
            ControlFrame::PrepareUpload,
            ControlFrame::UploadComplete,
        ] {
            let packet = codec.encode_control(control).unwrap();
            let (_, kind) = codec.decode(&packet).unwrap();
            assert_eq!(kind, PacketKind::Control(control));
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let profile = FLEX_96X20_V1;
        let packet = encode_control(&profile, ControlFrame::ClearStorage).unwrap();

        match decode(&profile, &packet[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
        match decode(&profile, &packet[..packet.len() - 1]) {
            Err(ProtocolError::Incomplete(1)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let profile = FLEX_96X20_V1;
        let mut packet = encode_control(&profile, ControlFrame::PrepareUpload)
            .unwrap()
            .to_vec();
        packet[9] ^= 0x01;

        assert!(matches!(
            decode(&profile, &packet),
            Err(ProtocolError::Checksum { .. })
        ));

        packet[0] = 0x00;
        assert!(matches!(
            decode(&profile, &packet),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0xFF; 258]), 0xFF_u16.wrapping_mul(258));
    }
}
