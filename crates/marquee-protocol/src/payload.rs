//! Encoded animation payloads and the pre-transfer size check.

use bytes::Bytes;

use crate::codec::ProtocolError;

/// Largest payload the reference firmware stores intact (255 × 196 bytes).
pub const MAX_PAYLOAD_BYTES: usize = 49_980;

const GIF_SIGNATURES: [&[u8; 6]; 2] = [b"GIF87a", b"GIF89a"];

/// The whole animation in device-native format.
///
/// Cloning is cheap; the chunker hands out zero-copy slices of the same
/// buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    bytes: Bytes,
}

impl EncodedPayload {
    /// Wrap already-encoded bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Wrap a GIF file, checking its signature.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotGif`] if the data does not start with a
    /// GIF87a or GIF89a signature.
    pub fn from_gif_bytes(bytes: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        let bytes = bytes.into();
        if !GIF_SIGNATURES
            .iter()
            .any(|signature| bytes.starts_with(&signature[..]))
        {
            return Err(ProtocolError::NotGif);
        }
        Ok(Self { bytes })
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Consume the payload, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

impl AsRef<[u8]> for EncodedPayload {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Check a payload against the device maximum.
///
/// The firmware truncates or corrupts oversized uploads instead of
/// rejecting them, so this runs before any byte is written.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if `payload` exceeds `max`.
pub fn validate_size(payload: &EncodedPayload, max: usize) -> Result<(), ProtocolError> {
    if payload.len() > max {
        return Err(ProtocolError::PayloadTooLarge {
            actual: payload.len(),
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_boundary() {
        let exact = EncodedPayload::new(vec![0u8; MAX_PAYLOAD_BYTES]);
        assert!(validate_size(&exact, MAX_PAYLOAD_BYTES).is_ok());

        let over = EncodedPayload::new(vec![0u8; MAX_PAYLOAD_BYTES + 1]);
        assert_eq!(
            validate_size(&over, MAX_PAYLOAD_BYTES),
            Err(ProtocolError::PayloadTooLarge {
                actual: MAX_PAYLOAD_BYTES + 1,
                max: MAX_PAYLOAD_BYTES,
            })
        );
    }

    #[test]
    fn test_gif_signature_check() {
        assert!(EncodedPayload::from_gif_bytes(&b"GIF89a\x01\x00"[..]).is_ok());
        assert!(EncodedPayload::from_gif_bytes(&b"GIF87a"[..]).is_ok());
        assert_eq!(
            EncodedPayload::from_gif_bytes(&b"\x89PNG\r\n"[..]),
            Err(ProtocolError::NotGif)
        );
        assert_eq!(
            EncodedPayload::from_gif_bytes(Bytes::new()),
            Err(ProtocolError::NotGif)
        );
    }
}
