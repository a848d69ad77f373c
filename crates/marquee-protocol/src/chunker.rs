//! Splitting an encoded payload into data frames.
//!
//! Chunk boundaries depend only on the negotiated write size: each data
//! packet, header included, must fit in one BLE write. Frames are produced
//! lazily and the sequence can be restarted from the first frame at any
//! time.

use bytes::Bytes;

use crate::codec::{data_overhead, ProtocolError};
use crate::frames::ProtocolFrame;
use crate::payload::EncodedPayload;
use crate::profile::DeviceProfile;
use crate::version::PROFILE_VERSION;

/// Largest chunk that, with its header, fits in `write_size` bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::Chunking`] if the header alone fills the write.
pub fn chunk_len_for(write_size: usize, profile: &DeviceProfile) -> Result<usize, ProtocolError> {
    let overhead = data_overhead(profile, 0);
    if write_size <= overhead {
        return Err(ProtocolError::Chunking {
            write_size,
            overhead,
        });
    }

    // A longer chunk may need a longer BER length, which eats into the chunk.
    let mut len = (write_size - overhead).min(profile.max_chunk_payload);
    while len > 0 && data_overhead(profile, len) + len > write_size {
        len -= 1;
    }

    if len == 0 {
        return Err(ProtocolError::Chunking {
            write_size,
            overhead,
        });
    }
    Ok(len)
}

/// Frame plan for one payload at one write size.
#[derive(Debug, Clone)]
pub struct Chunker {
    payload: Bytes,
    chunk_len: usize,
    total_frames: u16,
}

impl Chunker {
    /// Plan the frames for `payload` at `write_size`.
    ///
    /// An empty payload still produces one (empty) frame so the transfer has
    /// a start and an end.
    ///
    /// # Errors
    ///
    /// Returns an error if the write size leaves no room for payload, or the
    /// frame count does not fit the frame counter.
    pub fn new(
        payload: &EncodedPayload,
        write_size: usize,
        profile: &DeviceProfile,
    ) -> Result<Self, ProtocolError> {
        if !PROFILE_VERSION.is_compatible_with(&profile.version) {
            return Err(ProtocolError::UnsupportedProfile(profile.version));
        }
        let chunk_len = chunk_len_for(write_size, profile)?;
        let count = payload.len().div_ceil(chunk_len).max(1);
        let total_frames = u16::try_from(count).map_err(|_| ProtocolError::TooManyFrames(count))?;

        Ok(Self {
            payload: payload.as_bytes().clone(),
            chunk_len,
            total_frames,
        })
    }

    /// Chunk length used for every frame but possibly the last.
    #[must_use]
    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    /// Number of frames in the sequence.
    #[must_use]
    pub fn frame_count(&self) -> u16 {
        self.total_frames
    }

    /// Total payload length.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Iterate the frames from the first one.
    #[must_use]
    pub fn frames(&self) -> Frames {
        Frames {
            payload: self.payload.clone(),
            chunk_len: self.chunk_len,
            total_frames: self.total_frames,
            next: 0,
        }
    }

    /// Build the frame at `index`, if it exists.
    #[must_use]
    pub fn frame(&self, index: u16) -> Option<ProtocolFrame> {
        (index < self.total_frames)
            .then(|| slice_frame(&self.payload, self.chunk_len, self.total_frames, index))
    }
}

fn slice_frame(payload: &Bytes, chunk_len: usize, total_frames: u16, index: u16) -> ProtocolFrame {
    let start = (usize::from(index) * chunk_len).min(payload.len());
    let end = (start + chunk_len).min(payload.len());
    ProtocolFrame {
        index,
        total_frames,
        total_len: (index == 0).then_some(payload.len()),
        chunk_len,
        payload: payload.slice(start..end),
    }
}

impl<'a> IntoIterator for &'a Chunker {
    type Item = ProtocolFrame;
    type IntoIter = Frames;

    fn into_iter(self) -> Self::IntoIter {
        self.frames()
    }
}

/// Lazy frame iterator returned by [`Chunker::frames`].
#[derive(Debug, Clone)]
pub struct Frames {
    payload: Bytes,
    chunk_len: usize,
    total_frames: u16,
    next: u16,
}

impl Iterator for Frames {
    type Item = ProtocolFrame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total_frames {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(slice_frame(
            &self.payload,
            self.chunk_len,
            self.total_frames,
            index,
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::from(self.total_frames - self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Frames {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_data;
    use crate::profile::FLEX_96X20_V1;
    use crate::version::ProfileVersion;

    fn payload(len: usize) -> EncodedPayload {
        EncodedPayload::new((0..len).map(|i| (i * 31 % 251) as u8).collect::<Vec<u8>>())
    }

    #[test]
    fn test_chunk_len_for_write_sizes() {
        let profile = FLEX_96X20_V1;
        assert_eq!(chunk_len_for(243, &profile), Ok(196));
        assert_eq!(chunk_len_for(512, &profile), Ok(196));
        assert_eq!(chunk_len_for(182, &profile), Ok(135));
        assert_eq!(chunk_len_for(174, &profile), Ok(127));
        assert_eq!(chunk_len_for(175, &profile), Ok(128));
        assert_eq!(chunk_len_for(47, &profile), Ok(1));
        assert_eq!(
            chunk_len_for(46, &profile),
            Err(ProtocolError::Chunking {
                write_size: 46,
                overhead: 46
            })
        );
        assert!(chunk_len_for(20, &profile).is_err());
    }

    #[test]
    fn test_slices_reconstruct_payload() {
        let profile = FLEX_96X20_V1;
        for len in [0, 1, 195, 196, 197, 12_000, 49_980] {
            for write_size in [47, 100, 182, 243, 512] {
                let payload = payload(len);
                let chunker = match Chunker::new(&payload, write_size, &profile) {
                    Ok(chunker) => chunker,
                    Err(ProtocolError::TooManyFrames(_)) => continue,
                    Err(other) => panic!("unexpected error {:?}", other),
                };

                let mut rebuilt = Vec::with_capacity(len);
                for frame in &chunker {
                    rebuilt.extend_from_slice(&frame.payload);
                }
                assert_eq!(&rebuilt[..], payload.as_ref(), "len {len} write {write_size}");
            }
        }
    }

    #[test]
    fn test_indices_are_monotonic_with_one_end_marker() {
        let profile = FLEX_96X20_V1;
        let chunker = Chunker::new(&payload(1000), 182, &profile).unwrap();
        let frames: Vec<_> = chunker.frames().collect();

        assert_eq!(frames.len(), usize::from(chunker.frame_count()));
        for (expected, frame) in frames.iter().enumerate() {
            assert_eq!(usize::from(frame.index), expected);
        }
        assert!(frames[0].marker().is_start());
        assert_eq!(frames[0].total_len, Some(1000));
        assert!(frames[1..].iter().all(|f| f.total_len.is_none()));

        let ends: Vec<_> = frames.iter().filter(|f| f.marker().is_end()).collect();
        assert_eq!(ends.len(), 1);
        assert_eq!(ends[0].index, chunker.frame_count() - 1);
    }

    #[test]
    fn test_frames_restart_from_first() {
        let profile = FLEX_96X20_V1;
        let chunker = Chunker::new(&payload(600), 243, &profile).unwrap();

        let mut first_pass = chunker.frames();
        first_pass.next();
        first_pass.next();

        let second_pass: Vec<_> = chunker.frames().collect();
        assert_eq!(second_pass[0].index, 0);
        assert_eq!(second_pass, chunker.frames().collect::<Vec<_>>());
        assert_eq!(chunker.frame(1), Some(second_pass[1].clone()));
        assert_eq!(chunker.frame(chunker.frame_count()), None);
    }

    #[test]
    fn test_reference_sizes() {
        let profile = FLEX_96X20_V1;

        let chunker = Chunker::new(&payload(12_000), 182, &profile).unwrap();
        assert_eq!(chunker.chunk_len(), 135);
        assert_eq!(chunker.frame_count(), 89);

        let chunker = Chunker::new(&payload(49_980), 243, &profile).unwrap();
        assert_eq!(chunker.frame_count(), 255);
    }

    #[test]
    fn test_every_packet_fits_write_size() {
        let profile = FLEX_96X20_V1;
        for write_size in [47, 128, 174, 175, 182, 243] {
            let chunker = Chunker::new(&payload(2_000), write_size, &profile).unwrap();
            for frame in &chunker {
                let packet = encode_data(&profile, &frame).unwrap();
                assert!(packet.len() <= write_size, "{} > {write_size}", packet.len());
            }
        }
    }

    #[test]
    fn test_incompatible_profile_rejected() {
        let profile = DeviceProfile {
            version: ProfileVersion::new(2, 0),
            ..FLEX_96X20_V1
        };
        let payload = EncodedPayload::new(vec![0u8; 10]);

        assert_eq!(
            Chunker::new(&payload, 243, &profile).err(),
            Some(ProtocolError::UnsupportedProfile(ProfileVersion::new(2, 0)))
        );

        let newer_minor = DeviceProfile {
            version: ProfileVersion::new(1, 3),
            ..FLEX_96X20_V1
        };
        assert!(Chunker::new(&payload, 243, &newer_minor).is_ok());
    }

    #[test]
    fn test_empty_payload_has_single_frame() {
        let profile = FLEX_96X20_V1;
        let chunker = Chunker::new(&payload(0), 243, &profile).unwrap();
        let frames: Vec<_> = chunker.frames().collect();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.is_empty());
        assert!(frames[0].is_last());
    }
}
