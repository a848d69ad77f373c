//! Frame types for the upload protocol.
//!
//! A transfer is a handful of control frames around an ordered run of
//! data frames. Data frames are produced by the
//! [`Chunker`](crate::chunker::Chunker); each one carries a zero-copy
//! slice of the encoded animation.

use bytes::Bytes;

use crate::profile::{ControlCommand, DeviceProfile};

/// Control frames exchanged outside the data phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlFrame {
    /// Delete every animation stored on the panel.
    ClearStorage,
    /// Arm the panel for a new animation.
    PrepareUpload,
    /// Mark the end of the transfer.
    UploadComplete,
}

impl ControlFrame {
    /// The start-of-transfer sequence, in the order it is written.
    pub const HANDSHAKE: [ControlFrame; 2] =
        [ControlFrame::ClearStorage, ControlFrame::PrepareUpload];

    /// Look up this command in a device profile.
    #[must_use]
    pub fn command(self, profile: &DeviceProfile) -> ControlCommand {
        match self {
            ControlFrame::ClearStorage => profile.clear_storage,
            ControlFrame::PrepareUpload => profile.prepare_upload,
            ControlFrame::UploadComplete => profile.upload_complete,
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ControlFrame::ClearStorage => "clear-storage",
            ControlFrame::PrepareUpload => "prepare-upload",
            ControlFrame::UploadComplete => "upload-complete",
        }
    }
}

/// Position markers of a data frame within the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameMarker {
    /// First of several frames; carries the total payload length.
    Start,
    /// Neither first nor last.
    Continuation,
    /// Last of several frames.
    End,
    /// The whole payload fits in one frame.
    Single,
}

impl FrameMarker {
    /// Whether the marker opens the transfer.
    #[must_use]
    pub fn is_start(self) -> bool {
        matches!(self, FrameMarker::Start | FrameMarker::Single)
    }

    /// Whether the marker closes the transfer.
    #[must_use]
    pub fn is_end(self) -> bool {
        matches!(self, FrameMarker::End | FrameMarker::Single)
    }
}

/// One data frame of the transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolFrame {
    /// Zero-based position in the transfer.
    pub index: u16,
    /// Number of data frames in the transfer.
    pub total_frames: u16,
    /// Length of the whole encoded payload; present on the start frame only.
    pub total_len: Option<usize>,
    /// Nominal chunk length of the transfer; the final chunk may be shorter.
    pub chunk_len: usize,
    /// This frame's slice of the payload.
    pub payload: Bytes,
}

impl ProtocolFrame {
    /// Position marker derived from the index.
    #[must_use]
    pub fn marker(&self) -> FrameMarker {
        let first = self.index == 0;
        let last = u32::from(self.index) + 1 == u32::from(self.total_frames);
        match (first, last) {
            (true, true) => FrameMarker::Single,
            (true, false) => FrameMarker::Start,
            (false, true) => FrameMarker::End,
            (false, false) => FrameMarker::Continuation,
        }
    }

    /// Whether this is the final frame of the transfer.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.marker().is_end()
    }

    /// Number of chunk bytes that go on the wire for this frame.
    ///
    /// With padding enabled every chunk occupies the nominal chunk length.
    #[must_use]
    pub fn wire_chunk_len(&self, profile: &DeviceProfile) -> usize {
        if profile.pad_final_chunk {
            self.chunk_len
        } else {
            self.payload.len()
        }
    }
}
