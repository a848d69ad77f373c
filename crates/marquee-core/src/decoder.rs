//! Animation decoding.
//!
//! A [`Decoder`] turns an image file into composited animation frames.
//! [`GifDecoder`] handles GIF input, applying each frame's disposal method
//! so every output frame is a full picture.

use marquee_protocol::PanelSize;
use thiserror::Error;
use tracing::debug;

use crate::encoder::{AnimationFrame, PixelFrame, Rgb};

/// Decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The input is not a readable image.
    #[error("Invalid image: {0}")]
    Invalid(String),

    /// The image decoded to no frames.
    #[error("Image contains no frames")]
    NoFrames,
}

impl From<gif::DecodingError> for DecodeError {
    fn from(e: gif::DecodingError) -> Self {
        DecodeError::Invalid(e.to_string())
    }
}

/// Something that decodes image bytes into animation frames.
pub trait Decoder {
    /// Decode `data` into frames at the image's own size.
    ///
    /// # Errors
    ///
    /// Returns an error if the data cannot be decoded or has no frames.
    fn decode(&self, data: &[u8]) -> Result<Vec<AnimationFrame>, DecodeError>;
}

/// GIF decoder backed by the `gif` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct GifDecoder;

impl GifDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

const RGBA: usize = 4;

impl Decoder for GifDecoder {
    fn decode(&self, data: &[u8]) -> Result<Vec<AnimationFrame>, DecodeError> {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::RGBA);
        let mut reader = options.read_info(data)?;

        let size = PanelSize::new(reader.width(), reader.height());
        let screen_width = usize::from(size.width);
        let mut canvas = vec![0u8; size.pixel_count() * RGBA];
        let mut frames = Vec::new();

        while let Some(frame) = reader.read_next_frame()? {
            let saved = (frame.dispose == gif::DisposalMethod::Previous).then(|| canvas.clone());

            let left = usize::from(frame.left);
            let top = usize::from(frame.top);
            let width = usize::from(frame.width);
            let rows = if width == 0 || frame.height == 0 {
                debug!("Skipping empty {}x{} image", frame.width, frame.height);
                frame.buffer[..0].chunks_exact(RGBA)
            } else {
                frame.buffer.chunks_exact(width * RGBA)
            };
            for (row, line) in rows.enumerate() {
                let y = top + row;
                if y >= usize::from(size.height) {
                    break;
                }
                for (col, px) in line.chunks_exact(RGBA).enumerate() {
                    let x = left + col;
                    if x >= screen_width || px[3] == 0 {
                        continue;
                    }
                    let at = (y * screen_width + x) * RGBA;
                    canvas[at..at + RGBA].copy_from_slice(px);
                }
            }

            let pixels = canvas
                .chunks_exact(RGBA)
                .map(|px| Rgb::new(px[0], px[1], px[2]))
                .collect();
            let picture =
                PixelFrame::new(size, pixels).map_err(|e| DecodeError::Invalid(e.to_string()))?;
            frames.push(AnimationFrame::new(picture, u32::from(frame.delay) * 10));

            match frame.dispose {
                gif::DisposalMethod::Background => {
                    let height = usize::from(frame.height);
                    for y in top..(top + height).min(usize::from(size.height)) {
                        let start = (y * screen_width + left.min(screen_width)) * RGBA;
                        let end = (y * screen_width + (left + width).min(screen_width)) * RGBA;
                        canvas[start..end].fill(0);
                    }
                }
                gif::DisposalMethod::Previous => {
                    if let Some(saved) = saved {
                        canvas = saved;
                    }
                }
                _ => {}
            }
        }

        if frames.is_empty() {
            return Err(DecodeError::NoFrames);
        }
        debug!("Decoded {} frames at {}", frames.len(), size);
        Ok(frames)
    }
}
