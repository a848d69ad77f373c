//! Frame encoding for the panel.
//!
//! Pixel frames are mapped through the profile's fixed palette and written
//! as one looping GIF89a stream, the format the panel stores and plays.

use marquee_protocol::{DeviceProfile, EncodedPayload, PanelSize};
use thiserror::Error;
use tracing::debug;

/// Encoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// No frames to encode.
    #[error("Animation has no frames")]
    Empty,

    /// A frame does not match the panel.
    #[error("Frame {index} is {actual}, panel is {expected}")]
    Dimensions {
        index: usize,
        expected: PanelSize,
        actual: PanelSize,
    },

    /// Pixel buffer length does not match the frame size.
    #[error("Expected {expected} pixels, got {actual}")]
    PixelCount { expected: usize, actual: usize },

    /// The GIF writer failed.
    #[error("GIF encoding failed: {0}")]
    Gif(String),
}

impl From<gif::EncodingError> for EncodingError {
    fn from(e: gif::EncodingError) -> Self {
        EncodingError::Gif(e.to_string())
    }
}

/// One RGB pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// A fixed-size grid of pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFrame {
    size: PanelSize,
    pixels: Vec<Rgb>,
}

impl PixelFrame {
    /// Create a frame from row-major pixels.
    ///
    /// # Errors
    ///
    /// Returns an error if `pixels` does not hold exactly `width * height`
    /// entries.
    pub fn new(size: PanelSize, pixels: Vec<Rgb>) -> Result<Self, EncodingError> {
        if pixels.len() != size.pixel_count() {
            return Err(EncodingError::PixelCount {
                expected: size.pixel_count(),
                actual: pixels.len(),
            });
        }
        Ok(Self { size, pixels })
    }

    /// A frame of a single color.
    #[must_use]
    pub fn filled(size: PanelSize, color: Rgb) -> Self {
        Self {
            size,
            pixels: vec![color; size.pixel_count()],
        }
    }

    /// Build a frame by calling `f(x, y)` for every pixel.
    #[must_use]
    pub fn from_fn(size: PanelSize, mut f: impl FnMut(u16, u16) -> Rgb) -> Self {
        let mut pixels = Vec::with_capacity(size.pixel_count());
        for y in 0..size.height {
            for x in 0..size.width {
                pixels.push(f(x, y));
            }
        }
        Self { size, pixels }
    }

    #[must_use]
    pub fn size(&self) -> PanelSize {
        self.size
    }

    #[must_use]
    pub fn width(&self) -> u16 {
        self.size.width
    }

    #[must_use]
    pub fn height(&self) -> u16 {
        self.size.height
    }

    /// Pixel at `(x, y)`, if inside the frame.
    #[must_use]
    pub fn pixel(&self, x: u16, y: u16) -> Option<Rgb> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        self.pixels
            .get(usize::from(y) * usize::from(self.size.width) + usize::from(x))
            .copied()
    }

    /// Row-major pixels.
    #[must_use]
    pub fn pixels(&self) -> &[Rgb] {
        &self.pixels
    }

    /// Center this frame on a canvas of `size`, cropping or padding with black.
    #[must_use]
    pub fn fitted(&self, size: PanelSize) -> PixelFrame {
        if size == self.size {
            return self.clone();
        }

        let dx = i32::from(self.size.width) - i32::from(size.width);
        let dy = i32::from(self.size.height) - i32::from(size.height);
        let (ox, oy) = (dx / 2, dy / 2);

        PixelFrame::from_fn(size, |x, y| {
            let sx = i32::from(x) + ox;
            let sy = i32::from(y) + oy;
            match (u16::try_from(sx), u16::try_from(sy)) {
                (Ok(sx), Ok(sy)) => self.pixel(sx, sy).unwrap_or(Rgb::BLACK),
                _ => Rgb::BLACK,
            }
        })
    }
}

/// A pixel frame and how long it is shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationFrame {
    pub frame: PixelFrame,
    pub duration_ms: u32,
}

impl AnimationFrame {
    #[must_use]
    pub fn new(frame: PixelFrame, duration_ms: u32) -> Self {
        Self { frame, duration_ms }
    }
}

/// Convert milliseconds to GIF centiseconds, rounding to nearest.
#[must_use]
pub fn delay_centis(duration_ms: u32) -> u16 {
    let centis = (u64::from(duration_ms) + 5) / 10;
    u16::try_from(centis).unwrap_or(u16::MAX)
}

/// Encodes animations into the panel's payload format.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameEncoder {
    profile: DeviceProfile,
}

impl FrameEncoder {
    #[must_use]
    pub fn new(profile: DeviceProfile) -> Self {
        Self { profile }
    }

    #[must_use]
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Encode `frames` as one looping GIF.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no frames, a frame's size differs from
    /// the panel, or the GIF writer fails.
    pub fn encode(&self, frames: &[AnimationFrame]) -> Result<EncodedPayload, EncodingError> {
        if frames.is_empty() {
            return Err(EncodingError::Empty);
        }

        let panel = self.profile.panel;
        if let Some((index, bad)) = frames
            .iter()
            .enumerate()
            .find(|(_, f)| f.frame.size() != panel)
        {
            return Err(EncodingError::Dimensions {
                index,
                expected: panel,
                actual: bad.frame.size(),
            });
        }

        let colors = self.profile.colors;
        let mut encoder =
            gif::Encoder::new(Vec::new(), panel.width, panel.height, colors.palette())?;
        encoder.set_repeat(gif::Repeat::Infinite)?;

        for animation_frame in frames {
            let indexed: Vec<u8> = animation_frame
                .frame
                .pixels()
                .iter()
                .map(|p| colors.index_of(p.r, p.g, p.b))
                .collect();

            let frame = gif::Frame {
                width: panel.width,
                height: panel.height,
                delay: delay_centis(animation_frame.duration_ms),
                buffer: indexed.into(),
                ..gif::Frame::default()
            };
            encoder.write_frame(&frame)?;
        }

        let bytes = encoder
            .into_inner()
            .map_err(|e| EncodingError::Gif(e.to_string()))?;
        debug!("Encoded {} frames into {} bytes", frames.len(), bytes.len());

        Ok(EncodedPayload::new(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_protocol::FLEX_96X20_V1;

    fn panel() -> PanelSize {
        FLEX_96X20_V1.panel
    }

    #[test]
    fn test_encode_writes_looping_gif89a() {
        let encoder = FrameEncoder::new(FLEX_96X20_V1);
        let frames = vec![
            AnimationFrame::new(PixelFrame::filled(panel(), Rgb::new(255, 0, 0)), 100),
            AnimationFrame::new(PixelFrame::filled(panel(), Rgb::new(0, 0, 255)), 100),
        ];

        let payload = encoder.encode(&frames).unwrap();
        let bytes = payload.as_ref();

        assert!(bytes.starts_with(b"GIF89a"));
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 96);
        assert_eq!(u16::from_le_bytes([bytes[8], bytes[9]]), 20);
        assert!(bytes.windows(11).any(|w| w == b"NETSCAPE2.0"));
        assert_eq!(bytes.last(), Some(&0x3B));
    }

    #[test]
    fn test_encode_is_deterministic() {
        let encoder = FrameEncoder::new(FLEX_96X20_V1);
        let frame =
            PixelFrame::from_fn(panel(), |x, y| Rgb::new((x * 2) as u8, (y * 12) as u8, 0));
        let frames = vec![AnimationFrame::new(frame, 50)];

        assert_eq!(encoder.encode(&frames), encoder.encode(&frames));
    }

    #[test]
    fn test_encode_rejects_empty_and_wrong_size() {
        let encoder = FrameEncoder::new(FLEX_96X20_V1);
        assert_eq!(encoder.encode(&[]), Err(EncodingError::Empty));

        let small = PanelSize::new(32, 8);
        let frames = vec![
            AnimationFrame::new(PixelFrame::filled(panel(), Rgb::BLACK), 10),
            AnimationFrame::new(PixelFrame::filled(small, Rgb::BLACK), 10),
        ];
        assert_eq!(
            encoder.encode(&frames),
            Err(EncodingError::Dimensions {
                index: 1,
                expected: panel(),
                actual: small
            })
        );
    }

    #[test]
    fn test_delay_rounding() {
        assert_eq!(delay_centis(0), 0);
        assert_eq!(delay_centis(4), 0);
        assert_eq!(delay_centis(5), 1);
        assert_eq!(delay_centis(100), 10);
        assert_eq!(delay_centis(u32::MAX), u16::MAX);
    }

    #[test]
    fn test_pixel_frame_rejects_wrong_length() {
        let result = PixelFrame::new(PanelSize::new(2, 2), vec![Rgb::BLACK; 3]);
        assert_eq!(
            result,
            Err(EncodingError::PixelCount {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_fitted_centers_and_pads() {
        let white = Rgb::new(255, 255, 255);
        let src = PixelFrame::filled(PanelSize::new(2, 2), white);
        let fitted = src.fitted(PanelSize::new(4, 4));

        assert_eq!(fitted.pixel(0, 0), Some(Rgb::BLACK));
        assert_eq!(fitted.pixel(1, 1), Some(white));
        assert_eq!(fitted.pixel(2, 2), Some(white));
        assert_eq!(fitted.pixel(3, 3), Some(Rgb::BLACK));

        let cropped = fitted.fitted(PanelSize::new(2, 2));
        assert_eq!(cropped, src);
    }
}
