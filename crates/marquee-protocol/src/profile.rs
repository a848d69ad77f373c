//! Device profiles.
//!
//! A profile is the single lookup table of firmware constants needed to
//! talk to one panel variant: packet magic, control command bodies, the
//! fixed upload attributes, size limits, panel geometry and the color
//! table. Supporting another variant means substituting another profile.

use std::fmt;

use crate::version::{ProfileVersion, PROFILE_VERSION};

/// Panel geometry in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PanelSize {
    pub width: u16,
    pub height: u16,
}

impl PanelSize {
    /// Create a new panel size.
    #[must_use]
    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// Number of pixels on the panel.
    #[must_use]
    pub const fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for PanelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A control command: its envelope sequence number and the records that
/// follow the command class in its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlCommand {
    pub sequence: u16,
    pub records: &'static [u8],
}

/// Fixed 256-entry color table.
///
/// `palette` holds the RGB triplets written as the GIF global color table;
/// the per-channel tables map an 8-bit channel value to its bits of the
/// palette index, so `red[r] | green[g] | blue[b]` is the index of a pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorTable {
    palette: [u8; 768],
    red: [u8; 256],
    green: [u8; 256],
    blue: [u8; 256],
}

/// Palette level of each 3-bit red or green code.
const LEVELS_3: [u8; 8] = [0, 36, 73, 109, 146, 182, 219, 255];

/// Palette level of each 2-bit blue code.
const LEVELS_2: [u8; 4] = [0, 85, 170, 255];

impl ColorTable {
    /// The 3-3-2 bit RGB table used by the reference firmware.
    ///
    /// Index bits are `rrrgggbb`; each code maps to a fixed level from
    /// `LEVELS_3` or `LEVELS_2`, and each channel value maps to the code
    /// whose level is nearest.
    #[must_use]
    pub const fn rgb332() -> Self {
        let mut palette = [0u8; 768];
        let mut i = 0;
        while i < 256 {
            palette[i * 3] = LEVELS_3[(i >> 5) & 0x07];
            palette[i * 3 + 1] = LEVELS_3[(i >> 2) & 0x07];
            palette[i * 3 + 2] = LEVELS_2[i & 0x03];
            i += 1;
        }

        let mut red = [0u8; 256];
        let mut green = [0u8; 256];
        let mut blue = [0u8; 256];
        let mut c = 0;
        while c < 256 {
            red[c] = (nearest(c as u8, &LEVELS_3) << 5) as u8;
            green[c] = (nearest(c as u8, &LEVELS_3) << 2) as u8;
            blue[c] = nearest(c as u8, &LEVELS_2) as u8;
            c += 1;
        }

        Self {
            palette,
            red,
            green,
            blue,
        }
    }

    /// Palette index for an RGB pixel.
    #[inline]
    #[must_use]
    pub fn index_of(&self, r: u8, g: u8, b: u8) -> u8 {
        self.red[r as usize] | self.green[g as usize] | self.blue[b as usize]
    }

    /// RGB value of a palette entry.
    #[must_use]
    pub fn color(&self, index: u8) -> [u8; 3] {
        let at = index as usize * 3;
        [self.palette[at], self.palette[at + 1], self.palette[at + 2]]
    }

    /// The packed RGB palette (256 triplets).
    #[must_use]
    pub fn palette(&self) -> &[u8] {
        &self.palette
    }
}

/// Code of the level closest to `value`; ties go to the lower code.
const fn nearest(value: u8, levels: &[u8]) -> usize {
    let mut best = 0;
    let mut i = 1;
    while i < levels.len() {
        if levels[i].abs_diff(value) < levels[best].abs_diff(value) {
            best = i;
        }
        i += 1;
    }
    best
}

/// The reference color table.
pub const RGB332: ColorTable = ColorTable::rgb332();

/// Firmware constants for one panel variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Human-readable variant name.
    pub name: &'static str,
    /// Protocol revision the constants were captured from.
    pub version: ProfileVersion,
    /// Leading bytes of every packet.
    pub magic: [u8; 4],
    /// First two bytes of every packet body.
    pub command_class: [u8; 2],
    /// Deletes every stored animation.
    pub clear_storage: ControlCommand,
    /// Arms the panel for a new animation.
    pub prepare_upload: ControlCommand,
    /// Tells the panel the last data packet has been sent.
    pub upload_complete: ControlCommand,
    /// How many times the completion command is written.
    pub completion_repeats: u8,
    /// Constant records between the command class and the packet info.
    pub upload_attributes: &'static [u8],
    /// Tag of the packet info record (count, index, chunk length).
    pub packet_info_tag: u8,
    /// Tag of the record carrying the payload chunk.
    pub chunk_tag: u8,
    /// Largest chunk the vendor app places in one packet.
    pub max_chunk_payload: usize,
    /// Largest animation the firmware stores intact.
    pub max_payload_bytes: usize,
    /// Zero-pad the final chunk up to the chunk length on the wire.
    pub pad_final_chunk: bool,
    /// Panel geometry.
    pub panel: PanelSize,
    /// Color lookup table.
    pub colors: &'static ColorTable,
}

/// Flexible 96x20 panel, firmware revision captured from the vendor app.
pub const FLEX_96X20_V1: DeviceProfile = DeviceProfile {
    name: "flex-96x20",
    version: PROFILE_VERSION,
    magic: [0xAA, 0x55, 0xFF, 0xFF],
    command_class: [0xC1, 0x02],
    clear_storage: ControlCommand {
        sequence: 0x0009,
        records: &[0x08, 0x02, 0x00, 0xFF],
    },
    prepare_upload: ControlCommand {
        sequence: 0x0009,
        records: &[0x08, 0x02, 0x00, 0x00],
    },
    upload_complete: ControlCommand {
        sequence: 0x000F,
        records: &[0x36, 0x03, 0x01, 0x00, 0x00],
    },
    completion_repeats: 2,
    // Meaning unknown; constant in every captured upload.
    upload_attributes: &[
        0x09, 0x01, 0x01, //
        0x0C, 0x01, 0x00, //
        0x0D, 0x01, 0x00, //
        0x0E, 0x01, 0x00, //
        0x14, 0x03, 0x01, 0x09, 0x0A, //
        0x11, 0x04, 0x00, 0x01, 0x00, 0x0A,
    ],
    packet_info_tag: 0x12,
    chunk_tag: 0x13,
    max_chunk_payload: 196,
    max_payload_bytes: 49_980,
    pad_final_chunk: true,
    panel: PanelSize::new(96, 20),
    colors: &RGB332,
};

impl Default for DeviceProfile {
    fn default() -> Self {
        FLEX_96X20_V1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_limits() {
        let profile = FLEX_96X20_V1;
        // 255 full packets of 196 bytes
        assert_eq!(profile.max_payload_bytes, 255 * profile.max_chunk_payload);
        assert_eq!(profile.panel.pixel_count(), 1920);
        assert_eq!(profile.panel.to_string(), "96x20");
    }

    #[test]
    fn test_color_table_extremes() {
        let table = ColorTable::rgb332();
        assert_eq!(table.index_of(0, 0, 0), 0x00);
        assert_eq!(table.index_of(255, 255, 255), 0xFF);
        assert_eq!(table.index_of(255, 0, 0), 0xE0);
        assert_eq!(table.index_of(0, 255, 0), 0x1C);
        assert_eq!(table.index_of(0, 0, 255), 0x03);
        assert_eq!(table.color(0xFF), [255, 255, 255]);
        assert_eq!(table.color(0xE0), [255, 0, 0]);
    }

    #[test]
    fn test_color_table_levels() {
        let table = ColorTable::rgb332();
        assert_eq!(table.color(0b001_010_01), [36, 73, 85]);
        assert_eq!(table.color(0b110_101_10), [219, 182, 170]);
        // 18 is exactly between 0 and 36.
        assert_eq!(table.index_of(18, 0, 0), 0x00);
        assert_eq!(table.index_of(19, 0, 0), 0x20);
        assert_eq!(table.index_of(0, 0, 43), 0x01);
    }

    #[test]
    fn test_color_table_is_stable_for_palette_colors() {
        let table = ColorTable::rgb332();
        for index in 0..=255u8 {
            let [r, g, b] = table.color(index);
            assert_eq!(table.index_of(r, g, b), index);
        }
    }
}
