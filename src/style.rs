//! Message style: font, colours and text decoration

use serde::Serialize;

pub const MIN_FONT_SIZE: u8 = 9;
pub const MAX_FONT_SIZE: u8 = 22;
pub const DEFAULT_FONT_SIZE: u8 = 11;
pub const DEFAULT_COLOR: &str = "000000";

/// Font families the web client offers, in wire index order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FontFamily {
    #[default]
    Arial,
    ComicSans,
    Georgia,
    Handwriting,
    Impact,
    Palatino,
    Papyrus,
    Times,
    Typewriter,
}

impl FontFamily {
    const ALL: [FontFamily; 9] = [
        FontFamily::Arial,
        FontFamily::ComicSans,
        FontFamily::Georgia,
        FontFamily::Handwriting,
        FontFamily::Impact,
        FontFamily::Palatino,
        FontFamily::Papyrus,
        FontFamily::Times,
        FontFamily::Typewriter,
    ];

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u8 {
        self as u8
    }
}

/// Style attached to a message or an identity's profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Style {
    pub font_family: FontFamily,
    pub font_size: u8,
    /// Hex colour without `#`, 3 or 6 digits, or empty
    pub name_color: String,
    pub text_color: String,
    pub bold: bool,
    pub italics: bool,
    pub underline: bool,
    /// The identity has custom styling switched on
    pub styles_on: bool,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            font_family: FontFamily::default(),
            font_size: DEFAULT_FONT_SIZE,
            name_color: DEFAULT_COLOR.to_string(),
            text_color: DEFAULT_COLOR.to_string(),
            bold: false,
            italics: false,
            underline: false,
            styles_on: false,
        }
    }
}

impl Style {
    /// Set the font size, clamped to the range the server accepts
    pub fn set_font_size(&mut self, size: u8) {
        self.font_size = size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
    }
}

/// 3 or 6 hex digits
pub(crate) fn is_hex_color(value: &str) -> bool {
    matches!(value.len(), 3 | 6) && value.bytes().all(|b| b.is_ascii_hexdigit())
}
