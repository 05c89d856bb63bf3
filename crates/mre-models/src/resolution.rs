//! Output resolution lookup.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Pixel dimensions of a named output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Portrait outputs need a crop instead of a plain scale.
    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Supported output resolutions by name.
pub const RESOLUTIONS: &[(&str, Resolution)] = &[
    ("4K", Resolution::new(3840, 2160)),
    ("2K", Resolution::new(2560, 1440)),
    ("1080p", Resolution::new(1920, 1080)),
    ("16:9", Resolution::new(1920, 1080)),
    ("1:1", Resolution::new(1080, 1080)),
    ("4:5", Resolution::new(864, 1080)),
    ("9:16", Resolution::new(608, 1080)),
    ("720p", Resolution::new(1280, 720)),
    ("480p", Resolution::new(854, 480)),
    ("360p", Resolution::new(640, 360)),
];

/// Look up the pixel dimensions for a resolution name.
///
/// Display names carrying the dimensions in parentheses
/// (`"720p (1280 x 720)"`) resolve by their leading token.
pub fn resolution_dimensions(name: &str) -> Option<Resolution> {
    let key = name.trim();
    let key = key.split_whitespace().next().unwrap_or(key);
    RESOLUTIONS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(key))
        .map(|(_, r)| *r)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(resolution_dimensions("720p"), Some(Resolution::new(1280, 720)));
        assert_eq!(resolution_dimensions("4K"), Some(Resolution::new(3840, 2160)));
        assert_eq!(resolution_dimensions("4k"), Some(Resolution::new(3840, 2160)));
        assert_eq!(resolution_dimensions("9:16"), Some(Resolution::new(608, 1080)));
    }

    #[test]
    fn test_display_name_prefix() {
        assert_eq!(
            resolution_dimensions("720p (1280 x 720)"),
            Some(Resolution::new(1280, 720))
        );
        assert_eq!(resolution_dimensions("8K"), None);
        assert_eq!(resolution_dimensions(""), None);
    }

    #[test]
    fn test_portrait() {
        assert!(resolution_dimensions("9:16").unwrap().is_portrait());
        assert!(!resolution_dimensions("1:1").unwrap().is_portrait());
    }
}
