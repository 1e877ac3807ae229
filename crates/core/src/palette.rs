//! Per-label overlay colors.
//!
//! A [`ColorPalette`] maps a class label to an RGB triple and always carries
//! a `default` entry used for labels it does not know. Palettes are built
//! once at startup and shared read-only afterwards.

use std::collections::HashMap;
use std::path::Path;

use crate::error::CoreError;

/// Key of the fallback entry.
pub const DEFAULT_LABEL: &str = "default";

/// An RGB triple.
pub type Rgb = [u8; 3];

/// Colors shipped with the service, keyed by the snack classes the
/// bundled detector was trained on.
const BUILTIN_COLORS: &[(&str, Rgb)] = &[
    ("albatal_dubbi_corn_snack", [255, 165, 0]),
    ("albatal_popcorn_butter_flavor", [255, 223, 0]),
    ("cric_crac_special_flavour", [0, 128, 255]),
    ("cric_crac_tomato_ketchup", [255, 0, 0]),
    ("marami_hot_chili", [139, 0, 0]),
    ("marami_salt_&_vinegar", [0, 255, 255]),
    ("tasali_hot_chili", [128, 0, 128]),
    (DEFAULT_LABEL, [255, 255, 255]),
];

#[derive(Debug, Clone, PartialEq)]
pub struct ColorPalette {
    colors: HashMap<String, Rgb>,
    default: Rgb,
}

impl ColorPalette {
    /// Build a palette from label/color pairs. A `default` entry is required.
    pub fn new(colors: HashMap<String, Rgb>) -> Result<Self, CoreError> {
        let default = *colors.get(DEFAULT_LABEL).ok_or_else(|| {
            CoreError::Validation(format!("Palette must define a '{DEFAULT_LABEL}' color"))
        })?;
        Ok(Self { colors, default })
    }

    /// Load a palette from a JSON object such as `{"default": [255, 255, 255]}`.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let colors: HashMap<String, Rgb> = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("Invalid palette JSON: {e}")))?;
        Self::new(colors)
    }

    /// Read and parse a JSON palette file.
    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Internal(format!("Failed to read palette {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Color for `label`, or the default entry when the label is unknown.
    pub fn resolve(&self, label: &str) -> Rgb {
        self.colors.get(label).copied().unwrap_or(self.default)
    }

    pub fn default_color(&self) -> Rgb {
        self.default
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

impl Default for ColorPalette {
    fn default() -> Self {
        let colors = BUILTIN_COLORS
            .iter()
            .map(|(label, rgb)| (label.to_string(), *rgb))
            .collect();
        Self {
            colors,
            default: [255, 255, 255],
        }
    }
}
