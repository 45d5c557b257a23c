//! Hillshade layer configuration
//!
//! Loaded from JSON; every field falls back to the style defaults.
//! Colors accept either `"#rrggbb"` / `"#rrggbbaa"` strings or
//! `[r, g, b, a]` arrays in `0..1`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Straight-alpha linear color
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ColorRepr", into = "[f32; 4]")]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);
    pub const TRANSPARENT: Color = Color::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`
    pub fn from_hex(hex: &str) -> Result<Self> {
        let digits = hex
            .strip_prefix('#')
            .ok_or_else(|| Error::Config(format!("color {:?} must start with '#'", hex)))?;
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::Config(format!("invalid color {:?}", hex)));
        }
        let channel = |s: &str| {
            u8::from_str_radix(s, 16)
                .map(|v| v as f32 / 255.0)
                .map_err(|_| Error::Config(format!("invalid color {:?}", hex)))
        };
        match digits.len() {
            3 => {
                let expand = |i: usize| channel(&digits[i..i + 1].repeat(2));
                Ok(Self::new(expand(0)?, expand(1)?, expand(2)?, 1.0))
            }
            6 | 8 => {
                let a = if digits.len() == 8 { channel(&digits[6..8])? } else { 1.0 };
                Ok(Self::new(
                    channel(&digits[0..2])?,
                    channel(&digits[2..4])?,
                    channel(&digits[4..6])?,
                    a,
                ))
            }
            _ => Err(Error::Config(format!("invalid color {:?}", hex))),
        }
    }

    pub fn premultiplied(&self) -> [f32; 4] {
        [self.r * self.a, self.g * self.a, self.b * self.a, self.a]
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColorRepr {
    Hex(String),
    Rgba([f32; 4]),
}

impl TryFrom<ColorRepr> for Color {
    type Error = Error;

    fn try_from(repr: ColorRepr) -> Result<Self> {
        match repr {
            ColorRepr::Hex(s) => Color::from_hex(&s),
            ColorRepr::Rgba([r, g, b, a]) => Ok(Color::new(r, g, b, a)),
        }
    }
}

impl From<Color> for [f32; 4] {
    fn from(c: Color) -> Self {
        [c.r, c.g, c.b, c.a]
    }
}

/// Frame of reference for the light direction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IlluminationAnchor {
    /// Light is fixed relative to north
    Map,
    /// Light rotates with the view
    #[default]
    Viewport,
}

/// Light and color parameters of a hillshade layer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HillshadePaint {
    /// Light direction in degrees clockwise from north (0-359)
    pub illumination_direction: f32,
    pub illumination_anchor: IlluminationAnchor,
    /// Shading intensity (0-1)
    pub exaggeration: f32,
    pub shadow_color: Color,
    pub highlight_color: Color,
    /// Color emphasizing steep terrain
    pub accent_color: Color,
}

impl Default for HillshadePaint {
    fn default() -> Self {
        Self {
            illumination_direction: 335.0,
            illumination_anchor: IlluminationAnchor::Viewport,
            exaggeration: 0.5,
            shadow_color: Color::BLACK,
            highlight_color: Color::WHITE,
            accent_color: Color::BLACK,
        }
    }
}

impl HillshadePaint {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=359.0).contains(&self.illumination_direction) {
            return Err(Error::Config(format!(
                "illumination-direction {} outside 0..=359",
                self.illumination_direction
            )));
        }
        if !(0.0..=1.0).contains(&self.exaggeration) {
            return Err(Error::Config(format!(
                "exaggeration {} outside 0..=1",
                self.exaggeration
            )));
        }
        Ok(())
    }
}

/// A hillshade style layer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HillshadeLayer {
    pub id: String,
    #[serde(default)]
    pub paint: HillshadePaint,
}

impl HillshadeLayer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            paint: HillshadePaint::default(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let layer: HillshadeLayer = serde_json::from_str(json)?;
        layer.paint.validate()?;
        Ok(layer)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let paint = HillshadePaint::default();
        assert_eq!(paint.illumination_direction, 335.0);
        assert_eq!(paint.illumination_anchor, IlluminationAnchor::Viewport);
        assert_eq!(paint.exaggeration, 0.5);
        assert_eq!(paint.shadow_color, Color::BLACK);
        assert_eq!(paint.highlight_color, Color::WHITE);
    }

    #[test]
    fn test_hex_colors() {
        assert_eq!(Color::from_hex("#fff").unwrap(), Color::WHITE);
        assert_eq!(Color::from_hex("#000000").unwrap(), Color::BLACK);
        let c = Color::from_hex("#ff000080").unwrap();
        assert_eq!(c.r, 1.0);
        assert!((c.a - 128.0 / 255.0).abs() < 1e-6);
        assert!(Color::from_hex("fff").is_err());
        assert!(Color::from_hex("#ggg").is_err());
        assert!(Color::from_hex("#ffff").is_err());
    }

    #[test]
    fn test_non_hex_characters_rejected() {
        assert!(matches!(Color::from_hex("#aé"), Err(Error::Config(_))));
        assert!(matches!(Color::from_hex("#ééé"), Err(Error::Config(_))));
        assert!(matches!(Color::from_hex("#+f0000"), Err(Error::Config(_))));

        let err = HillshadeLayer::from_json_str(r##"{"id": "h", "paint": {"shadow-color": "#aé"}}"##);
        assert!(err.is_err());
    }

    #[test]
    fn test_layer_from_json() {
        let layer = HillshadeLayer::from_json_str(
            r##"{
                "id": "relief",
                "paint": {
                    "illumination-direction": 90,
                    "illumination-anchor": "map",
                    "shadow-color": "#473B24",
                    "accent-color": [0.1, 0.2, 0.3, 1.0]
                }
            }"##,
        )
        .unwrap();
        assert_eq!(layer.id, "relief");
        assert_eq!(layer.paint.illumination_direction, 90.0);
        assert_eq!(layer.paint.illumination_anchor, IlluminationAnchor::Map);
        assert_eq!(layer.paint.exaggeration, 0.5);
        assert_eq!(layer.paint.accent_color, Color::new(0.1, 0.2, 0.3, 1.0));
        assert!((layer.paint.shadow_color.r - 0x47 as f32 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_layer_without_paint() {
        let layer = HillshadeLayer::from_json_str(r#"{"id": "h"}"#).unwrap();
        assert_eq!(layer, HillshadeLayer::new("h"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = HillshadeLayer::from_json_str(r#"{"id": "h", "paint": {"exaggeration": 2.0}}"#);
        assert!(matches!(err, Err(Error::Config(_))));
        let err = HillshadeLayer::from_json_str(r#"{"id": "h", "paint": {"shadow-color": "red"}}"#);
        assert!(matches!(err, Err(Error::Json(_))));
    }

    #[test]
    fn test_layer_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"id": "file-layer", "paint": {{"exaggeration": 0.8}}}}"#).unwrap();
        let layer = HillshadeLayer::from_file(file.path()).unwrap();
        assert_eq!(layer.id, "file-layer");
        assert_eq!(layer.paint.exaggeration, 0.8);
    }

    #[test]
    fn test_color_serializes_as_array() {
        let json = serde_json::to_string(&Color::WHITE).unwrap();
        assert_eq!(json, "[1.0,1.0,1.0,1.0]");
    }
}
