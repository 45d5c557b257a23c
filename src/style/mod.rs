//! Hillshade layer styling

pub mod paint;

pub use paint::{Color, HillshadeLayer, HillshadePaint, IlluminationAnchor};
