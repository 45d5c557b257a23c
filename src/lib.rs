//! Hillshade - two-pass GPU relief shading for DEM map tiles

pub mod core;
pub mod tile;
pub mod style;
pub mod render;
