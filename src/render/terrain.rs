//! Optional coupling to a 3D terrain elevation source
//!
//! When a provider returns data for a tile, the shading draw displaces the
//! quad vertices to the terrain surface. Absence selects the flat-quad path.

use std::collections::HashMap;

use glam::Mat4;

use crate::render::context::Texture;
use crate::render::uniforms::TerrainUniforms;
use crate::tile::{DemEncoding, TileId};

/// Elevation lookup data for one tile
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TerrainData {
    /// DEM-encoded elevation texture
    pub texture: Texture,
    /// Tile units -> terrain texture coordinates
    pub matrix: Mat4,
    pub encoding: DemEncoding,
    pub exaggeration: f32,
    /// Added to decoded elevations before exaggeration
    pub elevation_offset: f32,
}

impl TerrainData {
    pub fn uniforms(&self) -> TerrainUniforms {
        TerrainUniforms {
            matrix: self.matrix.to_cols_array_2d(),
            unpack: self.encoding.unpack_vector(),
            exaggeration: self.exaggeration,
            elevation_offset: self.elevation_offset,
            _pad: [0.0; 2],
        }
    }
}

/// Source of per-tile terrain elevation, queried once per tile per frame
pub trait TerrainProvider {
    fn terrain_data(&self, id: &TileId) -> Option<TerrainData>;
}

impl TerrainProvider for HashMap<TileId, TerrainData> {
    fn terrain_data(&self, id: &TileId) -> Option<TerrainData> {
        self.get(id).copied()
    }
}
