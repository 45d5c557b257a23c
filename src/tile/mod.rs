//! Map tiles and their elevation data
//!
//! Tiles are owned by an external tile cache. This module only models the
//! parts the hillshade pipeline reads and mutates: the elevation raster, the
//! dirty flag and the GPU resources used for shading.

pub mod id;
pub mod dem;
pub mod tile;

pub use id::{CanonicalTileId, TileId};
pub use dem::{DemEncoding, ElevationRaster};
pub use tile::{ShadeState, SlopeTarget, Tile};

use std::collections::HashMap;

/// Lookup of tiles by id, provided by the tile cache
pub trait TileStore {
    fn tile_mut(&mut self, id: &TileId) -> Option<&mut Tile>;
}

impl TileStore for HashMap<TileId, Tile> {
    fn tile_mut(&mut self, id: &TileId) -> Option<&mut Tile> {
        self.get_mut(id)
    }
}
