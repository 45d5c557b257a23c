//! Tile identifiers on the web-mercator tile grid

use serde::{Deserialize, Serialize};

/// Tile address in the canonical (unwrapped, non-overscaled) grid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalTileId {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl CanonicalTileId {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Number of tiles along one axis at this zoom
    pub fn dim(&self) -> u32 {
        1u32 << self.z
    }
}

/// Tile id including world wrap and overscaling
///
/// `overscaled_z` is the zoom the tile is displayed at; it is at least
/// `canonical.z`. Stencil clipping and draw order are keyed on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    pub overscaled_z: u8,
    pub wrap: i32,
    pub canonical: CanonicalTileId,
}

impl TileId {
    pub fn new(overscaled_z: u8, wrap: i32, z: u8, x: u32, y: u32) -> Self {
        Self {
            overscaled_z: overscaled_z.max(z),
            wrap,
            canonical: CanonicalTileId::new(z, x, y),
        }
    }

    /// Tile displayed at its own zoom in the primary world copy
    pub fn from_canonical(z: u8, x: u32, y: u32) -> Self {
        Self::new(z, 0, z, x, y)
    }

    /// X coordinate including the world copy offset
    pub fn unwrapped_x(&self) -> i64 {
        self.canonical.x as i64 + self.wrap as i64 * self.canonical.dim() as i64
    }

    /// Latitudes (degrees) of the north and south tile edges
    pub fn lat_range(&self) -> [f32; 2] {
        let n = self.canonical.dim() as f64;
        let y = self.canonical.y as f64;
        [mercator_y_to_lat(y / n) as f32, mercator_y_to_lat((y + 1.0) / n) as f32]
    }

    /// Offset `(dx, dy)` of an adjacent tile at the same zoom
    ///
    /// Accounts for neighbours across the antimeridian. Returns `None` when
    /// the tiles are not direct neighbours.
    pub fn neighbor_offset(&self, other: &TileId) -> Option<(i32, i32)> {
        if self.canonical.z != other.canonical.z || self == other {
            return None;
        }
        let dx = other.unwrapped_x() - self.unwrapped_x();
        let dy = other.canonical.y as i64 - self.canonical.y as i64;
        let dim = self.canonical.dim() as i64;

        let dx = if dx.abs() <= 1 {
            dx
        } else if (dx - dim).abs() <= 1 && other.wrap == self.wrap {
            // Same world copy, opposite edges of the antimeridian
            dx - dim
        } else if (dx + dim).abs() <= 1 && other.wrap == self.wrap {
            dx + dim
        } else {
            return None;
        };
        if dy.abs() > 1 {
            return None;
        }
        Some((dx as i32, dy as i32))
    }
}

fn mercator_y_to_lat(y: f64) -> f64 {
    let n = std::f64::consts::PI * (1.0 - 2.0 * y);
    n.sinh().atan().to_degrees()
}

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.canonical.z, self.canonical.x, self.canonical.y
        )?;
        if self.overscaled_z != self.canonical.z {
            write!(f, "@{}", self.overscaled_z)?;
        }
        if self.wrap != 0 {
            write!(f, " (wrap {})", self.wrap)?;
        }
        Ok(())
    }
}
