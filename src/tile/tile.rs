//! Tile shading state
//!
//! The shading resources of a tile move through three states:
//!
//! - `Absent`: nothing allocated yet, or released on eviction
//! - `Dirty`: the raster changed since the slope texture was last written
//! - `Clean`: the slope texture matches the current raster
//!
//! Only the prepare pass moves a tile from dirty to clean. Raster replacement
//! and border backfilling move it back to dirty.

use crate::core::Result;
use crate::render::context::{FramebufferId, RenderContext, Texture, TextureDescriptor, TextureFormat};
use crate::render::texture_cache::TextureCache;
use crate::tile::dem::ElevationRaster;
use crate::tile::id::TileId;

/// Offscreen framebuffer holding a tile's slope texture
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlopeTarget {
    pub framebuffer: FramebufferId,
    /// Color attachment: encoded gradients in RG
    pub color: Texture,
}

impl SlopeTarget {
    /// Format of the slope texture
    pub const FORMAT: TextureFormat = TextureFormat::Rgba16Float;

    /// Allocate a `dim x dim` color texture and a framebuffer around it
    pub fn allocate(ctx: &mut dyn RenderContext, dim: u32) -> Result<Self> {
        let color = ctx.create_texture(&TextureDescriptor {
            label: "hillshade_slope",
            width: dim,
            height: dim,
            format: Self::FORMAT,
        })?;
        match ctx.create_framebuffer(&color) {
            Ok(framebuffer) => Ok(Self { framebuffer, color }),
            Err(e) => {
                ctx.destroy_texture(color);
                Err(e)
            }
        }
    }

    pub fn size(&self) -> u32 {
        self.color.width
    }

    pub fn release(self, ctx: &mut dyn RenderContext) {
        ctx.destroy_framebuffer(self.framebuffer);
        ctx.destroy_texture(self.color);
    }
}

/// Observable state of a tile's shading resources
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadeState {
    Absent,
    Dirty,
    Clean,
}

/// A map tile as seen by the hillshade pipeline
#[derive(Debug)]
pub struct Tile {
    pub(crate) id: TileId,
    pub(crate) dem: Option<ElevationRaster>,
    pub(crate) needs_hillshade_prepare: bool,
    pub(crate) dem_texture: Option<Texture>,
    pub(crate) fbo: Option<SlopeTarget>,
}

impl Tile {
    pub fn new(id: TileId) -> Self {
        Self {
            id,
            dem: None,
            needs_hillshade_prepare: false,
            dem_texture: None,
            fbo: None,
        }
    }

    /// Create a tile with a raster already attached
    pub fn with_dem(id: TileId, dem: ElevationRaster) -> Self {
        let mut tile = Self::new(id);
        tile.set_dem(dem);
        tile
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn dem(&self) -> Option<&ElevationRaster> {
        self.dem.as_ref()
    }

    /// Attach a new raster version; the slope texture must be recomputed
    pub fn set_dem(&mut self, dem: ElevationRaster) {
        self.dem = Some(dem);
        self.needs_hillshade_prepare = true;
    }

    /// Copy the shared edge of an adjacent tile's raster into this raster's border
    ///
    /// Returns `Ok(false)` when either tile has no raster or the tiles are not
    /// neighbours.
    pub fn backfill_border(&mut self, neighbor: &Tile) -> Result<bool> {
        let Some((dx, dy)) = self.id.neighbor_offset(&neighbor.id) else {
            return Ok(false);
        };
        let (Some(dem), Some(neighbor_dem)) = (self.dem.as_mut(), neighbor.dem.as_ref()) else {
            return Ok(false);
        };
        dem.backfill_border(neighbor_dem, dx, dy)?;
        self.needs_hillshade_prepare = true;
        Ok(true)
    }

    pub fn needs_hillshade_prepare(&self) -> bool {
        self.needs_hillshade_prepare
    }

    /// Force the slope texture to be recomputed on the next offscreen pass
    pub fn invalidate(&mut self) {
        if self.dem.is_some() {
            self.needs_hillshade_prepare = true;
        }
    }

    pub fn shade_state(&self) -> ShadeState {
        match (self.fbo, self.needs_hillshade_prepare) {
            (None, _) => ShadeState::Absent,
            (Some(_), true) => ShadeState::Dirty,
            (Some(_), false) => ShadeState::Clean,
        }
    }

    /// Slope texture, only while it matches the current raster
    pub fn slope_texture(&self) -> Option<&Texture> {
        match self.shade_state() {
            ShadeState::Clean => self.fbo.as_ref().map(|target| &target.color),
            _ => None,
        }
    }

    pub fn slope_target(&self) -> Option<SlopeTarget> {
        self.fbo
    }

    pub fn dem_texture(&self) -> Option<Texture> {
        self.dem_texture
    }

    pub(crate) fn mark_prepared(&mut self) {
        self.needs_hillshade_prepare = false;
    }

    /// Release GPU resources when the tile cache evicts this tile
    ///
    /// The DEM texture goes back to the pool; the framebuffer and slope
    /// texture are destroyed. A tile that keeps its raster becomes dirty.
    pub fn release_resources(&mut self, ctx: &mut dyn RenderContext, cache: &mut TextureCache) {
        if let Some(texture) = self.dem_texture.take() {
            cache.release(texture);
        }
        if let Some(target) = self.fbo.take() {
            target.release(ctx);
        }
        self.invalidate();
    }
}
