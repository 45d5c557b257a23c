//! Per-frame driver of the hillshade layer
//!
//! The scheduler calls [`HillshadeRenderer::draw`] once per render pass. The
//! offscreen pass prepares slope textures for dirty tiles, the translucent
//! pass shades every visible tile in overlap order. Other passes are ignored.

use crate::core::Result;
use crate::render::context::{RenderContext, RenderTarget};
use crate::render::frame::{FrameState, RenderPass};
use crate::render::geometry::QuadGeometry;
use crate::render::modes::DepthMask;
use crate::render::overlap::OverlapResolver;
use crate::render::prepare::prepare_hillshade;
use crate::render::shade::render_hillshade;
use crate::render::terrain::TerrainProvider;
use crate::render::texture_cache::TextureCache;
use crate::style::HillshadeLayer;
use crate::tile::{Tile, TileId, TileStore};

/// What happened to the tiles of one `draw` call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawStats {
    /// Slope textures recomputed
    pub prepared: usize,
    /// Tiles drawn to the screen
    pub rendered: usize,
    /// Tiles with nothing to do (clean, missing, no raster, no slope texture)
    pub skipped: usize,
    /// Tiles whose GPU work failed; logged and left for the next frame
    pub failed: usize,
}

impl DrawStats {
    fn record(&mut self, result: Result<bool>, pass: RenderPass, id: &TileId) {
        match result {
            Ok(true) if pass == RenderPass::Offscreen => self.prepared += 1,
            Ok(true) => self.rendered += 1,
            Ok(false) => self.skipped += 1,
            Err(e) => {
                log::warn!("Hillshade {:?} pass failed for tile {}: {}", pass, id, e);
                self.failed += 1;
            }
        }
    }
}

/// Shared state of the hillshade layer across frames
pub struct HillshadeRenderer {
    geometry: QuadGeometry,
    texture_cache: TextureCache,
    overlap: OverlapResolver,
}

impl Default for HillshadeRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl HillshadeRenderer {
    pub fn new() -> Self {
        Self {
            geometry: QuadGeometry::unit_quad(),
            texture_cache: TextureCache::new(),
            overlap: OverlapResolver::new(),
        }
    }

    /// Reset per-frame state; call before the first pass of a frame
    pub fn begin_frame(&mut self, ctx: &mut dyn RenderContext) {
        self.overlap.begin_frame();
        ctx.clear_stencil();
    }

    /// Run the layer for the pass in `frame`
    pub fn draw(
        &mut self,
        ctx: &mut dyn RenderContext,
        frame: &FrameState,
        tiles: &mut dyn TileStore,
        layer: &HillshadeLayer,
        coords: &[TileId],
        terrain: Option<&dyn TerrainProvider>,
    ) -> DrawStats {
        let stats = match frame.pass {
            RenderPass::Offscreen => self.prepare_tiles(ctx, frame, tiles, layer, coords),
            RenderPass::Translucent => self.shade_tiles(ctx, frame, tiles, layer, coords, terrain),
            RenderPass::Opaque => return DrawStats::default(),
        };

        ctx.bind_framebuffer(RenderTarget::Screen);
        ctx.set_viewport(frame.full_viewport());
        stats
    }

    fn prepare_tiles(
        &mut self,
        ctx: &mut dyn RenderContext,
        frame: &FrameState,
        tiles: &mut dyn TileStore,
        layer: &HillshadeLayer,
        coords: &[TileId],
    ) -> DrawStats {
        let depth_mode = frame.depth_mode_for_sublayer(0, DepthMask::ReadOnly);
        let color_mode = frame.color_mode_for_render_pass();
        let mut stats = DrawStats::default();

        for id in coords {
            let Some(tile) = tiles.tile_mut(id) else {
                stats.skipped += 1;
                continue;
            };
            let result = prepare_hillshade(
                ctx,
                &mut self.texture_cache,
                tile,
                &layer.id,
                depth_mode,
                color_mode,
                &self.geometry,
            );
            stats.record(result, RenderPass::Offscreen, id);
        }

        if stats.prepared > 0 {
            log::debug!("Prepared {} hillshade tiles for layer {}", stats.prepared, layer.id);
        }
        stats
    }

    fn shade_tiles(
        &mut self,
        ctx: &mut dyn RenderContext,
        frame: &FrameState,
        tiles: &mut dyn TileStore,
        layer: &HillshadeLayer,
        coords: &[TileId],
        terrain: Option<&dyn TerrainProvider>,
    ) -> DrawStats {
        let depth_mode = frame.depth_mode_for_sublayer(0, DepthMask::ReadOnly);
        let color_mode = frame.color_mode_for_render_pass();
        let config = self.overlap.resolve(coords);
        let mut stats = DrawStats::default();

        ctx.bind_framebuffer(RenderTarget::Screen);
        ctx.set_viewport(frame.full_viewport());
        if config.clear_stencil {
            ctx.clear_stencil();
        }

        for id in &config.coords {
            let Some(tile) = tiles.tile_mut(id) else {
                stats.skipped += 1;
                continue;
            };
            let terrain_data = terrain.and_then(|provider| provider.terrain_data(id));
            let result = render_hillshade(
                ctx,
                frame,
                tile,
                layer,
                depth_mode,
                config.mode_for(id.overscaled_z),
                color_mode,
                &self.geometry,
                terrain_data.as_ref(),
            );
            stats.record(result, RenderPass::Translucent, id);
        }
        stats
    }

    /// Release a tile's GPU resources when the tile cache drops it
    pub fn evict(&mut self, ctx: &mut dyn RenderContext, tile: &mut Tile) {
        tile.release_resources(ctx, &mut self.texture_cache);
    }

    /// Destroy pooled textures; tiles keep the ones they hold
    pub fn clear_cache(&mut self, ctx: &mut dyn RenderContext) {
        self.texture_cache.clear(ctx);
    }

    pub fn texture_cache(&self) -> &TextureCache {
        &self.texture_cache
    }

    pub fn geometry(&self) -> &QuadGeometry {
        &self.geometry
    }
}
