//! Offscreen pass: elevation raster -> slope texture
//!
//! The DEM is uploaded unpremultiplied and sampled with nearest filtering so
//! the encoded elevations survive intact. The output framebuffer is owned by
//! the tile and reused for every later raster version of the same size.

use crate::core::Result;
use crate::render::context::{
    AddressMode, DrawCall, FilterMode, Program, RenderContext, RenderTarget, TextureBinding,
    Viewport,
};
use crate::render::geometry::QuadGeometry;
use crate::render::modes::{ColorMode, CullFaceMode, DepthMode, StencilMode};
use crate::render::texture_cache::TextureCache;
use crate::render::uniforms::PrepareUniforms;
use crate::tile::{SlopeTarget, Tile};

/// Recompute the slope texture of a dirty tile
///
/// Returns `Ok(true)` if the prepare program ran. Tiles that are clean, have
/// no raster, or have an empty raster are skipped without touching the
/// context. On error the tile stays dirty.
pub fn prepare_hillshade(
    ctx: &mut dyn RenderContext,
    cache: &mut TextureCache,
    tile: &mut Tile,
    layer_id: &str,
    depth_mode: DepthMode,
    color_mode: ColorMode,
    geometry: &QuadGeometry,
) -> Result<bool> {
    if !tile.needs_hillshade_prepare {
        return Ok(false);
    }
    let Some(dem) = tile.dem.as_ref() else {
        return Ok(false);
    };
    if dem.is_empty() {
        log::debug!("Skipping hillshade prepare for {}: empty raster", tile.id);
        return Ok(false);
    }
    let (dim, stride) = (dem.dim(), dem.stride());

    let dem_texture = match tile.dem_texture.take() {
        Some(texture) if texture.width == stride => texture,
        stale => {
            if let Some(texture) = stale {
                cache.release(texture);
            }
            cache.acquire(ctx, stride)?
        }
    };
    tile.dem_texture = Some(dem_texture);
    ctx.write_texture(&dem_texture, dem.pixels())?;

    let target = match tile.fbo.take() {
        Some(target) if target.size() == dim => target,
        stale => {
            if let Some(target) = stale {
                target.release(ctx);
            }
            log::debug!("Allocating {}x{} slope target for {}", dim, dim, tile.id);
            SlopeTarget::allocate(ctx, dim)?
        }
    };
    tile.fbo = Some(target);

    ctx.bind_framebuffer(RenderTarget::Framebuffer(target.framebuffer));
    ctx.set_viewport(Viewport::new(0, 0, dim, dim));
    ctx.draw(&DrawCall {
        program: Program::HillshadePrepare(PrepareUniforms::new(&tile.id, dem)),
        texture: TextureBinding {
            texture: dem_texture,
            filter: FilterMode::Nearest,
            address: AddressMode::ClampToEdge,
        },
        depth_mode,
        stencil_mode: StencilMode::disabled(),
        color_mode,
        cull_face_mode: CullFaceMode::Disabled,
        terrain: None,
        layer_id,
        geometry,
    })?;

    tile.mark_prepared();
    Ok(true)
}
