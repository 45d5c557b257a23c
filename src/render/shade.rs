//! Translucent pass: slope texture -> shaded tile quad

use crate::core::Result;
use crate::render::context::{AddressMode, DrawCall, FilterMode, Program, RenderContext, TextureBinding};
use crate::render::frame::FrameState;
use crate::render::geometry::QuadGeometry;
use crate::render::modes::{ColorMode, CullFaceMode, DepthMode, StencilMode};
use crate::render::terrain::TerrainData;
use crate::render::uniforms::HillshadeUniforms;
use crate::style::HillshadeLayer;
use crate::tile::Tile;

/// Draw a prepared tile onto the currently bound target
///
/// Returns `Ok(false)` without touching the context when the tile has no
/// slope texture or the texture is stale. With `terrain` the quad is
/// displaced to the terrain surface.
#[allow(clippy::too_many_arguments)]
pub fn render_hillshade(
    ctx: &mut dyn RenderContext,
    frame: &FrameState,
    tile: &Tile,
    layer: &HillshadeLayer,
    depth_mode: DepthMode,
    stencil_mode: StencilMode,
    color_mode: ColorMode,
    geometry: &QuadGeometry,
    terrain: Option<&TerrainData>,
) -> Result<bool> {
    let Some(slope) = tile.slope_texture() else {
        log::trace!("No clean slope texture for {}, not shading", tile.id());
        return Ok(false);
    };

    ctx.draw(&DrawCall {
        program: Program::Hillshade(HillshadeUniforms::new(frame, &tile.id(), &layer.paint)),
        texture: TextureBinding {
            texture: *slope,
            filter: FilterMode::Linear,
            address: AddressMode::ClampToEdge,
        },
        depth_mode,
        stencil_mode,
        color_mode,
        cull_face_mode: CullFaceMode::Disabled,
        terrain,
        layer_id: &layer.id,
        geometry,
    })?;
    Ok(true)
}
