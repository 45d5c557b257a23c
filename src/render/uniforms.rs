//! GPU uniform blocks for the two hillshade programs
//!
//! Layouts must match `shaders/hillshade_prepare.wgsl` and
//! `shaders/hillshade.wgsl` exactly.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::render::frame::FrameState;
use crate::render::geometry::EXTENT;
use crate::style::{HillshadePaint, IlluminationAnchor};
use crate::tile::{ElevationRaster, TileId};

/// Uniforms of the prepare (slope) program, 96 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PrepareUniforms {
    /// Tile units -> framebuffer clip space (64 bytes, offset 0)
    pub matrix: [[f32; 4]; 4],
    /// DEM unpack weights (16 bytes, offset 64)
    pub unpack: [f32; 4],
    /// DEM texture size including the border (8 bytes, offset 80)
    pub dimension: [f32; 2],
    /// Overscaled zoom of the tile (4 bytes, offset 88)
    pub zoom: f32,
    pub _pad: f32,
}

impl PrepareUniforms {
    pub fn new(id: &TileId, dem: &ElevationRaster) -> Self {
        let stride = dem.stride() as f32;
        Self {
            matrix: prepare_matrix().to_cols_array_2d(),
            unpack: dem.encoding().unpack_vector(),
            dimension: [stride, stride],
            zoom: id.overscaled_z as f32,
            _pad: 0.0,
        }
    }
}

/// Maps the quad onto the whole framebuffer with tile row 0 at the top
pub fn prepare_matrix() -> Mat4 {
    let e = EXTENT as f32;
    Mat4::orthographic_rh(0.0, e, e, 0.0, 0.0, 1.0)
}

/// Uniforms of the shading program, 128 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct HillshadeUniforms {
    /// Tile units -> screen clip space (64 bytes, offset 0)
    pub matrix: [[f32; 4]; 4],
    /// Premultiplied colors (48 bytes, offset 64)
    pub shadow: [f32; 4],
    pub highlight: [f32; 4],
    pub accent: [f32; 4],
    /// x = intensity (exaggeration), y = light azimuth in radians (offset 112)
    pub light: [f32; 2],
    /// Latitude of the north and south tile edges in degrees (offset 120)
    pub latrange: [f32; 2],
}

impl HillshadeUniforms {
    pub fn new(frame: &FrameState, id: &TileId, paint: &HillshadePaint) -> Self {
        let mut azimuth = paint.illumination_direction.to_radians();
        if paint.illumination_anchor == IlluminationAnchor::Viewport {
            azimuth += frame.view.bearing;
        }
        Self {
            matrix: frame.view.pos_matrix(id).to_cols_array_2d(),
            shadow: paint.shadow_color.premultiplied(),
            highlight: paint.highlight_color.premultiplied(),
            accent: paint.accent_color.premultiplied(),
            light: [paint.exaggeration, azimuth],
            latrange: id.lat_range(),
        }
    }
}

/// Uniforms of the terrain displacement stage, 96 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TerrainUniforms {
    /// Tile units -> terrain texture coordinates (64 bytes, offset 0)
    pub matrix: [[f32; 4]; 4],
    pub unpack: [f32; 4],
    pub exaggeration: f32,
    pub elevation_offset: f32,
    pub _pad: [f32; 2],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::frame::{RenderPass, TileView};
    use crate::style::Color;
    use crate::tile::DemEncoding;
    use glam::{Vec2, Vec4};

    #[test]
    fn test_uniform_sizes_match_shaders() {
        assert_eq!(std::mem::size_of::<PrepareUniforms>(), 96);
        assert_eq!(std::mem::size_of::<HillshadeUniforms>(), 128);
        assert_eq!(std::mem::size_of::<TerrainUniforms>(), 96);
    }

    #[test]
    fn test_prepare_matrix_puts_row_zero_on_top() {
        let m = prepare_matrix();
        let top_left = m * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let bottom_right = m * Vec4::new(EXTENT as f32, EXTENT as f32, 0.0, 1.0);
        assert!((top_left.truncate() - glam::Vec3::new(-1.0, 1.0, 0.0)).length() < 1e-6);
        assert!((bottom_right.truncate() - glam::Vec3::new(1.0, -1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_prepare_uniforms_from_dem() {
        let dem = ElevationRaster::from_fn(254, DemEncoding::Terrarium, |_, _| 0.0);
        let u = PrepareUniforms::new(&TileId::new(12, 0, 10, 1, 2), &dem);
        assert_eq!(u.dimension, [256.0, 256.0]);
        assert_eq!(u.zoom, 12.0);
        assert_eq!(u.unpack, DemEncoding::Terrarium.unpack_vector());
    }

    #[test]
    fn test_viewport_anchor_adds_bearing() {
        let mut view = TileView::orthographic(8, 8, Vec2::splat(0.5), 0.0, 8.0);
        view.bearing = 0.5;
        let frame = FrameState::new(RenderPass::Translucent, 8, 8, view);
        let id = TileId::from_canonical(0, 0, 0);

        let mut paint = HillshadePaint {
            illumination_direction: 90.0,
            ..Default::default()
        };
        let viewport = HillshadeUniforms::new(&frame, &id, &paint);
        assert!((viewport.light[1] - (std::f32::consts::FRAC_PI_2 + 0.5)).abs() < 1e-6);

        paint.illumination_anchor = IlluminationAnchor::Map;
        let map = HillshadeUniforms::new(&frame, &id, &paint);
        assert!((map.light[1] - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn test_colors_are_premultiplied() {
        let view = TileView::orthographic(8, 8, Vec2::splat(0.5), 0.0, 8.0);
        let frame = FrameState::new(RenderPass::Translucent, 8, 8, view);
        let paint = HillshadePaint {
            shadow_color: Color::new(1.0, 0.5, 0.0, 0.5),
            ..Default::default()
        };
        let u = HillshadeUniforms::new(&frame, &TileId::from_canonical(0, 0, 0), &paint);
        assert_eq!(u.shadow, [0.5, 0.25, 0.0, 0.5]);
    }
}
