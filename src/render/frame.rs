//! Per-frame state handed down by the render-pass scheduler

use glam::{Mat4, Vec2, Vec3};

use crate::render::context::Viewport;
use crate::render::geometry::EXTENT;
use crate::render::modes::{ColorMode, CompareFunction, DepthMask, DepthMode};
use crate::tile::TileId;

/// Phase of the frame currently being drawn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderPass {
    /// Auxiliary textures are computed into private framebuffers
    Offscreen,
    Opaque,
    /// Final visible output is composited
    Translucent,
}

/// Placement of tiles on screen
///
/// `proj_matrix` maps world pixels (a `world_size` square for the whole
/// mercator world) to clip space. `bearing` is the view rotation in radians,
/// used by viewport-anchored lighting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileView {
    pub proj_matrix: Mat4,
    pub world_size: f32,
    pub bearing: f32,
}

impl TileView {
    /// Top-down orthographic view of a `width x height` screen
    ///
    /// `center` is in normalized world coordinates (`0..1` on both axes,
    /// north-west origin).
    pub fn orthographic(width: u32, height: u32, center: Vec2, zoom: f32, tile_size: f32) -> Self {
        let world_size = tile_size * zoom.exp2();
        let c = center * world_size;
        let (hw, hh) = (width as f32 / 2.0, height as f32 / 2.0);
        let proj_matrix = Mat4::orthographic_rh(
            c.x - hw,
            c.x + hw,
            c.y + hh,
            c.y - hh,
            -100_000.0,
            100_000.0,
        );
        Self {
            proj_matrix,
            world_size,
            bearing: 0.0,
        }
    }

    /// Matrix from tile units (`0..EXTENT`) to clip space
    pub fn pos_matrix(&self, id: &TileId) -> Mat4 {
        let scale = self.world_size / id.canonical.dim() as f32;
        let x = id.unwrapped_x() as f32 * scale;
        let y = id.canonical.y as f32 * scale;
        let s = scale / EXTENT as f32;
        self.proj_matrix
            * Mat4::from_translation(Vec3::new(x, y, 0.0))
            * Mat4::from_scale(Vec3::new(s, s, 1.0))
    }
}

/// Frame-level inputs from the scheduler
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameState {
    pub pass: RenderPass,
    pub width: u32,
    pub height: u32,
    pub view: TileView,
    /// Index of the layer being drawn, for depth separation
    pub current_layer: u32,
    pub num_sublayers: u32,
    pub depth_epsilon: f32,
}

impl FrameState {
    pub fn new(pass: RenderPass, width: u32, height: u32, view: TileView) -> Self {
        Self {
            pass,
            width,
            height,
            view,
            current_layer: 0,
            num_sublayers: 2,
            depth_epsilon: 1.0 / 65536.0,
        }
    }

    pub fn with_pass(&self, pass: RenderPass) -> Self {
        Self { pass, ..*self }
    }

    pub fn full_viewport(&self) -> Viewport {
        Viewport::new(0, 0, self.width, self.height)
    }

    /// Depth slot reserved for sublayer `n` of the current layer
    pub fn depth_mode_for_sublayer(&self, n: u32, mask: DepthMask) -> DepthMode {
        let slot = (1 + self.current_layer) * self.num_sublayers + n;
        let depth = (1.0 - slot as f32 * self.depth_epsilon).clamp(0.0, 1.0);
        DepthMode {
            func: CompareFunction::LessEqual,
            mask,
            range: [depth, depth],
        }
    }

    pub fn color_mode_for_render_pass(&self) -> ColorMode {
        match self.pass {
            RenderPass::Translucent => ColorMode::AlphaBlended,
            RenderPass::Offscreen | RenderPass::Opaque => ColorMode::Unblended,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn project(m: Mat4, x: f32, y: f32) -> Vec2 {
        let clip = m * Vec4::new(x, y, 0.0, 1.0);
        Vec2::new(clip.x / clip.w, clip.y / clip.w)
    }

    #[test]
    fn test_orthographic_tile_placement() {
        // 128 px world, screen shows the north-west quarter
        let view = TileView::orthographic(64, 64, Vec2::new(0.25, 0.25), 1.0, 64.0);
        let m = view.pos_matrix(&TileId::from_canonical(1, 0, 0));

        let nw = project(m, 0.0, 0.0);
        let se = project(m, EXTENT as f32, EXTENT as f32);
        assert!((nw - Vec2::new(-1.0, 1.0)).length() < 1e-5);
        assert!((se - Vec2::new(1.0, -1.0)).length() < 1e-5);
    }

    #[test]
    fn test_child_tile_covers_quadrant() {
        let view = TileView::orthographic(64, 64, Vec2::new(0.25, 0.25), 1.0, 64.0);
        let m = view.pos_matrix(&TileId::from_canonical(2, 0, 0));
        let se = project(m, EXTENT as f32, EXTENT as f32);
        assert!((se - Vec2::new(0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_depth_mode_for_sublayer() {
        let view = TileView::orthographic(8, 8, Vec2::splat(0.5), 0.0, 8.0);
        let frame = FrameState::new(RenderPass::Translucent, 8, 8, view);
        let d0 = frame.depth_mode_for_sublayer(0, DepthMask::ReadOnly);
        let d1 = frame.depth_mode_for_sublayer(1, DepthMask::ReadOnly);
        assert!(d1.range[0] < d0.range[0]);
        assert!(!d0.writes_depth());
        assert_eq!(d0.func, CompareFunction::LessEqual);
    }

    #[test]
    fn test_color_mode_per_pass() {
        let view = TileView::orthographic(8, 8, Vec2::splat(0.5), 0.0, 8.0);
        let frame = FrameState::new(RenderPass::Translucent, 8, 8, view);
        assert_eq!(frame.color_mode_for_render_pass(), ColorMode::AlphaBlended);
        assert_eq!(
            frame.with_pass(RenderPass::Offscreen).color_mode_for_render_pass(),
            ColorMode::Unblended
        );
    }
}
