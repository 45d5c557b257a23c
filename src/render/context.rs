//! Rendering context abstraction
//!
//! All GPU state the pipeline touches (bound target, viewport, texture
//! bindings, depth/stencil/color modes) goes through an explicit
//! [`RenderContext`] passed by `&mut` to every operation. Nothing relies on
//! state left behind by an earlier call: every draw carries the full state it
//! depends on, and every pass binds its own target and viewport.

use crate::core::Result;
use crate::render::geometry::QuadGeometry;
use crate::render::modes::{ColorMode, CullFaceMode, DepthMode, StencilMode};
use crate::render::terrain::TerrainData;
use crate::render::uniforms::{HillshadeUniforms, PrepareUniforms};

/// Opaque handle to a texture owned by a context
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u64);

/// Opaque handle to an offscreen framebuffer owned by a context
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub(crate) u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// DEM uploads and the screen target
    Rgba8Unorm,
    /// Slope textures
    Rgba16Float,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

/// A texture allocated by a context
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Texture {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressMode {
    ClampToEdge,
}

/// A texture bound to a sampler slot for one draw call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureBinding {
    pub texture: Texture,
    pub filter: FilterMode,
    pub address: AddressMode,
}

/// Where draw calls land
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    /// Main color target with depth and stencil
    Screen,
    /// Color-only offscreen framebuffer
    Framebuffer(FramebufferId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

/// Shader program and its uniform values
#[derive(Clone, Copy, Debug)]
pub enum Program {
    /// Elevation -> encoded slope, drawn into a tile framebuffer
    HillshadePrepare(PrepareUniforms),
    /// Encoded slope -> shaded color, drawn onto the screen
    Hillshade(HillshadeUniforms),
}

impl Program {
    pub fn kind(&self) -> ProgramKind {
        match self {
            Program::HillshadePrepare(_) => ProgramKind::HillshadePrepare,
            Program::Hillshade(_) => ProgramKind::Hillshade,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    HillshadePrepare,
    Hillshade,
}

/// Everything a single draw depends on
#[derive(Clone, Copy, Debug)]
pub struct DrawCall<'a> {
    pub program: Program,
    /// Sampled input of the program (DEM for prepare, slope for shading)
    pub texture: TextureBinding,
    pub depth_mode: DepthMode,
    pub stencil_mode: StencilMode,
    pub color_mode: ColorMode,
    pub cull_face_mode: CullFaceMode,
    /// Vertex displacement source; `None` draws a flat quad
    pub terrain: Option<&'a TerrainData>,
    /// Layer that issued the draw, for debugging and tagging
    pub layer_id: &'a str,
    pub geometry: &'a QuadGeometry,
}

/// GPU primitives consumed by the hillshade pipeline
///
/// Implemented by the wgpu backend and by the CPU reference rasterizer.
/// Texture data is never premultiplied on upload.
pub trait RenderContext {
    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<Texture>;

    /// Replace the full contents of a texture with tightly packed rows
    fn write_texture(&mut self, texture: &Texture, data: &[u8]) -> Result<()>;

    fn destroy_texture(&mut self, texture: Texture);

    /// Wrap a texture as the color attachment of a new framebuffer
    fn create_framebuffer(&mut self, color: &Texture) -> Result<FramebufferId>;

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId);

    fn bind_framebuffer(&mut self, target: RenderTarget);

    fn set_viewport(&mut self, viewport: Viewport);

    /// Reset the screen stencil buffer to zero
    fn clear_stencil(&mut self);

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()>;
}
