//! CPU reference backend
//!
//! Runs the hillshade programs with the same math as the WGSL shaders on a
//! small rasterizer that follows wgpu conventions: NDC `y = +1` is row 0,
//! pixel centers at half coordinates, 8-bit subpixel precision with a
//! top-left fill rule, stencil test before depth test, premultiplied
//! source-over blending. Render targets store the values their format can
//! hold, so reads return exactly what a GPU readback would.
//!
//! Offscreen framebuffers are color-only; depth and stencil apply to the
//! screen target only. There is no near/far clipping.

use std::collections::HashMap;
use std::f32::consts::{FRAC_PI_2, PI};

use glam::{Mat4, Vec2, Vec4};
use half::f16;

use crate::core::{Error, Result};
use crate::render::context::{
    AddressMode, DrawCall, FilterMode, FramebufferId, Program, ProgramKind, RenderContext,
    RenderTarget, Texture, TextureBinding, TextureDescriptor, TextureFormat, TextureId, Viewport,
};
use crate::render::geometry::{EXTENT, RasterBoundsVertex};
use crate::render::modes::{ColorMode, CullFaceMode, StencilMode, StencilOp};
use crate::render::terrain::TerrainData;
use crate::render::uniforms::{HillshadeUniforms, PrepareUniforms};

/// Fixed-point subpixel resolution of vertex positions
const SUBPIXEL: f32 = 256.0;

/// A recorded context call
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CreateTexture(TextureId),
    WriteTexture(TextureId),
    DestroyTexture(TextureId),
    CreateFramebuffer(FramebufferId),
    DestroyFramebuffer(FramebufferId),
    BindFramebuffer(RenderTarget),
    SetViewport(Viewport),
    ClearStencil,
    Draw {
        program: ProgramKind,
        layer_id: String,
        texture: TextureId,
        target: RenderTarget,
        stencil_reference: u32,
        terrain: bool,
    },
}

/// Allocation and draw counters since creation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContextStats {
    pub textures_created: usize,
    pub framebuffers_created: usize,
    pub texture_writes: usize,
    pub draw_calls: usize,
    pub fragments: usize,
}

#[derive(Clone, Debug)]
struct SoftTexture {
    width: u32,
    height: u32,
    format: TextureFormat,
    texels: Vec<[f32; 4]>,
}

impl SoftTexture {
    fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            texels: vec![[0.0; 4]; (width * height) as usize],
        }
    }

    fn store(&mut self, x: u32, y: u32, value: [f32; 4]) {
        let i = (y * self.width + x) as usize;
        self.texels[i] = quantize(self.format, value);
    }

    fn fetch(&self, x: i32, y: i32, address: AddressMode) -> [f32; 4] {
        let x = wrap(x, self.width, address);
        let y = wrap(y, self.height, address);
        self.texels[y * self.width as usize + x]
    }

    fn sample(&self, uv: Vec2, binding: &TextureBinding) -> [f32; 4] {
        let size = Vec2::new(self.width as f32, self.height as f32);
        match binding.filter {
            FilterMode::Nearest => {
                let p = (uv * size).floor();
                self.fetch(p.x as i32, p.y as i32, binding.address)
            }
            FilterMode::Linear => {
                let p = uv * size - 0.5;
                let p0 = p.floor();
                let t = p - p0;
                let (x, y) = (p0.x as i32, p0.y as i32);
                let top = lerp(
                    self.fetch(x, y, binding.address),
                    self.fetch(x + 1, y, binding.address),
                    t.x,
                );
                let bottom = lerp(
                    self.fetch(x, y + 1, binding.address),
                    self.fetch(x + 1, y + 1, binding.address),
                    t.x,
                );
                lerp(top, bottom, t.y)
            }
        }
    }
}

fn wrap(i: i32, n: u32, address: AddressMode) -> usize {
    match address {
        AddressMode::ClampToEdge => i.clamp(0, n as i32 - 1) as usize,
    }
}

fn lerp(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    std::array::from_fn(|i| a[i] + (b[i] - a[i]) * t)
}

fn quantize(format: TextureFormat, value: [f32; 4]) -> [f32; 4] {
    match format {
        TextureFormat::Rgba8Unorm => value.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() / 255.0),
        TextureFormat::Rgba16Float => value.map(|c| f16::from_f32(c).to_f32()),
    }
}

/// Headless CPU implementation of [`RenderContext`]
pub struct SoftwareContext {
    width: u32,
    height: u32,
    screen: SoftTexture,
    depth: Vec<f32>,
    stencil: Vec<u8>,
    textures: HashMap<TextureId, SoftTexture>,
    framebuffers: HashMap<FramebufferId, TextureId>,
    next_id: u64,
    target: RenderTarget,
    viewport: Viewport,
    commands: Vec<Command>,
    stats: ContextStats,
    fail_allocations: bool,
    fail_framebuffers: bool,
}

impl SoftwareContext {
    /// Create a context with a `width x height` screen cleared to transparent black
    pub fn new(width: u32, height: u32) -> Self {
        let pixels = (width * height) as usize;
        Self {
            width,
            height,
            screen: SoftTexture::new(width, height, TextureFormat::Rgba8Unorm),
            depth: vec![1.0; pixels],
            stencil: vec![0; pixels],
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            next_id: 1,
            target: RenderTarget::Screen,
            viewport: Viewport::new(0, 0, width, height),
            commands: Vec::new(),
            stats: ContextStats::default(),
            fail_allocations: false,
            fail_framebuffers: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Fill the screen color buffer and reset depth
    pub fn clear_color(&mut self, color: [f32; 4]) {
        let value = quantize(TextureFormat::Rgba8Unorm, color);
        self.screen.texels.fill(value);
        self.depth.fill(1.0);
    }

    /// Screen pixels, row-major from the top-left corner
    pub fn read_screen(&self) -> Vec<[u8; 4]> {
        self.screen
            .texels
            .iter()
            .map(|t| t.map(|c| (c * 255.0).round() as u8))
            .collect()
    }

    pub fn stencil_value(&self, x: u32, y: u32) -> u8 {
        self.stencil[(y * self.width + x) as usize]
    }

    /// Texel values as stored by the texture's format
    pub fn read_texture(&self, texture: &Texture) -> Result<Vec<[f32; 4]>> {
        self.textures
            .get(&texture.id)
            .map(|t| t.texels.clone())
            .ok_or_else(|| Error::Gpu(format!("unknown texture {:?}", texture.id)))
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn stats(&self) -> ContextStats {
        self.stats
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    /// Make every texture allocation fail
    pub fn set_fail_allocations(&mut self, fail: bool) {
        self.fail_allocations = fail;
    }

    /// Make every framebuffer allocation fail
    pub fn set_fail_framebuffers(&mut self, fail: bool) {
        self.fail_framebuffers = fail;
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl RenderContext for SoftwareContext {
    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<Texture> {
        if self.fail_allocations {
            return Err(Error::ResourceAllocation(format!("{} allocation rejected", desc.label)));
        }
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::ResourceAllocation(format!(
                "{} has zero size {}x{}",
                desc.label, desc.width, desc.height
            )));
        }

        let id = TextureId(self.allocate_id());
        self.textures
            .insert(id, SoftTexture::new(desc.width, desc.height, desc.format));
        self.commands.push(Command::CreateTexture(id));
        self.stats.textures_created += 1;
        Ok(Texture {
            id,
            width: desc.width,
            height: desc.height,
            format: desc.format,
        })
    }

    fn write_texture(&mut self, texture: &Texture, data: &[u8]) -> Result<()> {
        let soft = self
            .textures
            .get_mut(&texture.id)
            .ok_or_else(|| Error::Gpu(format!("unknown texture {:?}", texture.id)))?;
        let expected = (soft.width * soft.height * soft.format.bytes_per_pixel()) as usize;
        if data.len() != expected {
            return Err(Error::Gpu(format!(
                "texture write of {} bytes, expected {}",
                data.len(),
                expected
            )));
        }

        match soft.format {
            TextureFormat::Rgba8Unorm => {
                for (texel, bytes) in soft.texels.iter_mut().zip(data.chunks_exact(4)) {
                    *texel = std::array::from_fn(|i| bytes[i] as f32 / 255.0);
                }
            }
            TextureFormat::Rgba16Float => {
                for (texel, bytes) in soft.texels.iter_mut().zip(data.chunks_exact(8)) {
                    *texel = std::array::from_fn(|i| {
                        f16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]).to_f32()
                    });
                }
            }
        }
        self.commands.push(Command::WriteTexture(texture.id));
        self.stats.texture_writes += 1;
        Ok(())
    }

    fn destroy_texture(&mut self, texture: Texture) {
        if self.textures.remove(&texture.id).is_some() {
            self.commands.push(Command::DestroyTexture(texture.id));
        }
    }

    fn create_framebuffer(&mut self, color: &Texture) -> Result<FramebufferId> {
        if self.fail_framebuffers {
            return Err(Error::ResourceAllocation("framebuffer allocation rejected".into()));
        }
        if !self.textures.contains_key(&color.id) {
            return Err(Error::Gpu(format!("unknown color attachment {:?}", color.id)));
        }

        let id = FramebufferId(self.allocate_id());
        self.framebuffers.insert(id, color.id);
        self.commands.push(Command::CreateFramebuffer(id));
        self.stats.framebuffers_created += 1;
        Ok(id)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(&framebuffer).is_some() {
            self.commands.push(Command::DestroyFramebuffer(framebuffer));
        }
        if self.target == RenderTarget::Framebuffer(framebuffer) {
            self.target = RenderTarget::Screen;
        }
    }

    fn bind_framebuffer(&mut self, target: RenderTarget) {
        self.target = target;
        self.commands.push(Command::BindFramebuffer(target));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.commands.push(Command::SetViewport(viewport));
    }

    fn clear_stencil(&mut self) {
        self.stencil.fill(0);
        self.commands.push(Command::ClearStencil);
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()> {
        let viewport = self.viewport;
        let fragments = match self.target {
            RenderTarget::Screen => {
                let (source, terrain) = draw_inputs(&self.textures, call)?;
                let depth_stencil = DepthStencil {
                    depth: &mut self.depth,
                    stencil: &mut self.stencil,
                };
                rasterize(call, source, terrain, &mut self.screen, Some(depth_stencil), viewport)
            }
            RenderTarget::Framebuffer(framebuffer) => {
                let target_id = *self
                    .framebuffers
                    .get(&framebuffer)
                    .ok_or_else(|| Error::Gpu(format!("unknown framebuffer {:?}", framebuffer)))?;
                if call.texture.texture.id == target_id
                    || call.terrain.is_some_and(|t| t.texture.id == target_id)
                {
                    return Err(Error::Gpu("draw samples its own render target".into()));
                }
                let mut target = self
                    .textures
                    .remove(&target_id)
                    .ok_or_else(|| Error::Gpu(format!("framebuffer attachment {:?} destroyed", target_id)))?;
                let result = draw_inputs(&self.textures, call)
                    .map(|(source, terrain)| rasterize(call, source, terrain, &mut target, None, viewport));
                self.textures.insert(target_id, target);
                result?
            }
        };

        self.commands.push(Command::Draw {
            program: call.program.kind(),
            layer_id: call.layer_id.to_string(),
            texture: call.texture.texture.id,
            target: self.target,
            stencil_reference: call.stencil_mode.reference,
            terrain: call.terrain.is_some(),
        });
        self.stats.draw_calls += 1;
        self.stats.fragments += fragments;
        Ok(())
    }
}

type TerrainInput<'t> = Option<(&'t TerrainData, &'t SoftTexture)>;

fn draw_inputs<'t>(
    textures: &'t HashMap<TextureId, SoftTexture>,
    call: &DrawCall<'t>,
) -> Result<(&'t SoftTexture, TerrainInput<'t>)> {
    let lookup = |id: TextureId| {
        textures
            .get(&id)
            .ok_or_else(|| Error::Gpu(format!("draw samples unknown texture {:?}", id)))
    };
    let source = lookup(call.texture.texture.id)?;
    let terrain = match call.terrain {
        Some(data) => Some((data, lookup(data.texture.id)?)),
        None => None,
    };
    Ok((source, terrain))
}

struct DepthStencil<'a> {
    depth: &'a mut [f32],
    stencil: &'a mut [u8],
}

#[derive(Clone, Copy)]
struct Varyings {
    clip: Vec4,
    v_pos: Vec2,
}

/// Vertex after the viewport transform, position in subpixels
#[derive(Clone, Copy)]
struct ScreenVertex {
    x: i64,
    y: i64,
    z: f32,
    inv_w: f32,
    v_pos: Vec2,
}

fn run_vertex(program: &Program, terrain: TerrainInput<'_>, vertex: &RasterBoundsVertex) -> Varyings {
    let pos = Vec2::new(vertex.pos[0] as f32, vertex.pos[1] as f32);
    let texture_pos = Vec2::new(vertex.texture_pos[0] as f32, vertex.texture_pos[1] as f32);
    let extent = EXTENT as f32;

    match program {
        Program::HillshadePrepare(u) => {
            let dimension = Vec2::from(u.dimension);
            let epsilon = Vec2::ONE / dimension;
            let scale = (dimension.x - 2.0) / dimension.x;
            Varyings {
                clip: Mat4::from_cols_array_2d(&u.matrix) * Vec4::new(pos.x, pos.y, 0.0, 1.0),
                v_pos: (texture_pos / extent) * scale + epsilon,
            }
        }
        Program::Hillshade(u) => {
            let z = terrain.map_or(0.0, |(data, texture)| terrain_elevation(data, texture, pos));
            Varyings {
                clip: Mat4::from_cols_array_2d(&u.matrix) * Vec4::new(pos.x, pos.y, z, 1.0),
                v_pos: texture_pos / extent,
            }
        }
    }
}

fn terrain_elevation(data: &TerrainData, texture: &SoftTexture, pos: Vec2) -> f32 {
    let coord = data.matrix * Vec4::new(pos.x, pos.y, 0.0, 1.0);
    let binding = TextureBinding {
        texture: data.texture,
        filter: FilterMode::Nearest,
        address: AddressMode::ClampToEdge,
    };
    let texel = texture.sample(Vec2::new(coord.x, coord.y), &binding);
    let unpack = data.encoding.unpack_vector();
    let elevation = decode(texel, unpack);
    (elevation + data.elevation_offset) * data.exaggeration
}

fn decode(texel: [f32; 4], unpack: [f32; 4]) -> f32 {
    let r = (texel[0] * 255.0).round();
    let g = (texel[1] * 255.0).round();
    let b = (texel[2] * 255.0).round();
    r * unpack[0] + g * unpack[1] + b * unpack[2] - unpack[3]
}

fn prepare_fragment(u: &PrepareUniforms, dem: &SoftTexture, binding: &TextureBinding, v_pos: Vec2) -> Vec4 {
    let e = Vec2::ONE / Vec2::from(u.dimension);
    let elevation = |dx: f32, dy: f32| decode(dem.sample(v_pos + Vec2::new(dx * e.x, dy * e.y), binding), u.unpack);

    let a = elevation(-1.0, -1.0);
    let b = elevation(0.0, -1.0);
    let c = elevation(1.0, -1.0);
    let d = elevation(-1.0, 0.0);
    let f = elevation(1.0, 0.0);
    let g = elevation(-1.0, 1.0);
    let h = elevation(0.0, 1.0);
    let i = elevation(1.0, 1.0);

    let zoom = u.zoom;
    let factor = if zoom < 2.0 {
        0.4
    } else if zoom < 4.5 {
        0.35
    } else {
        0.3
    };
    let exaggeration = if zoom < 15.0 { (zoom - 15.0) * factor } else { 0.0 };
    let scale = 2f32.powf(exaggeration + (19.2562 - zoom));

    let dx = ((c + f + f + i) - (a + d + d + g)) / scale;
    let dy = ((g + h + h + i) - (a + b + b + c)) / scale;
    Vec4::new(dx / 2.0 + 0.5, dy / 2.0 + 0.5, 1.0, 1.0).clamp(Vec4::ZERO, Vec4::ONE)
}

fn glsl_mod(x: f32, y: f32) -> f32 {
    x - y * (x / y).floor()
}

fn hillshade_fragment(u: &HillshadeUniforms, slope: &SoftTexture, binding: &TextureBinding, v_pos: Vec2) -> Vec4 {
    let pixel = slope.sample(v_pos, binding);
    let deriv = Vec2::new(pixel[0] * 2.0 - 1.0, pixel[1] * 2.0 - 1.0);

    let [north, south] = u.latrange;
    let scale_factor = ((north - south) * (1.0 - v_pos.y) + south).to_radians().cos();
    let slope = (1.25 * deriv.length() / scale_factor).atan();
    let aspect = if deriv.x != 0.0 {
        deriv.y.atan2(-deriv.x)
    } else {
        FRAC_PI_2 * if deriv.y > 0.0 { 1.0 } else { -1.0 }
    };

    let intensity = u.light[0];
    let azimuth = u.light[1] + PI;
    let base = 1.875 - intensity * 1.75;
    let max_value = 0.5 * PI;
    let scaled_slope = if intensity != 0.5 {
        ((base.powf(slope) - 1.0) / (base.powf(max_value) - 1.0)) * max_value
    } else {
        slope
    };

    let strength = (intensity * 2.0).clamp(0.0, 1.0);
    let accent_color = (1.0 - scaled_slope.cos()) * Vec4::from(u.accent) * strength;
    let shade = (glsl_mod((aspect + azimuth) / PI + 0.5, 2.0) - 1.0).abs();
    let shade_color =
        Vec4::from(u.shadow).lerp(Vec4::from(u.highlight), shade) * scaled_slope.sin() * strength;

    accent_color * (1.0 - shade_color.w) + shade_color
}

fn run_fragment(call: &DrawCall<'_>, source: &SoftTexture, v_pos: Vec2) -> Vec4 {
    match &call.program {
        Program::HillshadePrepare(u) => prepare_fragment(u, source, &call.texture, v_pos),
        Program::Hillshade(u) => hillshade_fragment(u, source, &call.texture, v_pos),
    }
}

fn edge(a: &ScreenVertex, b: &ScreenVertex, px: i64, py: i64) -> i64 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

/// Top and left edges own the pixel centers lying exactly on them
fn owns_boundary(a: &ScreenVertex, b: &ScreenVertex) -> bool {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    dy < 0 || (dy == 0 && dx > 0)
}

fn stencil_write(mode: &StencilMode, stored: u8, op: StencilOp) -> u8 {
    let mask = mode.write_mask as u8;
    (stored & !mask) | (op.apply(stored, mode.reference as u8) & mask)
}

/// Draw every triangle of the call; returns the number of fragments written
fn rasterize(
    call: &DrawCall<'_>,
    source: &SoftTexture,
    terrain: TerrainInput<'_>,
    target: &mut SoftTexture,
    mut depth_stencil: Option<DepthStencil<'_>>,
    viewport: Viewport,
) -> usize {
    let to_screen = |v: Varyings| {
        let ndc = v.clip / v.clip.w;
        let sx = viewport.x as f32 + (ndc.x + 1.0) * 0.5 * viewport.width as f32;
        let sy = viewport.y as f32 + (1.0 - ndc.y) * 0.5 * viewport.height as f32;
        ScreenVertex {
            x: (sx * SUBPIXEL).round() as i64,
            y: (sy * SUBPIXEL).round() as i64,
            z: ndc.z,
            inv_w: 1.0 / v.clip.w,
            v_pos: v.v_pos,
        }
    };

    let x_end = (viewport.x + viewport.width).min(target.width) as i64;
    let y_end = (viewport.y + viewport.height).min(target.height) as i64;
    let sub = SUBPIXEL as i64;
    let mut fragments = 0;

    for [i0, i1, i2] in call.geometry.triangles() {
        let varyings = [i0, i1, i2].map(|i| run_vertex(&call.program, terrain, &call.geometry.vertices[i]));
        if varyings.iter().any(|v| v.clip.w <= 0.0) {
            continue;
        }
        let mut tri = varyings.map(to_screen);

        let mut area = edge(&tri[0], &tri[1], tri[2].x, tri[2].y);
        if area == 0 || (call.cull_face_mode == CullFaceMode::Back && area < 0) {
            continue;
        }
        if area < 0 {
            tri.swap(1, 2);
            area = -area;
        }

        let min_x = tri.iter().map(|v| v.x).min().unwrap_or(0).div_euclid(sub).max(viewport.x as i64);
        let min_y = tri.iter().map(|v| v.y).min().unwrap_or(0).div_euclid(sub).max(viewport.y as i64);
        let max_x = (tri.iter().map(|v| v.x).max().unwrap_or(0).div_euclid(sub) + 1).min(x_end);
        let max_y = (tri.iter().map(|v| v.y).max().unwrap_or(0).div_euclid(sub) + 1).min(y_end);

        let edges = [(1, 2), (2, 0), (0, 1)];
        let owns = edges.map(|(a, b)| owns_boundary(&tri[a], &tri[b]));

        for py in min_y..max_y {
            for px in min_x..max_x {
                let (cx, cy) = (px * sub + sub / 2, py * sub + sub / 2);
                let w = edges.map(|(a, b)| edge(&tri[a], &tri[b], cx, cy));
                let inside = (0..3).all(|k| w[k] > 0 || (w[k] == 0 && owns[k]));
                if !inside {
                    continue;
                }

                let bary = w.map(|wk| (wk as f64 / area as f64) as f32);
                let persp = [0, 1, 2].map(|k| bary[k] * tri[k].inv_w);
                let norm = persp[0] + persp[1] + persp[2];
                let v_pos = (tri[0].v_pos * persp[0] + tri[1].v_pos * persp[1] + tri[2].v_pos * persp[2]) / norm;
                let z = tri[0].z * bary[0] + tri[1].z * bary[1] + tri[2].z * bary[2];

                let (x, y) = (px as u32, py as u32);
                if let Some(ds) = depth_stencil.as_mut() {
                    let index = (y * target.width + x) as usize;
                    let mode = &call.stencil_mode;
                    let stored = ds.stencil[index];
                    let mask = mode.mask as u8;
                    if !mode.func.test(mode.reference as u8 & mask, stored & mask) {
                        ds.stencil[index] = stencil_write(mode, stored, mode.fail);
                        continue;
                    }
                    let depth_mode = &call.depth_mode;
                    let depth = depth_mode.range[0] + z * (depth_mode.range[1] - depth_mode.range[0]);
                    if !depth_mode.func.test(depth, ds.depth[index]) {
                        ds.stencil[index] = stencil_write(mode, stored, mode.depth_fail);
                        continue;
                    }
                    if depth_mode.writes_depth() {
                        ds.depth[index] = depth;
                    }
                    ds.stencil[index] = stencil_write(mode, stored, mode.pass);
                }

                let src = run_fragment(call, source, v_pos);
                let out = match call.color_mode {
                    ColorMode::Unblended => src,
                    ColorMode::AlphaBlended => {
                        let dst = Vec4::from(target.texels[(y * target.width + x) as usize]);
                        src + dst * (1.0 - src.w)
                    }
                };
                target.store(x, y, out.to_array());
                fragments += 1;
            }
        }
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::frame::{FrameState, RenderPass, TileView};
    use crate::render::geometry::QuadGeometry;
    use crate::render::modes::{CompareFunction, DepthMode};
    use crate::style::HillshadePaint;
    use crate::tile::{DemEncoding, ElevationRaster, TileId};

    fn slope_texture(ctx: &mut SoftwareContext, dim: u32, rg: [f32; 2]) -> Texture {
        let texture = ctx
            .create_texture(&TextureDescriptor {
                label: "slope",
                width: dim,
                height: dim,
                format: TextureFormat::Rgba16Float,
            })
            .unwrap();
        let texel: Vec<u8> = [rg[0], rg[1], 1.0, 1.0]
            .iter()
            .flat_map(|c| f16::from_f32(*c).to_le_bytes())
            .collect();
        ctx.write_texture(&texture, &texel.repeat((dim * dim) as usize)).unwrap();
        texture
    }

    fn shade_call<'a>(
        geometry: &'a QuadGeometry,
        texture: Texture,
        stencil_mode: StencilMode,
        depth_mode: DepthMode,
    ) -> DrawCall<'a> {
        let view = TileView::orthographic(16, 16, Vec2::splat(0.5), 0.0, 16.0);
        let frame = FrameState::new(RenderPass::Translucent, 16, 16, view);
        let uniforms = HillshadeUniforms::new(&frame, &TileId::from_canonical(0, 0, 0), &HillshadePaint::default());
        DrawCall {
            program: Program::Hillshade(uniforms),
            texture: TextureBinding {
                texture,
                filter: FilterMode::Linear,
                address: AddressMode::ClampToEdge,
            },
            depth_mode,
            stencil_mode,
            color_mode: ColorMode::AlphaBlended,
            cull_face_mode: CullFaceMode::Disabled,
            terrain: None,
            layer_id: "test",
            geometry,
        }
    }

    fn prepare_call<'a>(geometry: &'a QuadGeometry, dem: &ElevationRaster, texture: Texture) -> DrawCall<'a> {
        DrawCall {
            program: Program::HillshadePrepare(PrepareUniforms::new(&TileId::from_canonical(10, 0, 0), dem)),
            texture: TextureBinding {
                texture,
                filter: FilterMode::Nearest,
                address: AddressMode::ClampToEdge,
            },
            depth_mode: DepthMode::disabled(),
            stencil_mode: StencilMode::disabled(),
            color_mode: ColorMode::Unblended,
            cull_face_mode: CullFaceMode::Disabled,
            terrain: None,
            layer_id: "test",
            geometry,
        }
    }

    fn upload(ctx: &mut SoftwareContext, dem: &ElevationRaster) -> Texture {
        let texture = ctx
            .create_texture(&TextureDescriptor {
                label: "dem",
                width: dem.stride(),
                height: dem.stride(),
                format: TextureFormat::Rgba8Unorm,
            })
            .unwrap();
        ctx.write_texture(&texture, dem.pixels()).unwrap();
        texture
    }

    #[test]
    fn test_texture_lifecycle() {
        let mut ctx = SoftwareContext::new(4, 4);
        let texture = ctx
            .create_texture(&TextureDescriptor {
                label: "t",
                width: 2,
                height: 1,
                format: TextureFormat::Rgba8Unorm,
            })
            .unwrap();
        ctx.write_texture(&texture, &[255, 0, 51, 255, 0, 0, 0, 0]).unwrap();
        assert_eq!(ctx.read_texture(&texture).unwrap()[0], [1.0, 0.0, 0.2, 1.0]);
        assert!(ctx.write_texture(&texture, &[0; 4]).is_err());

        ctx.destroy_texture(texture);
        assert!(ctx.read_texture(&texture).is_err());
        assert_eq!(ctx.live_textures(), 0);
    }

    #[test]
    fn test_rejected_allocations() {
        let mut ctx = SoftwareContext::new(4, 4);
        let desc = TextureDescriptor {
            label: "t",
            width: 0,
            height: 4,
            format: TextureFormat::Rgba8Unorm,
        };
        assert!(matches!(ctx.create_texture(&desc), Err(Error::ResourceAllocation(_))));

        ctx.set_fail_allocations(true);
        let desc = TextureDescriptor { width: 4, ..desc };
        assert!(matches!(ctx.create_texture(&desc), Err(Error::ResourceAllocation(_))));
        assert_eq!(ctx.stats().textures_created, 0);
    }

    #[test]
    fn test_prepare_covers_every_texel() {
        let mut ctx = SoftwareContext::new(4, 4);
        let geometry = QuadGeometry::unit_quad();
        let dem = ElevationRaster::from_fn(16, DemEncoding::Terrarium, |_, _| 10.0);
        let dem_texture = upload(&mut ctx, &dem);
        let target = slope_texture(&mut ctx, 16, [0.0, 0.0]);
        let framebuffer = ctx.create_framebuffer(&target).unwrap();

        ctx.bind_framebuffer(RenderTarget::Framebuffer(framebuffer));
        ctx.set_viewport(Viewport::new(0, 0, 16, 16));
        ctx.draw(&prepare_call(&geometry, &dem, dem_texture)).unwrap();

        let texels = ctx.read_texture(&target).unwrap();
        assert!(texels.iter().all(|t| *t == [0.5, 0.5, 1.0, 1.0]));
        assert_eq!(ctx.stats().fragments, 256);
    }

    #[test]
    fn test_viewport_limits_coverage() {
        let mut ctx = SoftwareContext::new(8, 8);
        let geometry = QuadGeometry::unit_quad();
        let dem = ElevationRaster::from_fn(4, DemEncoding::Terrarium, |_, _| 10.0);
        let dem_texture = upload(&mut ctx, &dem);

        ctx.set_viewport(Viewport::new(0, 0, 4, 4));
        ctx.draw(&prepare_call(&geometry, &dem, dem_texture)).unwrap();

        let screen = ctx.read_screen();
        for y in 0..8 {
            for x in 0..8 {
                let expected = if x < 4 && y < 4 { [128, 128, 255, 255] } else { [0, 0, 0, 0] };
                assert_eq!(screen[y * 8 + x], expected, "pixel ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_shared_diagonal_is_drawn_once() {
        let mut ctx = SoftwareContext::new(16, 16);
        ctx.clear_color([1.0, 1.0, 1.0, 1.0]);
        let geometry = QuadGeometry::unit_quad();
        let texture = slope_texture(&mut ctx, 8, [0.8, 0.5]);
        ctx.draw(&shade_call(&geometry, texture, StencilMode::disabled(), DepthMode::disabled()))
            .unwrap();

        // Every pixel shaded, and blended exactly once
        let screen = ctx.read_screen();
        assert!(screen.iter().all(|p| *p != [255, 255, 255, 255]));
        assert_eq!(ctx.stats().fragments, 256);
    }

    #[test]
    fn test_stencil_rejects_lower_reference() {
        let mut ctx = SoftwareContext::new(16, 16);
        let geometry = QuadGeometry::unit_quad();
        let texture = slope_texture(&mut ctx, 8, [0.8, 0.5]);
        let mode = |reference| StencilMode {
            func: CompareFunction::GreaterEqual,
            mask: 0xFF,
            reference,
            write_mask: 0xFF,
            fail: StencilOp::Keep,
            depth_fail: StencilOp::Keep,
            pass: StencilOp::Replace,
        };

        ctx.draw(&shade_call(&geometry, texture, mode(5), DepthMode::disabled())).unwrap();
        assert_eq!(ctx.stencil_value(3, 7), 5);
        assert_eq!(ctx.stats().fragments, 256);

        ctx.draw(&shade_call(&geometry, texture, mode(4), DepthMode::disabled())).unwrap();
        assert_eq!(ctx.stats().fragments, 256);
        assert_eq!(ctx.stencil_value(3, 7), 5);

        ctx.clear_stencil();
        ctx.draw(&shade_call(&geometry, texture, mode(4), DepthMode::disabled())).unwrap();
        assert_eq!(ctx.stats().fragments, 512);
    }

    #[test]
    fn test_depth_range_is_tested() {
        let mut ctx = SoftwareContext::new(16, 16);
        let geometry = QuadGeometry::unit_quad();
        let texture = slope_texture(&mut ctx, 8, [0.8, 0.5]);
        let far = DepthMode {
            func: CompareFunction::Less,
            mask: crate::render::modes::DepthMask::ReadOnly,
            range: [1.0, 1.0],
        };
        ctx.draw(&shade_call(&geometry, texture, StencilMode::disabled(), far)).unwrap();
        assert_eq!(ctx.stats().fragments, 0);

        let near = DepthMode { range: [0.5, 0.5], ..far };
        ctx.draw(&shade_call(&geometry, texture, StencilMode::disabled(), near)).unwrap();
        assert_eq!(ctx.stats().fragments, 256);
    }

    #[test]
    fn test_framebuffer_ignores_stencil() {
        let mut ctx = SoftwareContext::new(4, 4);
        let geometry = QuadGeometry::unit_quad();
        let dem = ElevationRaster::from_fn(4, DemEncoding::Terrarium, |_, _| 10.0);
        let dem_texture = upload(&mut ctx, &dem);
        let target = slope_texture(&mut ctx, 4, [0.0, 0.0]);
        let framebuffer = ctx.create_framebuffer(&target).unwrap();

        let mut call = prepare_call(&geometry, &dem, dem_texture);
        call.stencil_mode = StencilMode {
            func: CompareFunction::Never,
            ..StencilMode::disabled()
        };
        ctx.bind_framebuffer(RenderTarget::Framebuffer(framebuffer));
        ctx.set_viewport(Viewport::new(0, 0, 4, 4));
        ctx.draw(&call).unwrap();
        assert_eq!(ctx.stats().fragments, 16);
    }

    #[test]
    fn test_draw_errors() {
        let mut ctx = SoftwareContext::new(4, 4);
        let geometry = QuadGeometry::unit_quad();
        let texture = slope_texture(&mut ctx, 4, [0.5, 0.5]);
        let framebuffer = ctx.create_framebuffer(&texture).unwrap();

        ctx.bind_framebuffer(RenderTarget::Framebuffer(framebuffer));
        let feedback = shade_call(&geometry, texture, StencilMode::disabled(), DepthMode::disabled());
        assert!(ctx.draw(&feedback).is_err());

        ctx.bind_framebuffer(RenderTarget::Screen);
        ctx.destroy_texture(texture);
        assert!(ctx.draw(&feedback).is_err());
        assert_eq!(ctx.stats().draw_calls, 0);
    }

    #[test]
    fn test_linear_filter_keeps_constant_exact() {
        let mut ctx = SoftwareContext::new(4, 4);
        let texture = slope_texture(&mut ctx, 4, [0.5, 0.5]);
        let soft = &ctx.textures[&texture.id];
        let binding = TextureBinding {
            texture,
            filter: FilterMode::Linear,
            address: AddressMode::ClampToEdge,
        };
        for uv in [Vec2::new(0.0, 0.0), Vec2::new(0.37, 0.91), Vec2::new(1.0, 1.0)] {
            assert_eq!(soft.sample(uv, &binding), [0.5, 0.5, 1.0, 1.0]);
        }
    }

    #[test]
    fn test_glsl_mod_follows_divisor_sign() {
        assert_eq!(glsl_mod(5.0, 2.0), 1.0);
        assert_eq!(glsl_mod(-0.5, 2.0), 1.5);
    }
}
