//! Hillshade demo: shades a synthetic DEM pyramid level and writes a PNG.
//!
//! Usage: cargo run --release -- [OPTIONS]
//!
//! Options:
//!   --backend <NAME>  `wgpu` or `software` (default: wgpu, falls back to software)
//!   --out <PATH>      Output PNG (default: hillshade.png)
//!   --zoom <Z>        Tile zoom level; the whole world is drawn (default: 2)
//!   --size <PX>       Square output size in pixels, 1..=8192 (default: 512)
//!   --dim <PX>        DEM tile size in pixels, 2..=4096 (default: 256)
//!   --seed <SEED>     Noise seed (default: 12345)
//!   --config <PATH>   Hillshade layer JSON (default: built-in paint)

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use glam::Vec2;
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use hillshade::core::{logging, Result};
use hillshade::render::{
    FrameState, HillshadeRenderer, RenderContext, RenderPass, SoftwareContext, TileView,
    WgpuContext,
};
use hillshade::style::HillshadeLayer;
use hillshade::tile::{DemEncoding, ElevationRaster, Tile, TileId};

const BACKGROUND: [f32; 4] = [0.94, 0.92, 0.87, 1.0];

/// Highest point of the synthetic terrain, in meters
const RELIEF: f64 = 4200.0;

const MAX_ZOOM: u8 = 6;
const MAX_SIZE: u32 = 8192;
const MAX_DEM_DIM: u32 = 4096;

enum Backend {
    Software(SoftwareContext),
    Wgpu(WgpuContext),
}

impl Backend {
    fn create(name: &str, size: u32) -> Result<Self> {
        if name == "software" {
            return Ok(Backend::Software(SoftwareContext::new(size, size)));
        }
        match WgpuContext::new_headless(size, size) {
            Ok(ctx) => Ok(Backend::Wgpu(ctx)),
            Err(e) => {
                log::warn!("wgpu unavailable ({}), using the software rasterizer", e);
                Ok(Backend::Software(SoftwareContext::new(size, size)))
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Backend::Software(_) => "software",
            Backend::Wgpu(_) => "wgpu",
        }
    }

    fn context(&mut self) -> &mut dyn RenderContext {
        match self {
            Backend::Software(ctx) => ctx,
            Backend::Wgpu(ctx) => ctx,
        }
    }

    fn clear_color(&mut self, color: [f32; 4]) {
        match self {
            Backend::Software(ctx) => ctx.clear_color(color),
            Backend::Wgpu(ctx) => ctx.clear_color(color),
        }
    }

    fn read_screen(&self) -> Result<Vec<[u8; 4]>> {
        match self {
            Backend::Software(ctx) => Ok(ctx.read_screen()),
            Backend::Wgpu(ctx) => ctx.read_screen(),
        }
    }
}

fn main() {
    logging::init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let backend = parse_str_arg(&args, "--backend").unwrap_or_else(|| "wgpu".to_string());
    let out = PathBuf::from(parse_str_arg(&args, "--out").unwrap_or_else(|| "hillshade.png".to_string()));
    let zoom = parse_u8_arg(&args, "--zoom").unwrap_or(2).min(MAX_ZOOM);
    let size = parse_u32_arg(&args, "--size").unwrap_or(512).clamp(1, MAX_SIZE);
    let dim = dem_dim_arg(&args);
    let seed = parse_u32_arg(&args, "--seed").unwrap_or(12345);

    let layer = match parse_str_arg(&args, "--config") {
        Some(path) => HillshadeLayer::from_file(path)?,
        None => HillshadeLayer::new("hillshade"),
    };

    let mut backend = Backend::create(&backend, size)?;
    log::info!(
        "Rendering zoom {} ({} px tiles) at {}x{} with the {} backend",
        zoom,
        dim,
        size,
        size,
        backend.name()
    );

    let start = Instant::now();
    let mut tiles = generate_tiles(zoom, dim, seed);
    let coords: Vec<TileId> = tiles.keys().copied().collect();
    log::info!("Generated {} DEM tiles in {:.2?}", coords.len(), start.elapsed());
    if let Some((lo, hi)) = elevation_range(&tiles) {
        log::info!("Elevation range {:.0} m .. {:.0} m", lo, hi);
    }

    let tile_size = size as f32 / (zoom as f32).exp2();
    let view = TileView::orthographic(size, size, Vec2::splat(0.5), zoom as f32, tile_size);

    backend.clear_color(BACKGROUND);
    let mut renderer = HillshadeRenderer::new();
    let start = Instant::now();
    renderer.begin_frame(backend.context());
    for pass in [RenderPass::Offscreen, RenderPass::Opaque, RenderPass::Translucent] {
        let frame = FrameState::new(pass, size, size, view);
        let stats = renderer.draw(backend.context(), &frame, &mut tiles, &layer, &coords, None);
        log::info!("{:?} pass: {:?}", pass, stats);
    }
    log::info!("Frame rendered in {:.2?}", start.elapsed());

    let pixels = backend.read_screen()?;
    let bytes: Vec<u8> = pixels.into_iter().flatten().collect();
    image::save_buffer(&out, &bytes, size, size, image::ExtendedColorType::Rgba8)?;
    log::info!("Wrote {}", out.display());
    Ok(())
}

/// Every tile of `zoom`, sampled from one continuous noise field
fn generate_tiles(zoom: u8, dim: u32, seed: u32) -> HashMap<TileId, Tile> {
    let noise = Fbm::<Perlin>::new(seed)
        .set_octaves(6)
        .set_persistence(0.5)
        .set_lacunarity(2.0);
    let tiles_per_side = 1u32 << zoom;
    let world_dim = tiles_per_side as f64 * dim as f64;

    let mut tiles = HashMap::new();
    for y in 0..tiles_per_side {
        for x in 0..tiles_per_side {
            let id = TileId::from_canonical(zoom, x, y);
            let dem = ElevationRaster::from_fn(dim, DemEncoding::Mapbox, |px, py| {
                let gx = x as f64 * dim as f64 + px as f64;
                let gy = y as f64 * dim as f64 + py as f64;
                let n = noise.get([gx / world_dim * 6.0, gy / world_dim * 6.0]);
                ((n + 1.0) * 0.5 * RELIEF).max(0.0) as f32
            });
            tiles.insert(id, Tile::with_dem(id, dem));
        }
    }
    tiles
}

/// Lowest and highest interior elevation over all tiles
fn elevation_range(tiles: &HashMap<TileId, Tile>) -> Option<(f32, f32)> {
    tiles
        .values()
        .filter_map(|tile| tile.dem()?.min_max())
        .reduce(|(lo, hi), (l, h)| (lo.min(l), hi.max(h)))
}

fn dem_dim_arg(args: &[String]) -> u32 {
    parse_u32_arg(args, "--dim").unwrap_or(256).clamp(2, MAX_DEM_DIM)
}

fn parse_u8_arg(args: &[String], flag: &str) -> Option<u8> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let args = args(&["hillshade", "--zoom", "3", "--out", "a.png", "--dim", "nope"]);
        assert_eq!(parse_u8_arg(&args, "--zoom"), Some(3));
        assert_eq!(parse_str_arg(&args, "--out").as_deref(), Some("a.png"));
        assert_eq!(parse_u32_arg(&args, "--dim"), None);
        assert_eq!(parse_u32_arg(&args, "--size"), None);
    }

    #[test]
    fn test_generate_tiles_covers_zoom_level() {
        let tiles = generate_tiles(1, 8, 7);
        assert_eq!(tiles.len(), 4);
        assert!(tiles.values().all(|t| t.needs_hillshade_prepare()));

        let (lo, hi) = elevation_range(&tiles).unwrap();
        assert!(lo >= 0.0 && hi <= RELIEF as f32 + 0.1);
        assert!(hi > lo);
    }

    #[test]
    fn test_generated_borders_match_neighbors() {
        let tiles = generate_tiles(1, 8, 7);
        let west = tiles[&TileId::from_canonical(1, 0, 0)].dem().unwrap();
        let east = tiles[&TileId::from_canonical(1, 1, 0)].dem().unwrap();
        for y in 0..8 {
            assert_eq!(west.get(8, y), east.get(0, y));
            assert_eq!(east.get(-1, y), west.get(7, y));
        }
    }

    #[test]
    fn test_large_dem_dim_does_not_overflow() {
        assert_eq!(dem_dim_arg(&args(&["hillshade", "--dim", "4294967295"])), MAX_DEM_DIM);
        assert_eq!(dem_dim_arg(&args(&["hillshade", "--dim", "0"])), 2);
        assert_eq!(dem_dim_arg(&args(&["hillshade"])), 256);

        // The largest clamped level still fits: 64 tiles of 4096 px per side
        let tiles_per_side = 1u64 << MAX_ZOOM;
        assert!(tiles_per_side * MAX_DEM_DIM as u64 <= u32::MAX as u64);
    }
}
