use std::collections::HashMap;

use criterion::{criterion_group, criterion_main, Criterion, black_box};
use glam::Vec2;

use hillshade::core::Result;
use hillshade::render::{
    FrameState, HillshadeRenderer, RenderPass, SoftwareContext, TextureCache, TileView,
    prepare_hillshade,
};
use hillshade::render::geometry::QuadGeometry;
use hillshade::render::modes::{ColorMode, DepthMode};
use hillshade::style::HillshadeLayer;
use hillshade::tile::{DemEncoding, ElevationRaster, Tile, TileId};

fn ridge_dem(dim: u32) -> ElevationRaster {
    ElevationRaster::from_fn(dim, DemEncoding::Mapbox, |x, y| {
        let (fx, fy) = (x as f32 / dim as f32, y as f32 / dim as f32);
        1500.0 + 900.0 * (fx * 9.0).sin() * (fy * 5.0).cos()
    })
}

fn prepare(ctx: &mut SoftwareContext, cache: &mut TextureCache, tile: &mut Tile) -> Result<bool> {
    prepare_hillshade(
        ctx,
        cache,
        tile,
        "hillshade",
        DepthMode::disabled(),
        ColorMode::Unblended,
        &QuadGeometry::unit_quad(),
    )
}

fn bench_prepare_256(c: &mut Criterion) {
    let mut ctx = SoftwareContext::new(1, 1);
    let mut cache = TextureCache::new();
    let id = TileId::from_canonical(10, 512, 384);
    let mut tile = Tile::with_dem(id, ridge_dem(256));

    c.bench_function("prepare_256", |b| {
        b.iter(|| {
            tile.invalidate();
            ctx.take_commands();
            black_box(prepare(&mut ctx, &mut cache, &mut tile))
        });
    });
}

fn bench_prepare_512(c: &mut Criterion) {
    let mut ctx = SoftwareContext::new(1, 1);
    let mut cache = TextureCache::new();
    let id = TileId::from_canonical(10, 512, 384);
    let mut tile = Tile::with_dem(id, ridge_dem(512));

    c.bench_function("prepare_512", |b| {
        b.iter(|| {
            tile.invalidate();
            ctx.take_commands();
            black_box(prepare(&mut ctx, &mut cache, &mut tile))
        });
    });
}

fn bench_shade_frame(c: &mut Criterion) {
    let size = 256;
    let mut ctx = SoftwareContext::new(size, size);
    let layer = HillshadeLayer::new("hillshade");
    let coords: Vec<TileId> = (0..4)
        .map(|i| TileId::from_canonical(1, i % 2, i / 2))
        .collect();
    let mut tiles: HashMap<TileId, Tile> = coords
        .iter()
        .map(|id| (*id, Tile::with_dem(*id, ridge_dem(128))))
        .collect();
    let view = TileView::orthographic(size, size, Vec2::splat(0.5), 1.0, 128.0);
    let mut renderer = HillshadeRenderer::new();

    renderer.begin_frame(&mut ctx);
    let offscreen = FrameState::new(RenderPass::Offscreen, size, size, view);
    renderer.draw(&mut ctx, &offscreen, &mut tiles, &layer, &coords, None);

    let translucent = FrameState::new(RenderPass::Translucent, size, size, view);
    c.bench_function("shade_frame_4_tiles", |b| {
        b.iter(|| {
            ctx.clear_color([1.0; 4]);
            ctx.take_commands();
            renderer.begin_frame(&mut ctx);
            black_box(renderer.draw(&mut ctx, &translucent, &mut tiles, &layer, &coords, None))
        });
    });
}

criterion_group!(benches, bench_prepare_256, bench_prepare_512, bench_shade_frame);
criterion_main!(benches);
