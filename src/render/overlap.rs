//! Stencil clipping of overlapping tiles across zoom levels
//!
//! When tiles of several zoom levels are visible at once, a coarse tile and
//! its finer children cover the same pixels. Tiles are drawn finest first and
//! each zoom gets its own stencil reference, larger for finer zooms. With a
//! `GreaterEqual` test and `Replace` on pass, a pixel claimed by a finer tile
//! rejects every coarser tile drawn after it.

use std::collections::BTreeMap;

use crate::render::modes::{CompareFunction, StencilMode, StencilOp};
use crate::tile::TileId;

/// Stencil ids available before the buffer has to be cleared
const STENCIL_ID_LIMIT: u32 = 256;

/// Most distinct references one resolve can hand out (ids `1..=255`)
const MAX_STENCIL_SPAN: u32 = STENCIL_ID_LIMIT - 1;

/// Per-frame stencil setup for one visible tile set
#[derive(Clone, Debug, PartialEq)]
pub struct StencilConfig {
    /// Stencil mode by overscaled zoom
    pub modes: BTreeMap<u8, StencilMode>,
    /// Draw order, finest zoom first
    pub coords: Vec<TileId>,
    /// The stencil buffer must be cleared before drawing
    pub clear_stencil: bool,
}

impl StencilConfig {
    pub fn mode_for(&self, overscaled_z: u8) -> StencilMode {
        self.modes
            .get(&overscaled_z)
            .copied()
            .unwrap_or_else(StencilMode::disabled)
    }
}

/// Hands out stencil references across the layers of a frame
#[derive(Debug)]
pub struct OverlapResolver {
    next_stencil_id: u32,
}

impl Default for OverlapResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlapResolver {
    pub fn new() -> Self {
        Self { next_stencil_id: 1 }
    }

    /// Restart ids; the stencil buffer is cleared at the start of every frame
    pub fn begin_frame(&mut self) {
        self.next_stencil_id = 1;
    }

    pub fn next_stencil_id(&self) -> u32 {
        self.next_stencil_id
    }

    /// Compute stencil modes and draw order for a visible tile set
    ///
    /// Tiles of equal zoom keep their input order.
    pub fn resolve(&mut self, tiles: &[TileId]) -> StencilConfig {
        let mut coords = tiles.to_vec();
        coords.sort_by(|a, b| b.overscaled_z.cmp(&a.overscaled_z));

        let (Some(finest), Some(coarsest)) = (coords.first(), coords.last()) else {
            return StencilConfig {
                modes: BTreeMap::new(),
                coords,
                clear_stencil: false,
            };
        };
        let min_z = coarsest.overscaled_z;
        let span = (finest.overscaled_z - min_z) as u32 + 1;

        if span == 1 {
            return StencilConfig {
                modes: BTreeMap::from([(min_z, StencilMode::disabled())]),
                coords,
                clear_stencil: false,
            };
        }

        // Zooms coarser than the id space allows share the lowest reference
        let ids = span.min(MAX_STENCIL_SPAN);
        let skipped = span - ids;

        let mut clear_stencil = false;
        if self.next_stencil_id + ids > STENCIL_ID_LIMIT {
            log::debug!("Stencil ids exhausted, clearing stencil buffer");
            clear_stencil = true;
            self.next_stencil_id = 1;
        }

        let modes = (0..span)
            .map(|i| {
                let mode = StencilMode {
                    func: CompareFunction::GreaterEqual,
                    mask: 0xFF,
                    reference: self.next_stencil_id + i.saturating_sub(skipped),
                    write_mask: 0xFF,
                    fail: StencilOp::Keep,
                    depth_fail: StencilOp::Keep,
                    pass: StencilOp::Replace,
                };
                (min_z + i as u8, mode)
            })
            .collect();
        self.next_stencil_id += ids;

        StencilConfig {
            modes,
            coords,
            clear_stencil,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(z: u8, x: u32, y: u32) -> TileId {
        TileId::from_canonical(z, x, y)
    }

    #[test]
    fn test_empty_tile_set() {
        let mut resolver = OverlapResolver::new();
        let config = resolver.resolve(&[]);
        assert!(config.coords.is_empty());
        assert!(config.mode_for(3).is_disabled());
        assert_eq!(resolver.next_stencil_id(), 1);
    }

    #[test]
    fn test_single_zoom_disables_stencil() {
        let mut resolver = OverlapResolver::new();
        let tiles = [id(3, 0, 0), id(3, 1, 0), id(3, 0, 1)];
        let config = resolver.resolve(&tiles);
        assert_eq!(config.coords, tiles.to_vec());
        assert!(config.mode_for(3).is_disabled());
        assert_eq!(resolver.next_stencil_id(), 1);
    }

    #[test]
    fn test_finest_first_and_stable() {
        let mut resolver = OverlapResolver::new();
        let tiles = [id(1, 0, 0), id(2, 1, 0), id(1, 1, 0), id(2, 0, 0)];
        let config = resolver.resolve(&tiles);
        assert_eq!(
            config.coords,
            vec![id(2, 1, 0), id(2, 0, 0), id(1, 0, 0), id(1, 1, 0)]
        );
    }

    #[test]
    fn test_finer_zoom_gets_larger_reference() {
        let mut resolver = OverlapResolver::new();
        let config = resolver.resolve(&[id(4, 0, 0), id(6, 0, 0)]);

        assert_eq!(config.modes.len(), 3);
        let coarse = config.mode_for(4);
        let fine = config.mode_for(6);
        assert_eq!(coarse.reference, 1);
        assert_eq!(config.mode_for(5).reference, 2);
        assert_eq!(fine.reference, 3);
        assert_eq!(fine.func, CompareFunction::GreaterEqual);
        assert_eq!(fine.pass, StencilOp::Replace);
        assert_eq!(resolver.next_stencil_id(), 4);

        // The coarse tile fails wherever the fine one already wrote
        assert!(!coarse.func.test(coarse.reference, fine.reference));
        assert!(coarse.func.test(coarse.reference, 0));
    }

    #[test]
    fn test_ids_advance_across_layers() {
        let mut resolver = OverlapResolver::new();
        resolver.resolve(&[id(1, 0, 0), id(2, 0, 0)]);
        let second = resolver.resolve(&[id(1, 0, 0), id(2, 0, 0)]);
        assert_eq!(second.mode_for(1).reference, 3);
        assert!(!second.clear_stencil);

        resolver.begin_frame();
        let next_frame = resolver.resolve(&[id(1, 0, 0), id(2, 0, 0)]);
        assert_eq!(next_frame.mode_for(1).reference, 1);
    }

    #[test]
    fn test_wraps_and_requests_clear() {
        let mut resolver = OverlapResolver::new();
        let tiles = [id(0, 0, 0), id(9, 0, 0)];
        let mut cleared = 0;
        for _ in 0..30 {
            let config = resolver.resolve(&tiles);
            if config.clear_stencil {
                cleared += 1;
                assert_eq!(config.mode_for(0).reference, 1);
            }
            assert!(config.mode_for(9).reference <= 255);
        }
        assert_eq!(cleared, 1);
    }

    #[test]
    fn test_zoom_span_wider_than_stencil_ids() {
        let mut resolver = OverlapResolver::new();
        let tiles = [TileId::new(0, 0, 0, 0, 0), TileId::new(255, 0, 0, 0, 0)];
        let config = resolver.resolve(&tiles);

        assert!(!config.clear_stencil);
        assert_eq!(config.mode_for(255).reference, 255);
        assert_eq!(config.mode_for(1).reference, 1);
        assert_eq!(config.mode_for(0).reference, 1);
        assert!(config.modes.values().all(|m| (1..=255).contains(&m.reference)));

        let next = resolver.resolve(&tiles);
        assert!(next.clear_stencil);
        assert_eq!(next.mode_for(255).reference, 255);
    }
}
