//! Pool of reusable DEM upload textures
//!
//! Tiles of the same size upload rasters of the same stride, so textures
//! released by evicted tiles can back the next tile's upload instead of being
//! reallocated. The pool never owns a texture that is handed out: a tile holds
//! it until it calls [`TextureCache::release`].

use std::collections::HashMap;

use crate::core::Result;
use crate::render::context::{RenderContext, Texture, TextureDescriptor, TextureFormat};

/// Format of pooled DEM textures
pub const DEM_TEXTURE_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Hit/miss counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextureCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Textures currently waiting in the pool
    pub pooled: usize,
}

/// Square textures pooled by edge length
#[derive(Debug, Default)]
pub struct TextureCache {
    pool: HashMap<u32, Vec<Texture>>,
    hits: u64,
    misses: u64,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a pooled `size x size` texture or allocate a new one
    pub fn acquire(&mut self, ctx: &mut dyn RenderContext, size: u32) -> Result<Texture> {
        if let Some(texture) = self.pool.get_mut(&size).and_then(Vec::pop) {
            self.hits += 1;
            return Ok(texture);
        }

        self.misses += 1;
        log::debug!("Texture cache miss, allocating {}x{} DEM texture", size, size);
        ctx.create_texture(&TextureDescriptor {
            label: "dem_texture",
            width: size,
            height: size,
            format: DEM_TEXTURE_FORMAT,
        })
    }

    /// Return a texture to the pool
    ///
    /// Non-square textures or textures of another format cannot be handed out
    /// again and are dropped from tracking; callers destroy those themselves.
    pub fn release(&mut self, texture: Texture) {
        if texture.width != texture.height || texture.format != DEM_TEXTURE_FORMAT {
            log::warn!("Texture {:?} cannot be pooled", texture.id);
            return;
        }
        let slot = self.pool.entry(texture.width).or_default();
        if !slot.contains(&texture) {
            slot.push(texture);
        }
    }

    /// Number of pooled textures of the given size
    pub fn pooled(&self, size: u32) -> usize {
        self.pool.get(&size).map_or(0, Vec::len)
    }

    /// Destroy every pooled texture
    pub fn clear(&mut self, ctx: &mut dyn RenderContext) {
        for texture in self.pool.drain().flat_map(|(_, textures)| textures) {
            ctx.destroy_texture(texture);
        }
    }

    pub fn stats(&self) -> TextureCacheStats {
        TextureCacheStats {
            hits: self.hits,
            misses: self.misses,
            pooled: self.pool.values().map(Vec::len).sum(),
        }
    }
}
