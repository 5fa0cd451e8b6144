// ============================================================================
// TEXTURE POOL — recycle render targets to avoid create/destroy churn
// ============================================================================

use std::collections::HashMap;

/// Key for pooled textures: (width, height, format).
type PoolKey = (u32, u32, wgpu::TextureFormat);

/// A pool of recycled GPU textures keyed by dimensions and format.
///
/// When `set_resolution` retires the ping-pong targets, they go back into
/// the pool; switching back to a recently-used size grabs them again
/// instead of allocating.  Pooled bytes are reported to the host as
/// "unused" GPU memory.
pub struct TexturePool {
    pool: HashMap<PoolKey, Vec<wgpu::Texture>>,
    /// Maximum number of textures to keep per key.
    max_per_key: usize,
}

impl TexturePool {
    pub fn new() -> Self {
        Self { pool: HashMap::new(), max_per_key: 2 }
    }

    /// Return a recycled texture if one exists for the given key, otherwise
    /// `None` and the caller creates a new one.
    pub fn acquire(&mut self, width: u32, height: u32, format: wgpu::TextureFormat) -> Option<wgpu::Texture> {
        self.pool.get_mut(&(width, height, format)).and_then(|v| v.pop())
    }

    /// Return a texture to the pool.  If the pool is full for this key the
    /// texture is simply dropped, freeing its GPU memory.
    pub fn release(&mut self, texture: wgpu::Texture, width: u32, height: u32, format: wgpu::TextureFormat) {
        let entry = self.pool.entry((width, height, format)).or_default();
        if entry.len() < self.max_per_key {
            entry.push(texture);
        }
    }

    /// Drop every pooled texture (device loss or shutdown).
    pub fn clear(&mut self) {
        self.pool.clear();
    }

    /// Approximate GPU memory held by pooled textures (bytes, assuming
    /// 4 bytes/pixel — every format this engine pools is 32-bit).
    pub fn pooled_memory_bytes(&self) -> usize {
        self.pool
            .iter()
            .map(|((w, h, _), textures)| (*w as usize) * (*h as usize) * 4 * textures.len())
            .sum()
    }
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new()
    }
}
