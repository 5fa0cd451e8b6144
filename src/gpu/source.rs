// ============================================================================
// TEXTURE SOURCE ADAPTER — per-frame resolution of layer media to GPU bindings
// ============================================================================
//
// For each layer, each frame, produce something the compositor can sample —
// or report "not ready", which is never an error: the layer is skipped for
// this frame only and re-tried next frame without backoff (readiness gaps
// are typically a frame or two).
//
// Resolution order:
//   (a) decoded-stream tap  -> one-shot external frame import
//   (b) live-element tap    -> one-shot import, only if >= 1 ready frame
//   (c) still image         -> persistent texture, uploaded once per handle
//
// One-shot imports are frame-scoped: the view produced here must not
// survive the frame, and the compositor never caches a bind group built
// around one.  Persistent image textures live until teardown (no LRU —
// image layer counts are small next to video layers).

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::layer::{LayerContent, VideoSource};
use crate::log_warn;

use super::context::GpuContext;
use super::COMPOSITE_FORMAT;

/// A persistent GPU texture for a still-image handle.
pub struct ImageTexture {
    pub texture: wgpu::Texture,
    pub view: Arc<wgpu::TextureView>,
    pub width: u32,
    pub height: u32,
}

/// What the adapter resolved a layer to, for this frame.
pub enum PreparedBinding {
    /// Cached image texture.  Bind groups built around it may be cached by
    /// `(layer, parity)`.
    Persistent { key: Uuid, view: Arc<wgpu::TextureView> },
    /// One-shot view of an imported video frame.  Valid this frame only;
    /// bind groups referencing it are rebuilt every pass.
    External { view: wgpu::TextureView },
}

pub struct PreparedSource {
    pub binding: PreparedBinding,
    pub width: u32,
    pub height: u32,
}

/// Owns the image-texture cache and performs per-frame frame imports.
pub struct SourceAdapter {
    image_cache: HashMap<Uuid, ImageTexture>,
}

impl SourceAdapter {
    pub fn new() -> Self {
        Self { image_cache: HashMap::new() }
    }

    /// Resolve one layer's content to a sampleable binding, or `None` if the
    /// source isn't ready this frame.
    pub fn prepare(&mut self, gpu: &GpuContext, content: &LayerContent) -> Option<PreparedSource> {
        match content {
            LayerContent::Video(video) => Self::import_video_frame(video),
            LayerContent::Image(handle) => {
                let tex = self.ensure_image_texture(gpu, handle.id(), || {
                    (handle.pixels().as_raw().clone(), handle.dimensions())
                })?;
                Some(PreparedSource {
                    binding: PreparedBinding::Persistent { key: handle.id(), view: tex.view.clone() },
                    width: tex.width,
                    height: tex.height,
                })
            }
        }
    }

    /// Try the decoded tap, then the live tap.  Either may decline; a
    /// zero-dimension frame counts as declined.
    fn import_video_frame(video: &VideoSource) -> Option<PreparedSource> {
        if let Some(tap) = &video.decoded {
            if let Some(prepared) = Self::import_from_tap(tap.as_ref()) {
                return Some(prepared);
            }
        }
        if let Some(tap) = &video.live {
            if tap.ready_frames() >= 1 {
                if let Some(prepared) = Self::import_from_tap(tap.as_ref()) {
                    return Some(prepared);
                }
            }
        }
        None
    }

    fn import_from_tap(tap: &dyn crate::layer::FrameTap) -> Option<PreparedSource> {
        let frame = tap.current_frame()?;
        if frame.width == 0 || frame.height == 0 {
            return None;
        }
        // The import: a fresh view over the decode-side texture.  Created
        // once per visible video layer per frame, dropped with the frame.
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
        Some(PreparedSource {
            binding: PreparedBinding::External { view },
            width: frame.width,
            height: frame.height,
        })
    }

    /// Look up — or upload exactly once — the persistent texture for an
    /// image handle.
    fn ensure_image_texture(
        &mut self,
        gpu: &GpuContext,
        key: Uuid,
        pixels: impl FnOnce() -> (Vec<u8>, (u32, u32)),
    ) -> Option<&ImageTexture> {
        if !self.image_cache.contains_key(&key) {
            let (data, (width, height)) = pixels();
            if width == 0 || height == 0 {
                return None;
            }
            if !gpu.supports_size(width, height) {
                log_warn!("image source {}x{} exceeds device texture limit, skipping", width, height);
                return None;
            }
            let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("image_layer_texture"),
                size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: COMPOSITE_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            gpu.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * width),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            );
            let view = Arc::new(texture.create_view(&wgpu::TextureViewDescriptor::default()));
            self.image_cache.insert(key, ImageTexture { texture, view, width, height });
        }
        self.image_cache.get(&key)
    }

    /// Drop every cached image texture (device loss or shutdown).
    pub fn clear(&mut self) {
        self.image_cache.clear();
    }

    pub fn cached_image_count(&self) -> usize {
        self.image_cache.len()
    }

    /// Bytes held by cached image textures.
    pub fn cached_image_bytes(&self) -> usize {
        self.image_cache
            .values()
            .map(|t| (t.width as usize) * (t.height as usize) * 4)
            .sum()
    }
}

impl Default for SourceAdapter {
    fn default() -> Self {
        Self::new()
    }
}
