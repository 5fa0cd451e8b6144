// ============================================================================
// PING-PONG COMPOSITOR — blend the layer stack into one frame
// ============================================================================
//
// Two equally-sized render targets alternate as read (running base image)
// and write (destination).  Each visible, resource-ready layer costs exactly
// one full-screen pass; layers are walked in *reverse* list order so that
// list index 0 is composited last and lands visually on top.  Hardware
// blending is disabled — the fragment shader owns the blend math.
//
// Resource rules enforced here:
//   * a pass never binds the same target as read and write;
//   * bind groups around persistent (image) textures are cached by
//     (layer id, read-target parity);
//   * bind groups around one-shot external frames are rebuilt every pass
//     and never enter a cache;
//   * per-layer uniform buffers are created lazily and pruned against the
//     live layer-id set (the engine calls `prune` every frame).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::blend::BlendMode;
use crate::layer::{LayerId, Transform2D};

use super::context::GpuContext;
use super::pool::TexturePool;
use super::source::PreparedBinding;
use super::COMPOSITE_FORMAT;

// ============================================================================
// UNIFORMS
// ============================================================================

/// Per-layer parameters for one composite pass.  Layout mirrors the WGSL
/// `LayerUniforms` struct in shaders.rs.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct LayerUniforms {
    pub position: [f32; 2],
    pub scale: [f32; 2],
    pub rotation: f32,
    pub opacity: f32,
    pub blend_mode: u32,
    pub source_aspect: f32,
    pub dest_aspect: f32,
    pub _pad: [f32; 3],
}

impl LayerUniforms {
    pub fn new(
        transform: &Transform2D,
        opacity: f32,
        blend_mode: BlendMode,
        source_size: (u32, u32),
        dest_size: (u32, u32),
    ) -> Self {
        Self {
            position: transform.position,
            scale: transform.scale,
            rotation: transform.rotation,
            opacity: opacity.clamp(0.0, 1.0),
            blend_mode: blend_mode.to_u32(),
            source_aspect: source_size.0 as f32 / source_size.1.max(1) as f32,
            dest_aspect: dest_size.0 as f32 / dest_size.1.max(1) as f32,
            _pad: [0.0; 3],
        }
    }
}

// ============================================================================
// PASS PLANNING
// ============================================================================

/// One composite pass: which target is sampled, which is drawn into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pass {
    pub read: usize,
    pub write: usize,
}

/// The frame's pass schedule.  The initial read target (index 0) starts
/// cleared to black; after the last pass the result sits in the target
/// with index `final_parity`.
#[derive(Clone, Debug)]
pub struct PassPlan {
    pub passes: Vec<Pass>,
    pub final_parity: usize,
}

/// Compute the ping-pong schedule for `layer_count` composite passes.
/// `layer_count == 0` is the fast path: no passes, the cleared initial
/// target *is* the frame.
pub fn plan_passes(layer_count: usize) -> PassPlan {
    let passes = (0..layer_count)
        .map(|i| Pass { read: i % 2, write: (i + 1) % 2 })
        .collect();
    PassPlan { passes, final_parity: layer_count % 2 }
}

// ============================================================================
// COMPOSITOR
// ============================================================================

/// A layer after source resolution, ready to composite.  Slice order is
/// list order (index 0 on top); the compositor reverses it internally.
pub struct RenderLayer {
    pub id: LayerId,
    pub uniforms: LayerUniforms,
    pub binding: PreparedBinding,
}

/// One ping-pong render target.
struct RenderTarget {
    texture: wgpu::Texture,
    view: Arc<wgpu::TextureView>,
}

/// Cached per-layer uniform buffer + its bind group.  Contents are
/// refreshed with `queue.write_buffer` every frame the layer is visible.
struct UniformSlot {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

pub struct Compositor {
    /// Composite pipeline for persistent (image) textures.
    pipeline: wgpu::RenderPipeline,
    /// Composite pipeline for one-shot external (video) frames.
    external_pipeline: wgpu::RenderPipeline,
    /// Group 0: per-layer uniforms.
    uniform_bgl: wgpu::BindGroupLayout,
    /// Group 1: layer texture + base (read target) texture + sampler.
    texture_bgl: wgpu::BindGroupLayout,

    /// The one shared linear-clamp sampler.
    sampler: wgpu::Sampler,
    /// 1×1 opaque black fallback — what surfaces present before the first
    /// composited frame exists.
    black: wgpu::Texture,
    black_view: Arc<wgpu::TextureView>,

    targets: Option<[RenderTarget; 2]>,
    width: u32,
    height: u32,

    uniform_slots: HashMap<LayerId, UniformSlot>,
    /// Persistent-source bind groups, keyed by (layer id, read parity).
    composite_bg_cache: HashMap<(LayerId, usize), wgpu::BindGroup>,
}

impl Compositor {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("composite_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::composite_shader().into()),
        });
        let external_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("composite_external_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::composite_external_shader().into()),
        });

        let uniform_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("layer_uniform_bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let texture_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("composite_tex_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("composite_pipeline_layout"),
            bind_group_layouts: &[&uniform_bgl, &texture_bgl],
            push_constant_ranges: &[],
        });

        let make_pipeline = |label: &str, module: &wgpu::ShaderModule| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: "vs_composite",
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: "fs_composite",
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COMPOSITE_FORMAT,
                        blend: None, // shader handles blending
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                multiview: None,
            })
        };
        let pipeline = make_pipeline("composite_pipeline", &shader);
        let external_pipeline = make_pipeline("composite_external_pipeline", &external_shader);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("sampler_linear_clamp"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let black = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("black_fallback"),
            size: wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COMPOSITE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let black_view = Arc::new(black.create_view(&wgpu::TextureViewDescriptor::default()));

        Self {
            pipeline,
            external_pipeline,
            uniform_bgl,
            texture_bgl,
            sampler,
            black,
            black_view,
            targets: None,
            width: 0,
            height: 0,
            uniform_slots: HashMap::new(),
            composite_bg_cache: HashMap::new(),
        }
    }

    /// Upload the fallback texture's single opaque black texel.
    pub fn upload_black_texel(&self, queue: &wgpu::Queue) {
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.black,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[0u8, 0, 0, 255],
            wgpu::ImageDataLayout { offset: 0, bytes_per_row: Some(4), rows_per_image: Some(1) },
            wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
        );
    }

    pub fn black_view(&self) -> Arc<wgpu::TextureView> {
        self.black_view.clone()
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// View of one ping-pong target; `None` until targets exist.
    pub fn target_view(&self, parity: usize) -> Option<Arc<wgpu::TextureView>> {
        self.targets.as_ref().map(|t| t[parity & 1].view.clone())
    }

    /// Texture of one ping-pong target (frame capture path).
    pub fn target_texture(&self, parity: usize) -> Option<&wgpu::Texture> {
        self.targets.as_ref().map(|t| &t[parity & 1].texture)
    }

    /// (Re)create the ping-pong targets at the given size, recycling old
    /// ones through the pool.  Invalidates every bind group that referenced
    /// the old target views; callers must also drop the output parity cache.
    pub fn set_resolution(&mut self, gpu: &GpuContext, pool: &mut TexturePool, width: u32, height: u32) {
        if self.width == width && self.height == height && self.targets.is_some() {
            return;
        }
        if let Some([a, b]) = self.targets.take() {
            pool.release(a.texture, self.width, self.height, COMPOSITE_FORMAT);
            pool.release(b.texture, self.width, self.height, COMPOSITE_FORMAT);
        }

        let mut make_target = || {
            let texture = pool.acquire(width, height, COMPOSITE_FORMAT).unwrap_or_else(|| {
                gpu.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("ping_pong_target"),
                    size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: COMPOSITE_FORMAT,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                        | wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                })
            });
            let view = Arc::new(texture.create_view(&wgpu::TextureViewDescriptor::default()));
            RenderTarget { texture, view }
        };
        self.targets = Some([make_target(), make_target()]);
        self.width = width;
        self.height = height;

        // The cached bind groups point at the old targets' views.
        self.composite_bg_cache.clear();
    }

    /// Blend `layers` (list order, index 0 on top) into the targets and
    /// return the parity of the target holding the result.
    ///
    /// Zero layers is the deliberate fast path: one clear, no passes.
    pub fn composite(&mut self, gpu: &GpuContext, layers: &[RenderLayer]) -> usize {
        let plan = plan_passes(layers.len());
        // Arc-cloned so per-layer slot maintenance below can borrow `self`
        // mutably while the pass loop still references the target views.
        let target_views: [Arc<wgpu::TextureView>; 2] = match &self.targets {
            Some(t) => [t[0].view.clone(), t[1].view.clone()],
            None => return 0,
        };

        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("composite_encoder"),
        });

        // The initial read target starts as the cleared black frame.  With
        // zero layers this clear *is* the output.
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear_initial_target"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_views[0],
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }

        // Reverse order: the last list element is composited first (bottom),
        // index 0 last (top).
        for (pass, layer) in plan.passes.iter().zip(layers.iter().rev()) {
            debug_assert_ne!(pass.read, pass.write);

            self.ensure_uniform_slot(gpu, layer);

            // External bindings get a throwaway bind group every pass; the
            // one-shot frame view must not outlive this frame.
            let transient_bg;
            let (pipeline, texture_bg): (&wgpu::RenderPipeline, &wgpu::BindGroup) = match &layer.binding {
                PreparedBinding::Persistent { key: _, view } => {
                    let cache_key = (layer.id, pass.read);
                    if !self.composite_bg_cache.contains_key(&cache_key) {
                        let bg = Self::build_texture_bind_group(
                            &gpu.device,
                            &self.texture_bgl,
                            view,
                            &target_views[pass.read],
                            &self.sampler,
                        );
                        self.composite_bg_cache.insert(cache_key, bg);
                    }
                    (&self.pipeline, &self.composite_bg_cache[&cache_key])
                }
                PreparedBinding::External { view } => {
                    transient_bg = Self::build_texture_bind_group(
                        &gpu.device,
                        &self.texture_bgl,
                        view,
                        &target_views[pass.read],
                        &self.sampler,
                    );
                    (&self.external_pipeline, &transient_bg)
                }
            };

            let uniform_bg = &self.uniform_slots[&layer.id].bind_group;

            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("composite_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_views[pass.write],
                    resolve_target: None,
                    ops: wgpu::Operations {
                        // Every pixel is written by the full-screen quad.
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rpass.set_pipeline(pipeline);
            rpass.set_bind_group(0, uniform_bg, &[]);
            rpass.set_bind_group(1, texture_bg, &[]);
            rpass.draw(0..6, 0..1);
        }

        gpu.queue.submit(std::iter::once(encoder.finish()));
        plan.final_parity
    }

    /// Get-or-create the layer's uniform slot and refresh its contents.
    fn ensure_uniform_slot(&mut self, gpu: &GpuContext, layer: &RenderLayer) {
        if let Some(slot) = self.uniform_slots.get(&layer.id) {
            gpu.queue.write_buffer(&slot.buffer, 0, bytemuck::bytes_of(&layer.uniforms));
            return;
        }
        let buffer = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("layer_uniform_buf"),
            contents: bytemuck::bytes_of(&layer.uniforms),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("layer_uniform_bg"),
            layout: &self.uniform_bgl,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: buffer.as_entire_binding() }],
        });
        self.uniform_slots.insert(layer.id, UniformSlot { buffer, bind_group });
    }

    fn build_texture_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        layer_view: &wgpu::TextureView,
        base_view: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("composite_tex_bg"),
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(layer_view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(base_view) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::Sampler(sampler) },
            ],
        })
    }

    /// Drop per-layer state for ids that vanished from the layer list.  The
    /// engine calls this once per frame with the frame's id set.
    pub fn prune_layer_state(&mut self, live: &HashSet<LayerId>) {
        self.uniform_slots.retain(|id, _| live.contains(id));
        self.composite_bg_cache.retain(|(id, _), _| live.contains(id));
    }

    /// Number of live per-layer uniform slots (diagnostics / tests).
    pub fn uniform_slot_count(&self) -> usize {
        self.uniform_slots.len()
    }

    pub fn cached_bind_group_count(&self) -> usize {
        self.composite_bg_cache.len()
    }

    /// Bytes held by the two ping-pong targets (+ the 1×1 fallback).
    pub fn target_memory_bytes(&self) -> usize {
        let n = if self.targets.is_some() { 2 } else { 0 };
        n * (self.width as usize) * (self.height as usize) * 4 + 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_layers_means_zero_passes() {
        let plan = plan_passes(0);
        assert!(plan.passes.is_empty());
        assert_eq!(plan.final_parity, 0, "the cleared initial target is the frame");
    }

    #[test]
    fn n_layers_means_exactly_n_passes() {
        for n in 1..16 {
            assert_eq!(plan_passes(n).passes.len(), n);
        }
    }

    #[test]
    fn read_and_write_strictly_alternate() {
        let plan = plan_passes(7);
        for (i, pass) in plan.passes.iter().enumerate() {
            assert_ne!(pass.read, pass.write, "pass {} reads and writes the same target", i);
            assert_eq!(pass.read, i % 2);
        }
        for pair in plan.passes.windows(2) {
            assert_eq!(pair[0].write, pair[1].read, "each pass reads what the previous wrote");
        }
    }

    #[test]
    fn final_parity_is_the_last_written_target() {
        for n in 1..16 {
            let plan = plan_passes(n);
            assert_eq!(plan.final_parity, plan.passes.last().unwrap().write);
        }
    }

    #[test]
    fn uniforms_capture_aspect_ratios() {
        let u = LayerUniforms::new(
            &Transform2D::default(),
            0.5,
            crate::blend::BlendMode::Screen,
            (1920, 1080),
            (1280, 1280),
        );
        assert!((u.source_aspect - 1920.0 / 1080.0).abs() < 1e-6);
        assert!((u.dest_aspect - 1.0).abs() < 1e-6);
        assert_eq!(u.blend_mode, crate::blend::BlendMode::Screen.to_u32());
    }
}
