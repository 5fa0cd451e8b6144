// ============================================================================
// OUTPUT FAN-OUT — present the composited frame to every registered surface
// ============================================================================
//
// Compositing runs once per frame; presenting runs once per registered
// surface.  The key efficiency property: N surfaces cost N present passes
// but zero bind-group builds beyond the fixed two-entry cache keyed by
// ping-pong parity.  Per-surface state (fit/grid uniforms) is rebuilt only
// when the surface resizes or its flags change — never per frame.
//
// Registration and deregistration are safe at any time, including from the
// frame callback; effects apply from the next present.

use bytemuck::{Pod, Zeroable};
use uuid::Uuid;

use crate::{log_err, log_warn};

use super::context::GpuContext;
use super::SURFACE_FORMAT;

/// Stable identity of a registered presentation surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetId(pub Uuid);

impl TargetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-surface present parameters.  Layout mirrors the WGSL
/// `OutputUniforms` struct in shaders.rs.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct OutputUniforms {
    frame_aspect: f32,
    surface_aspect: f32,
    grid: u32,
    _pad0: f32,
}

/// One registered presentation destination.
///
/// Generic over the underlying surface handle so the registry bookkeeping
/// is testable without a GPU; the engine instantiates `S = wgpu::Surface`.
pub struct OutputSurface<S> {
    pub id: TargetId,
    surface: S,
    width: u32,
    height: u32,
    enabled: bool,
    grid: bool,
    /// Surface needs (re)configuring against the device before use.
    configured: bool,
    uniforms_dirty: bool,
    /// Frame aspect the current uniforms were written with.
    written_aspect: Option<f32>,
    uniform_buf: Option<wgpu::Buffer>,
    uniform_bg: Option<wgpu::BindGroup>,
}

/// Registered surfaces, device-independent bookkeeping only.  Survives
/// device loss; the device-scoped half (`OutputPipeline`) does not.
pub struct OutputRegistry<S> {
    surfaces: Vec<OutputSurface<S>>,
}

impl<S> OutputRegistry<S> {
    pub fn new() -> Self {
        Self { surfaces: Vec::new() }
    }

    /// Attach a destination.  Takes effect from the next frame.
    pub fn register(&mut self, surface: S, width: u32, height: u32) -> TargetId {
        let id = TargetId::new();
        self.surfaces.push(OutputSurface {
            id,
            surface,
            width: width.max(1),
            height: height.max(1),
            enabled: true,
            grid: false,
            configured: false,
            uniforms_dirty: true,
            written_aspect: None,
            uniform_buf: None,
            uniform_bg: None,
        });
        id
    }

    /// Detach a destination and drop its surface-specific state.
    pub fn unregister(&mut self, id: TargetId) -> bool {
        let before = self.surfaces.len();
        self.surfaces.retain(|s| s.id != id);
        self.surfaces.len() != before
    }

    pub fn set_enabled(&mut self, id: TargetId, enabled: bool) {
        if let Some(s) = self.get_mut(id) {
            s.enabled = enabled;
        }
    }

    /// Toggle the transparency-grid backdrop (authoring aid; composited
    /// pixels are untouched).
    pub fn set_transparency_grid(&mut self, id: TargetId, grid: bool) {
        if let Some(s) = self.get_mut(id) {
            if s.grid != grid {
                s.grid = grid;
                s.uniforms_dirty = true;
            }
        }
    }

    /// The host resized the drawable; reconfigure on next present.
    pub fn resize(&mut self, id: TargetId, width: u32, height: u32) {
        if let Some(s) = self.get_mut(id) {
            s.width = width.max(1);
            s.height = height.max(1);
            s.configured = false;
            s.uniforms_dirty = true;
        }
    }

    /// The composite frame's aspect changed (resolution change): every
    /// surface's fit uniforms must be rewritten.
    pub fn mark_uniforms_dirty(&mut self) {
        for s in &mut self.surfaces {
            s.uniforms_dirty = true;
        }
    }

    /// Forget all device-derived state (device loss / re-init): surfaces
    /// stay registered but must be reconfigured and their uniforms rebuilt
    /// against the new device.
    pub fn reset_device_state(&mut self) {
        for s in &mut self.surfaces {
            s.configured = false;
            s.uniforms_dirty = true;
            s.written_aspect = None;
            s.uniform_buf = None;
            s.uniform_bg = None;
        }
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn contains(&self, id: TargetId) -> bool {
        self.surfaces.iter().any(|s| s.id == id)
    }

    fn get_mut(&mut self, id: TargetId) -> Option<&mut OutputSurface<S>> {
        self.surfaces.iter_mut().find(|s| s.id == id)
    }
}

impl<S> Default for OutputRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PRESENT PIPELINE (device-scoped)
// ============================================================================

/// Which texture the present pass samples this frame.
pub enum FrameSource<'a> {
    /// A composited frame sitting in the ping-pong target with this parity.
    Composited { parity: usize, view: &'a wgpu::TextureView, aspect: f32 },
    /// No frame yet (pre-first-composite, post-re-init): the 1×1 black
    /// fallback, stretched to fill.
    Black { view: &'a wgpu::TextureView },
}

pub struct OutputPipeline {
    pipeline: wgpu::RenderPipeline,
    uniform_bgl: wgpu::BindGroupLayout,
    texture_bgl: wgpu::BindGroupLayout,
    /// Exactly two cache slots, keyed by final-read parity — never more,
    /// regardless of surface or layer count.
    parity_cache: [Option<wgpu::BindGroup>; 2],
    /// Dedicated slot for the black fallback.
    black_bg: Option<wgpu::BindGroup>,
}

impl OutputPipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("output_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::OUTPUT_SHADER.into()),
        });

        let uniform_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("output_uniform_bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let texture_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("output_tex_bgl"),
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
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("output_pipeline_layout"),
            bind_group_layouts: &[&uniform_bgl, &texture_bgl],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("output_pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_output",
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
                module: &shader,
                entry_point: "fs_output",
                targets: &[Some(wgpu::ColorTargetState {
                    format: SURFACE_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
        });

        Self {
            pipeline,
            uniform_bgl,
            texture_bgl,
            parity_cache: [None, None],
            black_bg: None,
        }
    }

    /// Drop the parity-keyed bind groups (resolution change made their
    /// views stale).
    pub fn invalidate_frame_cache(&mut self) {
        self.parity_cache = [None, None];
    }

    /// Live entries in the parity cache (diagnostics / tests).
    pub fn cached_frame_bind_groups(&self) -> usize {
        self.parity_cache.iter().filter(|e| e.is_some()).count()
    }

    /// Present one frame to every enabled registered surface.
    pub fn present_all(
        &mut self,
        gpu: &GpuContext,
        registry: &mut OutputRegistry<wgpu::Surface<'static>>,
        frame: FrameSource<'_>,
        sampler: &wgpu::Sampler,
    ) {
        let (frame_bg, frame_aspect) = match frame {
            FrameSource::Composited { parity, view, aspect } => {
                let slot = &mut self.parity_cache[parity & 1];
                if slot.is_none() {
                    *slot = Some(Self::build_frame_bind_group(&gpu.device, &self.texture_bgl, view, sampler));
                }
                (self.parity_cache[parity & 1].as_ref().unwrap(), aspect)
            }
            FrameSource::Black { view } => {
                if self.black_bg.is_none() {
                    self.black_bg = Some(Self::build_frame_bind_group(&gpu.device, &self.texture_bgl, view, sampler));
                }
                (self.black_bg.as_ref().unwrap(), 1.0)
            }
        };

        for target in &mut registry.surfaces {
            if !target.enabled {
                continue;
            }
            if !target.configured {
                Self::configure_surface(gpu, target);
            }
            Self::refresh_uniforms(gpu, &self.uniform_bgl, target, frame_aspect);

            let surface_frame = match target.surface.get_current_texture() {
                Ok(f) => f,
                Err(wgpu::SurfaceError::Lost) | Err(wgpu::SurfaceError::Outdated) => {
                    // Reconfigure and pick the frame up next tick.
                    target.configured = false;
                    continue;
                }
                Err(wgpu::SurfaceError::Timeout) => continue,
                Err(wgpu::SurfaceError::OutOfMemory) => {
                    log_err!("surface {:?} out of memory, disabling", target.id);
                    target.enabled = false;
                    continue;
                }
            };
            let view = surface_frame.texture.create_view(&wgpu::TextureViewDescriptor::default());

            let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("present_encoder"),
            });
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("present_pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &view,
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
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, target.uniform_bg.as_ref().unwrap(), &[]);
                pass.set_bind_group(1, frame_bg, &[]);
                pass.draw(0..6, 0..1);
            }
            gpu.queue.submit(std::iter::once(encoder.finish()));
            surface_frame.present();
        }
    }

    fn configure_surface(gpu: &GpuContext, target: &mut OutputSurface<wgpu::Surface<'static>>) {
        let caps = target.surface.get_capabilities(&gpu.adapter);
        if !caps.formats.contains(&SURFACE_FORMAT) {
            log_warn!("surface {:?} does not list {:?}; configuring anyway", target.id, SURFACE_FORMAT);
        }
        target.surface.configure(
            &gpu.device,
            &wgpu::SurfaceConfiguration {
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                format: SURFACE_FORMAT,
                width: target.width,
                height: target.height,
                present_mode: wgpu::PresentMode::AutoVsync,
                desired_maximum_frame_latency: 2,
                alpha_mode: wgpu::CompositeAlphaMode::Auto,
                view_formats: vec![],
            },
        );
        target.configured = true;
    }

    /// Per-surface uniforms change only on resize / grid toggle / frame
    /// aspect change — not per frame.
    fn refresh_uniforms(
        gpu: &GpuContext,
        layout: &wgpu::BindGroupLayout,
        target: &mut OutputSurface<wgpu::Surface<'static>>,
        frame_aspect: f32,
    ) {
        let stale = target.uniforms_dirty
            || target.uniform_buf.is_none()
            || target.written_aspect != Some(frame_aspect);
        if !stale {
            return;
        }
        let uniforms = OutputUniforms {
            frame_aspect,
            surface_aspect: target.width as f32 / target.height.max(1) as f32,
            grid: target.grid as u32,
            _pad0: 0.0,
        };
        match &target.uniform_buf {
            Some(buf) => {
                gpu.queue.write_buffer(buf, 0, bytemuck::bytes_of(&uniforms));
            }
            None => {
                use wgpu::util::DeviceExt;
                let buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("output_uniform_buf"),
                    contents: bytemuck::bytes_of(&uniforms),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                });
                let bg = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("output_uniform_bg"),
                    layout,
                    entries: &[wgpu::BindGroupEntry { binding: 0, resource: buf.as_entire_binding() }],
                });
                target.uniform_buf = Some(buf);
                target.uniform_bg = Some(bg);
            }
        }
        target.uniforms_dirty = false;
        target.written_aspect = Some(frame_aspect);
    }

    fn build_frame_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        view: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("output_frame_bg"),
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(sampler) },
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_unregister_restores_state() {
        let mut reg: OutputRegistry<u32> = OutputRegistry::new();
        assert_eq!(reg.len(), 0);
        let id = reg.register(7, 640, 360);
        assert_eq!(reg.len(), 1);
        assert!(reg.contains(id));
        assert!(reg.unregister(id));
        assert_eq!(reg.len(), 0);
        assert!(!reg.contains(id));
        // Double-unregister is a no-op.
        assert!(!reg.unregister(id));
    }

    #[test]
    fn resize_marks_surface_for_reconfigure() {
        let mut reg: OutputRegistry<u32> = OutputRegistry::new();
        let id = reg.register(0, 640, 360);
        reg.surfaces[0].configured = true;
        reg.surfaces[0].uniforms_dirty = false;
        reg.resize(id, 1280, 720);
        assert!(!reg.surfaces[0].configured);
        assert!(reg.surfaces[0].uniforms_dirty);
        assert_eq!((reg.surfaces[0].width, reg.surfaces[0].height), (1280, 720));
    }

    #[test]
    fn zero_sized_resize_clamps_to_one() {
        // A minimized window reports 0×0; a zero-sized surface config panics
        // in wgpu, so the registry clamps.
        let mut reg: OutputRegistry<u32> = OutputRegistry::new();
        let id = reg.register(0, 640, 360);
        reg.resize(id, 0, 0);
        assert_eq!((reg.surfaces[0].width, reg.surfaces[0].height), (1, 1));
    }

    #[test]
    fn grid_toggle_only_dirties_on_change() {
        let mut reg: OutputRegistry<u32> = OutputRegistry::new();
        let id = reg.register(0, 100, 100);
        reg.surfaces[0].uniforms_dirty = false;
        reg.set_transparency_grid(id, false); // already off
        assert!(!reg.surfaces[0].uniforms_dirty);
        reg.set_transparency_grid(id, true);
        assert!(reg.surfaces[0].uniforms_dirty);
    }

    #[test]
    fn device_reset_clears_configuration_but_keeps_registrations() {
        let mut reg: OutputRegistry<u32> = OutputRegistry::new();
        let id = reg.register(0, 100, 100);
        reg.surfaces[0].configured = true;
        reg.reset_device_state();
        assert!(reg.contains(id));
        assert!(!reg.surfaces[0].configured);
    }
}
