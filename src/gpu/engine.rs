// ============================================================================
// COMPOSITE ENGINE — top-level coordinator and render loop
// ============================================================================
//
// One engine per process, owned at the application root.  The host pumps it
// once per display refresh; each pump invokes the frame callback, which
// feeds the current resolved layer slice to `render_frame`:
//
//   prepare sources -> composite (N ping-pong passes) -> present to every
//   surface -> prune per-layer GPU state -> record stats
//
// State machine:
//
//   Uninitialized -> Initializing -> Ready --(device loss)--> NotReady
//                         ^                                      |
//                         +---------- initialize() --------------+
//
// `NotReady` and `Uninitialized` turn render calls into logged no-ops; a
// lost device is only recovered by an explicit `initialize()`.  Device loss
// arrives as an atomic flag set by wgpu's callback and is observed at the
// top of the next tick — nothing inside a frame yields.

use std::collections::HashSet;
use std::time::Instant;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::layer::Layer;
use crate::stats::{EngineStats, FrameStats, GpuMemoryStats};
use crate::window::{open_output_window, OutputWindow, OutputWindows, ResizeAction};
use crate::{log_err, log_info, log_warn};

use winit::dpi::PhysicalSize;
use winit::event_loop::EventLoopWindowTarget;
use winit::window::WindowId;

use super::compositor::{Compositor, LayerUniforms, RenderLayer};
use super::context::GpuContext;
use super::output::{FrameSource, OutputPipeline, OutputRegistry, TargetId};
use super::pool::TexturePool;
use super::source::SourceAdapter;
use super::aligned_bytes_per_row;

/// Engine lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    /// Initialization failed or the device was lost; rendering is parked
    /// until the next successful `initialize()`.
    NotReady,
}

/// Invoked once per pump; expected to gather the frame's resolved layers
/// and call `render_frame`.
pub type FrameCallback = Box<dyn FnMut(&mut CompositeEngine)>;

pub struct CompositeEngine {
    config: EngineConfig,
    /// Created once, survives device loss — registered surfaces hang off it.
    instance: wgpu::Instance,

    gpu: Option<GpuContext>,
    compositor: Option<Compositor>,
    output_pipeline: Option<OutputPipeline>,
    outputs: OutputRegistry<wgpu::Surface<'static>>,
    windows: OutputWindows,
    sources: SourceAdapter,
    pool: TexturePool,
    stats: FrameStats,

    state: EngineState,
    running: bool,
    callback: Option<FrameCallback>,
    /// Parity of the target holding the last composited frame.
    last_frame_parity: Option<usize>,
    /// Cached staging buffer for `capture_frame` readbacks.
    capture_staging: Option<(wgpu::Buffer, u64)>,
    warned_not_ready: bool,
}

impl CompositeEngine {
    pub fn new(config: EngineConfig) -> Self {
        let stats_window = config.stats_window;
        Self {
            config,
            instance: wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            }),
            gpu: None,
            compositor: None,
            output_pipeline: None,
            outputs: OutputRegistry::new(),
            windows: OutputWindows::new(),
            sources: SourceAdapter::new(),
            pool: TexturePool::new(),
            stats: FrameStats::new(stats_window),
            state: EngineState::Uninitialized,
            running: false,
            callback: None,
            last_frame_parity: None,
            capture_staging: None,
            warned_not_ready: false,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == EngineState::Ready
    }

    /// Current composite resolution.
    pub fn resolution(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    // ========================================================================
    // INITIALIZATION & DEVICE LOSS
    // ========================================================================

    /// Bring the engine to `Ready`.  Idempotent: calling on a `Ready` or
    /// mid-`Initializing` engine is a no-op, so racing callers share one
    /// initialization rather than creating duplicate devices.
    pub fn initialize(&mut self) -> Result<(), EngineError> {
        match self.state {
            EngineState::Ready | EngineState::Initializing => return Ok(()),
            EngineState::Uninitialized | EngineState::NotReady => {}
        }
        self.state = EngineState::Initializing;

        let gpu = match GpuContext::new(&self.instance, self.config.power_preference()) {
            Ok(gpu) => gpu,
            Err(e) => {
                log_err!("engine initialization failed: {}", e);
                self.state = EngineState::NotReady;
                return Err(e);
            }
        };

        let mut compositor = Compositor::new(&gpu.device);
        compositor.upload_black_texel(&gpu.queue);
        compositor.set_resolution(&gpu, &mut self.pool, self.config.width, self.config.height);
        let output_pipeline = OutputPipeline::new(&gpu.device);

        // Surfaces registered before (or across a device loss) need
        // reconfiguring against the new device.
        self.outputs.reset_device_state();

        self.gpu = Some(gpu);
        self.compositor = Some(compositor);
        self.output_pipeline = Some(output_pipeline);
        self.last_frame_parity = None;
        self.warned_not_ready = false;
        self.state = EngineState::Ready;
        log_info!(
            "engine ready: {}x{} composite targets",
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    /// Mark the device lost, as the asynchronous loss notification would.
    /// The teardown happens on the next tick, exactly like the real path.
    pub fn simulate_device_loss(&mut self) {
        if let Some(gpu) = &self.gpu {
            gpu.mark_lost();
        }
    }

    /// Atomically drop everything derived from the lost device.  Surface
    /// registrations and open windows survive; their GPU bindings do not.
    fn teardown_after_loss(&mut self) {
        log_err!("tearing down after device loss; explicit initialize() required to resume");
        self.gpu = None;
        self.compositor = None;
        self.output_pipeline = None;
        self.sources.clear();
        self.pool.clear();
        self.capture_staging = None;
        self.outputs.reset_device_state();
        self.last_frame_parity = None;
        self.state = EngineState::NotReady;
    }

    /// Change the composite resolution.  Recreates the ping-pong targets and
    /// invalidates every bind group that referenced the old target views.
    pub fn set_resolution(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        self.config.width = width;
        self.config.height = height;
        if let (Some(gpu), Some(compositor)) = (&self.gpu, &mut self.compositor) {
            compositor.set_resolution(gpu, &mut self.pool, width, height);
            if let Some(op) = &mut self.output_pipeline {
                op.invalidate_frame_cache();
            }
            // Surfaces letterbox against the frame aspect, which just moved.
            self.outputs.mark_uniforms_dirty();
            // The previous frame lived in a target that no longer exists.
            self.last_frame_parity = None;
        }
    }

    // ========================================================================
    // SCHEDULER
    // ========================================================================

    /// Begin the loop.  Idempotent — a second `start` while running is a
    /// no-op and the original callback keeps driving frames.
    pub fn start(&mut self, callback: FrameCallback) {
        if self.running {
            return;
        }
        self.running = true;
        self.callback = Some(callback);
    }

    /// Halt scheduling before the next tick.  Idempotent.  GPU work already
    /// submitted for the in-flight frame is left to complete.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// One scheduler tick; the host calls this once per display-refresh
    /// callback.  Invokes the frame callback when the loop is running.
    pub fn pump(&mut self) {
        self.stats.tick(Instant::now());
        if !self.running {
            return;
        }
        self.invoke_callback();
    }

    /// Force an out-of-band redraw without waiting for the next tick.
    pub fn request_render(&mut self) {
        self.invoke_callback();
    }

    fn invoke_callback(&mut self) {
        if let Some(mut cb) = self.callback.take() {
            cb(self);
            if self.callback.is_none() {
                self.callback = Some(cb);
            }
        }
    }

    // ========================================================================
    // FRAME
    // ========================================================================

    /// Render one frame from the given resolved layer slice (list order,
    /// index 0 on top) and present it to every enabled surface.
    ///
    /// Never panics across this boundary: a non-ready engine is a logged
    /// no-op, a non-ready layer is skipped for this frame only.
    pub fn render_frame(&mut self, layers: &[Layer]) {
        // Device loss is observed here, at the top of the tick.
        if self.gpu.as_ref().is_some_and(|gpu| gpu.is_lost()) {
            self.teardown_after_loss();
        }
        if self.state != EngineState::Ready {
            if !self.warned_not_ready {
                log_warn!("render_frame called while {:?}; dropping frames", self.state);
                self.warned_not_ready = true;
            }
            return;
        }
        let started = Instant::now();

        let gpu = self.gpu.as_ref().expect("Ready implies device");
        let compositor = self.compositor.as_mut().expect("Ready implies compositor");
        let output_pipeline = self.output_pipeline.as_mut().expect("Ready implies output pipeline");

        // ---- Prepare: resolve each visible layer to a GPU binding ----
        let dest = compositor.resolution();
        let mut live_ids = HashSet::with_capacity(layers.len());
        let mut prepared: Vec<RenderLayer> = Vec::with_capacity(layers.len());
        for layer in layers {
            live_ids.insert(layer.id);
            if !layer.visible {
                continue;
            }
            // Not ready this frame -> skipped this frame only, retried next.
            let Some(source) = self.sources.prepare(gpu, &layer.content) else {
                continue;
            };
            prepared.push(RenderLayer {
                id: layer.id,
                uniforms: LayerUniforms::new(
                    &layer.transform,
                    layer.opacity,
                    layer.blend_mode,
                    (source.width, source.height),
                    dest,
                ),
                binding: source.binding,
            });
        }
        let active_layers = prepared.len();

        // ---- Composite: N passes (or the zero-layer clear fast path) ----
        let parity = compositor.composite(gpu, &prepared);
        drop(prepared); // one-shot frame views end with the frame
        self.last_frame_parity = Some(parity);

        // ---- Present the same frame to every registered surface ----
        let frame_view = compositor.target_view(parity);
        let black_view = compositor.black_view();
        let frame = match &frame_view {
            Some(view) => FrameSource::Composited {
                parity,
                view: view.as_ref(),
                aspect: dest.0 as f32 / dest.1.max(1) as f32,
            },
            None => FrameSource::Black { view: black_view.as_ref() },
        };
        output_pipeline.present_all(gpu, &mut self.outputs, frame, compositor.sampler());

        // ---- Prune per-layer GPU state for ids gone from the stack ----
        compositor.prune_layer_state(&live_ids);

        self.stats.frame(started.elapsed(), Instant::now(), active_layers);
    }

    // ========================================================================
    // PRESENTATION TARGETS
    // ========================================================================

    /// Attach a presentation destination (e.g. the preview canvas).  Safe at
    /// any time; the surface is configured on first present.
    pub fn register_target(
        &mut self,
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
    ) -> Result<TargetId, EngineError> {
        let surface = self
            .instance
            .create_surface(target)
            .map_err(|e| EngineError::SurfaceUnavailable(e.to_string()))?;
        Ok(self.outputs.register(surface, width, height))
    }

    /// Detach a destination and release its surface-specific state.
    pub fn unregister_target(&mut self, id: TargetId) {
        if !self.outputs.unregister(id) {
            log_warn!("unregister_target: unknown target {:?}", id);
        }
    }

    pub fn set_target_enabled(&mut self, id: TargetId, enabled: bool) {
        self.outputs.set_enabled(id, enabled);
    }

    /// Authoring aid: checkerboard behind missing coverage on this surface.
    pub fn set_target_transparency_grid(&mut self, id: TargetId, grid: bool) {
        self.outputs.set_transparency_grid(id, grid);
    }

    /// The host resized a registered drawable.
    pub fn resize_target(&mut self, id: TargetId, width: u32, height: u32) {
        self.outputs.resize(id, width, height);
    }

    pub fn target_count(&self) -> usize {
        self.outputs.len()
    }

    // ========================================================================
    // OUTPUT WINDOWS
    // ========================================================================

    /// Open a detachable output window and register its surface.  Returns
    /// `None` if the window system refuses.
    pub fn create_output_window(
        &mut self,
        elwt: &EventLoopWindowTarget<()>,
        title: &str,
    ) -> Option<TargetId> {
        let window = open_output_window(elwt, title, (1280, 720))?;
        let size = window.inner_size();
        let target = match self.register_target(window.clone(), size.width, size.height) {
            Ok(t) => t,
            Err(e) => {
                log_err!("output window surface creation failed: {}", e);
                return None;
            }
        };
        self.windows.insert(OutputWindow::new(target, window));
        log_info!("output window \"{}\" opened as target {:?}", title, target);
        Some(target)
    }

    /// Close an output window: deregister its surface, drop the window.
    pub fn close_output_window(&mut self, target: TargetId) {
        if let Some(win) = self.windows.remove_by_target(target) {
            self.outputs.unregister(win.target);
        }
    }

    /// Whether a winit window id belongs to one of our output windows.
    pub fn is_output_window(&mut self, id: WindowId) -> bool {
        self.windows.by_window(id).is_some()
    }

    /// Host forwarded a resize event for an output window.  Applies the
    /// aspect lock; may programmatically re-resize the window.
    pub fn on_output_window_resized(&mut self, id: WindowId, width: u32, height: u32) {
        let Some(win) = self.windows.by_window(id) else {
            return;
        };
        match win.lock.on_host_resize((width, height)) {
            ResizeAction::Accept((w, h)) => {
                let target = win.target;
                self.outputs.resize(target, w, h);
            }
            ResizeAction::Request((w, h)) => {
                // If the platform applies it synchronously no event follows;
                // otherwise the echo event confirms the pending size.
                if let Some(applied) = win.window.request_inner_size(PhysicalSize::new(w, h)) {
                    win.lock.confirm((applied.width, applied.height));
                    let target = win.target;
                    let (aw, ah) = (applied.width, applied.height);
                    self.outputs.resize(target, aw, ah);
                }
            }
        }
    }

    /// Host reports an output window's close button; deregisters it.
    pub fn on_output_window_closed(&mut self, id: WindowId) -> Option<TargetId> {
        let win = self.windows.remove_by_window(id)?;
        self.outputs.unregister(win.target);
        log_info!("output window for target {:?} closed", win.target);
        Some(win.target)
    }

    /// Toggle borderless fullscreen on an output window.
    pub fn toggle_output_fullscreen(&mut self, target: TargetId) {
        if let Some(win) = self.windows.by_target(target) {
            win.toggle_fullscreen();
        }
    }

    pub fn output_window_count(&self) -> usize {
        self.windows.len()
    }

    // ========================================================================
    // DIAGNOSTICS
    // ========================================================================

    pub fn stats(&self) -> EngineStats {
        let reserved = self
            .compositor
            .as_ref()
            .map(|c| c.target_memory_bytes())
            .unwrap_or(0)
            + self.sources.cached_image_bytes();
        EngineStats {
            fps: self.stats.fps(),
            average_frame_time_ms: self.stats.average_frame_time_ms(),
            active_layers: self.stats.active_layers,
            gpu_memory: GpuMemoryStats {
                reserved,
                unused: self.pool.pooled_memory_bytes(),
            },
        }
    }

    /// Synchronously read back the last composited frame as tightly-packed
    /// RGBA bytes (`width * height * 4`).  A diagnostics/snapshot primitive
    /// — the export pipeline proper runs outside this engine.
    pub fn capture_frame(&mut self) -> Option<Vec<u8>> {
        let parity = self.last_frame_parity?;
        let gpu = self.gpu.as_ref()?;
        let compositor = self.compositor.as_ref()?;
        let texture = compositor.target_texture(parity)?;
        let (width, height) = compositor.resolution();

        let bytes_per_row = aligned_bytes_per_row(width);
        let buffer_size = (bytes_per_row * height) as u64;

        // Reuse the cached staging buffer when it is large enough.
        let need_new = match &self.capture_staging {
            Some((_, size)) if *size >= buffer_size => false,
            _ => true,
        };
        if need_new {
            let buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("capture_staging"),
                size: buffer_size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            self.capture_staging = Some((buf, buffer_size));
        }
        let staging = &self.capture_staging.as_ref().unwrap().0;

        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("capture_encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        gpu.device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log_err!("capture_frame map error: {:?}", e);
                return None;
            }
            Err(e) => {
                log_err!("capture_frame channel error: {:?}", e);
                return None;
            }
        }

        let mapped = slice.get_mapped_range();
        let tight_row = (width * 4) as usize;
        let mut pixels = Vec::with_capacity(tight_row * height as usize);
        for y in 0..height as usize {
            let start = y * bytes_per_row as usize;
            pixels.extend_from_slice(&mapped[start..start + tight_row]);
        }
        drop(mapped);
        staging.unmap();

        Some(pixels)
    }

    /// Live entries in the output parity cache — bounded at 2 by
    /// construction, exposed for diagnostics.
    pub fn output_bind_group_count(&self) -> usize {
        self.output_pipeline
            .as_ref()
            .map(|p| p.cached_frame_bind_groups())
            .unwrap_or(0)
    }

    /// Live per-layer uniform slots (pruning observability).
    pub fn layer_slot_count(&self) -> usize {
        self.compositor.as_ref().map(|c| c.uniform_slot_count()).unwrap_or(0)
    }
}
