// ============================================================================
// GPU CONTEXT — wgpu Instance, Device, Queue, and device-loss tracking
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::EngineError;
use crate::{log_err, log_info, log_warn};

/// Core wgpu resources shared across the engine.
///
/// The `Instance` is created once per engine and *survives* device loss —
/// presentation surfaces hang off the instance, so registered targets stay
/// valid across re-initialization and only need reconfiguring against the
/// new device.
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter: wgpu::Adapter,
    pub adapter_name: String,
    /// Maximum texture dimension supported by this device.
    pub max_texture_dim: u32,
    /// Set asynchronously by wgpu's device-lost callback; the render loop
    /// reads it at the top of every tick.
    lost: Arc<AtomicBool>,
}

impl GpuContext {
    /// Acquire an adapter and device.  Tries hardware first, then the
    /// software rasterizer, so the engine still comes up on machines without
    /// a usable GPU.
    ///
    /// `pollster::block_on` keeps initialization synchronous — the engine is
    /// single-threaded and the host calls `initialize()` from the render
    /// thread before the loop starts.
    pub fn new(instance: &wgpu::Instance, power: wgpu::PowerPreference) -> Result<Self, EngineError> {
        if let Some(ctx) = pollster::block_on(Self::new_async(instance, power, false)) {
            return Ok(ctx);
        }
        log_warn!("hardware adapter unavailable, trying software fallback");
        pollster::block_on(Self::new_async(instance, power, true))
            .ok_or_else(|| EngineError::Initialization("no adapter available".into()))
    }

    async fn new_async(
        instance: &wgpu::Instance,
        power: wgpu::PowerPreference,
        force_fallback: bool,
    ) -> Option<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: power,
                compatible_surface: None,
                force_fallback_adapter: force_fallback,
            })
            .await?;

        let adapter_name = adapter.get_info().name.clone();
        let limits = adapter.limits();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("VeloCut compositor"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_texture_dimension_2d: limits.max_texture_dimension_2d,
                        ..wgpu::Limits::downlevel_defaults()
                    },
                },
                None,
            )
            .await
            .ok()?;

        // Device loss arrives on an arbitrary thread; it only flips this
        // flag.  The render loop observes it on the next tick and tears the
        // engine down to NotReady.
        let lost = Arc::new(AtomicBool::new(false));
        {
            let lost = lost.clone();
            device.set_device_lost_callback(move |reason, message| {
                log_err!("GPU device lost ({:?}): {}", reason, message);
                lost.store(true, Ordering::SeqCst);
            });
        }
        device.on_uncaptured_error(Box::new(|e| {
            log_err!("uncaptured GPU error: {}", e);
        }));

        log_info!("using GPU adapter: {}", adapter_name);

        Some(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter,
            adapter_name,
            max_texture_dim: limits.max_texture_dimension_2d,
            lost,
        })
    }

    /// Whether the device has been lost since creation.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Mark the device lost.  Exposed so hosts and tests can simulate a
    /// loss notification; the real path is the wgpu callback above.
    pub fn mark_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }

    /// Check if a texture of the given dimensions can be created.
    pub fn supports_size(&self, width: u32, height: u32) -> bool {
        width <= self.max_texture_dim && height <= self.max_texture_dim
    }
}
