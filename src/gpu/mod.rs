// ============================================================================
// GPU MODULE — real-time compositing pipeline for VeloCut
// ============================================================================
//
// Architecture:
//   context.rs    — wgpu instance/adapter/device init + device-loss flag
//   shaders.rs    — all WGSL shader source (inline strings)
//   source.rs     — texture source adapter (video frame import, image cache)
//   compositor.rs — ping-pong blend compositing across the layer stack
//   output.rs     — presentation surface registry + present passes
//   pool.rs       — render-target recycling pool
//   engine.rs     — top-level CompositeEngine coordinator + render loop
// ============================================================================

pub mod compositor;
pub mod context;
pub mod engine;
pub mod output;
pub mod pool;
pub mod shaders;
pub mod source;

/// Offscreen composite format.  Ping-pong targets and the image cache use
/// this; presentation surfaces convert on the output pass.
pub const COMPOSITE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Fixed presentation format shared by the preview and every output window,
/// so the single output pipeline matches each surface it draws to.
pub const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;

/// Align a row of RGBA pixels up to wgpu's copy requirement (256 bytes).
pub(crate) fn aligned_bytes_per_row(width: u32) -> u32 {
    let unaligned = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (unaligned + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::aligned_bytes_per_row;

    #[test]
    fn row_alignment_rounds_up_to_256() {
        assert_eq!(aligned_bytes_per_row(64), 256);
        assert_eq!(aligned_bytes_per_row(65), 512);
        assert_eq!(aligned_bytes_per_row(1920), 1920 * 4);
    }
}
