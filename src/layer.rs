// ============================================================================
// LAYER MODEL — what the editing layer feeds the compositor every frame
// ============================================================================
//
// The engine never owns layers.  The editing side (timeline, keyframe
// evaluator) hands a fresh `&[Layer]` slice to every frame, with transform /
// opacity / blend values already resolved for the current play-time.  Any
// layer may vanish between frames; engine-side caches key on `LayerId` and
// are pruned against each frame's id set.

use std::sync::Arc;

use image::RgbaImage;
use uuid::Uuid;

use crate::blend::BlendMode;

/// Stable layer identity, used as the cache key for GPU-side per-layer state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerId(pub Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolved 2D placement of a layer inside the composite frame.
///
/// `position` is normalized with the origin at the frame center; `scale` is
/// per-axis; `rotation` is radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform2D {
    pub position: [f32; 2],
    pub scale: [f32; 2],
    pub rotation: f32,
}

impl Default for Transform2D {
    fn default() -> Self {
        Self { position: [0.0, 0.0], scale: [1.0, 1.0], rotation: 0.0 }
    }
}

/// One element of the visible stack.  Stacking order is slice order: index 0
/// renders on top.
#[derive(Clone)]
pub struct Layer {
    pub id: LayerId,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub transform: Transform2D,
    pub content: LayerContent,
}

impl Layer {
    pub fn new(content: LayerContent) -> Self {
        Self {
            id: LayerId::new(),
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            transform: Transform2D::default(),
            content,
        }
    }
}

/// A layer's media source — exactly one of the supported kinds.
#[derive(Clone)]
pub enum LayerContent {
    /// Video stream, imported one-shot every frame (see `VideoSource`).
    Video(VideoSource),
    /// Still image, uploaded once and cached by handle identity.
    Image(ImageHandle),
}

// ============================================================================
// VIDEO FRAME TAPS
// ============================================================================

/// A decoded video frame the compositor may sample **this frame only**.
///
/// The texture lives on the engine's device and is owned by the decode side;
/// the compositor creates a view from it when the frame is prepared and
/// never caches that view — or any bind group referencing it — across
/// frames.  Next frame, the tap is asked again.
#[derive(Clone)]
pub struct ExternalFrame {
    pub texture: Arc<wgpu::Texture>,
    pub width: u32,
    pub height: u32,
}

/// The decode boundary.  Implemented by the playback pipeline; the engine
/// only pulls, once per layer per frame.
///
/// Returning `None` (or a zero-dimension frame) is not an error — the layer
/// is skipped for this frame and the tap is asked again next frame, with no
/// backoff.  Readiness gaps are typically one or two frames long.
pub trait FrameTap: Send + Sync {
    /// Current frame pixel dimensions, if a frame exists.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Frames sitting decoded and ready for display.  The live-element
    /// fallback path is only imported when this is at least 1; the
    /// decoded-stream path may always be tried.
    fn ready_frames(&self) -> usize;

    /// The frame to show this tick.
    fn current_frame(&self) -> Option<ExternalFrame>;
}

/// Up to two frame taps for one video layer, tried in fixed priority order
/// each frame: the hardware-decode stream first, then the live playback
/// element (only when its buffer holds a ready frame).
#[derive(Clone)]
pub struct VideoSource {
    pub decoded: Option<Arc<dyn FrameTap>>,
    pub live: Option<Arc<dyn FrameTap>>,
}

impl VideoSource {
    pub fn from_decoded(tap: Arc<dyn FrameTap>) -> Self {
        Self { decoded: Some(tap), live: None }
    }

    pub fn from_live(tap: Arc<dyn FrameTap>) -> Self {
        Self { decoded: None, live: Some(tap) }
    }
}

// ============================================================================
// STILL IMAGES
// ============================================================================

/// Decoded still-image pixels plus a stable identity.
///
/// Cloning shares the pixel buffer; the id is the image-texture cache key,
/// so two handles with the same id are treated as the same upload.
#[derive(Clone)]
pub struct ImageHandle {
    id: Uuid,
    pixels: Arc<RgbaImage>,
}

impl ImageHandle {
    pub fn new(pixels: RgbaImage) -> Self {
        Self { id: Uuid::new_v4(), pixels: Arc::new(pixels) }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}

// ============================================================================
// SAMPLING MATH — reference for the composite shaders
// ============================================================================

/// Map a destination UV through a layer's inverse transform to the source
/// sampling coordinate.  This is the contract the composite vertex/fragment
/// shaders implement; the Rust version exists so the math is testable off
/// the GPU.
///
/// Steps: center at (0,0) → inverse rotation → inverse scale → aspect-fit
/// correction → re-center + position offset.  Returns the *unclamped*
/// coordinate; the caller clamps for the fetch and uses the unclamped value
/// for the out-of-bounds alpha test.
pub fn map_uv(uv: [f32; 2], t: &Transform2D, source_aspect: f32, dest_aspect: f32) -> [f32; 2] {
    let mut x = uv[0] - 0.5;
    let mut y = uv[1] - 0.5;

    // Inverse rotation.
    let (sin, cos) = (-t.rotation).sin_cos();
    let (rx, ry) = (x * cos - y * sin, x * sin + y * cos);
    x = rx;
    y = ry;

    // Inverse scale (degenerate axes collapse to center — the fetch then
    // lands out of bounds and the pixel is dropped by the alpha test).
    x = if t.scale[0] != 0.0 { x / t.scale[0] } else { f32::INFINITY };
    y = if t.scale[1] != 0.0 { y / t.scale[1] } else { f32::INFINITY };

    // Fit the source into the frame preserving its own aspect ratio.
    let ratio = source_aspect / dest_aspect;
    if ratio > 1.0 {
        y *= ratio;
    } else {
        x /= ratio;
    }

    [x + 0.5 - t.position[0], y + 0.5 - t.position[1]]
}

/// Whether an unclamped sampling coordinate falls outside the source extent.
pub fn out_of_bounds(uv: [f32; 2]) -> bool {
    uv[0] < 0.0 || uv[0] > 1.0 || uv[1] < 0.0 || uv[1] > 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn identity_transform_is_passthrough() {
        let t = Transform2D::default();
        let uv = map_uv([0.25, 0.75], &t, 1.0, 1.0);
        assert!((uv[0] - 0.25).abs() < EPS && (uv[1] - 0.75).abs() < EPS);
        assert!(!out_of_bounds(uv));
    }

    #[test]
    fn position_offset_shifts_sampling_against_motion() {
        // Moving the layer right means the frame center samples left of the
        // source center.
        let t = Transform2D { position: [0.25, 0.0], ..Default::default() };
        let uv = map_uv([0.5, 0.5], &t, 1.0, 1.0);
        assert!((uv[0] - 0.25).abs() < EPS);
    }

    #[test]
    fn wide_source_letterboxes_vertically() {
        // 2:1 source in a 1:1 frame: ratio = 2, vertical extent shrinks to
        // the central band uv_y ∈ [0.25, 0.75] of the destination.
        let t = Transform2D::default();
        let ratio: f32 = 2.0;
        let band = 0.5 / ratio;

        let inside = map_uv([0.5, 0.5 + band - 0.01], &t, 2.0, 1.0);
        assert!(!out_of_bounds(inside));

        let above = map_uv([0.5, 0.5 - band - 0.01], &t, 2.0, 1.0);
        let below = map_uv([0.5, 0.5 + band + 0.01], &t, 2.0, 1.0);
        assert!(out_of_bounds(above));
        assert!(out_of_bounds(below));
    }

    #[test]
    fn tall_source_pillarboxes_horizontally() {
        let t = Transform2D::default();
        // 1:2 source in a 1:1 frame: ratio = 0.5, horizontal band is
        // uv_x ∈ [0.25, 0.75].
        let inside = map_uv([0.6, 0.5], &t, 0.5, 1.0);
        assert!(!out_of_bounds(inside));
        let left = map_uv([0.2, 0.5], &t, 0.5, 1.0);
        assert!(out_of_bounds(left));
    }

    #[test]
    fn quarter_turn_swaps_axes() {
        let t = Transform2D { rotation: std::f32::consts::FRAC_PI_2, ..Default::default() };
        // A point right of center maps to a point offset along Y after the
        // inverse rotation.
        let uv = map_uv([0.75, 0.5], &t, 1.0, 1.0);
        assert!((uv[0] - 0.5).abs() < EPS);
        assert!((uv[1] - 0.5).abs() > 0.2);
    }

    #[test]
    fn downscale_pushes_edges_out_of_bounds() {
        // A layer scaled to half size only covers the central quarter of
        // the frame; sampling near the frame edge is out of bounds.
        let t = Transform2D { scale: [0.5, 0.5], ..Default::default() };
        assert!(out_of_bounds(map_uv([0.95, 0.5], &t, 1.0, 1.0)));
        assert!(!out_of_bounds(map_uv([0.6, 0.6], &t, 1.0, 1.0)));
    }
}
