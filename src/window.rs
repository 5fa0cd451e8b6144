// ============================================================================
// OUTPUT WINDOWS — detachable OS windows mirroring the composited frame
// ============================================================================
//
// An output window is a plain winit window whose whole client area is one
// presentation surface.  The engine keeps its aspect ratio locked: when the
// user drags an edge, the axis they moved further wins and the other axis is
// recomputed, then the corrected size is requested from the window system.
//
// Re-entrancy: a programmatic resize echoes back as a resize event.  Rather
// than a timing-based guard, the pending requested size is remembered and
// the next host event — whatever size the window system settled on — is
// taken as the confirmation and accepted verbatim.  No event can trigger a
// second programmatic resize before the first is confirmed, so the feedback
// loop terminates by construction.

use std::sync::Arc;

use winit::dpi::PhysicalSize;
use winit::event_loop::EventLoopWindowTarget;
use winit::window::{Fullscreen, Window, WindowBuilder, WindowId};

use crate::gpu::output::TargetId;
use crate::log_warn;

/// What the engine should do in response to a host resize event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeAction {
    /// Use this size as-is (it respects the lock, or it is the window
    /// system's confirmation of our own request).
    Accept((u32, u32)),
    /// Ask the window system for this corrected size; a confirmation event
    /// will follow.
    Request((u32, u32)),
}

/// Aspect-ratio lock state for one window.
#[derive(Clone, Copy, Debug)]
pub struct AspectLock {
    aspect: f64,
    last: (u32, u32),
    /// Size we asked the window system for, awaiting its echo.
    pending: Option<(u32, u32)>,
}

impl AspectLock {
    pub fn new(size: (u32, u32)) -> Self {
        let (w, h) = (size.0.max(1), size.1.max(1));
        Self { aspect: w as f64 / h as f64, last: (w, h), pending: None }
    }

    /// Feed one host resize event through the lock.
    pub fn on_host_resize(&mut self, new: (u32, u32)) -> ResizeAction {
        if self.pending.take().is_some() {
            // The window system's answer to our request (possibly clamped by
            // the WM) — accept its final word without re-correcting.
            self.last = new;
            return ResizeAction::Accept(new);
        }

        let (w, h) = (new.0.max(1), new.1.max(1));
        let dw = (w as i64 - self.last.0 as i64).abs();
        let dh = (h as i64 - self.last.1 as i64).abs();
        let corrected = if dw >= dh {
            (w, (w as f64 / self.aspect).round().max(1.0) as u32)
        } else {
            ((h as f64 * self.aspect).round().max(1.0) as u32, h)
        };

        if corrected == (w, h) {
            self.last = (w, h);
            ResizeAction::Accept((w, h))
        } else {
            self.pending = Some(corrected);
            ResizeAction::Request(corrected)
        }
    }

    /// The resize was applied synchronously (no event will follow).
    pub fn confirm(&mut self, size: (u32, u32)) {
        self.pending = None;
        self.last = size;
    }
}

/// One open output window and its presentation target.
pub struct OutputWindow {
    pub target: TargetId,
    pub window: Arc<Window>,
    pub lock: AspectLock,
    fullscreen: bool,
}

impl OutputWindow {
    pub fn new(target: TargetId, window: Arc<Window>) -> Self {
        let size = window.inner_size();
        Self {
            target,
            window,
            lock: AspectLock::new((size.width, size.height)),
            fullscreen: false,
        }
    }

    /// Toggle borderless fullscreen; decorations (the window's own control
    /// chrome) are hidden while fullscreen.
    pub fn toggle_fullscreen(&mut self) {
        if self.fullscreen {
            self.window.set_fullscreen(None);
            self.window.set_decorations(true);
        } else {
            self.window.set_decorations(false);
            self.window.set_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        self.fullscreen = !self.fullscreen;
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }
}

/// Book-keeping for every open output window.
pub struct OutputWindows {
    windows: Vec<OutputWindow>,
}

impl OutputWindows {
    pub fn new() -> Self {
        Self { windows: Vec::new() }
    }

    pub fn insert(&mut self, window: OutputWindow) {
        self.windows.push(window);
    }

    pub fn by_window(&mut self, id: WindowId) -> Option<&mut OutputWindow> {
        self.windows.iter_mut().find(|w| w.window.id() == id)
    }

    pub fn by_target(&mut self, target: TargetId) -> Option<&mut OutputWindow> {
        self.windows.iter_mut().find(|w| w.target == target)
    }

    pub fn remove_by_window(&mut self, id: WindowId) -> Option<OutputWindow> {
        let idx = self.windows.iter().position(|w| w.window.id() == id)?;
        Some(self.windows.remove(idx))
    }

    pub fn remove_by_target(&mut self, target: TargetId) -> Option<OutputWindow> {
        let idx = self.windows.iter().position(|w| w.target == target)?;
        Some(self.windows.remove(idx))
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl Default for OutputWindows {
    fn default() -> Self {
        Self::new()
    }
}

/// Open a bare full-viewport window for use as an output surface.  Returns
/// `None` if the window system refuses (the caller decides whether to
/// retry) — the engine treats that like a blocked popup.
pub fn open_output_window(
    elwt: &EventLoopWindowTarget<()>,
    title: &str,
    size: (u32, u32),
) -> Option<Arc<Window>> {
    match WindowBuilder::new()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(size.0, size.1))
        .build(elwt)
    {
        Ok(w) => Some(Arc::new(w)),
        Err(e) => {
            log_warn!("host refused output window \"{}\": {}", title, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_dominant_drag_recomputes_height() {
        let mut lock = AspectLock::new((1600, 900));
        match lock.on_host_resize((1760, 900)) {
            ResizeAction::Request((w, h)) => {
                assert_eq!(w, 1760);
                assert_eq!(h, 990); // 1760 / (16/9)
            }
            other => panic!("expected correction request, got {:?}", other),
        }
    }

    #[test]
    fn height_dominant_drag_recomputes_width() {
        let mut lock = AspectLock::new((1600, 900));
        match lock.on_host_resize((1610, 1200)) {
            ResizeAction::Request((w, h)) => {
                assert_eq!(h, 1200);
                assert_eq!(w, (1200.0f64 * 1600.0 / 900.0).round() as u32);
            }
            other => panic!("expected correction request, got {:?}", other),
        }
    }

    #[test]
    fn aspect_true_resize_is_accepted_directly() {
        let mut lock = AspectLock::new((1600, 900));
        assert_eq!(lock.on_host_resize((1920, 1080)), ResizeAction::Accept((1920, 1080)));
    }

    #[test]
    fn confirmation_event_never_triggers_another_request() {
        let mut lock = AspectLock::new((1600, 900));
        let requested = match lock.on_host_resize((1700, 900)) {
            ResizeAction::Request(s) => s,
            other => panic!("expected request, got {:?}", other),
        };
        // The echo of our own request is accepted verbatim — no feedback loop.
        assert_eq!(lock.on_host_resize(requested), ResizeAction::Accept(requested));
        // And the lock is re-armed for the next user drag.
        assert!(matches!(lock.on_host_resize((1000, 899)), ResizeAction::Request(_)));
    }

    #[test]
    fn wm_clamped_confirmation_is_respected() {
        let mut lock = AspectLock::new((1600, 900));
        assert!(matches!(lock.on_host_resize((3000, 900)), ResizeAction::Request(_)));
        // The WM clamped our request; its final word stands.
        assert_eq!(lock.on_host_resize((2560, 1440)), ResizeAction::Accept((2560, 1440)));
    }

    #[test]
    fn degenerate_sizes_never_divide_by_zero() {
        let mut lock = AspectLock::new((0, 0));
        // 1:1 fallback aspect; a real event just flows through.
        assert!(matches!(lock.on_host_resize((100, 100)), ResizeAction::Accept(_)));
    }
}
