// ============================================================================
// FRAME STATISTICS — observational diagnostics, never gating
// ============================================================================

use std::time::{Duration, Instant};

/// Snapshot handed to the host by `CompositeEngine::stats()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct EngineStats {
    /// Frames presented over the last completed one-second window.
    pub fps: u32,
    /// Rolling average frame time over the sample window, in milliseconds.
    pub average_frame_time_ms: f32,
    /// Layer count of the most recent frame (after visibility/ready filtering).
    pub active_layers: usize,
    pub gpu_memory: GpuMemoryStats,
}

/// Rough GPU memory accounting, in bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct GpuMemoryStats {
    /// Live textures: ping-pong targets + cached image textures.
    pub reserved: usize,
    /// Textures parked in the recycling pool.
    pub unused: usize,
}

/// Rolling frame-time ring plus a once-per-second FPS counter.
pub struct FrameStats {
    samples: Vec<f32>,
    capacity: usize,
    next: usize,
    /// Frames counted since the last FPS window rolled over.
    frames_in_window: u32,
    window_started: Instant,
    fps: u32,
    last_tick: Option<Instant>,
    /// Delay between the two most recent scheduler ticks.
    pub inter_tick_ms: f32,
    pub active_layers: usize,
}

impl FrameStats {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            next: 0,
            frames_in_window: 0,
            window_started: Instant::now(),
            fps: 0,
            last_tick: None,
            inter_tick_ms: 0.0,
            active_layers: 0,
        }
    }

    /// Record the host calling into the scheduler; tracks inter-tick delay.
    pub fn tick(&mut self, now: Instant) {
        if let Some(prev) = self.last_tick {
            self.inter_tick_ms = duration_ms(now - prev);
        }
        self.last_tick = Some(now);
    }

    /// Record one completed frame.
    pub fn frame(&mut self, duration: Duration, now: Instant, active_layers: usize) {
        let ms = duration_ms(duration);
        if self.samples.len() < self.capacity {
            self.samples.push(ms);
        } else {
            self.samples[self.next] = ms;
        }
        self.next = (self.next + 1) % self.capacity;
        self.active_layers = active_layers;

        self.frames_in_window += 1;
        if now.duration_since(self.window_started) >= Duration::from_secs(1) {
            self.fps = self.frames_in_window;
            self.frames_in_window = 0;
            self.window_started = now;
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn average_frame_time_ms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

fn duration_ms(d: Duration) -> f32 {
    d.as_secs_f32() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_never_grows_past_capacity() {
        let mut s = FrameStats::new(4);
        let t0 = Instant::now();
        for _ in 0..10 {
            s.frame(Duration::from_millis(16), t0, 1);
        }
        assert_eq!(s.sample_count(), 4);
    }

    #[test]
    fn average_reflects_recent_samples_only() {
        let mut s = FrameStats::new(2);
        let t0 = Instant::now();
        s.frame(Duration::from_millis(100), t0, 0);
        s.frame(Duration::from_millis(10), t0, 0);
        s.frame(Duration::from_millis(10), t0, 0);
        // The 100ms sample has been overwritten.
        assert!((s.average_frame_time_ms() - 10.0).abs() < 0.01);
    }

    #[test]
    fn fps_counts_frames_per_one_second_window() {
        let mut s = FrameStats::new(60);
        let t0 = Instant::now();
        for _ in 0..30 {
            s.frame(Duration::from_millis(1), t0, 0);
        }
        assert_eq!(s.fps(), 0, "window has not rolled over yet");
        s.frame(Duration::from_millis(1), t0 + Duration::from_millis(1001), 0);
        assert_eq!(s.fps(), 31);
        // Next window starts counting from zero.
        s.frame(Duration::from_millis(1), t0 + Duration::from_millis(1002), 0);
        assert_eq!(s.fps(), 31);
    }

    #[test]
    fn inter_tick_delay_tracks_scheduler_cadence() {
        let mut s = FrameStats::new(8);
        let t0 = Instant::now();
        s.tick(t0);
        s.tick(t0 + Duration::from_millis(16));
        assert!((s.inter_tick_ms - 16.0).abs() < 0.5);
    }
}
