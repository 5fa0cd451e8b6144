//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Host-tunable engine settings.  Serializable so the application can keep
/// them alongside its own preferences.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Adapter preference: "high performance" / "discrete" selects the fast
    /// GPU, "low power" / "integrated" the efficient one.  Unrecognized
    /// strings fall back to high performance.
    pub preferred_gpu: String,
    /// Composite resolution (the size of the ping-pong targets), in pixels.
    pub width: u32,
    pub height: u32,
    /// Number of frame-time samples kept for the rolling average.
    pub stats_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preferred_gpu: "high performance".to_string(),
            width: 1920,
            height: 1080,
            stats_window: 60,
        }
    }
}

impl EngineConfig {
    /// Translate the preference string into a wgpu power preference.
    pub fn power_preference(&self) -> wgpu::PowerPreference {
        match self.preferred_gpu.to_lowercase().as_str() {
            "low power" | "integrated" => wgpu::PowerPreference::LowPower,
            "high performance" | "discrete" => wgpu::PowerPreference::HighPerformance,
            _ => wgpu::PowerPreference::HighPerformance,
        }
    }
}
