// ============================================================================
// VELOCUT — real-time GPU compositing engine for the VeloCut video editor
// ============================================================================
//
// The engine blends an ordered stack of video/image layers into one frame per
// display refresh and presents that frame to every registered surface (the
// in-app preview plus any number of detachable output windows).
//
// One `CompositeEngine` per process: construct it at the application root and
// pass it down by `&mut`.  All engine state is owned by the render thread;
// the only cross-thread traffic is the device-loss flag.

#![allow(clippy::too_many_arguments)]

pub mod logger;

pub mod blend;
pub mod config;
pub mod error;
pub mod gpu;
pub mod layer;
pub mod stats;
pub mod window;

pub use blend::BlendMode;
pub use config::EngineConfig;
pub use error::EngineError;
pub use gpu::engine::{CompositeEngine, EngineState};
pub use gpu::output::TargetId;
pub use layer::{ExternalFrame, FrameTap, ImageHandle, Layer, LayerContent, LayerId, Transform2D, VideoSource};
pub use stats::{EngineStats, GpuMemoryStats};
