//! Typed errors for the compositing engine boundary.
//!
//! Only conditions that change engine-wide state get a variant here.  A layer
//! whose source isn't decodable *this frame* is not an error — the adapter
//! skips it and retries next frame (see `gpu::source`).

use thiserror::Error;

/// Engine-level failures.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No usable GPU adapter/device.  The engine stays `NotReady`; callers
    /// may retry `initialize()` but the engine never retries on its own.
    #[error("GPU initialization failed: {0}")]
    Initialization(String),

    /// The GPU device was lost.  Every cache is invalid; rendering resumes
    /// only after a fresh `initialize()`.
    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    /// A presentation surface could not be created or configured
    /// (e.g. the host refused to open an output window).
    #[error("presentation surface unavailable: {0}")]
    SurfaceUnavailable(String),

    /// An operation that needs a live device was called while the engine
    /// was `Uninitialized` or `NotReady`.
    #[error("engine is not ready")]
    NotReady,
}
