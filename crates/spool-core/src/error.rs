//! Engine error types

use thiserror::Error;

/// Errors returned by engine lifecycle operations
///
/// Render and parameter entry points never return errors; they fall back
/// to silence or neutral values instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Sample rate outside the supported range
    #[error("Invalid sample rate: {0}Hz")]
    InvalidSampleRate(u32),

    /// Host buffer size of zero
    #[error("Invalid buffer size: {0} frames")]
    InvalidBufferSize(u32),

    /// Failed to spawn a background thread
    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),

    /// Operation requires `initialize()` first
    #[error("Engine is not initialized")]
    NotInitialized,
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
