//! Audio backend error types

use thiserror::Error;

use crate::error::EngineError;

/// Errors that can occur while opening the output stream
#[derive(Error, Debug)]
pub enum AudioError {
    /// No default output device
    #[error("No default audio output device")]
    NoDefaultDevice,

    /// Named device not found
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to query device configurations
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Failed to build the output stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start the stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// Engine rejected the negotiated stream format
    #[error("Engine initialization failed: {0}")]
    Engine(#[from] EngineError),
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
