//! Output stream configuration

use serde::{Deserialize, Serialize};

/// Largest buffer size accepted for a fixed request
pub const MAX_BUFFER_SIZE: u32 = 8192;

/// Buffer size used when none is requested
pub const DEFAULT_BUFFER_SIZE: u32 = 512;

/// Preferred buffer size for the output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferSize {
    /// Let the device choose
    #[default]
    Default,
    /// Request a specific size in frames (clamped to 64..=MAX_BUFFER_SIZE)
    Fixed(u32),
}

impl BufferSize {
    /// Frames reported to the engine at initialize
    pub fn frames(&self) -> u32 {
        match self {
            BufferSize::Default => DEFAULT_BUFFER_SIZE,
            BufferSize::Fixed(frames) => (*frames).clamp(64, MAX_BUFFER_SIZE),
        }
    }
}

/// Output device selection and stream format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name; `None` uses the host default
    pub device: Option<String>,
    /// Requested sample rate; the device maximum is used when unsupported
    pub sample_rate: u32,
    pub buffer_size: BufferSize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: crate::types::DEFAULT_SAMPLE_RATE,
            buffer_size: BufferSize::Default,
        }
    }
}
