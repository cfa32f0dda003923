//! Spool Core - real-time synthesis and mixing engine
//!
//! Sample-accurate note scheduling, polyphonic voice allocation, an
//! eight-channel mixer with tape delay and reverb sends, a master filter,
//! a master clock driving a modulation matrix, reel recording and a
//! background render thread feeding a multi-channel ring buffer.

#[cfg(feature = "cpal-backend")]
pub mod audio;
pub mod config;
pub mod dsp;
pub mod effect;
pub mod engine;
pub mod error;
pub mod params;
pub mod source;
pub mod types;

pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use types::*;
