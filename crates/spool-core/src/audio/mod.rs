//! Standalone audio output through CPAL
//!
//! Pulls the mixed master from [`Engine::process`](crate::engine::Engine::process)
//! inside the device callback. Hosts that drive the engine themselves (plugin
//! hosts, the C API) don't need this module.
//!
//! ```ignore
//! use std::sync::Arc;
//! use spool_core::audio::{start_output, AudioConfig};
//! use spool_core::engine::Engine;
//!
//! let engine = Arc::new(Engine::default());
//! let handle = start_output(Arc::clone(&engine), &AudioConfig::default())?;
//! engine.note_on(60, 100);
//! ```

mod config;
mod cpal_backend;
mod error;

pub use config::{AudioConfig, BufferSize, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE};
pub use cpal_backend::{output_device_names, start_output, OutputHandle};
pub use error::{AudioError, AudioResult};
