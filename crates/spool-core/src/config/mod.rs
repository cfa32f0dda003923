//! Engine configuration
//!
//! - YAML loading/saving with fallback to defaults
//! - Default config location
//! - `EngineConfig`: sizes and cadences fixed at `initialize()`
//!
//! # Usage
//!
//! ```ignore
//! use spool_core::config::{load_config, save_config, default_config_path, EngineConfig};
//!
//! let path = default_config_path("engine.yaml");
//! let config: EngineConfig = load_config(&path);
//! save_config(&config, &path)?;
//! ```

mod engine;
mod io;
mod paths;

pub use engine::{EngineConfig, EVENT_QUEUE_CAPACITY};
pub use io::{load_config, read_config, save_config};
pub use paths::{default_config_dir, default_config_path};
