//! Path utilities for spool configuration files

use std::path::PathBuf;

/// Get the default configuration directory
///
/// Returns: `<platform config dir>/spool` (e.g. `~/.config/spool` on Linux)
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spool")
}

/// Get the default config file path for a given file name
///
/// Returns: `<config dir>/spool/{filename}`
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}
