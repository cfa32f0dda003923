//! YAML persistence for configuration files
//!
//! A missing or unreadable file is never fatal when loading: the engine
//! falls back to defaults so it can always start.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Parse `path` as YAML, `Ok(None)` when there is no file
///
/// An empty file counts as absent.
pub fn read_config<T>(path: &Path) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    if contents.trim().is_empty() {
        return Ok(None);
    }
    serde_yaml::from_str(&contents)
        .map(Some)
        .with_context(|| format!("parsing {}", path.display()))
}

/// Load `path`, or `T::default()` when it is missing or invalid
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    match read_config(path) {
        Ok(Some(config)) => {
            log::info!("Config: loaded {}", path.display());
            config
        }
        Ok(None) => {
            log::info!("Config: no file at {}, using defaults", path.display());
            T::default()
        }
        Err(e) => {
            log::warn!("Config: {:#}, using defaults", e);
            T::default()
        }
    }
}

pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    let yaml = serde_yaml::to_string(config).context("serializing config")?;
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    std::fs::write(path, yaml).with_context(|| format!("writing {}", path.display()))?;
    log::debug!("Config: saved {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        assert!(read_config::<EngineConfig>(&path).unwrap().is_none());
        let config: EngineConfig = load_config(&path);
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_save_creates_directories_and_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.yaml");

        let config = EngineConfig {
            sample_rate: 44100,
            worker_chunk_frames: 128,
            ..EngineConfig::default()
        };

        save_config(&config, &path).unwrap();
        let loaded: EngineConfig = load_config(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_yaml_is_an_error_but_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "sample_rate: [not, a, number").unwrap();

        let err = read_config::<EngineConfig>(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("engine.yaml"));
        let loaded: EngineConfig = load_config(&path);
        assert_eq!(loaded, EngineConfig::default());
    }

    #[test]
    fn test_empty_file_counts_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "\n  \n").unwrap();
        assert!(read_config::<EngineConfig>(&path).unwrap().is_none());
    }
}
