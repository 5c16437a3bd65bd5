//! Generic configuration I/O utilities
//!
//! YAML loading and saving for any serializable configuration type.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Load configuration from a YAML file
///
/// A missing file yields the default config. A file that exists but can't
/// be read or parsed is an error: running with silently ignored settings
/// would open the wrong device or sample format.
///
/// # Example
///
/// ```ignore
/// let config: LooperConfig = load_config(Path::new("config.yaml"))?;
/// ```
pub fn load_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("Config file {:?} doesn't exist, using defaults", path);
        return Ok(T::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    // An empty file deserializes as YAML null
    if contents.trim().is_empty() {
        log::info!("Config file {:?} is empty, using defaults", path);
        return Ok(T::default());
    }

    let config = serde_yaml::from_str::<T>(&contents)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;
    log::info!("Loaded config from {:?}", path);
    Ok(config)
}

/// Save configuration to a YAML file
///
/// Creates parent directories if they don't exist.
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("Config saved to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct TestConfig {
        value: i32,
        name: String,
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: TestConfig = load_config(Path::new("/nonexistent/path/config.yaml")).unwrap();
        assert_eq!(config, TestConfig::default());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test-config.yaml");

        let config = TestConfig {
            value: 42,
            name: "test".to_string(),
        };

        save_config(&config, &path).unwrap();
        let loaded: TestConfig = load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "value: [not a number").unwrap();
        assert!(load_config::<TestConfig>(&path).is_err());
    }

    #[test]
    fn test_empty_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.yaml");
        std::fs::write(&path, "\n").unwrap();
        assert_eq!(load_config::<TestConfig>(&path).unwrap(), TestConfig::default());
    }
}
