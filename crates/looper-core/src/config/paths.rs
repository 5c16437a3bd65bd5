//! Path utilities for looper configuration and data files

use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_FILE_ENV: &str = "CONFIG_FILE";

/// Config file picked up from the working directory
pub const LOCAL_CONFIG_FILE: &str = "default.config.yaml";

/// Get the per-user looper directory
///
/// Returns: `~/.config/looper` (platform config dir)
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("looper")
}

/// Get the per-user config file path
///
/// Returns: `~/.config/looper/config.yaml`
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

/// Get the default data directory for recordings and sessions
///
/// Returns: `~/.local/share/looper/{subdir}` (platform data dir)
pub fn default_data_path(subdir: &str) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("looper")
        .join(subdir)
}

/// Pick the config file to load
///
/// Order: explicit path, `CONFIG_FILE`, `default.config.yaml` in the
/// working directory when present, then the per-user config path.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    let env = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
    select_config_path(explicit, env, Path::new(LOCAL_CONFIG_FILE).exists())
}

fn select_config_path(explicit: Option<&Path>, env: Option<PathBuf>, local_exists: bool) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = env.filter(|p| !p.as_os_str().is_empty()) {
        return path;
    }
    if local_exists {
        return PathBuf::from(LOCAL_CONFIG_FILE);
    }
    default_config_path()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_ends_with_filename() {
        let path = default_config_path();
        assert!(path.ends_with("looper/config.yaml"));
    }

    #[test]
    fn test_data_path_includes_subdir() {
        assert!(default_data_path("sessions").ends_with("looper/sessions"));
    }

    #[test]
    fn test_config_path_precedence() {
        let explicit = Path::new("/etc/looper.yaml");
        let env = Some(PathBuf::from("/tmp/env.yaml"));

        assert_eq!(select_config_path(Some(explicit), env.clone(), true), explicit);
        assert_eq!(select_config_path(None, env, true), PathBuf::from("/tmp/env.yaml"));
        assert_eq!(select_config_path(None, None, true), PathBuf::from(LOCAL_CONFIG_FILE));
        assert_eq!(select_config_path(None, None, false), default_config_path());
        assert_eq!(
            select_config_path(None, Some(PathBuf::new()), false),
            default_config_path()
        );
    }
}
