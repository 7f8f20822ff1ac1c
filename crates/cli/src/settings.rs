//! Locating and loading the engine configuration file

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sipcheck_scenario_core::EngineConfig;
use tracing::{debug, info};

/// Name looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "sipcheck.toml";

/// Default per-user config path, `<config dir>/sipcheck/config.toml`
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sipcheck").join("config.toml"))
}

/// First existing candidate: explicit path, then `./sipcheck.toml`, then the user config
pub fn discover(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }

    user_config_path().filter(|path| path.is_file())
}

/// Load the configuration, falling back to defaults when no file exists.
///
/// An explicitly requested file must exist and parse.
pub fn load(explicit: Option<&Path>) -> Result<EngineConfig> {
    match discover(explicit) {
        Some(path) => {
            let config = EngineConfig::load(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            info!(
                "Loaded config from {} ({} accounts)",
                path.display(),
                config.accounts.len()
            );
            Ok(config)
        }
        None => {
            debug!("No config file found, using defaults");
            Ok(EngineConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        assert_eq!(discover(Some(&path)), Some(path));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sipcheck.toml");
        std::fs::write(
            &path,
            "settle_ms = 100\n[[accounts]]\nid = \"alice\"\nusername = \"1001\"\nserver = \"pbx\"\n",
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.settle_ms, 100);
        assert!(config.find_account("alice").is_some());
    }
}
