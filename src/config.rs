//! Tunables for the manager and the SQLite backend.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{NamespaceError, Result};

/// Dictionary manager settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// Maximum keys removed per write batch during recursive deletion.
    pub remove_batch_size: usize,
    /// Bind iterators to a store snapshot when the backend offers one.
    pub snapshot_iterators: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            remove_batch_size: 1024,
            snapshot_iterators: false,
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.remove_batch_size == 0 {
            return Err(NamespaceError::Config(
                "remove_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// SQLite backend settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Rows fetched per cursor round trip.
    pub cursor_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            cursor_page_size: 256,
        }
    }
}

/// Combined configuration file:
///
/// ```json
/// { "manager": { "remove_batch_size": 512 }, "store": { "busy_timeout_ms": 2000 } }
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub manager: ManagerConfig,
    pub store: StoreConfig,
}

impl Config {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(text).map_err(|err| NamespaceError::Config(err.to_string()))?;
        config.manager.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| {
            NamespaceError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = Config::from_json_str(r#"{"manager": {"remove_batch_size": 8}}"#).unwrap();
        assert_eq!(config.manager.remove_batch_size, 8);
        assert!(!config.manager.snapshot_iterators);
        assert_eq!(config.store, StoreConfig::default());
        assert_eq!(Config::from_json_str("{}").unwrap(), Config::default());
    }

    #[test]
    fn rejects_zero_batch_and_unknown_keys() {
        assert!(matches!(
            Config::from_json_str(r#"{"manager": {"remove_batch_size": 0}}"#),
            Err(NamespaceError::Config(_))
        ));
        assert!(Config::from_json_str(r#"{"manager": {"batch": 3}}"#).is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kvtree.json");
        fs::write(&path, r#"{"store": {"busy_timeout_ms": 10}}"#).unwrap();
        let config = Config::from_json_file(&path).unwrap();
        assert_eq!(config.store.busy_timeout_ms, 10);
        assert!(Config::from_json_file(&dir.path().join("absent.json")).is_err());
    }
}
