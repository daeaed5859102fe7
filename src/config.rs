//! Application configuration: reconciler tuning plus database connection.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use userop_persistence::StoreConfig;
use userop_reconciler::ReconcilerConfig;

/// Top-level configuration file with `[reconciler]` and `[database]` tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub database: StoreConfig,
}

impl AppConfig {
    /// Load from `path`, or from `USEROP_*` environment variables when no
    /// file is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// reconciler settings are invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self {
                reconciler: ReconcilerConfig::from_env(),
                database: StoreConfig::default(),
            },
        };

        config.reconciler.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;

        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config {}", path.display()))
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config {}", path.display()))
        }
    }
}
