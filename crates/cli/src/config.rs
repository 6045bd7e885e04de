//! Configuration management for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// CLI configuration from `~/.config/fcst/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Artifact store root written by the pipeline
    pub artifact_dir: Option<PathBuf>,
    /// Age after which a forecast is reported as stale
    pub stale_after_secs: Option<i64>,
}

impl Config {
    /// Load configuration from file; missing file or home dir means defaults
    pub fn load() -> Result<Self> {
        let Some(config_path) = Self::config_path() else {
            return Ok(Self::default());
        };

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// Get the configuration file path
    fn config_path() -> Option<PathBuf> {
        dirs_next::home_dir().map(|home| home.join(".config").join("fcst").join("config.json"))
    }
}
