//! Ledger configuration: defaults, an optional TOML file, then environment
//! overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_DATABASE: &str = "BLOCKWITNESS_DB";
pub const ENV_FRONTEND_ORIGIN: &str = "BLOCKWITNESS_FRONTEND_ORIGIN";
pub const ENV_LIST_LIMIT: &str = "BLOCKWITNESS_LIST_LIMIT";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Origin of the explorer UI, used in certificate verification links
    pub frontend_origin: String,
    /// Default number of blocks returned when browsing
    pub list_limit: usize,
    /// Extra attempts after an append loses a race for the chain tail
    pub append_retries: u32,
    /// How long a writer waits for another connection's lock
    pub busy_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("blockwitness.db"),
            frontend_origin: "http://localhost:5173".to_string(),
            list_limit: 100,
            append_retries: 3,
            busy_timeout_ms: 5000,
        }
    }
}

impl LedgerConfig {
    /// Load from an optional file, then apply process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse TOML; missing keys keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply overrides from a variable lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DATABASE) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(origin) = lookup(ENV_FRONTEND_ORIGIN) {
            self.frontend_origin = origin;
        }
        if let Some(limit) = lookup(ENV_LIST_LIMIT) {
            self.list_limit = limit.parse().map_err(|_| ConfigError::Invalid {
                key: ENV_LIST_LIMIT.to_string(),
                value: limit.clone(),
            })?;
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Explorer link for a block, as printed on certificates and QR codes.
    pub fn verification_url(&self, block_index: u64) -> String {
        format!(
            "{}/explorer?block={}",
            self.frontend_origin.trim_end_matches('/'),
            block_index
        )
    }
}
