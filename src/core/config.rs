//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! Treewire reads a single user-level TOML file. Configuration only affects
//! CLI ergonomics; the protocol itself takes everything it needs as
//! arguments.
//!
//! # Precedence
//!
//! Values are resolved in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Config file
//! 3. CLI flags (not handled here)
//!
//! # Locations
//!
//! Searched in order:
//! 1. `$TREEWIRE_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/treewire/config.toml`
//! 3. `~/.treewire/config.toml`
//!
//! # Example
//!
//! ```toml
//! [log]
//! limit = 50
//!
//! [checkout]
//! chunk-size = 65536
//! ```

use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error as ThisError;

use crate::delta::window::DEFAULT_CHUNK_SIZE;

/// Errors from configuration operations.
#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// On-disk configuration schema.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    log: LogSection,
    #[serde(default)]
    checkout: CheckoutSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LogSection {
    /// Default maximum number of log entries to print.
    limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckoutSection {
    /// Text-delta window chunk size in bytes.
    #[serde(rename = "chunk-size")]
    chunk_size: Option<usize>,
}

/// Resolved configuration with defaults applied.
#[derive(Debug, Clone)]
pub struct Config {
    log_limit: Option<usize>,
    chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_limit: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// A missing file yields the defaults; a present-but-broken file is an
    /// error (silent fallback would mask typos).
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::ReadError {
            path: path.clone(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            message: e.to_string(),
        })?;
        Self::from_file(file)
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let chunk_size = file.checkout.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            return Err(ConfigError::InvalidValue(
                "checkout.chunk-size must be positive".into(),
            ));
        }
        Ok(Self {
            log_limit: file.log.limit,
            chunk_size,
        })
    }

    /// Resolve the config file location.
    fn config_path() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var("TREEWIRE_CONFIG") {
            return Some(PathBuf::from(explicit));
        }
        if let Some(xdg) = dirs::config_dir() {
            let candidate = xdg.join("treewire").join("config.toml");
            if candidate.exists() {
                return Some(candidate);
            }
        }
        dirs::home_dir().map(|home| home.join(".treewire").join("config.toml"))
    }

    /// Default log entry limit, if configured.
    pub fn log_limit(&self) -> Option<usize> {
        self.log_limit
    }

    /// Text-delta window chunk size in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}
