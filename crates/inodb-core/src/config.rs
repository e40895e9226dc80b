//! Index configuration.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name looked up under the user configuration directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Configuration for the inventory index and its scans.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct IndexConfig {
    /// SQLite database file.
    #[builder(default = "default_database()")]
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Records committed per transaction.
    #[builder(default = "5000")]
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Chunks buffered between the producer thread and the reconciler.
    #[builder(default = "16")]
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Number of memoized `du` results.
    #[builder(default = "128")]
    #[serde(default = "default_du_cache_capacity")]
    pub du_cache_capacity: usize,

    /// Number of threads for local scanning (0 = auto-detect).
    #[builder(default = "0")]
    #[serde(default)]
    pub threads: usize,

    /// Tape archive listing command.
    #[builder(default)]
    #[serde(default)]
    pub tape: TapeConfig,

    /// Named groups of roots summarised together.
    #[builder(default)]
    #[serde(default)]
    pub tags: IndexMap<String, TagConfig>,
}

/// Settings for the tape archive producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapeConfig {
    /// Program invoked as `<program> -P <namespace> dmls ...`.
    #[serde(default = "default_tape_program")]
    pub program: PathBuf,
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            program: default_tape_program(),
        }
    }
}

/// A tag groups several roots under one name for reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagConfig {
    #[serde(default)]
    pub description: Option<String>,
    /// Root locators belonging to the tag.
    #[serde(default)]
    pub paths: Vec<String>,
}

fn default_database() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("inodb")
        .join("inodb.sqlite")
}

fn default_batch_size() -> usize {
    5000
}

fn default_channel_capacity() -> usize {
    16
}

fn default_du_cache_capacity() -> usize {
    128
}

fn default_tape_program() -> PathBuf {
    PathBuf::from("mdss")
}

impl IndexConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref database) = self.database {
            if database.as_os_str().is_empty() {
                return Err("Database path cannot be empty".to_string());
            }
        }
        if self.batch_size == Some(0) {
            return Err("Batch size must be positive".to_string());
        }
        if self.channel_capacity == Some(0) {
            return Err("Channel capacity must be positive".to_string());
        }
        Ok(())
    }
}

impl IndexConfig {
    /// Create a new config builder.
    pub fn builder() -> IndexConfigBuilder {
        IndexConfigBuilder::default()
    }

    /// Default config using the given database file.
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `<config dir>/inodb/config.toml` if it exists, else defaults.
    pub fn discover() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Location searched by [`IndexConfig::discover`].
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("inodb").join(CONFIG_FILE))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                message: "database path cannot be empty".to_string(),
            });
        }
        if self.batch_size == 0 || self.channel_capacity == 0 {
            return Err(ConfigError::Invalid {
                message: "batch_size and channel_capacity must be positive".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            batch_size: default_batch_size(),
            channel_capacity: default_channel_capacity(),
            du_cache_capacity: default_du_cache_capacity(),
            threads: 0,
            tape: TapeConfig::default(),
            tags: IndexMap::new(),
        }
    }
}
