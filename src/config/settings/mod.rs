
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_EMBEDDING_LENGTH: usize = 768;
pub const DEFAULT_TOP_K_DOCUMENTS: usize = 3;
pub const DEFAULT_TOP_K_CHUNKS: usize = 5;

const CONFIG_FILE_NAME: &str = "config.toml";
const APP_DIR_NAME: &str = "ragstore";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the root index, root metadata and the `sub_index` directory.
    /// Defaults to `<config dir>/data` when unset.
    pub data_root: Option<PathBuf>,
    pub embedding_length: usize,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_root: None,
            embedding_length: DEFAULT_EMBEDDING_LENGTH,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueryConfig {
    pub top_k_documents: usize,
    pub top_k_chunks: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k_documents: DEFAULT_TOP_K_DOCUMENTS,
            top_k_chunks: DEFAULT_TOP_K_CHUNKS,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid embedding length: {0} (must be between 1 and 8192)")]
    InvalidEmbeddingLength(usize),
    #[error("Invalid max connections: {0} (must be between 1 and 64)")]
    InvalidMaxConnections(u32),
    #[error("Invalid top_k_documents: {0} (must be between 1 and 100)")]
    InvalidTopKDocuments(usize),
    #[error("Invalid top_k_chunks: {0} (must be between 1 and 100)")]
    InvalidTopKChunks(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Build a config rooted at `base_dir` with default settings
    #[inline]
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::with_base_dir(config_dir));
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Platform configuration directory, e.g. `~/.config/ragstore` on Linux
    #[inline]
    pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.validate()?;
        self.query.validate()?;
        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Root directory of all persisted engine state
    #[inline]
    pub fn data_root(&self) -> PathBuf {
        self.storage
            .data_root
            .clone()
            .unwrap_or_else(|| self.get_base_dir().join("data"))
    }

    /// Directory holding one sub-index and one chunk database per document
    #[inline]
    pub fn sub_index_path(&self) -> PathBuf {
        self.data_root().join("sub_index")
    }

    /// Get the path for the root SQLite metadata database
    #[inline]
    pub fn root_metadata_path(&self) -> PathBuf {
        self.data_root().join("root_metadata.db")
    }

    /// Get the path for the persisted root id counter
    #[inline]
    pub fn root_state_path(&self) -> PathBuf {
        self.data_root().join("root_index.state.json")
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=8192).contains(&self.embedding_length) {
            return Err(ConfigError::InvalidEmbeddingLength(self.embedding_length));
        }

        if !(1..=64).contains(&self.max_connections) {
            return Err(ConfigError::InvalidMaxConnections(self.max_connections));
        }

        Ok(())
    }

    pub fn set_embedding_length(&mut self, length: usize) -> Result<(), ConfigError> {
        if !(1..=8192).contains(&length) {
            return Err(ConfigError::InvalidEmbeddingLength(length));
        }
        self.embedding_length = length;
        Ok(())
    }
}

impl QueryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.top_k_documents) {
            return Err(ConfigError::InvalidTopKDocuments(self.top_k_documents));
        }

        if !(1..=100).contains(&self.top_k_chunks) {
            return Err(ConfigError::InvalidTopKChunks(self.top_k_chunks));
        }

        Ok(())
    }
}
