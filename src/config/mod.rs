// Configuration management module
// TOML settings for storage location, embedding length and query defaults

pub mod settings;


pub use settings::{Config, ConfigError, QueryConfig, StorageConfig};

/// Get the default configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_config_dir()
}
