// Configuration management module
// TOML settings file plus environment overrides for secrets

pub mod settings;

pub use settings::{
    ChatConfig, Config, ConfigError, ConfluenceConfig, IngestionConfig, LlmConfig, ServerConfig,
};

/// Get the default configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("confluence-rag"))
        .ok_or(ConfigError::DirectoryError)
}
