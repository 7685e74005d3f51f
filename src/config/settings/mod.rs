
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::chunking::ChunkingConfig;

/// Environment variable holding the Confluence API token.
pub const CONFLUENCE_TOKEN_ENV: &str = "ATL_TOKEN";
/// Environment variable holding the LLM API key.
pub const LLM_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub confluence: ConfluenceConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Connection and sampling options for the OpenAI-compatible LLM API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub top_p: f64,
    pub temperature: f64,
    pub embed_batch_size: u32,
    /// Loaded from `OPENAI_API_KEY`, never written to the settings file.
    #[serde(skip)]
    pub api_key: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            top_p: 0.9,
            temperature: 0.7,
            embed_batch_size: 16,
            api_key: String::new(),
        }
    }
}

/// Conversation memory and retrieval options for the chat orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum messages kept in the history window per conversation.
    pub memory_window: u32,
    /// Number of chunks retrieved from the vector store per query.
    pub retrieval_top_k: usize,
    /// Minimum similarity score for a retrieved chunk to be injected.
    pub similarity_threshold: f32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            memory_window: 20,
            retrieval_top_k: 5,
            similarity_threshold: 0.5,
        }
    }
}

/// Connection settings for the Confluence REST API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfluenceConfig {
    pub base_url: String,
    pub space_key: String,
    /// Loaded from `ATL_TOKEN`, never written to the settings file.
    #[serde(skip)]
    pub token: String,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://example.atlassian.net".to_string(),
            space_key: "DOCS".to_string(),
            token: String::new(),
        }
    }
}

/// Ingestion pipeline policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestionConfig {
    /// Batch size used when paging through a Confluence space.
    pub page_size: u32,
    /// Whether to attach LLM-extracted keywords to each chunk.
    pub enrich_keywords: bool,
    /// How many keywords to request per chunk.
    pub keyword_count: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            page_size: 25,
            enrich_keywords: false,
            keyword_count: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be nonzero)")]
    InvalidPort(u16),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid top_p: {0} (must be between 0 and 1)")]
    InvalidTopP(f64),
    #[error("Invalid temperature: {0} (must be between 0 and 2)")]
    InvalidTemperature(f64),
    #[error("Invalid embed batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid memory window: {0} (must be between 1 and 200)")]
    InvalidMemoryWindow(u32),
    #[error("Invalid retrieval top-k: {0} (must be between 1 and 50)")]
    InvalidTopK(usize),
    #[error("Invalid similarity threshold: {0} (must be between 0 and 1)")]
    InvalidSimilarityThreshold(f32),
    #[error("Invalid page size: {0} (must be between 1 and 100)")]
    InvalidPageSize(u32),
    #[error("Invalid space key (cannot be empty)")]
    InvalidSpaceKey,
    #[error("Invalid keyword count: {0} (must be between 1 and 50)")]
    InvalidKeywordCount(usize),
    #[error("Invalid target chunk size: {0} (must be between 100 and 2048)")]
    InvalidTargetChunkSize(usize),
    #[error("Invalid max chunk size: {0} (must be between 200 and 4096)")]
    InvalidMaxChunkSize(usize),
    #[error("Invalid min chunk size: {0} (must be between 50 and 1024)")]
    InvalidMinChunkSize(usize),
    #[error("Max chunk size ({0}) must be greater than target chunk size ({1})")]
    MaxChunkSizeTooSmall(usize, usize),
    #[error("Target chunk size ({0}) must be greater than min chunk size ({1})")]
    TargetChunkSizeTooSmall(usize, usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load configuration from `config.toml` under the given directory,
    /// falling back to defaults when the file does not exist. Secrets are
    /// always taken from the environment.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str::<Config>(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Config::default()
        };

        config.base_dir = config_dir.as_ref().to_path_buf();
        config.apply_env_overrides();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.base_dir.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(LLM_API_KEY_ENV) {
            self.llm.api_key = key;
        }
        if let Ok(token) = std::env::var(CONFLUENCE_TOKEN_ENV) {
            self.confluence.token = token;
        }
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.llm.validate()?;
        self.chat.validate()?;
        self.confluence.validate()?;
        self.ingestion.validate()?;
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }
        self.validate_chunking_config()?;
        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(100..=2048).contains(&config.target_chunk_size) {
            return Err(ConfigError::InvalidTargetChunkSize(
                config.target_chunk_size,
            ));
        }

        if !(200..=4096).contains(&config.max_chunk_size) {
            return Err(ConfigError::InvalidMaxChunkSize(config.max_chunk_size));
        }

        if !(50..=1024).contains(&config.min_chunk_size) {
            return Err(ConfigError::InvalidMinChunkSize(config.min_chunk_size));
        }

        if config.max_chunk_size <= config.target_chunk_size {
            return Err(ConfigError::MaxChunkSizeTooSmall(
                config.max_chunk_size,
                config.target_chunk_size,
            ));
        }

        if config.target_chunk_size <= config.min_chunk_size {
            return Err(ConfigError::TargetChunkSizeTooSmall(
                config.target_chunk_size,
                config.min_chunk_size,
            ));
        }

        Ok(())
    }

    /// Path for the SQLite conversation memory database
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.base_dir.join("memory.db")
    }

    /// Path for the LanceDB vector database directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.base_dir.join("vectors")
    }

    /// Socket address string the HTTP server binds to
    #[inline]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            chat: ChatConfig::default(),
            confluence: ConfluenceConfig::default(),
            ingestion: IngestionConfig::default(),
            server: ServerConfig::default(),
            chunking: ChunkingConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_url()?;

        if self.chat_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.chat_model.clone()));
        }

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if !(0.0..=1.0).contains(&self.top_p) || self.top_p == 0.0 {
            return Err(ConfigError::InvalidTopP(self.top_p));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if self.embed_batch_size == 0 || self.embed_batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.embed_batch_size));
        }

        Ok(())
    }

    pub fn api_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url).map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))
    }
}

impl ChatConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_window == 0 || self.memory_window > 200 {
            return Err(ConfigError::InvalidMemoryWindow(self.memory_window));
        }

        if self.retrieval_top_k == 0 || self.retrieval_top_k > 50 {
            return Err(ConfigError::InvalidTopK(self.retrieval_top_k));
        }

        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::InvalidSimilarityThreshold(
                self.similarity_threshold,
            ));
        }

        Ok(())
    }
}

impl ConfluenceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.base_url).map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;

        if self.space_key.trim().is_empty() {
            return Err(ConfigError::InvalidSpaceKey);
        }

        Ok(())
    }
}

impl IngestionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 || self.page_size > 100 {
            return Err(ConfigError::InvalidPageSize(self.page_size));
        }

        if self.keyword_count == 0 || self.keyword_count > 50 {
            return Err(ConfigError::InvalidKeywordCount(self.keyword_count));
        }

        Ok(())
    }
}
