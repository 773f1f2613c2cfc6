//! Configuration loading, validation, and management for Docent.
//!
//! Loads configuration from `~/.docent/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.docent/config.toml`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the OpenAI-compatible endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Language model and embedding endpoint
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Retrieval settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Prompt assembly settings
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Agent loop and response channel settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Per-call timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Document ingestion settings
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Vector index settings
    #[serde(default)]
    pub index: IndexConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("retrieval", &self.retrieval)
            .field("prompt", &self.prompt)
            .field("agent", &self.agent)
            .field("timeouts", &self.timeouts)
            .field("retry", &self.retry)
            .field("ingestion", &self.ingestion)
            .field("index", &self.index)
            .field("gateway", &self.gateway)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_max_tokens() -> u32 {
    1024
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// What to do when retrieval is unavailable for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalFailurePolicy {
    /// Answer without retrieved context
    #[default]
    Proceed,
    /// Fail the query with `RetrievalUnavailable`
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Chunks scoring below this are not returned
    #[serde(default)]
    pub min_score: f32,

    #[serde(default)]
    pub on_failure: RetrievalFailurePolicy,

    /// Score a chunk needs before the `search_docs` tool reports it
    #[serde(default = "default_tool_threshold")]
    pub tool_threshold: f32,
}

fn default_top_k() -> usize {
    4
}
fn default_tool_threshold() -> f32 {
    0.7
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: 0.0,
            on_failure: RetrievalFailurePolicy::default(),
            tool_threshold: default_tool_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Token budget for the assembled model input
    #[serde(default = "default_budget_tokens")]
    pub budget_tokens: usize,

    #[serde(default = "default_system_preamble")]
    pub system_preamble: String,
}

fn default_budget_tokens() -> usize {
    4096
}
fn default_system_preamble() -> String {
    "You are a helpful assistant that answers questions about our indexed documents.\n\
     Ground your answer in the provided context and cite sources as [Source: name].\n\
     Call `search_docs` when the context does not cover the question, and use the \
     calculator tools for arithmetic instead of computing by hand."
        .into()
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            budget_tokens: default_budget_tokens(),
            system_preamble: default_system_preamble(),
        }
    }
}

/// How a full response buffer treats the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// Wait for the consumer
    #[default]
    Block,
    /// End the stream with a `stream_overflow` error
    DropWithError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Ceiling on model↔tools rounds per query
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Buffered increments per response stream
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default)]
    pub backpressure: Backpressure,
}

fn default_max_rounds() -> usize {
    5
}
fn default_channel_capacity() -> usize {
    64
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            channel_capacity: default_channel_capacity(),
            backpressure: Backpressure::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_embedding_secs")]
    pub embedding_secs: u64,

    #[serde(default = "default_index_secs")]
    pub index_secs: u64,

    /// Longest wait for the model service to connect or send more output
    #[serde(default = "default_model_secs")]
    pub model_secs: u64,

    #[serde(default = "default_tool_secs")]
    pub tool_secs: u64,
}

fn default_embedding_secs() -> u64 {
    10
}
fn default_index_secs() -> u64 {
    5
}
fn default_model_secs() -> u64 {
    120
}
fn default_tool_secs() -> u64 {
    30
}

impl TimeoutConfig {
    pub fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_secs)
    }
    pub fn index(&self) -> Duration {
        Duration::from_secs(self.index_secs)
    }
    pub fn model(&self) -> Duration {
        Duration::from_secs(self.model_secs)
    }
    pub fn tool(&self) -> Duration {
        Duration::from_secs(self.tool_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embedding_secs: default_embedding_secs(),
            index_secs: default_index_secs(),
            model_secs: default_model_secs(),
            tool_secs: default_tool_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff; doubles on every further attempt
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}
fn default_base_backoff_ms() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Maximum chunk length in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared by neighbouring chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Directory scanned by `ingest-all`
    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_docs_dir() -> PathBuf {
    PathBuf::from("docs")
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            docs_dir: default_docs_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    /// JSONL file at `index.path`
    #[default]
    File,
    /// Lost on restart
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    /// The provider's embeddings endpoint
    #[default]
    Provider,
    /// Local feature hashing, no network
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub backend: IndexBackend,

    /// Index file; relative paths resolve against the config directory
    #[serde(default = "default_index_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub embedder: EmbedderKind,

    /// Vector length for the hash embedder
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

fn default_index_path() -> PathBuf {
    PathBuf::from("index.jsonl")
}
fn default_dimensions() -> usize {
    384
}

impl IndexConfig {
    pub fn resolved_path(&self) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            AppConfig::config_dir().join(&self.path)
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::default(),
            path: default_index_path(),
            embedder: EmbedderKind::default(),
            dimensions: default_dimensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".into()]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.docent/config.toml).
    ///
    /// Also checks environment variables:
    /// - `DOCENT_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `DOCENT_BASE_URL`
    /// - `DOCENT_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("DOCENT_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(base_url) = std::env::var("DOCENT_BASE_URL") {
            config.provider.base_url = base_url;
        }

        if let Ok(model) = std::env::var("DOCENT_MODEL") {
            config.provider.chat_model = model;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".docent")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.temperature < 0.0 || self.provider.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.retrieval.top_k == 0 {
            return Err(ConfigError::ValidationError("retrieval.top_k must be > 0".into()));
        }

        if self.prompt.budget_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "prompt.budget_tokens must be > 0".into(),
            ));
        }

        if self.agent.max_rounds == 0 || self.agent.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_rounds and agent.channel_capacity must be > 0".into(),
            ));
        }

        if self.ingestion.chunk_size == 0 || self.ingestion.chunk_overlap >= self.ingestion.chunk_size {
            return Err(ConfigError::ValidationError(
                "ingestion.chunk_overlap must be smaller than a non-zero ingestion.chunk_size".into(),
            ));
        }

        if self.index.embedder == EmbedderKind::Hash && self.index.dimensions == 0 {
            return Err(ConfigError::ValidationError("index.dimensions must be > 0".into()));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
