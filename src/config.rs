use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Default Redis stream used for asynchronous file ingestion.
pub const DEFAULT_PROCESS_FILE_QUEUE: &str = "vector:process-file";

/// Default dimensionality for the local hash embedding provider.
pub const DEFAULT_HASH_DIMENSION: usize = 768;

/// Runtime configuration for the vector records service and its worker.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the Qdrant instance that stores records.
    pub qdrant_url: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// PostgreSQL connection string for the metadata store.
    pub database_url: String,
    /// Redis connection string for the ingestion queue.
    pub redis_url: String,
    /// Redis stream receiving file-ingestion jobs.
    pub process_file_queue: String,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Optional override for the embedding provider's base URL.
    pub embedding_base_url: Option<String>,
    /// Optional API key sent to the embedding provider.
    pub embedding_api_key: Option<String>,
    /// Dimensionality produced by the `hash` provider.
    pub embedding_dimension: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Consumer name used by the ingestion worker inside its Redis group.
    pub worker_consumer_name: Option<String>,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI (or API-compatible) embeddings endpoint.
    OpenAI,
    /// Deterministic in-process encoder for development and tests.
    Hash,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            database_url: load_env("DATABASE_URL")?,
            redis_url: load_env("REDIS_URL")?,
            process_file_queue: load_env_optional("PROCESS_FILE_QUEUE_NAME")
                .unwrap_or_else(|| DEFAULT_PROCESS_FILE_QUEUE.to_string()),
            embedding_provider: load_env("EMBEDDING_PROVIDER")?
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            embedding_base_url: load_env_optional("EMBEDDING_BASE_URL"),
            embedding_api_key: load_env_optional("EMBEDDING_API_KEY"),
            embedding_dimension: load_env_optional("EMBEDDING_DIMENSION")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()))
                })
                .transpose()?
                .unwrap_or(DEFAULT_HASH_DIMENSION),
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
            worker_consumer_name: load_env_optional("WORKER_CONSUMER_NAME"),
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hash" => Ok(Self::Hash),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, if [`init_config`] has run.
pub fn get_config() -> Option<&'static Config> {
    CONFIG.get()
}

/// Load configuration from the environment (and `.env`) and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        queue = %config.process_file_queue,
        server_port = ?config.server_port,
        embedding_provider = ?config.embedding_provider,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}
