use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const CONFIG_ENV: &str = "GRIEVANCE_CONFIG";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Length of every vector the model produces and the store accepts.
    pub vector_dimension: usize,
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
    pub indexing: IndexingConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingApi {
    /// `POST {endpoint}/api/embed`
    Ollama,
    /// `POST {endpoint}/v1/embeddings`
    #[serde(rename = "openai")]
    OpenAi,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub model: String,
    pub api: EmbeddingApi,
    /// Environment variable holding the bearer token, OpenAI-compatible services only.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Euclidean,
    Cosine,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
    pub distance_metric: DistanceMetric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Every record is written on its own; failures are listed per record.
    BestEffort,
    /// One transaction; any failure leaves the store untouched.
    AllOrNothing,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub concurrency: usize,
    pub batch_policy: BatchPolicy,
    /// Only embed complaints that have no embedding record yet.
    pub pending_only: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vector_dimension: 3072,
            embedding: EmbeddingConfig::default(),
            store: StoreConfig::default(),
            indexing: IndexingConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".into(),
            model: "llama3.2:latest".into(),
            api: EmbeddingApi::Ollama,
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_secs: 30,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("complaints.db"),
            busy_timeout_ms: 5_000,
            distance_metric: DistanceMetric::Cosine,
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            batch_policy: BatchPolicy::BestEffort,
            pending_only: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Loads `$GRIEVANCE_CONFIG`, else the platform config file, else defaults.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(p) => Some(PathBuf::from(p)),
            None => default_config_path().filter(|p| p.exists()),
        };
        match path {
            Some(p) => Self::load(&p),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vector_dimension == 0 {
            return Err(ConfigError::Invalid("vector_dimension must be positive".into()));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(ConfigError::Invalid("embedding.model must not be empty".into()));
        }
        crate::embeddings::parse_endpoint(&self.embedding.endpoint)
            .map_err(|e| ConfigError::Invalid(format!("embedding.endpoint: {e}")))?;
        if !(1..=64).contains(&self.indexing.concurrency) {
            return Err(ConfigError::Invalid(format!(
                "indexing.concurrency must be within 1..=64, got {}",
                self.indexing.concurrency
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "grievance")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
