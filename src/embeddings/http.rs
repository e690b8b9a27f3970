use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::debug;

use super::{Embedder, ensure_dimension, ensure_non_empty};
use crate::config::{Config, EmbeddingApi, EmbeddingConfig};
use crate::error::EmbeddingError;

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: serde_json::Value,
}

/// Embedding service client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    api: EmbeddingApi,
    url: String,
    model: String,
    dimension: usize,
    timeout: Duration,
}

fn api_key(var: &str) -> Result<String, EmbeddingError> {
    std::env::var(var)
        .map_err(|_| EmbeddingError::Setup(format!("missing {var} environment variable")))
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig, dimension: usize) -> Result<Self, EmbeddingError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if config.api == EmbeddingApi::OpenAi {
            let key = api_key(&config.api_key_env)?;
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| EmbeddingError::Setup(format!("invalid api key: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let timeout = config.timeout();
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::Setup(format!("failed to create http client: {e}")))?;

        let base = parse_endpoint(&config.endpoint)?;
        let base = base.as_str().trim_end_matches('/');
        let url = match config.api {
            EmbeddingApi::Ollama => format!("{base}/api/embed"),
            EmbeddingApi::OpenAi => format!("{base}/v1/embeddings"),
        };

        Ok(Self {
            client,
            api: config.api,
            url,
            model: config.model.clone(),
            dimension,
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, EmbeddingError> {
        Self::new(&config.embedding, config.vector_dimension)
    }

    /// Same as [`Embedder::embed`] with a caller-chosen deadline for this request.
    pub async fn embed_with_timeout(
        &self,
        text: &str,
        timeout: Duration,
    ) -> Result<Vec<f32>, EmbeddingError> {
        ensure_non_empty(text)?;
        debug!(model = %self.model, chars = text.len(), "requesting embedding");

        let res = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .json(&serde_json::json!({
                "model": self.model,
                "input": text,
            }))
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(status_error(status, &body, &self.model));
        }

        let vector = match self.api {
            EmbeddingApi::Ollama => {
                let body: OllamaEmbedResponse =
                    res.json().await.map_err(|e| transport_error(e, timeout))?;
                body.embeddings.into_iter().next().ok_or_else(|| {
                    EmbeddingError::MalformedResponse("response carried no embeddings".into())
                })?
            }
            EmbeddingApi::OpenAi => {
                let body: OpenAiEmbeddingResponse =
                    res.json().await.map_err(|e| transport_error(e, timeout))?;
                if let Some(usage) = &body.usage {
                    debug!(prompt_tokens = usage.prompt_tokens, "embedding usage");
                }
                body.data
                    .into_iter()
                    .min_by_key(|d| d.index)
                    .map(|d| d.embedding)
                    .ok_or_else(|| {
                        EmbeddingError::MalformedResponse("response carried no data".into())
                    })?
            }
        };

        ensure_dimension(&vector, self.dimension)?;
        Ok(vector)
    }
}

impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_with_timeout(text, self.timeout).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Only absolute `http`/`https` urls are accepted. `localhost:11434` parses as
/// scheme `localhost`, so the scheme is checked explicitly.
pub(crate) fn parse_endpoint(endpoint: &str) -> Result<reqwest::Url, EmbeddingError> {
    let url = reqwest::Url::parse(endpoint.trim())
        .map_err(|e| EmbeddingError::Setup(format!("invalid endpoint {endpoint:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        scheme => Err(EmbeddingError::Setup(format!(
            "invalid endpoint {endpoint:?}: expected an http(s) url, got scheme {scheme:?}"
        ))),
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> EmbeddingError {
    if err.is_builder() {
        // the request could not even be built, retrying will not help
        EmbeddingError::Setup(err.to_string())
    } else if err.is_timeout() {
        EmbeddingError::Timeout(timeout)
    } else if err.is_decode() {
        EmbeddingError::MalformedResponse(err.to_string())
    } else {
        EmbeddingError::Unreachable(err.to_string())
    }
}

fn status_error(status: StatusCode, body: &str, model: &str) -> EmbeddingError {
    let message = error_message(body);
    match status {
        StatusCode::NOT_FOUND => EmbeddingError::ModelNotFound(format!("{model}: {message}")),
        StatusCode::BAD_REQUEST
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNPROCESSABLE_ENTITY => EmbeddingError::InvalidInput(message),
        _ => EmbeddingError::Service {
            status: status.as_u16(),
            message,
        },
    }
}

// Ollama sends `{"error": "..."}`, OpenAI sends `{"error": {"message": "..."}}`.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorBody { error }) => error
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| error.to_string()),
        Err(_) => body.trim().to_string(),
    }
}
