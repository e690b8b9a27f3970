//! Embedder Client: turns complaint text into fixed-length vectors.
//!
//! [`HttpEmbedder`] talks to a local Ollama daemon or any OpenAI-compatible
//! `/v1/embeddings` service. [`HashingEmbedder`] needs no service at all and is
//! what the tests run against.

mod hashing;
mod http;

use std::future::Future;

pub use hashing::HashingEmbedder;
pub use http::HttpEmbedder;
pub(crate) use http::parse_endpoint;

use crate::error::EmbeddingError;

pub trait Embedder: Send + Sync {
    /// Embed a single non-empty text. The result always has `self.dimension()` entries.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, EmbeddingError>> + Send;

    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;
}

pub(crate) fn ensure_non_empty(text: &str) -> Result<(), EmbeddingError> {
    if text.trim().is_empty() {
        return Err(EmbeddingError::InvalidInput("text must not be empty".into()));
    }
    Ok(())
}

pub(crate) fn ensure_dimension(vector: &[f32], expected: usize) -> Result<(), EmbeddingError> {
    if vector.is_empty() {
        return Err(EmbeddingError::MalformedResponse("empty vector".into()));
    }
    if vector.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}
