//! Embedding upsert and semantic search over customer complaints.
//!
//! An [`Embedder`] turns complaint text into vectors, the
//! [`EmbeddingRepository`] keeps one vector per complaint in SQLite and ranks
//! them by distance to a query, and the [`Indexer`] drives both for batches.

pub mod config;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod indexer;
pub mod logging;
pub mod retry;

pub use config::{BatchPolicy, Config, DistanceMetric, EmbeddingApi};
pub use db::Database;
pub use db::complaint_repo::{Complaint, ComplaintRepository};
pub use db::embedding_repo::{EmbeddingRecord, EmbeddingRepository, SearchHit, UpsertOutcome};
pub use embeddings::{Embedder, HashingEmbedder, HttpEmbedder};
pub use error::{ConfigError, EmbeddingError, Error, FailureKind, Result, StoreError};
pub use indexer::{BatchReport, Indexer, IndexerOptions, RecordOutcome};
pub use retry::RetryPolicy;
