//! Embed-then-store driver.
//!
//! Complaint text goes through the [`Embedder`] with a bounded number of
//! requests in flight, and the resulting vectors are written through the
//! [`EmbeddingRepository`] according to the configured [`BatchPolicy`]:
//!
//! * `BestEffort` persists each record as soon as its vector is ready and
//!   reports every record individually. Cancelling abandons pending
//!   embedding requests, reported as [`Error::Cancelled`]; writes already
//!   handed to the store complete and report their own result.
//! * `AllOrNothing` embeds everything first and only then writes one
//!   transaction. Any failure, or a cancellation, leaves the store untouched.
//!
//! SQLite work runs on the blocking pool so the embedding requests keep flowing.

use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{BatchPolicy, Config, DistanceMetric};
use crate::db::Database;
use crate::db::complaint_repo::{Complaint, ComplaintRepository};
use crate::db::embedding_repo::{EmbeddingRecord, EmbeddingRepository, SearchHit};
use crate::embeddings::{Embedder, HttpEmbedder};
use crate::error::{EmbeddingError, Error, Result, StoreError};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct IndexerOptions {
    pub concurrency: usize,
    pub batch_policy: BatchPolicy,
    pub distance_metric: DistanceMetric,
    pub pending_only: bool,
    pub retry: RetryPolicy,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for IndexerOptions {
    fn from(config: &Config) -> Self {
        Self {
            concurrency: config.indexing.concurrency,
            batch_policy: config.indexing.batch_policy,
            distance_metric: config.store.distance_metric,
            pending_only: config.indexing.pending_only,
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

#[derive(Debug)]
pub struct RecordOutcome {
    pub complaint_id: i64,
    pub result: Result<()>,
}

/// One entry per input complaint, in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<RecordOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &RecordOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &RecordOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded().count()
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }
}

pub struct Indexer<E> {
    embedder: E,
    db: Arc<Database>,
    options: IndexerOptions,
}

impl Indexer<HttpEmbedder> {
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = HttpEmbedder::from_config(config)?;
        let db = Database::open(&config.store, config.vector_dimension)?;
        Self::new(embedder, Arc::new(db), IndexerOptions::from(config))
    }
}

impl<E: Embedder> Indexer<E> {
    pub fn new(embedder: E, db: Arc<Database>, options: IndexerOptions) -> Result<Self> {
        if embedder.dimension() != db.dimension() {
            return Err(StoreError::DimensionMismatch {
                expected: db.dimension(),
                actual: embedder.dimension(),
            }
            .into());
        }
        Ok(Self {
            embedder,
            db,
            options,
        })
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn options(&self) -> &IndexerOptions {
        &self.options
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.options
            .retry
            .run("embedding request", || self.embedder.embed(text))
            .await
    }

    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        Ok(tokio::task::spawn_blocking(move || f(&db)).await??)
    }

    async fn upsert(&self, complaint_id: i64, vector: Vec<f32>) -> Result<EmbeddingRecord> {
        let vector = Arc::new(vector);
        self.options
            .retry
            .run("embedding upsert", || {
                let vector = Arc::clone(&vector);
                self.with_store(move |db| EmbeddingRepository::new(db).upsert(complaint_id, &vector))
            })
            .await
    }

    /// Embed one complaint's text and upsert its record.
    pub async fn embed_and_upsert(&self, complaint_id: i64, text: &str) -> Result<EmbeddingRecord> {
        let vector = self.embed(text).await?;
        self.upsert(complaint_id, vector).await
    }

    /// Embed `query` and return the `top_k` closest complaints under the configured metric.
    pub async fn search_text(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Err(StoreError::InvalidArgument("top_k must be at least 1".into()).into());
        }
        let vector = Arc::new(self.embed(query).await?);
        let metric = self.options.distance_metric;
        self.options
            .retry
            .run("embedding search", || {
                let vector = Arc::clone(&vector);
                self.with_store(move |db| EmbeddingRepository::new(db).search(&vector, top_k, metric))
            })
            .await
    }

    pub async fn count(&self) -> Result<usize> {
        self.with_store(|db| EmbeddingRepository::new(db).count()).await
    }

    pub async fn index(
        &self,
        complaints: &[Complaint],
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        match self.options.batch_policy {
            BatchPolicy::BestEffort => Ok(self.index_best_effort(complaints, cancel).await),
            BatchPolicy::AllOrNothing => self.index_all_or_nothing(complaints, cancel).await,
        }
    }

    async fn index_best_effort(
        &self,
        complaints: &[Complaint],
        cancel: &CancellationToken,
    ) -> BatchReport {
        let mut results: Vec<Option<Result<()>>> = complaints.iter().map(|_| None).collect();

        // Cancellation only interrupts embedding. A record that reached the
        // store is written and reported with its real outcome.
        let mut in_flight = stream::iter(complaints.iter().enumerate())
            .map(|(idx, complaint)| async move {
                let embedded = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    vector = self.embed(&complaint.description) => vector.map_err(Error::from),
                };
                let result = match embedded {
                    Ok(vector) => self.upsert(complaint.complaint_id, vector).await.map(|_| ()),
                    Err(e) => Err(e),
                };
                (idx, result)
            })
            .buffer_unordered(self.options.concurrency.max(1));

        while let Some((idx, result)) = in_flight.next().await {
            match &result {
                Ok(()) | Err(Error::Cancelled) => {}
                Err(e) => warn!(
                    complaint_id = complaints[idx].complaint_id,
                    "failed to index complaint: {e}"
                ),
            }
            results[idx] = Some(result);
        }
        if cancel.is_cancelled() {
            warn!("indexing cancelled");
        }

        let outcomes = complaints
            .iter()
            .zip(results)
            .map(|(complaint, result)| RecordOutcome {
                complaint_id: complaint.complaint_id,
                result: result.unwrap_or(Err(Error::Cancelled)),
            })
            .collect();
        BatchReport { outcomes }
    }

    async fn index_all_or_nothing(
        &self,
        complaints: &[Complaint],
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        let embedded = stream::iter(complaints)
            .map(|complaint| async move {
                let vector = self.embed(&complaint.description).await?;
                Ok::<_, EmbeddingError>((complaint.complaint_id, vector))
            })
            .buffered(self.options.concurrency.max(1))
            .try_collect::<Vec<_>>();

        let records = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            records = embedded => records?,
        };
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let written = self
            .with_store(move |db| {
                EmbeddingRepository::new(db).batch_upsert(&records, BatchPolicy::AllOrNothing)
            })
            .await?;

        Ok(BatchReport {
            outcomes: written
                .into_iter()
                .map(|outcome| RecordOutcome {
                    complaint_id: outcome.complaint_id,
                    result: outcome.result.map(|_| ()).map_err(Error::from),
                })
                .collect(),
        })
    }

    /// Embed every complaint in the store, or only those without a record
    /// when `pending_only` is set.
    pub async fn sync_all(&self, cancel: &CancellationToken) -> Result<BatchReport> {
        let pending_only = self.options.pending_only;
        let complaints = self
            .with_store(move |db| {
                let repo = ComplaintRepository::new(db);
                if pending_only {
                    repo.list_unembedded()
                } else {
                    repo.list()
                }
            })
            .await?;

        info!(
            complaints = complaints.len(),
            model = self.embedder.model_name(),
            policy = ?self.options.batch_policy,
            "indexing complaints"
        );
        let report = self.index(&complaints, cancel).await?;
        info!(
            succeeded = report.succeeded_count(),
            failed = report.failed_count(),
            "indexing finished"
        );
        Ok(report)
    }
}
