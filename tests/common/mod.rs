#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use grievance::{
    BatchPolicy, ComplaintRepository, Database, DistanceMetric, Embedder, EmbeddingError,
    HashingEmbedder, IndexerOptions, RetryPolicy,
};
use tokio_util::sync::CancellationToken;

pub const DIM: usize = 64;

pub fn seeded_db(complaints: &[(i64, &str)]) -> Arc<Database> {
    let db = Database::open_in_memory(DIM).unwrap();
    let repo = ComplaintRepository::new(&db);
    for (id, text) in complaints {
        repo.insert(*id, text, Some("Marie Leroy"), Some("Belgium"))
            .unwrap();
    }
    Arc::new(db)
}

pub fn options(policy: BatchPolicy, metric: DistanceMetric) -> IndexerOptions {
    IndexerOptions {
        concurrency: 4,
        batch_policy: policy,
        distance_metric: metric,
        pending_only: false,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
    }
}

/// Hashing embedder that misbehaves on marked texts: `#short` yields a
/// vector one component short, `#stall` never answers.
pub struct QuirkyEmbedder {
    inner: HashingEmbedder,
}

impl QuirkyEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashingEmbedder::new(DIM),
        }
    }
}

impl Embedder for QuirkyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.contains("#stall") {
            futures::future::pending::<()>().await;
        }
        let mut vector = self.inner.embed_sync(text)?;
        if text.contains("#short") {
            vector.pop();
        }
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        "quirky"
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

/// Fails with a transient error for the first `failures` calls.
pub struct FlakyEmbedder {
    inner: HashingEmbedder,
    failures: u32,
    pub calls: AtomicU32,
}

impl FlakyEmbedder {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: HashingEmbedder::new(DIM),
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

impl Embedder for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(EmbeddingError::Unreachable("connection refused".into()));
        }
        self.inner.embed_sync(text)
    }

    fn model_name(&self) -> &str {
        "flaky"
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

/// Cancels `token` when it embeds a text marked `#cancel`; every other text
/// waits until cancelled.
pub struct CancellingEmbedder {
    inner: HashingEmbedder,
    token: CancellationToken,
}

impl CancellingEmbedder {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            inner: HashingEmbedder::new(DIM),
            token,
        }
    }
}

impl Embedder for CancellingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if !text.contains("#cancel") {
            futures::future::pending::<()>().await;
        }
        self.token.cancel();
        self.inner.embed_sync(text)
    }

    fn model_name(&self) -> &str {
        "cancelling"
    }

    fn dimension(&self) -> usize {
        DIM
    }
}
