mod common;

use std::sync::Arc;

use common::{DIM, options, seeded_db};
use grievance::{
    BatchPolicy, Database, DistanceMetric, Embedder, EmbeddingRepository, Error,
    HashingEmbedder, Indexer, StoreError,
};
use tokio_util::sync::CancellationToken;

const REFUND: &str = "Refund request pending for over a week";
const WRONG_PRODUCT: &str = "Complaint about wrong product delivered";
const QUERY: &str = "I still have not received my refund after two weeks";

#[tokio::test]
async fn refund_query_finds_refund_complaint() {
    for metric in [DistanceMetric::Cosine, DistanceMetric::Euclidean] {
        let db = seeded_db(&[(1, REFUND), (2, WRONG_PRODUCT)]);
        let indexer = Indexer::new(
            HashingEmbedder::new(DIM),
            db,
            options(BatchPolicy::BestEffort, metric),
        )
        .unwrap();

        let report = indexer
            .sync_all(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.succeeded_count(), 2);

        let hits = indexer.search_text(QUERY, 1).await.unwrap();
        assert_eq!(hits.len(), 1, "{metric:?}");
        assert_eq!(hits[0].complaint_id(), 1, "{metric:?}");
        assert_eq!(hits[0].complaint.description, REFUND);
        assert_eq!(hits[0].complaint.country.as_deref(), Some("Belgium"));
    }
}

#[tokio::test]
async fn upserted_vector_is_its_own_nearest_neighbour() {
    let db = seeded_db(&[(1, REFUND), (2, WRONG_PRODUCT), (3, "Account locked")]);
    let embedder = HashingEmbedder::new(DIM);
    let repo = EmbeddingRepository::new(&db);
    for (id, text) in [(1, REFUND), (2, WRONG_PRODUCT), (3, "Account locked")] {
        repo.upsert(id, &embedder.embed(text).await.unwrap()).unwrap();
    }

    let v = embedder.embed(WRONG_PRODUCT).await.unwrap();
    for metric in [DistanceMetric::Cosine, DistanceMetric::Euclidean] {
        let hits = repo.search(&v, 3, metric).unwrap();
        assert_eq!(hits[0].complaint_id(), 2);
        assert!(hits[0].distance.abs() < 1e-6);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }
}

#[tokio::test]
async fn search_on_empty_store_is_empty() {
    let db = seeded_db(&[(1, REFUND)]);
    let indexer = Indexer::new(
        HashingEmbedder::new(DIM),
        db,
        options(BatchPolicy::BestEffort, DistanceMetric::Cosine),
    )
    .unwrap();

    assert!(indexer.search_text(QUERY, 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn zero_top_k_is_invalid() {
    let db = seeded_db(&[(1, REFUND)]);
    let indexer = Indexer::new(
        HashingEmbedder::new(DIM),
        db,
        options(BatchPolicy::BestEffort, DistanceMetric::Cosine),
    )
    .unwrap();

    let err = indexer.search_text(QUERY, 0).await.unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::InvalidArgument(_))));
}

#[tokio::test]
async fn top_k_larger_than_store_returns_everything() {
    let db = seeded_db(&[(1, REFUND), (2, WRONG_PRODUCT)]);
    let indexer = Indexer::new(
        HashingEmbedder::new(DIM),
        db,
        options(BatchPolicy::AllOrNothing, DistanceMetric::Cosine),
    )
    .unwrap();
    indexer.sync_all(&CancellationToken::new()).await.unwrap();

    let hits = indexer.search_text(QUERY, 50).await.unwrap();
    let ids: Vec<i64> = hits.iter().map(|h| h.complaint_id()).collect();
    assert_eq!(ids, [1, 2]);
}

#[tokio::test]
async fn repeated_upsert_keeps_one_record_with_latest_vector() {
    let db = seeded_db(&[(1, REFUND)]);
    let indexer = Indexer::new(
        HashingEmbedder::new(DIM),
        Arc::clone(&db),
        options(BatchPolicy::BestEffort, DistanceMetric::Cosine),
    )
    .unwrap();

    let first = indexer.embed_and_upsert(1, REFUND).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = indexer.embed_and_upsert(1, WRONG_PRODUCT).await.unwrap();

    assert_eq!(indexer.count().await.unwrap(), 1);
    assert!(second.updated_at > first.updated_at);
    let stored = EmbeddingRepository::new(&db).get(1).unwrap().unwrap();
    assert_eq!(
        stored.embedding,
        HashingEmbedder::new(DIM).embed_sync(WRONG_PRODUCT).unwrap()
    );
}

#[tokio::test]
async fn pending_only_skips_embedded_complaints() {
    let db = seeded_db(&[(1, REFUND), (2, WRONG_PRODUCT)]);
    let mut opts = options(BatchPolicy::BestEffort, DistanceMetric::Cosine);
    opts.pending_only = true;
    let indexer = Indexer::new(HashingEmbedder::new(DIM), db, opts).unwrap();

    indexer.embed_and_upsert(1, REFUND).await.unwrap();
    let report = indexer.sync_all(&CancellationToken::new()).await.unwrap();

    let ids: Vec<i64> = report.outcomes.iter().map(|o| o.complaint_id).collect();
    assert_eq!(ids, [2]);
    assert_eq!(indexer.count().await.unwrap(), 2);
}

#[test]
fn embedder_and_store_must_agree_on_dimension() {
    let db = Arc::new(Database::open_in_memory(DIM).unwrap());
    let result = Indexer::new(
        HashingEmbedder::new(DIM * 2),
        db,
        options(BatchPolicy::BestEffort, DistanceMetric::Cosine),
    );
    assert!(matches!(
        result,
        Err(Error::Store(StoreError::DimensionMismatch { .. }))
    ));
}

#[test]
fn store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("complaints.db");
    let embedder = HashingEmbedder::new(DIM);
    let refund = embedder.embed_sync(REFUND).unwrap();

    {
        let db = Database::open_path(&path, DIM).unwrap();
        grievance::ComplaintRepository::new(&db)
            .insert(1, REFUND, None, None)
            .unwrap();
        EmbeddingRepository::new(&db).upsert(1, &refund).unwrap();
    }

    let db = Database::open_path(&path, DIM).unwrap();
    let hits = EmbeddingRepository::new(&db)
        .search(&refund, 1, DistanceMetric::Euclidean)
        .unwrap();
    assert_eq!(hits[0].complaint_id(), 1);
}
