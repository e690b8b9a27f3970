use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::config::{BatchPolicy, DistanceMetric};
use crate::db::complaint_repo::{Complaint, row_to_complaint};
use crate::db::{Database, vector};
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub complaint_id: i64,
    pub embedding: Vec<f32>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub complaint: Complaint,
    /// Smaller is more similar.
    pub distance: f64,
}

impl SearchHit {
    pub fn complaint_id(&self) -> i64 {
        self.complaint.complaint_id
    }
}

/// Result of one record inside a batch upsert.
#[derive(Debug)]
pub struct UpsertOutcome {
    pub complaint_id: i64,
    pub result: Result<EmbeddingRecord, StoreError>,
}

// Two statements rather than one formatted string: the operator is never spliced into SQL.
const SEARCH_L2: &str = r#"
    SELECT c.complaint_id, c.customer_name, c.country, c.description, c.created_at,
           l2_distance(e.embedding, ?1) AS distance
    FROM complaint_embeddings e
    JOIN complaints c ON c.complaint_id = e.complaint_id
    ORDER BY distance ASC, c.complaint_id ASC
    LIMIT ?2
"#;

const SEARCH_COSINE: &str = r#"
    SELECT c.complaint_id, c.customer_name, c.country, c.description, c.created_at,
           cosine_distance(e.embedding, ?1) AS distance
    FROM complaint_embeddings e
    JOIN complaints c ON c.complaint_id = e.complaint_id
    ORDER BY distance ASC, c.complaint_id ASC
    LIMIT ?2
"#;

const UPSERT: &str = r#"
    INSERT INTO complaint_embeddings (complaint_id, embedding, updated_at)
    VALUES (?1, ?2, ?3)
    ON CONFLICT(complaint_id) DO UPDATE SET
        embedding = excluded.embedding,
        updated_at = excluded.updated_at
    RETURNING complaint_id, embedding, updated_at
"#;

fn row_to_record(row: &Row) -> rusqlite::Result<EmbeddingRecord> {
    let blob: Vec<u8> = row.get(1)?;
    let embedding = vector::decode(&blob)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Blob, Box::new(e)))?;
    Ok(EmbeddingRecord {
        complaint_id: row.get(0)?,
        embedding,
        updated_at: row.get(2)?,
    })
}

fn row_to_hit(row: &Row) -> rusqlite::Result<SearchHit> {
    Ok(SearchHit {
        complaint: row_to_complaint(row)?,
        distance: row.get(5)?,
    })
}

fn write_record(
    conn: &Connection,
    complaint_id: i64,
    blob: &[u8],
    now: DateTime<Utc>,
) -> Result<EmbeddingRecord, StoreError> {
    conn.query_row(UPSERT, params![complaint_id, blob, now], row_to_record)
        .map_err(|e| missing_complaint(e, complaint_id))
}

fn missing_complaint(err: rusqlite::Error, complaint_id: i64) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
        {
            StoreError::UnknownComplaint(complaint_id)
        }
        _ => StoreError::from(err),
    }
}

/// The vector store gateway: owns every write to `complaint_embeddings` and
/// answers nearest-neighbour queries joined against `complaints`.
pub struct EmbeddingRepository<'db> {
    db: &'db Database,
}

impl<'db> EmbeddingRepository<'db> {
    pub fn new(db: &'db Database) -> Self {
        Self { db }
    }

    fn encode(&self, vector: &[f32]) -> Result<Vec<u8>, StoreError> {
        let expected = self.db.dimension();
        if vector.len() != expected {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        vector::encode(vector)
    }

    /// Insert the record, or replace its vector and refresh `updated_at`.
    pub fn upsert(&self, complaint_id: i64, vector: &[f32]) -> Result<EmbeddingRecord, StoreError> {
        let blob = self.encode(vector)?;
        let record = self
            .db
            .with_conn(|conn| write_record(conn, complaint_id, &blob, Utc::now()))?;
        debug!(complaint_id, "upserted embedding");
        Ok(record)
    }

    /// Replace the vector of an existing record. Never creates one.
    pub fn update(&self, complaint_id: i64, vector: &[f32]) -> Result<EmbeddingRecord, StoreError> {
        let blob = self.encode(vector)?;
        self.db.with_conn(|conn| {
            conn.query_row(
                r#"
                UPDATE complaint_embeddings
                SET embedding = ?2, updated_at = ?3
                WHERE complaint_id = ?1
                RETURNING complaint_id, embedding, updated_at
                "#,
                params![complaint_id, blob, Utc::now()],
                row_to_record,
            )
            .optional()?
            .ok_or(StoreError::NotFound(complaint_id))
        })
    }

    /// Upsert many records under `policy`.
    ///
    /// `AllOrNothing` validates everything up front and writes in a single
    /// transaction; the first failure is returned and nothing is persisted.
    /// `BestEffort` writes each record on its own and always returns one
    /// outcome per input, in input order.
    pub fn batch_upsert(
        &self,
        records: &[(i64, Vec<f32>)],
        policy: BatchPolicy,
    ) -> Result<Vec<UpsertOutcome>, StoreError> {
        match policy {
            BatchPolicy::BestEffort => Ok(records
                .iter()
                .map(|(complaint_id, vector)| UpsertOutcome {
                    complaint_id: *complaint_id,
                    result: self.upsert(*complaint_id, vector),
                })
                .collect()),
            BatchPolicy::AllOrNothing => {
                let blobs = records
                    .iter()
                    .map(|(complaint_id, vector)| Ok((*complaint_id, self.encode(vector)?)))
                    .collect::<Result<Vec<_>, StoreError>>()?;

                let written = self.db.with_conn(|conn| {
                    let tx = conn.transaction()?;
                    let now = Utc::now();
                    let mut written = Vec::with_capacity(blobs.len());
                    for (complaint_id, blob) in &blobs {
                        written.push(write_record(&tx, *complaint_id, blob, now)?);
                    }
                    tx.commit()?;
                    Ok(written)
                })?;
                debug!(records = written.len(), "committed embedding batch");

                Ok(written
                    .into_iter()
                    .map(|record| UpsertOutcome {
                        complaint_id: record.complaint_id,
                        result: Ok(record),
                    })
                    .collect())
            }
        }
    }

    pub fn get(&self, complaint_id: i64) -> Result<Option<EmbeddingRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let record = conn
                .query_row(
                    "SELECT complaint_id, embedding, updated_at FROM complaint_embeddings WHERE complaint_id = ?1",
                    [complaint_id],
                    row_to_record,
                )
                .optional()?;
            Ok(record)
        })
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM complaint_embeddings", [], |row| {
                    row.get(0)
                })?;
            Ok(count as usize)
        })
    }

    /// Up to `top_k` complaints nearest to `query`, closest first, ties by id.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        metric: DistanceMetric,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if top_k == 0 {
            return Err(StoreError::InvalidArgument("top_k must be at least 1".into()));
        }
        let blob = self.encode(query)?;
        let limit = i64::try_from(top_k).unwrap_or(i64::MAX);
        let sql = match metric {
            DistanceMetric::Euclidean => SEARCH_L2,
            DistanceMetric::Cosine => SEARCH_COSINE,
        };

        let hits = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            let hits = stmt
                .query_map(params![blob, limit], row_to_hit)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(hits)
        })?;
        debug!(top_k, ?metric, hits = hits.len(), "searched embeddings");
        Ok(hits)
    }
}
