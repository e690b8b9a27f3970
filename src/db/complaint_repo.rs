use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;

use crate::db::Database;
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Complaint {
    pub complaint_id: i64,
    pub customer_name: Option<String>,
    pub country: Option<String>,
    pub description: String,
    pub created_at: String,
}

pub(crate) fn row_to_complaint(row: &Row) -> rusqlite::Result<Complaint> {
    Ok(Complaint {
        complaint_id: row.get(0)?,
        customer_name: row.get(1)?,
        country: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Read access to the `complaints` table, plus the insert path ingestion uses.
pub struct ComplaintRepository<'db> {
    db: &'db Database,
}

impl<'db> ComplaintRepository<'db> {
    pub fn new(db: &'db Database) -> Self {
        Self { db }
    }

    pub fn insert(
        &self,
        complaint_id: i64,
        description: &str,
        customer_name: Option<&str>,
        country: Option<&str>,
    ) -> Result<Complaint, StoreError> {
        self.db.with_conn(|conn| {
            let complaint = conn.query_row(
                r#"
                INSERT INTO complaints (complaint_id, customer_name, country, description)
                VALUES (?1, ?2, ?3, ?4)
                RETURNING complaint_id, customer_name, country, description, created_at
                "#,
                params![complaint_id, customer_name, country, description],
                row_to_complaint,
            )?;
            Ok(complaint)
        })
    }

    pub fn get(&self, complaint_id: i64) -> Result<Option<Complaint>, StoreError> {
        self.db.with_conn(|conn| {
            let complaint = conn
                .query_row(
                    "SELECT c.complaint_id, c.customer_name, c.country, c.description, c.created_at \
                     FROM complaints c WHERE c.complaint_id = ?1",
                    [complaint_id],
                    row_to_complaint,
                )
                .optional()?;
            Ok(complaint)
        })
    }

    pub fn list(&self) -> Result<Vec<Complaint>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.complaint_id, c.customer_name, c.country, c.description, c.created_at \
                 FROM complaints c ORDER BY c.complaint_id",
            )?;
            let complaints = stmt
                .query_map([], row_to_complaint)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(complaints)
        })
    }

    /// Complaints that have no embedding record yet.
    pub fn list_unembedded(&self) -> Result<Vec<Complaint>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT c.complaint_id, c.customer_name, c.country, c.description, c.created_at
                FROM complaints c
                LEFT JOIN complaint_embeddings e ON e.complaint_id = c.complaint_id
                WHERE e.complaint_id IS NULL
                ORDER BY c.complaint_id
                "#,
            )?;
            let complaints = stmt
                .query_map([], row_to_complaint)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(complaints)
        })
    }
}
