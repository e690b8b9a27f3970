use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::config::StoreConfig;
use crate::error::StoreError;

pub mod complaint_repo;
pub mod embedding_repo;
pub mod vector;

const SCHEMA: &str = r#"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS complaints (
        complaint_id INTEGER PRIMARY KEY,
        customer_name TEXT,
        country TEXT,
        description TEXT NOT NULL,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS complaint_embeddings (
        complaint_id INTEGER PRIMARY KEY
            REFERENCES complaints(complaint_id) ON DELETE CASCADE,
        embedding BLOB NOT NULL,
        updated_at TIMESTAMP NOT NULL
    );

    CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
"#;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the single SQLite connection. Every operation checks it out through
/// [`Database::with_conn`] and the guard hands it back on every exit path.
pub struct Database {
    conn: Mutex<Connection>,
    dimension: usize,
}

impl Database {
    pub fn open(config: &StoreConfig, dimension: usize) -> Result<Database, StoreError> {
        let conn = Connection::open(&config.path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", config.path.display())))?;
        let db = Self::init(conn, dimension, config.busy_timeout())?;
        info!(path = %config.path.display(), dimension, "opened complaint store");
        Ok(db)
    }

    pub fn open_path(path: &Path, dimension: usize) -> Result<Database, StoreError> {
        let config = StoreConfig {
            path: path.to_path_buf(),
            ..StoreConfig::default()
        };
        Self::open(&config, dimension)
    }

    pub fn open_in_memory(dimension: usize) -> Result<Database, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, dimension, DEFAULT_BUSY_TIMEOUT)
    }

    fn init(conn: Connection, dimension: usize, busy_timeout: Duration) -> Result<Database, StoreError> {
        if dimension == 0 {
            return Err(StoreError::InvalidArgument(
                "vector dimension must be positive".into(),
            ));
        }
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA)?;
        vector::register_functions(&conn)?;
        check_dimension(&conn, dimension)?;

        Ok(Database {
            conn: Mutex::new(conn),
            dimension,
        })
    }

    /// Vector length every embedding record in this store has.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// How long a statement waits on a locked database before failing with
    /// [`StoreError::Timeout`].
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), StoreError> {
        self.with_conn(|conn| Ok(conn.busy_timeout(timeout)?))
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".into()))?;
        f(&mut conn)
    }
}

// The first open records the dimension; later opens must agree with it.
fn check_dimension(conn: &Connection, dimension: usize) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO store_meta (key, value) VALUES ('vector_dimension', ?1)",
        params![dimension.to_string()],
    )?;
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = 'vector_dimension'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    let stored = match stored.as_deref().map(str::parse::<usize>) {
        Some(Ok(d)) => d,
        _ => return Err(StoreError::Encoding("store_meta.vector_dimension is unreadable".into())),
    };
    if stored != dimension {
        return Err(StoreError::DimensionMismatch {
            expected: stored,
            actual: dimension,
        });
    }
    Ok(())
}
