use std::time::Duration;

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),

    #[error("embedding service unreachable: {0}")]
    Unreachable(String),

    #[error("embedding service returned {status}: {message}")]
    Service { status: u16, message: String },

    #[error("embedding model not found: {0}")]
    ModelNotFound(String),

    #[error("invalid embedding input: {0}")]
    InvalidInput(String),

    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding client setup failed: {0}")]
    Setup(String),
}

impl EmbeddingError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) | Self::Unreachable(_) => FailureKind::Transient,
            Self::Service { status, .. } if *status == 429 || *status >= 500 => {
                FailureKind::Transient
            }
            _ => FailureKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out: {0}")]
    Timeout(String),

    #[error("vector has {actual} dimensions, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector encoding error: {0}")]
    Encoding(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no embedding record for complaint {0}")]
    NotFound(i64),

    #[error("complaint {0} does not exist")]
    UnknownComplaint(i64),

    #[error("sqlite error: {0}")]
    Sqlite(#[source] rusqlite::Error),
}

impl StoreError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Unavailable(_) | Self::Timeout(_) => FailureKind::Transient,
            _ => FailureKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        if let rusqlite::Error::SqliteFailure(e, msg) = &err {
            let detail = msg.clone().unwrap_or_else(|| e.to_string());
            match e.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return Self::Timeout(detail);
                }
                ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::OutOfMemory => return Self::Unavailable(detail),
                // distance functions report bad blobs through the sqlite error message
                _ if detail.contains(crate::db::vector::CODEC_ERROR_TAG) => {
                    return Self::Encoding(detail);
                }
                _ => {}
            }
        }

        if matches!(
            err,
            rusqlite::Error::FromSqlConversionFailure(..) | rusqlite::Error::InvalidColumnType(..)
        ) {
            return Self::Encoding(err.to_string());
        }
        Self::Sqlite(err)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Crate-level error returned by the orchestration layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Embedding(e) => e.kind(),
            Self::Store(e) => e.kind(),
            _ => FailureKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
