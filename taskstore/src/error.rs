use thiserror::Error;

/// Errors surfaced by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("append-only violation: {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    #[error("failed to lock store file: {0}")]
    Lock(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
