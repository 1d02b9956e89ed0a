//! Persistence layer for tenure
//!
//! Provides:
//! - Grant and entitlement rows with a per-row version guard
//! - Audit log (append-only)

mod audit;
mod records;
mod sqlite;
mod traits;

pub use audit::*;
pub use records::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Duplicate(String),

    /// The row changed since it was read
    #[error("Version conflict on {0}")]
    Conflict(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Duplicate(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for tenure_util::TenureError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => tenure_util::TenureError::NotFound(what),
            StoreError::Duplicate(what) => tenure_util::TenureError::Duplicate(what),
            other => tenure_util::TenureError::Store(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
