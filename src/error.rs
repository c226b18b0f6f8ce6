//! Error taxonomy for tracker operations.
//!
//! Store failures keep their `DatabaseError` detail; everything a caller
//! must act on (fix input, resolve identity, retry) gets its own variant.

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum AdherenceError {
    /// Malformed input, rejected before any write.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No usable owner identity at write time. Nothing was written.
    #[error("Owner identity unavailable: {0}")]
    Ownership(String),

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Tracker worker is not running")]
    WorkerUnavailable,
}

impl From<rusqlite::Error> for AdherenceError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(DatabaseError::Sqlite(e))
    }
}

impl AdherenceError {
    /// Whether the caller may retry the same request unchanged later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Ownership(_) | Self::Store(_) | Self::Cancelled | Self::WorkerUnavailable
        )
    }
}
