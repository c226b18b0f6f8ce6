pub mod sqlite;
pub mod repository;

pub use sqlite::*;
pub use repository::*;

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, Transaction, TransactionBehavior};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Constraint violated: {0}")]
    ConstraintViolation(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Handle to the ledger store.
///
/// File-backed stores hand out a fresh connection per unit of work, so
/// independent threads each hold their own connection and SQLite serializes
/// the writers. The in-memory store shares one connection behind a mutex.
pub enum Database {
    File(PathBuf),
    Memory(Mutex<Connection>),
}

impl Database {
    /// Open (or create) a file-backed store and migrate it once.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = open_database(path)?;
        drop(conn);
        tracing::debug!(path = %path.display(), "Ledger database ready");
        Ok(Self::File(path.to_path_buf()))
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::Memory(Mutex::new(open_memory_database()?)))
    }

    /// Borrow a connection for one unit of work.
    pub fn connect(&self) -> Result<DbConn<'_>, DatabaseError> {
        match self {
            Self::File(path) => Ok(DbConn::Owned(open_connection(path)?)),
            Self::Memory(shared) => shared
                .lock()
                .map(DbConn::Shared)
                .map_err(|_| DatabaseError::LockPoisoned),
        }
    }
}

/// A connection borrowed from [`Database`].
pub enum DbConn<'a> {
    Owned(Connection),
    Shared(MutexGuard<'a, Connection>),
}

impl Deref for DbConn<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            Self::Owned(conn) => conn,
            Self::Shared(guard) => guard,
        }
    }
}

/// Begin a write transaction that takes the database write lock up front.
///
/// Every check-then-write sequence in the ledger runs inside one of these,
/// so two connections can never interleave between the existence check and
/// the insert.
pub fn begin_write(conn: &Connection) -> Result<Transaction<'_>, DatabaseError> {
    Ok(Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?)
}
