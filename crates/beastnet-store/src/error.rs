//! Error types for the storage layer.

use beastnet_types::EnvelopeError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during storage operations.
///
/// Each engine-specific variant carries the name of the failed operation so
/// a failure can be diagnosed from the log line alone.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The envelope failed validation before it reached the engine.
    #[error("envelope rejected: {0}")]
    Envelope(#[from] EnvelopeError),

    /// A message with this id is already stored.
    #[error("duplicate message id: {0}")]
    DuplicateMessage(String),

    /// The payload document could not be serialized for storage.
    #[error("payload serialization failed for message {id}: {source}")]
    Payload {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    /// A SQLite statement failed.
    #[error("sqlite {operation} failed: {source}")]
    Sqlite {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// No SQLite connection could be checked out of the pool.
    #[error("sqlite pool unavailable during {operation}: {source}")]
    SqlitePool {
        operation: &'static str,
        #[source]
        source: r2d2::Error,
    },

    /// The blocking worker running a SQLite call did not complete.
    #[error("sqlite {operation} worker failed: {source}")]
    SqliteWorker {
        operation: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },

    /// A Postgres statement failed.
    #[error("postgres {operation} failed: {source}")]
    Postgres {
        operation: &'static str,
        #[source]
        source: tokio_postgres::Error,
    },

    /// No Postgres connection could be checked out of the pool.
    #[error("postgres pool unavailable during {operation}: {source}")]
    PostgresPool {
        operation: &'static str,
        #[source]
        source: deadpool_postgres::PoolError,
    },

    /// The Postgres pool could not be built.
    #[error("failed to build postgres pool: {0}")]
    PoolBuild(#[source] deadpool_postgres::BuildError),

    /// The primary connection string did not parse.
    #[error("invalid primary connection string: {0}")]
    InvalidConnectionString(#[source] tokio_postgres::Error),

    /// The primary connectivity probe did not answer in time.
    #[error("primary connectivity probe timed out after {0:?}")]
    ProbeTimeout(Duration),
}
