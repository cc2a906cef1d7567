//! Typed errors for the coordination core.
//!
//! Uses `thiserror` for library errors. Executors report failures with
//! `anyhow`, which the worker records verbatim.

use thiserror::Error;

/// Errors raised by the key-value store and the typed views built on it.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Query failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Stored value could not be decoded
    #[error("invalid record {scope}/{key}: {source}")]
    Decode {
        scope: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Value could not be encoded
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    /// Connection URL names a database we cannot talk to
    #[error("unsupported database url: {0}")]
    UnsupportedUrl(String),
}

/// Errors raised while acquiring or releasing an advisory lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Could not check out a dedicated session for the lock
    #[error("failed to open session for lock {name}: {source}")]
    Session {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    /// Acquire query failed
    #[error("failed to acquire lock {name}: {source}")]
    Acquire {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    /// Release query failed
    #[error("failed to release lock {name}: {source}")]
    Release {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    /// Lock is held elsewhere
    #[error("lock {name} not acquired")]
    NotAcquired { name: String },
}

/// The declared worker wait-edges are not acyclic.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("dependency cycle between workers: {}", .0.join(", "))]
    Cycle(Vec<String>),

    /// A wait-edge names a worker that was never declared
    #[error("worker {worker} waits on unknown worker {dependency}")]
    UnknownDependency { worker: String, dependency: String },
}

/// Startup errors for workers and fleets.
///
/// These indicate misconfiguration and are not recovered from.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The recurrence engine rejected a job
    #[error("scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
