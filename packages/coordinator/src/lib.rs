//! Coordination core for recurring ingestion workers.
//!
//! Many background jobs import overlapping data sets (catalogs, hash lists,
//! id mappings). This crate keeps them from stepping on each other:
//!
//! - [`worker`] - Recurring workers with single-flight ticks, readiness
//!   parking, and panic containment
//! - [`tracker`] - Persistent per-bucket job status (`started`, `done`,
//!   `failed`) so a bucket runs at most once, even across restarts
//! - [`deps`] - The declared "waits on" graph between workers, checked for
//!   cycles at startup
//! - [`lock`] - Reentrant advisory locks, in-process or Postgres-backed
//! - [`fleet`] - The standard worker table wired onto one scheduler
//! - [`kv`] / [`cursor`] - Scoped key-value storage and sync resume points
//! - [`queue`] - Debounced keyed queues drained by workers
//! - [`testing`] - Manual clock and counting executor
//!
//! # Usage
//!
//! ```rust,ignore
//! use coordinator::{Config, Database, ExecutorRegistry, Fleet, FleetOptions};
//!
//! let config = Config::from_env()?;
//! let db = Database::connect(&config.database_url).await?;
//! db.migrate().await?;
//!
//! let mut executors = ExecutorRegistry::new();
//! executors.register("sync_imdb", executor_fn(|_ctx| async { imdb::sync().await }));
//!
//! let options = FleetOptions::builder()
//!     .store(db.kv())
//!     .features(config.features.clone())
//!     .build();
//! let mut fleet = Fleet::build(coordinator::standard_fleet(), executors, options)?;
//! fleet.start().await?;
//! ```

pub mod clock;
pub mod config;
pub mod cursor;
pub mod db;
pub mod deps;
pub mod error;
pub mod fleet;
pub mod kv;
pub mod lock;
pub mod queue;
pub mod testing;
pub mod tracker;
pub mod worker;

// Re-export core types at crate root
pub use clock::{Clock, SystemClock};
pub use config::{Config, Features};
pub use cursor::CursorStore;
pub use db::{Database, Dialect};
pub use deps::{DependencyGraph, DependencyGraphBuilder};
pub use error::{GraphError, LockError, StoreError, WorkerError};
pub use fleet::{standard_fleet, ExecutorRegistry, Fleet, FleetOptions, TrackerSpec, WorkerSpec};
pub use kv::{KvEntry, KvStore, MemoryKvStore, PostgresKvStore, SqliteKvStore};
pub use lock::{
    key_pair, lock_name, with_lock, AdvisoryLock, InProcessLock, LockOptions, LockRegistry,
    PostgresAdvisoryLock,
};
pub use queue::WorkerQueue;
pub use tracker::{retain_buckets, EvictionPolicy, Job, JobStatus, JobTracker};
pub use worker::{
    executor_fn, Executor, TickOutcome, Worker, WorkerConfig, WorkerContext,
};
