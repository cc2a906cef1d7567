//! Scoped key-value storage shared by job trackers and cursors.
//!
//! Available backends:
//! - `MemoryKvStore` - In-memory storage (tests, ephemeral runs)
//! - `SqliteKvStore` - Embedded single-node deployments
//! - `PostgresKvStore` - Shared multi-node deployments
//!
//! Every record lives under a scope (`job:sync-imdb`,
//! `job:sync-bitmagnet:cursor`, ...) so unrelated consumers never see each
//! other's keys.

pub mod memory;
pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::error::Result;

pub use memory::MemoryKvStore;
pub use postgres::PostgresKvStore;
pub use sqlite::SqliteKvStore;

/// A stored value and its bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct KvEntry {
    pub key: String,
    pub value: String,
    /// Set on first insert, never changed by later writes.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage for `(scope, key) -> value` records.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch one record, `None` when absent.
    async fn get(&self, scope: &str, key: &str) -> Result<Option<KvEntry>>;

    /// Insert or overwrite a record, keeping its original `created_at`.
    async fn set(&self, scope: &str, key: &str, value: &str) -> Result<()>;

    /// Delete a record. Deleting a missing key is not an error.
    async fn delete(&self, scope: &str, key: &str) -> Result<bool>;

    /// All records in a scope, oldest first.
    async fn list(&self, scope: &str) -> Result<Vec<KvEntry>>;

    /// Most recently created record in a scope.
    async fn last(&self, scope: &str) -> Result<Option<KvEntry>>;
}
