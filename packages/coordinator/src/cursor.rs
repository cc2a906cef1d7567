//! Resume points for incremental sync jobs.
//!
//! A sync job that walks a remote source page by page stores "where it got
//! to" after each committed batch, never before. A restarted run picks up
//! from the last committed value.

use std::sync::Arc;

use crate::error::Result;
use crate::kv::KvStore;

/// Named cursor values under one scope, e.g. `job:sync-bitmagnet:cursor`.
#[derive(Clone)]
pub struct CursorStore {
    scope: String,
    store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for CursorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorStore").field("scope", &self.scope).finish()
    }
}

impl CursorStore {
    pub fn new(store: Arc<dyn KvStore>, scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            store,
        }
    }

    /// Cursor store for a job's default scope, `job:<job>:cursor`.
    pub fn for_job(store: Arc<dyn KvStore>, job: &str) -> Self {
        Self::new(store, format!("job:{job}:cursor"))
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.store.get(&self.scope, key).await?.map(|entry| entry.value))
    }

    /// Current value, or `default` when nothing was committed yet.
    pub async fn get_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.get(key).await?.unwrap_or_else(|| default.to_string()))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.store.set(&self.scope, key, value).await
    }

    /// Forget the cursor so the next run starts from the beginning.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.store.delete(&self.scope, key).await
    }
}
