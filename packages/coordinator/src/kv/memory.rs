//! In-memory key-value storage for testing and ephemeral runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use super::{KvEntry, KvStore};
use crate::error::Result;

#[derive(Debug, Clone)]
struct Slot {
    entry: KvEntry,
    /// Insertion order, breaks `created_at` ties.
    seq: u64,
}

/// In-memory key-value store.
///
/// Data is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    slots: RwLock<HashMap<(String, String), Slot>>,
    next_seq: AtomicU64,
}

impl MemoryKvStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all scopes.
    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn scoped(&self, scope: &str) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self
            .slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|((s, _), _)| s == scope)
            .map(|(_, slot)| slot.clone())
            .collect();
        slots.sort_by(|a, b| {
            a.entry
                .created_at
                .cmp(&b.entry.created_at)
                .then(a.seq.cmp(&b.seq))
        });
        slots
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, scope: &str, key: &str) -> Result<Option<KvEntry>> {
        Ok(self
            .slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(scope.to_string(), key.to_string()))
            .map(|slot| slot.entry.clone()))
    }

    async fn set(&self, scope: &str, key: &str, value: &str) -> Result<()> {
        let now = Utc::now();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        slots
            .entry((scope.to_string(), key.to_string()))
            .and_modify(|slot| {
                slot.entry.value = value.to_string();
                slot.entry.updated_at = now;
            })
            .or_insert_with(|| Slot {
                entry: KvEntry {
                    key: key.to_string(),
                    value: value.to_string(),
                    created_at: now,
                    updated_at: now,
                },
                seq,
            });
        Ok(())
    }

    async fn delete(&self, scope: &str, key: &str) -> Result<bool> {
        Ok(self
            .slots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(scope.to_string(), key.to_string()))
            .is_some())
    }

    async fn list(&self, scope: &str) -> Result<Vec<KvEntry>> {
        Ok(self.scoped(scope).into_iter().map(|slot| slot.entry).collect())
    }

    async fn last(&self, scope: &str) -> Result<Option<KvEntry>> {
        Ok(self.scoped(scope).pop().map(|slot| slot.entry))
    }
}
