//! In-process advisory locks.
//!
//! Locks are keyed by name in a [`LockRegistry`]. Every handle gets its own
//! holder id so that the same handle nests while a different handle
//! contends, matching the per-session semantics of the Postgres backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{AdvisoryLock, LockOptions};
use crate::error::LockError;

#[derive(Debug, Default)]
struct LockState {
    holder: Option<u64>,
    depth: u32,
}

/// Process-wide table of in-process lock states.
#[derive(Debug, Default)]
pub struct LockRegistry {
    states: DashMap<String, Arc<Mutex<LockState>>>,
    next_holder: AtomicU64,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every embedded database handle in this process.
    pub fn global() -> Arc<LockRegistry> {
        static GLOBAL: OnceLock<Arc<LockRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(LockRegistry::new())).clone()
    }

    /// Create a new handle for `name`.
    pub fn lock(self: &Arc<Self>, name: impl Into<String>, options: LockOptions) -> InProcessLock {
        let name = name.into();
        let state = self.states.entry(name.clone()).or_default().clone();
        InProcessLock {
            name,
            registry: Arc::clone(self),
            holder: self.next_holder.fetch_add(1, Ordering::Relaxed),
            state,
            depth: 0,
            options,
        }
    }

    /// Whether any handle currently holds `name`.
    pub fn is_locked(&self, name: &str) -> bool {
        self.states
            .get(name)
            .map(|state| state.lock().unwrap_or_else(|e| e.into_inner()).holder.is_some())
            .unwrap_or(false)
    }

    /// Number of names that still have live handles.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Forget `name` once `state` is the last handle's reference to it and
    /// nothing holds it.
    fn prune(&self, name: &str, state: &Arc<Mutex<LockState>>) {
        self.states.remove_if(name, |_, entry| {
            Arc::ptr_eq(entry, state)
                && Arc::strong_count(entry) == 2
                && entry.lock().unwrap_or_else(|e| e.into_inner()).holder.is_none()
        });
    }
}

/// Handle on an in-process lock. Never reports I/O errors.
///
/// Dropping a handle releases whatever it still holds.
#[derive(Debug)]
pub struct InProcessLock {
    name: String,
    registry: Arc<LockRegistry>,
    holder: u64,
    state: Arc<Mutex<LockState>>,
    depth: u32,
    options: LockOptions,
}

impl InProcessLock {
    fn lock(&mut self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.holder {
            Some(holder) if holder != self.holder => false,
            _ => {
                state.holder = Some(self.holder);
                state.depth += 1;
                self.depth += 1;
                true
            }
        }
    }

    fn unlock(&mut self) -> bool {
        if self.depth == 0 {
            return false;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.holder != Some(self.holder) {
            return false;
        }
        state.depth -= 1;
        self.depth -= 1;
        if state.depth == 0 {
            state.holder = None;
        }
        true
    }
}

#[async_trait]
impl AdvisoryLock for InProcessLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&mut self) -> bool {
        let attempts = self.options.acquire_attempts.max(1);
        for attempt in 1..=attempts {
            if self.lock() {
                return true;
            }
            debug!(name = %self.name, attempt, "lock busy");
            if attempt < attempts {
                tokio::time::sleep(self.options.acquire_retry_delay).await;
            }
        }
        false
    }

    async fn try_acquire(&mut self) -> bool {
        self.lock()
    }

    async fn release(&mut self) -> bool {
        self.unlock()
    }

    async fn release_all(&mut self) -> bool {
        if self.depth == 0 {
            return false;
        }
        while self.unlock() {}
        self.depth == 0
    }

    fn held(&self) -> u32 {
        self.depth
    }

    fn err(&self) -> Option<&LockError> {
        None
    }

    fn errors(&self) -> &[LockError] {
        &[]
    }
}

impl Drop for InProcessLock {
    fn drop(&mut self) {
        while self.unlock() {}
        self.registry.prune(&self.name, &self.state);
    }
}
