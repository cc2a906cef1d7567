//! Debounced, keyed work queue drained by a worker.
//!
//! Request handlers enqueue items as they see them; a recurring worker
//! drains whatever has been quiet for at least the debounce window.
//! Re-queueing an item with the same key replaces it and restarts its
//! window, so bursts of updates collapse into one unit of work.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::clock::{has_duration_passed_since, Clock, SystemClock};

type KeyFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;
type TransformFn<T> = Arc<dyn Fn(T) -> T + Send + Sync>;

struct Queued<T> {
    item: T,
    queued_at: DateTime<Utc>,
}

pub struct WorkerQueue<T> {
    debounce: Duration,
    key: KeyFn<T>,
    transform: TransformFn<T>,
    disabled: bool,
    clock: Arc<dyn Clock>,
    items: Mutex<HashMap<String, Queued<T>>>,
}

impl<T> std::fmt::Debug for WorkerQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerQueue")
            .field("debounce", &self.debounce)
            .field("disabled", &self.disabled)
            .field("len", &self.len())
            .finish()
    }
}

impl<T> WorkerQueue<T> {
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    fn items(&self) -> MutexGuard<'_, HashMap<String, Queued<T>>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> WorkerQueue<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(debounce: Duration, key: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        Self {
            debounce,
            key: Arc::new(key),
            transform: Arc::new(|item| item),
            disabled: false,
            clock: Arc::new(SystemClock),
            items: Mutex::new(HashMap::new()),
        }
    }

    /// Normalize items on the way in.
    pub fn with_transform(mut self, transform: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        self.transform = Arc::new(transform);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// A disabled queue drops everything; the worker draining it should be
    /// disabled as well.
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn queue(&self, item: T) {
        if self.disabled {
            return;
        }
        let item = (self.transform)(item);
        let key = (self.key)(&item);
        let queued_at = self.clock.now();
        self.items().insert(key, Queued { item, queued_at });
    }

    /// Run `f` on every item whose debounce window has passed.
    ///
    /// Items are removed before `f` runs. An item whose processing fails is
    /// put back unless a newer item with the same key arrived meanwhile.
    /// Returns how many items were processed successfully.
    pub async fn process<F, Fut>(&self, f: F) -> usize
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let ready: Vec<(String, Queued<T>)> = {
            let mut items = self.items();
            let keys: Vec<String> = items
                .iter()
                .filter(|(_, q)| has_duration_passed_since(self.clock.as_ref(), q.queued_at, self.debounce))
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| items.remove(&key).map(|q| (key, q)))
                .collect()
        };

        let mut processed = 0;
        for (key, queued) in ready {
            match f(queued.item.clone()).await {
                Ok(()) => processed += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "queue item failed, requeueing");
                    self.items().entry(key).or_insert(queued);
                }
            }
        }

        debug!(processed, remaining = self.len(), "queue drained");
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use anyhow::anyhow;

    #[derive(Debug, Clone, PartialEq)]
    struct ListSync {
        list_id: String,
        attempt: u32,
    }

    fn item(list_id: &str, attempt: u32) -> ListSync {
        ListSync {
            list_id: list_id.to_string(),
            attempt,
        }
    }

    fn queue(clock: Arc<ManualClock>) -> WorkerQueue<ListSync> {
        WorkerQueue::new(Duration::from_secs(60), |i: &ListSync| i.list_id.clone())
            .with_clock(clock)
    }

    #[tokio::test]
    async fn test_debounce_collapses_by_key() {
        let clock = Arc::new(ManualClock::new());
        let queue = queue(clock.clone());

        queue.queue(item("a", 1));
        queue.queue(item("a", 2));
        queue.queue(item("b", 1));
        assert_eq!(queue.len(), 2);

        // Nothing is quiet long enough yet.
        let seen = Mutex::new(Vec::new());
        let n = queue
            .process(|i| {
                seen.lock().unwrap().push(i);
                async { Ok(()) }
            })
            .await;
        assert_eq!(n, 0);

        clock.advance(Duration::from_secs(61));
        let n = queue
            .process(|i| {
                seen.lock().unwrap().push(i);
                async { Ok(()) }
            })
            .await;
        assert_eq!(n, 2);
        assert!(queue.is_empty());

        let mut seen = seen.into_inner().unwrap();
        seen.sort_by(|x, y| x.list_id.cmp(&y.list_id));
        assert_eq!(seen, vec![item("a", 2), item("b", 1)]);
    }

    #[tokio::test]
    async fn test_requeue_restarts_window() {
        let clock = Arc::new(ManualClock::new());
        let queue = queue(clock.clone());

        queue.queue(item("a", 1));
        clock.advance(Duration::from_secs(45));
        queue.queue(item("a", 2));
        clock.advance(Duration::from_secs(45));

        assert_eq!(queue.process(|_| async { Ok(()) }).await, 0);
        clock.advance(Duration::from_secs(20));
        assert_eq!(queue.process(|_| async { Ok(()) }).await, 1);
    }

    #[tokio::test]
    async fn test_failed_items_are_requeued() {
        let clock = Arc::new(ManualClock::new());
        let queue = queue(clock.clone());

        queue.queue(item("a", 1));
        clock.advance(Duration::from_secs(61));

        let n = queue.process(|_| async { Err(anyhow!("upstream down")) }).await;
        assert_eq!(n, 0);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.process(|_| async { Ok(()) }).await, 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_disabled_queue_drops_items() {
        let queue = queue(Arc::new(ManualClock::new())).disabled(true);
        queue.queue(item("a", 1));
        assert!(queue.is_disabled());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_transform_applies_before_keying() {
        let queue = queue(Arc::new(ManualClock::new())).with_transform(|mut i: ListSync| {
            i.list_id = i.list_id.to_lowercase();
            i
        });
        queue.queue(item("ABC", 1));
        queue.queue(item("abc", 2));
        assert_eq!(queue.len(), 1);
    }
}
