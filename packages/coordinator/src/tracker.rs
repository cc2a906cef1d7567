//! Persistent job status records.
//!
//! A [`JobTracker`] answers "has run `id` of this job started, finished or
//! failed". Ids are usually time buckets (one per day, one per hour) so that
//! re-running the same bucket is detectable. Records live in the key-value
//! store under the scope `job:<tracker-name>`.
//!
//! The tracker is a passive record. It does not refuse a `started` write on a
//! `done` id; the worker checks status before it writes.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::{has_duration_passed_since, Clock, SystemClock};
use crate::error::{Result, StoreError};
use crate::kv::KvStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Started,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Started => "started",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked run.
#[derive(Debug, Clone, PartialEq)]
pub struct Job<V> {
    pub id: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub value: V,
    /// When the record was first written (the `started` write).
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct StoredJob<V> {
    status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default)]
    value: V,
}

/// Decides whether a record should be deleted by the eviction sweep.
pub type EvictionPolicy<V> = Arc<dyn Fn(&str, &Job<V>) -> bool + Send + Sync>;

/// Keep every record.
pub fn never_evict<V>() -> EvictionPolicy<V> {
    Arc::new(|_, _| false)
}

/// Evict buckets older than `retention`, and ids that are not buckets of
/// `format` at all.
pub fn retain_buckets<V>(format: impl Into<String>, retention: Duration, clock: Arc<dyn Clock>) -> EvictionPolicy<V> {
    let format = format.into();
    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
    Arc::new(move |id, _job| match parse_bucket(id, &format) {
        Some(bucket) => clock
            .now()
            .checked_sub_signed(retention)
            .is_some_and(|cutoff| bucket < cutoff),
        None => true,
    })
}

/// Parse a bucket id produced by formatting a timestamp with `format`.
///
/// Accepts date-only formats (`%Y-%m-%d`) and hour buckets (`%Y-%m-%d %H`),
/// which chrono cannot parse as a datetime without a minute field.
pub fn parse_bucket(id: &str, format: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(id, format) {
        return Some(dt.and_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(&format!("{id}:00"), &format!("{format}:%M")) {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(id, format)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Status records for one named job.
pub struct JobTracker<V = ()> {
    name: String,
    scope: String,
    store: Arc<dyn KvStore>,
    should_evict: EvictionPolicy<V>,
    clock: Arc<dyn Clock>,
    _value: PhantomData<fn() -> V>,
}

impl<V> fmt::Debug for JobTracker<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobTracker")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl<V> JobTracker<V>
where
    V: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
{
    /// Create a tracker whose records live under `job:<name>`.
    pub fn new(name: impl Into<String>, store: Arc<dyn KvStore>, should_evict: EvictionPolicy<V>) -> Self {
        let name = name.into();
        Self {
            scope: format!("job:{name}"),
            name,
            store,
            should_evict,
            clock: Arc::new(SystemClock),
            _value: PhantomData,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upsert the record for `id`.
    pub async fn set(&self, id: &str, status: JobStatus, error: Option<&str>, value: V) -> Result<()> {
        let stored = StoredJob {
            status,
            error: error.map(str::to_string),
            value,
        };
        let json = serde_json::to_string(&stored)?;
        self.store.set(&self.scope, id, &json).await?;
        debug!(tracker = %self.name, job_id = %id, status = %status, "job status set");
        Ok(())
    }

    /// Record for `id`, `None` when absent.
    pub async fn get(&self, id: &str) -> Result<Option<Job<V>>> {
        match self.store.get(&self.scope, id).await? {
            Some(entry) => self.decode(entry.key, &entry.value, entry.created_at).map(Some),
            None => Ok(None),
        }
    }

    /// Most recently created record across all ids.
    pub async fn get_last(&self) -> Result<Option<Job<V>>> {
        match self.store.last(&self.scope).await? {
            Some(entry) => self.decode(entry.key, &entry.value, entry.created_at).map(Some),
            None => Ok(None),
        }
    }

    /// Every record, oldest first. Undecodable records are skipped.
    pub async fn list(&self) -> Result<Vec<Job<V>>> {
        let entries = self.store.list(&self.scope).await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| match self.decode(entry.key, &entry.value, entry.created_at) {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!(tracker = %self.name, error = %e, "skipping undecodable job record");
                    None
                }
            })
            .collect())
    }

    /// Remove the record for `id`, freeing the bucket to run again.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.store.delete(&self.scope, id).await
    }

    /// Whether the latest run finished successfully within `window`.
    pub async fn last_succeeded_within(&self, window: Duration) -> bool {
        match self.get_last().await {
            Ok(Some(job)) => {
                job.status == JobStatus::Done
                    && !has_duration_passed_since(self.clock.as_ref(), job.created_at, window)
            }
            Ok(None) => false,
            Err(e) => {
                warn!(tracker = %self.name, error = %e, "failed to read last job");
                false
            }
        }
    }

    /// Delete every record the eviction policy selects. Returns how many were
    /// deleted.
    pub async fn evict(&self) -> Result<usize> {
        let mut deleted = 0;
        for job in self.list().await? {
            if (self.should_evict)(&job.id, &job) && self.store.delete(&self.scope, &job.id).await? {
                deleted += 1;
            }
        }
        if deleted > 0 {
            info!(tracker = %self.name, count = deleted, "evicted job records");
        }
        Ok(deleted)
    }

    /// Run [`evict`](Self::evict) every `interval` in the background.
    ///
    /// Failures are logged and retried on the next sweep.
    pub fn spawn_eviction_sweep(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = tracker.evict().await {
                    error!(tracker = %tracker.name, error = %e, "eviction sweep failed");
                }
            }
        })
    }

    fn decode(&self, id: String, raw: &str, created_at: DateTime<Utc>) -> Result<Job<V>> {
        let stored: StoredJob<V> = serde_json::from_str(raw).map_err(|source| StoreError::Decode {
            scope: self.scope.clone(),
            key: id.clone(),
            source,
        })?;
        Ok(Job {
            id,
            status: stored.status,
            error: stored.error,
            value: stored.value,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::testing::ManualClock;

    fn tracker() -> JobTracker<()> {
        JobTracker::new("sync-imdb", Arc::new(MemoryKvStore::new()), never_evict())
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        assert!(tracker().get("2025-01-01").await.unwrap().is_none());
        assert!(tracker().get_last().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_started_then_done() {
        let tracker = tracker();

        tracker.set("2025-01-01", JobStatus::Started, None, ()).await.unwrap();
        let job = tracker.get("2025-01-01").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Started);
        assert_eq!(job.id, "2025-01-01");

        tracker.set("2025-01-01", JobStatus::Done, None, ()).await.unwrap();
        let done = tracker.get("2025-01-01").await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.created_at, job.created_at);
    }

    #[tokio::test]
    async fn test_failed_keeps_error_message() {
        let tracker = tracker();
        tracker
            .set("2025-01-01", JobStatus::Failed, Some("dataset 404"), ())
            .await
            .unwrap();

        let job = tracker.get("2025-01-01").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("dataset 404"));
    }

    #[tokio::test]
    async fn test_value_round_trips() {
        #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
        struct Progress {
            rows: u64,
        }

        let tracker: JobTracker<Progress> =
            JobTracker::new("sync-animeapi", Arc::new(MemoryKvStore::new()), never_evict());
        tracker
            .set("2025-01-01", JobStatus::Done, None, Progress { rows: 12 })
            .await
            .unwrap();

        let job = tracker.get("2025-01-01").await.unwrap().unwrap();
        assert_eq!(job.value, Progress { rows: 12 });
    }

    #[tokio::test]
    async fn test_undecodable_record_is_an_error() {
        let store = Arc::new(MemoryKvStore::new());
        store.set("job:sync-imdb", "2025-01-01", "not json").await.unwrap();
        let tracker: JobTracker<()> = JobTracker::new("sync-imdb", store, never_evict());

        assert!(matches!(
            tracker.get("2025-01-01").await,
            Err(StoreError::Decode { .. })
        ));
        assert!(tracker.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_last_ignores_id_order() {
        let tracker = tracker();
        tracker.set("2025-01-02", JobStatus::Done, None, ()).await.unwrap();
        tracker.set("2025-01-01", JobStatus::Failed, None, ()).await.unwrap();

        let last = tracker.get_last().await.unwrap().unwrap();
        assert_eq!(last.id, "2025-01-01");
    }

    #[test]
    fn test_parse_bucket_formats() {
        let day = parse_bucket("2025-03-04", "%Y-%m-%d").unwrap();
        assert_eq!(day, Utc.with_ymd_and_hms(2025, 3, 4, 0, 0, 0).unwrap());

        let hour = parse_bucket("2025-03-04 17", "%Y-%m-%d %H").unwrap();
        assert_eq!(hour, Utc.with_ymd_and_hms(2025, 3, 4, 17, 0, 0).unwrap());

        assert!(parse_bucket("0193f1c2-not-a-date", "%Y-%m-%d").is_none());
    }

    #[tokio::test]
    async fn test_retain_buckets_eviction() {
        let clock = Arc::new(ManualClock::at(Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()));
        let store = Arc::new(MemoryKvStore::new());
        let tracker: JobTracker<()> = JobTracker::new(
            "sync-imdb",
            store,
            retain_buckets("%Y-%m-%d", Duration::from_secs(7 * 24 * 60 * 60), clock.clone()),
        )
        .with_clock(clock);

        for id in ["2025-03-01", "2025-03-04", "2025-03-09", "garbage"] {
            tracker.set(id, JobStatus::Done, None, ()).await.unwrap();
        }

        assert_eq!(tracker.evict().await.unwrap(), 2);
        let ids: Vec<_> = tracker.list().await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["2025-03-04", "2025-03-09"]);
    }

    #[tokio::test]
    async fn test_last_succeeded_within() {
        let clock = Arc::new(ManualClock::new());
        let tracker = tracker().with_clock(clock.clone());
        assert!(!tracker.last_succeeded_within(Duration::from_secs(86_400)).await);

        tracker.set("a", JobStatus::Started, None, ()).await.unwrap();
        assert!(!tracker.last_succeeded_within(Duration::from_secs(86_400)).await);

        tracker.set("a", JobStatus::Done, None, ()).await.unwrap();
        assert!(tracker.last_succeeded_within(Duration::from_secs(86_400)).await);

        clock.advance(Duration::from_secs(2 * 86_400));
        assert!(!tracker.last_succeeded_within(Duration::from_secs(86_400)).await);
    }

    #[tokio::test]
    async fn test_delete_frees_bucket() {
        let tracker = tracker();
        tracker.set("a", JobStatus::Started, None, ()).await.unwrap();

        assert!(tracker.delete("a").await.unwrap());
        assert!(tracker.get("a").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_sweep_runs_in_background() {
        let clock = Arc::new(ManualClock::at(Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()));
        let tracker: Arc<JobTracker<()>> = Arc::new(JobTracker::new(
            "sync-animetosho",
            Arc::new(MemoryKvStore::new()),
            retain_buckets("%Y-%m-%d", Duration::from_secs(24 * 60 * 60), clock.clone()),
        ));
        for id in ["2025-03-01", "not-a-bucket", "2025-03-10"] {
            tracker.set(id, JobStatus::Done, None, ()).await.unwrap();
        }

        let sweep = tracker.spawn_eviction_sweep(Duration::from_secs(60));

        // The first sweep fires immediately.
        tokio::time::sleep(Duration::from_secs(1)).await;
        let ids: Vec<_> = tracker.list().await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["2025-03-10"]);

        // Later sweeps pick up buckets that aged out meanwhile.
        clock.advance(Duration::from_secs(2 * 24 * 60 * 60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(tracker.list().await.unwrap().is_empty());

        sweep.abort();
    }
}
