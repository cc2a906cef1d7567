//! Job tracking and cursors against a real Postgres.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use common::PgHarness;
use coordinator::testing::{CountingExecutor, ManualClock};
use coordinator::tracker::never_evict;
use coordinator::{
    retain_buckets, Clock, CursorStore, Executor, JobStatus, JobTracker, TickOutcome, Worker,
    WorkerConfig,
};
use test_context::test_context;

#[test_context(PgHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn status_moves_from_started_to_done(ctx: &PgHarness) {
    let tracker: JobTracker =
        JobTracker::new(PgHarness::unique("sync-imdb"), ctx.db.kv(), never_evict());

    assert!(tracker.get("2024-01-01").await.unwrap().is_none());

    tracker.set("2024-01-01", JobStatus::Started, None, ()).await.unwrap();
    let started = tracker.get("2024-01-01").await.unwrap().unwrap();
    assert_eq!(started.status, JobStatus::Started);

    tracker.set("2024-01-01", JobStatus::Done, None, ()).await.unwrap();
    let done = tracker.get("2024-01-01").await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.created_at, started.created_at, "created_at survives updates");
}

#[test_context(PgHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn get_last_returns_most_recent_bucket(ctx: &PgHarness) {
    let tracker: JobTracker =
        JobTracker::new(PgHarness::unique("sync-animeapi"), ctx.db.kv(), never_evict());

    tracker.set("2024-01-01", JobStatus::Done, None, ()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    tracker
        .set("2024-01-02", JobStatus::Failed, Some("timeout"), ())
        .await
        .unwrap();

    let last = tracker.get_last().await.unwrap().unwrap();
    assert_eq!(last.id, "2024-01-02");
    assert_eq!(last.error.as_deref(), Some("timeout"));
    assert_eq!(tracker.list().await.unwrap().len(), 2);
}

#[test_context(PgHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn evict_drops_expired_buckets(ctx: &PgHarness) {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::at(
        Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap(),
    ));
    let tracker: JobTracker = JobTracker::new(
        PgHarness::unique("sync-anidb-titles"),
        ctx.db.kv(),
        retain_buckets("%Y-%m-%d", Duration::from_secs(7 * 24 * 60 * 60), clock.clone()),
    )
    .with_clock(clock);

    for id in ["2024-03-01", "2024-03-19", "garbage"] {
        tracker.set(id, JobStatus::Done, None, ()).await.unwrap();
    }

    assert_eq!(tracker.evict().await.unwrap(), 2);
    let remaining: Vec<_> = tracker
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(remaining, vec!["2024-03-19"]);
}

#[test_context(PgHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn worker_runs_bucket_once_on_postgres(ctx: &PgHarness) {
    let counter = CountingExecutor::new();
    let tracker = Arc::new(JobTracker::new(
        PgHarness::unique("bucket"),
        ctx.db.kv(),
        never_evict(),
    ));
    let worker = Worker::new(
        WorkerConfig::builder()
            .name("bucket")
            .executor(Arc::new(counter.clone()) as Arc<dyn Executor>)
            .interval(Duration::from_secs(1))
            .job_tracker(Some(tracker.clone()))
            .job_id_time_format("bucket-A")
            .build(),
    )
    .unwrap();

    assert!(matches!(worker.tick().await, TickOutcome::Completed { .. }));
    assert!(matches!(worker.tick().await, TickOutcome::Skipped { .. }));
    assert!(matches!(worker.tick().await, TickOutcome::Skipped { .. }));
    assert_eq!(counter.calls(), 1);
}

#[test_context(PgHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn cursor_survives_new_handles(ctx: &PgHarness) {
    let job = PgHarness::unique("sync-bitmagnet");

    let cursor = CursorStore::for_job(ctx.db.kv(), &job);
    assert_eq!(
        cursor.get_or("updated_at", "2020-01-01T00:00:00Z").await.unwrap(),
        "2020-01-01T00:00:00Z"
    );
    cursor.set("updated_at", "2024-06-01T00:00:00Z").await.unwrap();

    let reopened = CursorStore::for_job(ctx.db.kv(), &job);
    assert_eq!(
        reopened.get("updated_at").await.unwrap().as_deref(),
        Some("2024-06-01T00:00:00Z")
    );
}
