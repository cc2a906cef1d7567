//! Recurring workers.
//!
//! A `Worker` wraps one [`Executor`] with the coordination rules every
//! ingestion job shares:
//!
//! - never run concurrently with itself
//! - park while a dependency reports itself running
//! - run at most once per job-id bucket when a [`JobTracker`] is attached
//! - contain executor errors and panics, recording them as `failed`
//!
//! # Tick flow
//!
//! ```text
//! tick()
//!   │
//!   ├─► in flight?            → InFlight
//!   ├─► should_wait loop      (sleep wait_backoff, re-check)
//!   ├─► on_start              (on_end guaranteed from here on)
//!   ├─► job id                (bucket from clock, or fresh UUIDv7)
//!   ├─► tracker: done/started → Skipped, else write started
//!   ├─► execute               (catch_unwind)
//!   └─► write done / failed   → Completed / Failed
//! ```

mod executor;
mod panic;

use std::fmt::Write as _;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::FutureExt;
use tokio_cron_scheduler::{Job as ScheduledJob, JobScheduler};
use tracing::{debug, error, info, info_span, Instrument};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::WorkerError;
use crate::tracker::{JobStatus, JobTracker};

pub use executor::{executor_fn, Executor, FnExecutor, WorkerContext};

/// Readiness predicate: `(should_wait, reason)`. Polled every backoff
/// interval while it reports `true`, so it must be cheap.
pub type ShouldWait = Arc<dyn Fn() -> (bool, String) + Send + Sync>;

/// Lifecycle hook run around each executed tick.
pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// Hourly buckets.
pub const DEFAULT_JOB_ID_TIME_FORMAT: &str = "%Y-%m-%d %H";

pub const DEFAULT_WAIT_BACKOFF: Duration = Duration::from_secs(5 * 60);

pub fn never_wait() -> ShouldWait {
    Arc::new(|| (false, String::new()))
}

pub fn noop_hook() -> Hook {
    Arc::new(|| {})
}

fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Everything needed to build a [`Worker`].
///
/// ```ignore
/// let config = WorkerConfig::builder()
///     .name("sync_imdb")
///     .executor(executor_fn(|ctx| async move { sync(ctx.job_id()).await }))
///     .interval(Duration::from_secs(24 * 60 * 60))
///     .job_tracker(Some(tracker))
///     .job_id_time_format("%Y-%m-%d")
///     .run_at_startup_after(Some(Duration::from_secs(30)))
///     .build();
/// ```
#[derive(TypedBuilder)]
pub struct WorkerConfig {
    #[builder(setter(into))]
    pub name: String,
    pub executor: Arc<dyn Executor>,
    pub interval: Duration,
    /// Disabled workers are never constructed
    #[builder(default)]
    pub disabled: bool,
    #[builder(default)]
    pub job_tracker: Option<Arc<JobTracker>>,
    /// chrono format turning "now" into the current bucket id
    #[builder(default = DEFAULT_JOB_ID_TIME_FORMAT.to_string(), setter(into))]
    pub job_id_time_format: String,
    #[builder(default = never_wait())]
    pub should_wait: ShouldWait,
    #[builder(default = noop_hook())]
    pub on_start: Hook,
    #[builder(default = noop_hook())]
    pub on_end: Hook,
    /// One extra run this long after scheduling, besides the interval
    #[builder(default)]
    pub run_at_startup_after: Option<Duration>,
    #[builder(default = DEFAULT_WAIT_BACKOFF)]
    pub wait_backoff: Duration,
    #[builder(default = system_clock())]
    pub clock: Arc<dyn Clock>,
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A previous tick of this worker is still running.
    InFlight,
    /// The bucket is already done, or started by a run that never finished.
    Skipped { job_id: String, status: JobStatus },
    Completed { job_id: String },
    Failed { job_id: String, error: String },
}

struct WorkerInner {
    name: Arc<str>,
    executor: Arc<dyn Executor>,
    interval: Duration,
    job_tracker: Option<Arc<JobTracker>>,
    job_id_time_format: String,
    should_wait: ShouldWait,
    on_start: Hook,
    on_end: Hook,
    run_at_startup_after: Option<Duration>,
    wait_backoff: Duration,
    clock: Arc<dyn Clock>,
    in_flight: AtomicBool,
}

/// A named recurring job. Cheap to clone; clones share the in-flight flag.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.inner.name)
            .field("interval", &self.inner.interval)
            .field("tracked", &self.inner.job_tracker.is_some())
            .finish()
    }
}

/// Clears the in-flight flag when the tick ends, however it ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct OnEnd(Hook);

impl Drop for OnEnd {
    fn drop(&mut self) {
        (self.0)();
    }
}

impl Worker {
    /// Build a worker, or `None` if the config is disabled.
    pub fn new(config: WorkerConfig) -> Option<Self> {
        if config.disabled {
            debug!(worker = %config.name, "worker disabled");
            return None;
        }

        panic::install_backtrace_hook();

        Some(Self {
            inner: Arc::new(WorkerInner {
                name: config.name.into(),
                executor: config.executor,
                interval: config.interval,
                job_tracker: config.job_tracker,
                job_id_time_format: config.job_id_time_format,
                should_wait: config.should_wait,
                on_start: config.on_start,
                on_end: config.on_end,
                run_at_startup_after: config.run_at_startup_after,
                wait_backoff: config.wait_backoff,
                clock: config.clock,
                in_flight: AtomicBool::new(false),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn run_at_startup_after(&self) -> Option<Duration> {
        self.inner.run_at_startup_after
    }

    pub fn job_tracker(&self) -> Option<&Arc<JobTracker>> {
        self.inner.job_tracker.as_ref()
    }

    /// Whether a tick is currently running.
    pub fn is_running(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Run one tick. Never panics because of the executor.
    pub async fn tick(&self) -> TickOutcome {
        let Some(_flight) = FlightGuard::enter(&self.inner.in_flight) else {
            debug!(worker = %self.inner.name, "previous run still in progress, skipping tick");
            return TickOutcome::InFlight;
        };

        let span = info_span!("worker", name = %self.inner.name);
        self.run_tick().instrument(span).await
    }

    async fn run_tick(&self) -> TickOutcome {
        let inner = &self.inner;

        loop {
            let (wait, reason) = (inner.should_wait)();
            if !wait {
                break;
            }
            info!(
                reason = %reason,
                backoff_secs = inner.wait_backoff.as_secs(),
                "waiting for dependencies"
            );
            inner.clock.sleep(inner.wait_backoff).await;
        }

        (inner.on_start)();
        let _on_end = OnEnd(inner.on_end.clone());

        let job_id = match self.job_id() {
            Ok(id) => id,
            Err(e) => {
                error!(format = %inner.job_id_time_format, error = %e, "cannot compute job id");
                return TickOutcome::Failed {
                    job_id: String::new(),
                    error: e.to_string(),
                };
            }
        };

        if let Some(tracker) = &inner.job_tracker {
            match tracker.get(&job_id).await {
                Ok(Some(job)) if matches!(job.status, JobStatus::Done | JobStatus::Started) => {
                    info!(job_id = %job_id, status = %job.status, "job already done or started, skipping");
                    return TickOutcome::Skipped {
                        job_id,
                        status: job.status,
                    };
                }
                Ok(_) => {}
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "failed to read job status");
                    return TickOutcome::Failed {
                        job_id,
                        error: e.to_string(),
                    };
                }
            }

            if let Err(e) = tracker.set(&job_id, JobStatus::Started, None, ()).await {
                error!(job_id = %job_id, error = %e, "failed to mark job started");
                return TickOutcome::Failed {
                    job_id,
                    error: e.to_string(),
                };
            }
        }

        info!(job_id = %job_id, "job started");

        let ctx = WorkerContext::new(inner.name.clone(), job_id.clone());
        let result = match self.execute(&ctx).await {
            Ok(()) => match &inner.job_tracker {
                Some(tracker) => tracker
                    .set(&job_id, JobStatus::Done, None, ())
                    .await
                    .map_err(|e| anyhow!(e).context("failed to mark job done")),
                None => Ok(()),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(job_id = %job_id, "job done");
                TickOutcome::Completed { job_id }
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(job_id = %job_id, error = %message, "job failed");

                if let Some(tracker) = &inner.job_tracker {
                    if let Err(e) = tracker
                        .set(&job_id, JobStatus::Failed, Some(&message), ())
                        .await
                    {
                        error!(job_id = %job_id, error = %e, "failed to mark job failed");
                    }
                }

                TickOutcome::Failed {
                    job_id,
                    error: message,
                }
            }
        }
    }

    /// Run the executor, turning a panic into an error.
    async fn execute(&self, ctx: &WorkerContext) -> anyhow::Result<()> {
        match AssertUnwindSafe(panic::capture_backtraces(self.inner.executor.execute(ctx)))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                let message = panic::panic_message(payload.as_ref());
                let stack = panic::take_backtrace().unwrap_or_default();
                error!(job_id = %ctx.job_id(), panic = %message, stack = %stack, "worker panicked");
                Err(anyhow!("worker panicked: {message}"))
            }
        }
    }

    fn job_id(&self) -> anyhow::Result<String> {
        if self.inner.job_tracker.is_none() {
            return Ok(Uuid::now_v7().to_string());
        }

        let mut id = String::new();
        write!(id, "{}", self.inner.clock.now().format(&self.inner.job_id_time_format))
            .map_err(|_| anyhow!("invalid job id format {:?}", self.inner.job_id_time_format))?;
        Ok(id)
    }

    /// Register this worker on `scheduler`: a repeated job every `interval`,
    /// plus a one-shot run after `run_at_startup_after` when set.
    pub async fn schedule(&self, scheduler: &JobScheduler) -> Result<Vec<Uuid>, WorkerError> {
        let mut ids = Vec::with_capacity(2);

        let worker = self.clone();
        let recurring = ScheduledJob::new_repeated_async(self.inner.interval, move |_uuid, _lock| {
            let worker = worker.clone();
            Box::pin(async move {
                worker.tick().await;
            })
        })?;
        ids.push(scheduler.add(recurring).await?);

        if let Some(delay) = self.inner.run_at_startup_after {
            let worker = self.clone();
            let startup = ScheduledJob::new_one_shot_async(delay, move |_uuid, _lock| {
                let worker = worker.clone();
                Box::pin(async move {
                    worker.tick().await;
                })
            })?;
            ids.push(scheduler.add(startup).await?);
        }

        info!(
            worker = %self.inner.name,
            interval_secs = self.inner.interval.as_secs(),
            startup_delay_secs = ?self.inner.run_at_startup_after.map(|d| d.as_secs()),
            "worker scheduled"
        );

        Ok(ids)
    }
}
