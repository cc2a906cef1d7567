//! The standard set of ingestion workers, wired together.
//!
//! A [`Fleet`] is built from a table of [`WorkerSpec`]s plus the executors
//! the host application registers for them. Building validates the
//! dependency graph and creates one [`JobTracker`] per tracked worker;
//! starting registers every enabled worker on one shared scheduler.
//!
//! ```ignore
//! let mut executors = ExecutorRegistry::new();
//! executors.register("sync_imdb", executor_fn(|_| async { imdb::sync().await }));
//!
//! let options = FleetOptions::builder().store(db.kv()).features(config.features).build();
//! let mut fleet = Fleet::build(standard_fleet(), executors, options)?;
//! fleet.start().await?;
//! // ...
//! fleet.shutdown().await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_cron_scheduler::JobScheduler;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use crate::clock::{Clock, SystemClock};
use crate::config::Features;
use crate::deps::DependencyGraph;
use crate::error::WorkerError;
use crate::kv::KvStore;
use crate::tracker::{retain_buckets, JobTracker};
use crate::worker::{Executor, Worker, WorkerConfig, DEFAULT_WAIT_BACKOFF};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Bucketed run tracking for one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSpec {
    /// Tracker name; records live under `job:<name>`
    pub name: String,
    /// Bucket format, also the worker's job id format
    pub format: String,
    /// Buckets older than this are evicted
    pub retention: Duration,
}

impl TrackerSpec {
    pub fn new(name: impl Into<String>, format: impl Into<String>, retention: Duration) -> Self {
        Self {
            name: name.into(),
            format: format.into(),
            retention,
        }
    }

    pub fn daily(name: impl Into<String>, retention: Duration) -> Self {
        Self::new(name, "%Y-%m-%d", retention)
    }

    pub fn hourly(name: impl Into<String>, retention: Duration) -> Self {
        Self::new(name, "%Y-%m-%d %H", retention)
    }
}

/// Static description of one worker in the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub name: String,
    pub interval: Duration,
    pub run_at_startup_after: Option<Duration>,
    /// Feature flag gating the worker; `None` means always on
    pub feature: Option<String>,
    pub tracker: Option<TrackerSpec>,
    pub waits_on: Vec<String>,
}

impl WorkerSpec {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            run_at_startup_after: None,
            feature: None,
            tracker: None,
            waits_on: Vec::new(),
        }
    }

    pub fn startup_after(mut self, delay: Duration) -> Self {
        self.run_at_startup_after = Some(delay);
        self
    }

    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    pub fn tracked(mut self, tracker: TrackerSpec) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn waits_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.waits_on.extend(deps.into_iter().map(Into::into));
        self
    }
}

/// The ingestion workers and how they depend on each other.
pub fn standard_fleet() -> Vec<WorkerSpec> {
    const IMDB_TORRENT_DEPS: [&str; 3] = ["sync_dmm_hashlist", "sync_imdb", "map_imdb_torrent"];

    vec![
        WorkerSpec::new("torrent_parser", 5 * MINUTE).waits_on(IMDB_TORRENT_DEPS),
        WorkerSpec::new("torrent_pusher", 10 * MINUTE),
        WorkerSpec::new("store_crawler", 30 * MINUTE).waits_on(IMDB_TORRENT_DEPS),
        WorkerSpec::new("sync_imdb", DAY)
            .startup_after(Duration::from_secs(30))
            .feature("imdb_title")
            .tracked(TrackerSpec::daily("sync-imdb", 7 * DAY)),
        WorkerSpec::new("sync_dmm_hashlist", 6 * HOUR)
            .startup_after(Duration::from_secs(30))
            .feature("dmm_hashlist")
            .tracked(TrackerSpec::hourly("sync-dmm-hashlist", 7 * DAY))
            .waits_on(["sync_imdb"]),
        WorkerSpec::new("map_imdb_torrent", 30 * MINUTE)
            .startup_after(Duration::from_secs(30))
            .feature("imdb_title")
            .waits_on(["sync_imdb", "sync_dmm_hashlist"]),
        WorkerSpec::new("magnet_cache_puller", 5 * MINUTE),
        WorkerSpec::new("map_anime_id", 5 * MINUTE),
        WorkerSpec::new("sync_animeapi", DAY)
            .startup_after(Duration::from_secs(45))
            .feature("anime")
            .tracked(TrackerSpec::daily("sync-animeapi", 7 * DAY))
            .waits_on(["sync_imdb"]),
        WorkerSpec::new("sync_anidb_titles", DAY)
            .startup_after(Duration::from_secs(30))
            .feature("anime")
            .tracked(TrackerSpec::daily("sync-anidb-titles", 7 * DAY)),
        WorkerSpec::new("sync_anidb_tvdb_episode_map", DAY)
            .startup_after(Duration::from_secs(45))
            .feature("anime")
            .tracked(TrackerSpec::daily("sync-anidb-tvdb-episode-map", 7 * DAY))
            .waits_on(["sync_anidb_titles"]),
        WorkerSpec::new("sync_manami_anime_database", 6 * DAY)
            .startup_after(MINUTE)
            .feature("anime")
            .tracked(TrackerSpec::daily("manami-anime-database", 6 * 7 * DAY))
            .waits_on(["sync_anidb_titles", "sync_animeapi"]),
        WorkerSpec::new("map_anidb_torrent", 30 * MINUTE)
            .startup_after(Duration::from_secs(90))
            .feature("anime")
            .waits_on([
                "sync_anidb_titles",
                "sync_anidb_tvdb_episode_map",
                "sync_animeapi",
                "sync_manami_anime_database",
            ]),
    ]
}

/// Executors by worker name. Workers without one stay disabled.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, worker: impl Into<String>, executor: Arc<dyn Executor>) -> &mut Self {
        self.executors.insert(worker.into(), executor);
        self
    }

    pub fn get(&self, worker: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(worker).cloned()
    }

    pub fn contains(&self, worker: &str) -> bool {
        self.executors.contains_key(worker)
    }
}

fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

#[derive(TypedBuilder)]
pub struct FleetOptions {
    /// Where job trackers keep their records
    pub store: Arc<dyn KvStore>,
    #[builder(default)]
    pub features: Features,
    #[builder(default = system_clock())]
    pub clock: Arc<dyn Clock>,
    #[builder(default = DEFAULT_WAIT_BACKOFF)]
    pub wait_backoff: Duration,
    #[builder(default = HOUR)]
    pub eviction_interval: Duration,
}

/// Enabled workers plus their shared graph, trackers and scheduler.
pub struct Fleet {
    graph: Arc<DependencyGraph>,
    workers: Vec<Worker>,
    trackers: HashMap<String, Arc<JobTracker>>,
    eviction_interval: Duration,
    scheduler: Option<JobScheduler>,
    sweeps: Vec<JoinHandle<()>>,
}

impl Fleet {
    /// Validate the graph and construct every enabled worker.
    ///
    /// Trackers are created for every tracked spec, enabled or not, so that
    /// records of a disabled worker can still be inspected.
    pub fn build(
        specs: Vec<WorkerSpec>,
        executors: ExecutorRegistry,
        options: FleetOptions,
    ) -> Result<Self, WorkerError> {
        let graph = Arc::new(
            specs
                .iter()
                .fold(DependencyGraph::builder(), |builder, spec| {
                    builder.waits_on(spec.name.clone(), spec.waits_on.iter().cloned())
                })
                .build()?,
        );

        let mut trackers = HashMap::new();
        let mut workers = Vec::new();

        for spec in &specs {
            let tracker = spec.tracker.as_ref().map(|t| {
                Arc::new(
                    JobTracker::new(
                        t.name.clone(),
                        options.store.clone(),
                        retain_buckets(t.format.clone(), t.retention, options.clock.clone()),
                    )
                    .with_clock(options.clock.clone()),
                )
            });
            if let Some(tracker) = &tracker {
                trackers.insert(spec.name.clone(), tracker.clone());
            }

            let feature_off = spec
                .feature
                .as_deref()
                .is_some_and(|feature| !options.features.is_enabled(feature));
            let Some(executor) = executors.get(&spec.name) else {
                if !feature_off {
                    warn!(worker = %spec.name, "no executor registered, worker disabled");
                }
                continue;
            };

            let config = WorkerConfig::builder()
                .name(spec.name.clone())
                .executor(executor)
                .interval(spec.interval)
                .disabled(feature_off)
                .job_tracker(tracker)
                .job_id_time_format(
                    spec.tracker
                        .as_ref()
                        .map(|t| t.format.clone())
                        .unwrap_or_else(|| crate::worker::DEFAULT_JOB_ID_TIME_FORMAT.to_string()),
                )
                .should_wait(graph.readiness(&spec.name))
                .on_start(graph.on_start_hook(&spec.name))
                .on_end(graph.on_end_hook(&spec.name))
                .run_at_startup_after(spec.run_at_startup_after)
                .wait_backoff(options.wait_backoff)
                .clock(options.clock.clone())
                .build();

            if let Some(worker) = Worker::new(config) {
                workers.push(worker);
            }
        }

        // Dependencies first, so their startup runs get registered first.
        let order = graph.topological_order();
        workers.sort_by_key(|w| order.iter().position(|name| name == w.name()));

        info!(
            enabled = workers.len(),
            declared = specs.len(),
            "fleet built"
        );

        Ok(Self {
            graph,
            workers,
            trackers,
            eviction_interval: options.eviction_interval,
            scheduler: None,
            sweeps: Vec::new(),
        })
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    /// Enabled workers, dependencies first.
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn worker(&self, name: &str) -> Option<&Worker> {
        self.workers.iter().find(|w| w.name() == name)
    }

    /// Tracker of a worker, by worker name.
    pub fn tracker(&self, worker: &str) -> Option<&Arc<JobTracker>> {
        self.trackers.get(worker)
    }

    pub fn is_started(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Register every enabled worker on one scheduler and start it, along
    /// with an eviction sweep per enabled tracked worker.
    pub async fn start(&mut self) -> Result<(), WorkerError> {
        if self.scheduler.is_some() {
            return Ok(());
        }

        let scheduler = JobScheduler::new().await?;
        for worker in &self.workers {
            worker.schedule(&scheduler).await?;
        }
        scheduler.start().await?;

        for worker in &self.workers {
            if let Some(tracker) = worker.job_tracker() {
                self.sweeps
                    .push(tracker.spawn_eviction_sweep(self.eviction_interval));
            }
        }

        info!(workers = self.workers.len(), "fleet started");
        self.scheduler = Some(scheduler);
        Ok(())
    }

    /// Stop scheduling new ticks. Ticks already running are left to finish.
    pub async fn shutdown(&mut self) -> Result<(), WorkerError> {
        for sweep in self.sweeps.drain(..) {
            sweep.abort();
        }
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.shutdown().await?;
            info!("fleet stopped");
        }
        Ok(())
    }
}
