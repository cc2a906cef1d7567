//! Worker dependency graph.
//!
//! Workers declare which other workers they wait on. While any of those is
//! running, the waiting worker parks (see [`Worker`](crate::worker::Worker)).
//! The graph is checked for cycles once, at build time, so a bad edge fails
//! startup instead of deadlocking two workers forever.
//!
//! ```ignore
//! let graph = DependencyGraph::builder()
//!     .worker("sync_imdb")
//!     .waits_on("sync_dmm_hashlist", ["sync_imdb"])
//!     .waits_on("map_imdb_torrent", ["sync_imdb", "sync_dmm_hashlist"])
//!     .build()?;
//!
//! let config = WorkerConfig::builder()
//!     .should_wait(graph.readiness("map_imdb_torrent"))
//!     .on_start(graph.on_start_hook("map_imdb_torrent"))
//!     .on_end(graph.on_end_hook("map_imdb_torrent"))
//!     // ...
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::GraphError;
use crate::worker::{Hook, ShouldWait};

#[derive(Debug, Default)]
pub struct DependencyGraphBuilder {
    waits_on: BTreeMap<String, Vec<String>>,
}

impl DependencyGraphBuilder {
    /// Declare a worker with no dependencies (or add it if missing).
    pub fn worker(mut self, name: impl Into<String>) -> Self {
        self.waits_on.entry(name.into()).or_default();
        self
    }

    /// Declare that `name` waits while any of `deps` is running.
    pub fn waits_on<I, S>(mut self, name: impl Into<String>, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let edges = self.waits_on.entry(name.into()).or_default();
        for dep in deps {
            let dep = dep.into();
            if !edges.contains(&dep) {
                edges.push(dep);
            }
        }
        self
    }

    pub fn build(self) -> Result<DependencyGraph, GraphError> {
        for (worker, deps) in &self.waits_on {
            if let Some(dep) = deps.iter().find(|d| !self.waits_on.contains_key(*d)) {
                return Err(GraphError::UnknownDependency {
                    worker: worker.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        let order = topological_sort(&self.waits_on)?;
        debug!(order = ?order, "dependency graph built");

        Ok(DependencyGraph {
            waits_on: self.waits_on.into_iter().collect(),
            order,
            running: Mutex::new(HashSet::new()),
        })
    }
}

/// Kahn's algorithm. Ties are broken by name so the order is stable.
fn topological_sort(waits_on: &BTreeMap<String, Vec<String>>) -> Result<Vec<String>, GraphError> {
    let mut pending: BTreeMap<&str, usize> = waits_on
        .iter()
        .map(|(name, deps)| (name.as_str(), deps.len()))
        .collect();

    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (name, deps) in waits_on {
        for dep in deps {
            dependents.entry(dep.as_str()).or_default().push(name.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(waits_on.len());

    while let Some(name) = ready.pop_first() {
        pending.remove(name);
        order.push(name.to_string());

        for dependent in dependents.get(name).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if pending.is_empty() {
        Ok(order)
    } else {
        Err(GraphError::Cycle(
            pending.keys().map(|name| name.to_string()).collect(),
        ))
    }
}

/// Validated wait-edges plus the set of workers currently running.
#[derive(Debug)]
pub struct DependencyGraph {
    waits_on: HashMap<String, Vec<String>>,
    order: Vec<String>,
    running: Mutex<HashSet<String>>,
}

impl DependencyGraph {
    pub fn builder() -> DependencyGraphBuilder {
        DependencyGraphBuilder::default()
    }

    fn running(&self) -> MutexGuard<'_, HashSet<String>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.waits_on.contains_key(name)
    }

    /// Workers `name` waits on, in declaration order.
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.waits_on.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every worker, dependencies before dependents.
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// `(true, "<dep> is running")` for the first running dependency.
    pub fn should_wait(&self, name: &str) -> (bool, String) {
        let running = self.running();
        match self
            .dependencies(name)
            .iter()
            .find(|dep| running.contains(dep.as_str()))
        {
            Some(dep) => (true, format!("{dep} is running")),
            None => (false, String::new()),
        }
    }

    pub fn mark_running(&self, name: &str) {
        self.running().insert(name.to_string());
    }

    pub fn mark_idle(&self, name: &str) {
        self.running().remove(name);
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running().contains(name)
    }

    /// Names of running workers, sorted.
    pub fn running_workers(&self) -> Vec<String> {
        let mut names: Vec<_> = self.running().iter().cloned().collect();
        names.sort();
        names
    }

    /// Readiness predicate for `name`, for [`WorkerConfig::should_wait`](crate::worker::WorkerConfig).
    pub fn readiness(self: &Arc<Self>, name: &str) -> ShouldWait {
        let graph = Arc::clone(self);
        let name = name.to_string();
        Arc::new(move || graph.should_wait(&name))
    }

    pub fn on_start_hook(self: &Arc<Self>, name: &str) -> Hook {
        let graph = Arc::clone(self);
        let name = name.to_string();
        Arc::new(move || graph.mark_running(&name))
    }

    pub fn on_end_hook(self: &Arc<Self>, name: &str) -> Hook {
        let graph = Arc::clone(self);
        let name = name.to_string();
        Arc::new(move || graph.mark_idle(&name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imdb_graph() -> Arc<DependencyGraph> {
        Arc::new(
            DependencyGraph::builder()
                .worker("sync_imdb")
                .waits_on("sync_dmm_hashlist", ["sync_imdb"])
                .waits_on("map_imdb_torrent", ["sync_imdb", "sync_dmm_hashlist"])
                .worker("torrent_pusher")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_topological_order_puts_dependencies_first() {
        let graph = imdb_graph();
        let order = graph.topological_order();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();

        assert_eq!(order.len(), 4);
        assert!(pos("sync_imdb") < pos("sync_dmm_hashlist"));
        assert!(pos("sync_dmm_hashlist") < pos("map_imdb_torrent"));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = DependencyGraph::builder()
            .waits_on("a", ["b"])
            .waits_on("b", ["c"])
            .waits_on("c", ["a"])
            .worker("d")
            .build()
            .unwrap_err();

        match err {
            GraphError::Cycle(names) => assert_eq!(names, vec!["a", "b", "c"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_edge_is_a_cycle() {
        let err = DependencyGraph::builder()
            .waits_on("a", ["a"])
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::Cycle(names) if names == vec!["a"]));
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let err = DependencyGraph::builder()
            .waits_on("map_imdb_torrent", ["sync_imbd"])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::UnknownDependency { ref dependency, .. } if dependency == "sync_imbd"
        ));
    }

    #[test]
    fn test_should_wait_reports_first_running_dependency() {
        let graph = imdb_graph();
        assert_eq!(graph.should_wait("map_imdb_torrent"), (false, String::new()));

        graph.mark_running("sync_dmm_hashlist");
        assert_eq!(
            graph.should_wait("map_imdb_torrent"),
            (true, "sync_dmm_hashlist is running".to_string())
        );

        graph.mark_running("sync_imdb");
        assert_eq!(
            graph.should_wait("map_imdb_torrent"),
            (true, "sync_imdb is running".to_string())
        );

        // Independent workers are never gated.
        assert!(!graph.should_wait("torrent_pusher").0);

        graph.mark_idle("sync_imdb");
        graph.mark_idle("sync_dmm_hashlist");
        assert!(!graph.should_wait("map_imdb_torrent").0);
    }

    #[test]
    fn test_hooks_toggle_running_flag() {
        let graph = imdb_graph();
        let readiness = graph.readiness("sync_dmm_hashlist");

        graph.on_start_hook("sync_imdb")();
        assert!(graph.is_running("sync_imdb"));
        assert_eq!(readiness(), (true, "sync_imdb is running".to_string()));
        assert_eq!(graph.running_workers(), vec!["sync_imdb"]);

        graph.on_end_hook("sync_imdb")();
        assert!(!graph.is_running("sync_imdb"));
        assert!(!readiness().0);
    }

    #[test]
    fn test_duplicate_edges_are_collapsed() {
        let graph = DependencyGraph::builder()
            .worker("a")
            .waits_on("b", ["a", "a"])
            .waits_on("b", ["a"])
            .build()
            .unwrap();
        assert_eq!(graph.dependencies("b"), ["a".to_string()]);
        assert!(graph.dependencies("missing").is_empty());
    }
}
