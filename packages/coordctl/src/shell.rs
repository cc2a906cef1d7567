//! Executors backed by shell commands.
//!
//! `WORKER_SYNC_IMDB_COMMAND="./bin/import-imdb"` makes `sync_imdb` run that
//! command on every tick that is not skipped. The command sees `JOB_ID` and
//! `WORKER_NAME` in its environment; a non-zero exit marks the job failed.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use coordinator::{Executor, ExecutorRegistry, WorkerContext, WorkerSpec};
use tokio::process::Command;
use tracing::{debug, info};

/// Env var holding the command for `worker`.
pub fn command_var(worker: &str) -> String {
    format!("WORKER_{}_COMMAND", worker.to_uppercase())
}

pub struct ShellExecutor {
    command: String,
}

impl ShellExecutor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn execute(&self, ctx: &WorkerContext) -> Result<()> {
        debug!(command = %self.command, "spawning worker command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("JOB_ID", ctx.job_id())
            .env("WORKER_NAME", ctx.name())
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to spawn `{}`", self.command))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = stderr.lines().last().unwrap_or_default().trim().to_string();
        Err(anyhow!("`{}` exited with {}: {}", self.command, output.status, tail))
    }
}

/// One shell executor per spec whose command variable is set.
pub fn registry_from_env(specs: &[WorkerSpec], lookup: impl Fn(&str) -> Option<String>) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    for spec in specs {
        if let Some(command) = lookup(&command_var(&spec.name)).filter(|c| !c.trim().is_empty()) {
            info!(worker = %spec.name, command = %command, "registered shell executor");
            registry.register(spec.name.clone(), Arc::new(ShellExecutor::new(command)));
        }
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator::standard_fleet;
    use coordinator::testing::ManualClock;
    use coordinator::{Clock, TickOutcome, Worker, WorkerConfig};
    use std::time::Duration;

    fn worker(command: &str) -> Worker {
        Worker::new(
            WorkerConfig::builder()
                .name("sync_imdb")
                .executor(Arc::new(ShellExecutor::new(command)) as Arc<dyn Executor>)
                .interval(Duration::from_secs(60))
                .clock(Arc::new(ManualClock::new()) as Arc<dyn Clock>)
                .build(),
        )
        .unwrap()
    }

    #[test]
    fn test_command_var_name() {
        assert_eq!(command_var("sync_imdb"), "WORKER_SYNC_IMDB_COMMAND");
    }

    #[test]
    fn test_registry_only_has_configured_workers() {
        let registry = registry_from_env(&standard_fleet(), |key| match key {
            "WORKER_SYNC_IMDB_COMMAND" => Some("true".to_string()),
            "WORKER_TORRENT_PUSHER_COMMAND" => Some("  ".to_string()),
            _ => None,
        });
        assert!(registry.contains("sync_imdb"));
        assert!(!registry.contains("torrent_pusher"));
        assert!(!registry.contains("map_anime_id"));
    }

    #[tokio::test]
    async fn test_exit_status_maps_to_outcome() {
        assert!(matches!(worker("exit 0").tick().await, TickOutcome::Completed { .. }));

        match worker("echo 'dataset unavailable' >&2; exit 3").tick().await {
            TickOutcome::Failed { error, .. } => {
                assert!(error.contains("dataset unavailable"), "{error}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_command_sees_job_env() {
        let outcome = worker(r#"test "$WORKER_NAME" = sync_imdb && test -n "$JOB_ID""#)
            .tick()
            .await;
        assert!(matches!(outcome, TickOutcome::Completed { .. }));
    }
}
