//! The contract between a worker and the job it runs.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

/// What an executor knows about the run it is part of.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    name: Arc<str>,
    job_id: String,
}

impl WorkerContext {
    pub(crate) fn new(name: Arc<str>, job_id: String) -> Self {
        Self { name, job_id }
    }

    /// Name of the worker running this job.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bucket id (tracked workers) or unique run id.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

/// The body of a recurring job.
///
/// A worker never runs its executor concurrently with itself. Errors are
/// recorded as a failed run and retried on the next tick.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, ctx: &WorkerContext) -> Result<()>;
}

/// Adapter turning an async closure into an [`Executor`].
pub struct FnExecutor<F>(F);

#[async_trait]
impl<F, Fut> Executor for FnExecutor<F>
where
    F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn execute(&self, ctx: &WorkerContext) -> Result<()> {
        (self.0)(ctx.clone()).await
    }
}

/// Build an executor from an async closure.
///
/// ```ignore
/// let exec = executor_fn(|ctx| async move {
///     tracing::info!(job_id = %ctx.job_id(), "syncing");
///     Ok(())
/// });
/// ```
pub fn executor_fn<F, Fut>(f: F) -> Arc<dyn Executor>
where
    F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnExecutor(f))
}
