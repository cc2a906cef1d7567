//! Time source used by workers, trackers and queues.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Wall clock plus sleep.
///
/// Workers never call `Utc::now()` or `tokio::time::sleep` directly so that
/// tests can swap in [`ManualClock`](crate::testing::ManualClock).
#[async_trait]
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Real time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Whether `duration` has elapsed since `since`.
pub fn has_duration_passed_since(clock: &dyn Clock, since: DateTime<Utc>, duration: Duration) -> bool {
    match chrono::Duration::from_std(duration) {
        Ok(duration) => clock.now() - since >= duration,
        Err(_) => false,
    }
}
