//! Named advisory locks.
//!
//! Two interchangeable backends:
//! - [`InProcessLock`] - per-name state in a process-wide [`LockRegistry`],
//!   for embedded single-node deployments
//! - [`PostgresAdvisoryLock`] - session-scoped `pg_advisory_lock`, for nodes
//!   sharing one Postgres database
//!
//! Each handle is its own holder. Acquiring twice through one handle nests
//! (the handle keeps a depth counter); a second handle on the same name
//! contends with the first.
//!
//! # Example
//!
//! ```ignore
//! let token = db
//!     .with_lock(&["oauth", "token", &token_id], || async {
//!         // re-read, refresh if still stale, save
//!         refresh_token(&token_id).await
//!     })
//!     .await??;
//! ```

pub mod memory;
pub mod postgres;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::LockError;

pub use memory::{InProcessLock, LockRegistry};
pub use postgres::PostgresAdvisoryLock;

/// Namespace mixed into every distributed lock key, keeping our keys apart
/// from advisory locks taken by unrelated applications on the same database.
pub const LOCK_NAMESPACE: &str = "COORDINATOR";

/// A named, reentrant mutual-exclusion handle.
#[async_trait]
pub trait AdvisoryLock: Send {
    /// Display name (segments joined with `:`).
    fn name(&self) -> &str;

    /// Block until acquired or give up. Returns whether the lock is now held.
    async fn acquire(&mut self) -> bool;

    /// Acquire without waiting. Returns `false` on contention.
    async fn try_acquire(&mut self) -> bool;

    /// Release one level. Returns `true` if a level was released.
    async fn release(&mut self) -> bool;

    /// Release every level held by this handle.
    async fn release_all(&mut self) -> bool;

    /// Current nesting depth held by this handle.
    fn held(&self) -> u32;

    /// Most recent acquire/release I/O error.
    fn err(&self) -> Option<&LockError>;

    /// Every acquire/release I/O error seen by this handle, oldest first.
    fn errors(&self) -> &[LockError];
}

/// Retry policy for backends that cannot block natively.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub acquire_attempts: u32,
    pub acquire_retry_delay: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            acquire_attempts: 5,
            acquire_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Join name segments into the display name.
pub fn lock_name(names: &[&str]) -> String {
    names.join(":")
}

/// Derive the two-integer key used by `pg_advisory_lock(int4, int4)`.
///
/// The first half is fixed for the whole process (the namespace), the second
/// is a checksum of the name segments. Segments are joined with NUL so that
/// `["a:b"]` and `["a", "b"]` hash differently.
pub fn key_pair(names: &[&str]) -> (i32, i32) {
    (checksum(LOCK_NAMESPACE.as_bytes()), checksum(names.join("\0").as_bytes()))
}

fn checksum(bytes: &[u8]) -> i32 {
    let digest = Sha256::digest(bytes);
    i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Run `f` while holding `lock`, releasing every level afterwards.
///
/// Cleanup also runs when acquisition fails, so a Postgres handle always gives
/// its session back.
pub async fn with_lock<L, F, Fut, T>(lock: &mut L, f: F) -> Result<T, LockError>
where
    L: AdvisoryLock + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    if !lock.acquire().await {
        lock.release_all().await;
        return Err(LockError::NotAcquired {
            name: lock.name().to_string(),
        });
    }

    let out = f().await;
    lock.release_all().await;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_key_pair_is_deterministic() {
        let a = key_pair(&["oauth", "token", "abc"]);
        let b = key_pair(&["oauth", "token", "abc"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_pair_shares_namespace_half() {
        let (ns_a, _) = key_pair(&["a"]);
        let (ns_b, _) = key_pair(&["b"]);
        assert_eq!(ns_a, ns_b);
    }

    #[test]
    fn test_segment_boundaries_matter() {
        assert_ne!(key_pair(&["a:b"]), key_pair(&["a", "b"]));
        assert_eq!(lock_name(&["a", "b"]), "a:b");
    }

    #[test]
    fn test_distinct_names_have_distinct_keys() {
        // 10k names in a 32-bit space expect ~0.01 collisions; a single one
        // is within the accepted birthday bound, more means a broken hash.
        let mut seen = HashSet::new();
        let mut collisions = 0;
        for i in 0..10_000 {
            let id = format!("client-{i}");
            let (_, key) = key_pair(&["oauth", "token:client-credentials", &id]);
            if !seen.insert(key) {
                collisions += 1;
            }
        }
        assert!(collisions <= 1, "{collisions} collisions");
    }
}
