//! Session-scoped Postgres advisory locks.
//!
//! `pg_advisory_lock` belongs to the connection that took it, so each handle
//! checks out a dedicated pooled connection and keeps it for as long as it
//! holds at least one level. Once the depth drops back to zero the
//! connection goes back to the pool.
//!
//! The server counts nested acquisitions per session, so every successful
//! acquire is paired with exactly one `pg_advisory_unlock`.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, Postgres};
use tracing::{debug, error, warn};

use super::{key_pair, lock_name, AdvisoryLock};
use crate::error::LockError;

/// Handle on a Postgres advisory lock.
///
/// Dropping a handle that still holds levels closes its connection instead of
/// returning it to the pool; the server frees the locks with the session.
#[derive(Debug)]
pub struct PostgresAdvisoryLock {
    pool: PgPool,
    name: String,
    key_a: i32,
    key_b: i32,
    session: Option<PoolConnection<Postgres>>,
    depth: u32,
    errors: Vec<LockError>,
}

impl PostgresAdvisoryLock {
    /// Create a handle and check out its session.
    pub async fn new(pool: PgPool, names: &[&str]) -> Result<Self, LockError> {
        let name = lock_name(names);
        let (key_a, key_b) = key_pair(names);
        let session = pool.acquire().await.map_err(|source| {
            error!(name = %name, error = %source, "lock session checkout failed");
            LockError::Session {
                name: name.clone(),
                source,
            }
        })?;

        Ok(Self {
            pool,
            name,
            key_a,
            key_b,
            session: Some(session),
            depth: 0,
            errors: Vec::new(),
        })
    }

    /// The `(int4, int4)` key this handle locks.
    pub fn key(&self) -> (i32, i32) {
        (self.key_a, self.key_b)
    }

    async fn session(&mut self) -> Option<&mut PoolConnection<Postgres>> {
        if self.session.is_none() {
            match self.pool.acquire().await {
                Ok(conn) => self.session = Some(conn),
                Err(source) => {
                    error!(name = %self.name, error = %source, "lock session checkout failed");
                    self.errors.push(LockError::Session {
                        name: self.name.clone(),
                        source,
                    });
                    return None;
                }
            }
        }
        self.session.as_mut()
    }

    /// Give the session back once nothing is held on it.
    fn finish(&mut self) {
        if self.depth == 0 && self.session.take().is_some() {
            debug!(name = %self.name, "lock session returned");
        }
    }
}

#[async_trait]
impl AdvisoryLock for PostgresAdvisoryLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&mut self) -> bool {
        let (key_a, key_b) = (self.key_a, self.key_b);
        let Some(conn) = self.session().await else {
            return false;
        };

        let result = sqlx::query("SELECT pg_advisory_lock($1, $2)")
            .bind(key_a)
            .bind(key_b)
            .execute(&mut **conn)
            .await;

        match result {
            Ok(_) => {
                self.depth += 1;
                true
            }
            Err(source) => {
                error!(name = %self.name, error = %source, "acquire failed");
                self.errors.push(LockError::Acquire {
                    name: self.name.clone(),
                    source,
                });
                false
            }
        }
    }

    async fn try_acquire(&mut self) -> bool {
        let (key_a, key_b) = (self.key_a, self.key_b);
        let Some(conn) = self.session().await else {
            return false;
        };

        let result = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1, $2)")
            .bind(key_a)
            .bind(key_b)
            .fetch_one(&mut **conn)
            .await;

        match result {
            Ok(true) => {
                self.depth += 1;
                true
            }
            Ok(false) => {
                debug!(name = %self.name, depth = self.depth, "try acquire: lock busy");
                false
            }
            Err(source) => {
                error!(name = %self.name, error = %source, "try acquire failed");
                self.errors.push(LockError::Acquire {
                    name: self.name.clone(),
                    source,
                });
                false
            }
        }
    }

    async fn release(&mut self) -> bool {
        if self.depth == 0 {
            self.finish();
            return false;
        }

        let (key_a, key_b) = (self.key_a, self.key_b);
        let Some(conn) = self.session.as_mut() else {
            // Depth without a session cannot happen: the session is only
            // dropped at depth zero.
            return false;
        };

        let result = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1, $2)")
            .bind(key_a)
            .bind(key_b)
            .fetch_one(&mut **conn)
            .await;

        match result {
            Ok(true) => {
                self.depth -= 1;
                self.finish();
                true
            }
            Ok(false) => {
                warn!(name = %self.name, depth = self.depth, "release: lock was not held by this session");
                false
            }
            Err(source) => {
                error!(name = %self.name, error = %source, "release failed");
                self.errors.push(LockError::Release {
                    name: self.name.clone(),
                    source,
                });
                false
            }
        }
    }

    async fn release_all(&mut self) -> bool {
        if self.depth == 0 {
            self.finish();
            return false;
        }

        while self.depth > 0 {
            if !self.release().await {
                break;
            }
        }

        if self.depth != 0 {
            error!(name = %self.name, depth = self.depth, "release all failed");
            return false;
        }
        true
    }

    fn held(&self) -> u32 {
        self.depth
    }

    fn err(&self) -> Option<&LockError> {
        self.errors.last()
    }

    fn errors(&self) -> &[LockError] {
        &self.errors
    }
}

impl Drop for PostgresAdvisoryLock {
    fn drop(&mut self) {
        if self.depth == 0 {
            return;
        }
        if let Some(conn) = self.session.take() {
            warn!(name = %self.name, depth = self.depth, "lock dropped while held, closing session");
            // Closing the connection ends the session, which releases its
            // advisory locks server-side.
            drop(conn.detach());
        }
    }
}
