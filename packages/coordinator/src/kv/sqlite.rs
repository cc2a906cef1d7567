//! SQLite key-value storage.
//!
//! Used for embedded single-node deployments, where the in-process advisory
//! lock backend is sufficient.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;

use super::{KvEntry, KvStore};
use crate::error::Result;

/// SQLite-backed key-value store over the `kv_entry` table.
#[derive(Debug, Clone)]
pub struct SqliteKvStore {
    pool: SqlitePool,
}

impl SqliteKvStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, scope: &str, key: &str) -> Result<Option<KvEntry>> {
        let entry = sqlx::query_as::<_, KvEntry>(
            r#"
            SELECT key, value, created_at, updated_at
            FROM kv_entry
            WHERE scope = ? AND key = ?
            "#,
        )
        .bind(scope)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn set(&self, scope: &str, key: &str, value: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO kv_entry (scope, key, value, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (scope, key) DO UPDATE
            SET value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(scope)
        .bind(key)
        .bind(value)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, scope: &str, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv_entry WHERE scope = ? AND key = ?")
            .bind(scope)
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, scope: &str) -> Result<Vec<KvEntry>> {
        let entries = sqlx::query_as::<_, KvEntry>(
            r#"
            SELECT key, value, created_at, updated_at
            FROM kv_entry
            WHERE scope = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn last(&self, scope: &str) -> Result<Option<KvEntry>> {
        let entry = sqlx::query_as::<_, KvEntry>(
            r#"
            SELECT key, value, created_at, updated_at
            FROM kv_entry
            WHERE scope = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }
}
