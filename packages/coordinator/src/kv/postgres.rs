//! PostgreSQL key-value storage for shared multi-node deployments.

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use super::{KvEntry, KvStore};
use crate::error::Result;

/// Postgres-backed key-value store over the `kv_entry` table.
#[derive(Debug, Clone)]
pub struct PostgresKvStore {
    pool: PgPool,
}

impl PostgresKvStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for PostgresKvStore {
    async fn get(&self, scope: &str, key: &str) -> Result<Option<KvEntry>> {
        let entry = sqlx::query_as::<_, KvEntry>(
            r#"
            SELECT key, value, created_at, updated_at
            FROM kv_entry
            WHERE scope = $1 AND key = $2
            "#,
        )
        .bind(scope)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn set(&self, scope: &str, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_entry (scope, key, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (scope, key) DO UPDATE
            SET value = EXCLUDED.value,
                updated_at = NOW()
            "#,
        )
        .bind(scope)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, scope: &str, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv_entry WHERE scope = $1 AND key = $2")
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
            WHERE scope = $1
            ORDER BY created_at ASC, key ASC
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
            WHERE scope = $1
            ORDER BY created_at DESC, key DESC
            LIMIT 1
            "#,
        )
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }
}
