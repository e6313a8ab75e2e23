//! Key/value operations on the `kv_entries` table.
//!
//! Expiry is passive: an expired row is invisible to reads and is replaced by
//! the next conditional set on its key. Nothing sweeps the table.

use std::time::Duration;

use async_trait::async_trait;

use crate::broker::KeyValueStore;
use crate::error::Result;

#[async_trait]
impl KeyValueStore for super::Db {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        // The row lock taken by ON CONFLICT serializes concurrent claimers:
        // exactly one insert or expired-row takeover can return a row.
        let won: Option<(String,)> = sqlx::query_as(
            "INSERT INTO kv_entries (key, value, expires_at)
             VALUES ($1, $2, now() + make_interval(secs => $3::float8))
             ON CONFLICT (key) DO UPDATE
                 SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
                 WHERE kv_entries.expires_at IS NOT NULL AND kv_entries.expires_at <= now()
             RETURNING key",
        )
        .bind(key)
        .bind(value)
        .bind(ttl.as_secs_f64())
        .fetch_optional(self.pool())
        .await?;
        Ok(won.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM kv_entries
             WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv_entries (key, value, expires_at)
             VALUES ($1, $2, now() + make_interval(secs => $3::float8))
             ON CONFLICT (key) DO UPDATE
                 SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(ttl.map(|ttl| ttl.as_secs_f64()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        // The WHERE clause is evaluated under the row lock, so a write that
        // lands between our read and this update makes it a no-op.
        let rows = sqlx::query(
            "UPDATE kv_entries
             SET value = $3, expires_at = now() + make_interval(secs => $4::float8)
             WHERE key = $1 AND value = $2 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(key)
        .bind(expected)
        .bind(value)
        .bind(ttl.map(|ttl| ttl.as_secs_f64()))
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE kv_entries SET expires_at = now() + make_interval(secs => $2::float8)
             WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(key)
        .bind(ttl.as_secs_f64())
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let row: Option<(bool,)> = sqlx::query_as(
            "DELETE FROM kv_entries WHERE key = $1
             RETURNING (expires_at IS NULL OR expires_at > now())",
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.is_some_and(|(live,)| live))
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        let rows = sqlx::query(
            "DELETE FROM kv_entries
             WHERE key = $1 AND value = $2 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(key)
        .bind(expected)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    async fn ping(&self) -> Result<()> {
        self.health_check().await
    }

    async fn close(&self) {
        self.pool().close().await;
    }
}
