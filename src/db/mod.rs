//! Postgres backend: connection pool, migrations, health check.
//!
//! One pool serves both capabilities: the `kv_entries` table implements
//! [`crate::broker::KeyValueStore`] and pgmq queues (one per lane) implement
//! [`crate::broker::LaneQueue`].

pub mod kv;
pub mod pgmq;

use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::Lane;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool shared across all modules.
pub struct Db {
    pool: PgPool,
    /// How long a popped lane message stays invisible before redelivery.
    visibility_timeout: Duration,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    ///
    /// `visibility_timeout` should exceed the task timeout so that a message is
    /// only redelivered when its worker is gone.
    pub async fn connect(url: &str, visibility_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self {
            pool,
            visibility_timeout,
        })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Create the pgmq queue for every lane (idempotent).
    pub async fn create_lanes(&self) -> Result<()> {
        for lane in Lane::PRIORITY_ORDER {
            self.create_queue(lane).await?;
        }
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
