//! Lane queues on pgmq, one queue per lane.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read,
//! pgmq.archive. A read hides the message for the visibility timeout; the
//! worker archives it once the job is terminal. If the worker dies first the
//! message becomes visible again and is redelivered (at-least-once).

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::broker::{Delivery, LaneQueue};
use crate::error::{Error, Result};
use crate::model::{JobId, Lane};

/// A message read from a pgmq queue.
#[derive(Debug, Clone)]
pub struct PgmqMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub vt: chrono::DateTime<chrono::Utc>,
    pub message: serde_json::Value,
}

fn job_id_of(message: &serde_json::Value) -> Option<JobId> {
    message
        .get("job_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
}

/// pgmq's backing table for a lane. Lane names are fixed identifiers.
fn queue_table(lane: Lane) -> String {
    format!("pgmq.q_{}", lane.as_str())
}

impl super::Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, lane: Lane) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(lane.as_str())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Send a message to a lane. Returns the message ID.
    pub async fn send_to_queue(&self, lane: Lane, payload: &serde_json::Value) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, 0)")
            .bind(lane.as_str())
            .bind(payload)
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }

    /// Read the next visible message from a lane, hiding it for the
    /// visibility timeout. Returns None if the lane is empty.
    pub async fn read_from_queue(&self, lane: Lane) -> Result<Option<PgmqMessage>> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
            ),
        >(
            "SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.read($1, $2, 1)"
        )
        .bind(lane.as_str())
        .bind(self.visibility_timeout.as_secs() as i32)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|(msg_id, read_ct, enqueued_at, vt, message)| PgmqMessage {
            msg_id,
            read_ct,
            enqueued_at,
            vt,
            message,
        }))
    }

    /// Archive a message (moves to archive table, preserves for audit).
    pub async fn archive_message(&self, lane: Lane, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(lane.as_str())
            .bind(msg_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LaneQueue for super::Db {
    async fn push(&self, lane: Lane, job_id: JobId) -> Result<()> {
        self.send_to_queue(lane, &json!({ "job_id": job_id }))
            .await?;
        Ok(())
    }

    async fn pop(&self, lane: Lane) -> Result<Option<Delivery>> {
        let Some(msg) = self.read_from_queue(lane).await? else {
            return Ok(None);
        };
        if msg.read_ct > 1 {
            warn!(%lane, msg_id = msg.msg_id, read_ct = msg.read_ct, "message redelivered");
        }
        match job_id_of(&msg.message) {
            Some(job_id) => Ok(Some(Delivery {
                lane,
                job_id,
                receipt: msg.msg_id,
            })),
            None => {
                self.archive_message(lane, msg.msg_id).await?;
                Err(Error::Other(format!(
                    "bad message {} in lane {lane}: missing job_id",
                    msg.msg_id
                )))
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.archive_message(delivery.lane, delivery.receipt).await
    }

    async fn pending(&self, lane: Lane) -> Result<u64> {
        let sql = format!(
            "SELECT count(*) FROM {} WHERE vt <= clock_timestamp()",
            queue_table(lane)
        );
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(self.pool()).await?;
        Ok(count.max(0) as u64)
    }

    async fn purge(&self, lane: Lane) -> Result<Vec<JobId>> {
        // Only visible messages: anything hidden is in a worker's hands.
        let sql = format!(
            "DELETE FROM {} WHERE vt <= clock_timestamp() RETURNING message",
            queue_table(lane)
        );
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(&sql).fetch_all(self.pool()).await?;
        Ok(rows
            .into_iter()
            .filter_map(|(message,)| job_id_of(&message))
            .collect())
    }

    async fn close(&self) {
        self.pool().close().await;
    }
}
