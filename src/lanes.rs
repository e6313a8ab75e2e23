//! Lane routing and queue administration.
//!
//! Two fixed lanes, `high` and `default`. A worker's fetch checks `high` first
//! and falls back to `default` only if `high` is empty at that instant. This is
//! soft priority, not preemption: a worker that has just seen `high` empty may
//! start on a `default` job a moment before a new `high` job arrives, and a
//! steady stream of `high` work can starve `default`.

use std::sync::Arc;

use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{info, warn};

use crate::broker::{Broker, Delivery, LaneQueue};
use crate::config::JobSettings;
use crate::error::Result;
use crate::keys::KeyManager;
use crate::model::{Lane, Status};
use crate::registry::Registry;
use crate::telemetry::metrics;

fn record_lane_op(lane: Lane, operation: &'static str) {
    metrics::lane_operations().add(
        1,
        &[
            KeyValue::new("lane", lane.as_str()),
            KeyValue::new("operation", operation),
        ],
    );
}

/// Pops lanes in priority order.
#[derive(Clone)]
pub struct LaneRouter {
    lanes: Arc<dyn LaneQueue>,
}

impl LaneRouter {
    pub fn new(lanes: Arc<dyn LaneQueue>) -> Self {
        Self { lanes }
    }

    /// Next entry to run: from `high` if it has one, else from `default`.
    pub async fn next(&self) -> Result<Option<Delivery>> {
        for lane in Lane::PRIORITY_ORDER {
            if let Some(delivery) = self.lanes.pop(lane).await? {
                record_lane_op(lane, "pop");
                return Ok(Some(delivery));
            }
        }
        Ok(None)
    }

    pub async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.lanes.ack(delivery).await?;
        record_lane_op(delivery.lane, "ack");
        Ok(())
    }
}

/// Pending entries in one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LaneCount {
    #[serde(rename = "name")]
    pub lane: Lane,
    #[serde(rename = "count")]
    pub pending: u64,
}

/// Outcome of a purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    #[serde(rename = "queue")]
    pub lane: Lane,
    pub purged: usize,
}

/// Read-only lane inspection and destructive purge of waiting entries.
#[derive(Clone)]
pub struct QueueAdmin {
    lanes: Arc<dyn LaneQueue>,
    registry: Registry,
    keys: KeyManager,
}

impl QueueAdmin {
    pub fn new(broker: &Broker, settings: JobSettings) -> Self {
        Self {
            lanes: Arc::clone(&broker.lanes),
            registry: Registry::new(Arc::clone(&broker.store), settings),
            keys: KeyManager::new(Arc::clone(&broker.store)),
        }
    }

    pub async fn list_lanes(&self) -> Result<Vec<LaneCount>> {
        let mut counts = Vec::with_capacity(Lane::PRIORITY_ORDER.len());
        for lane in [Lane::Default, Lane::High] {
            counts.push(LaneCount {
                lane,
                pending: self.lanes.pending(lane).await?,
            });
        }
        Ok(counts)
    }

    /// Remove every entry still waiting in `lane`.
    ///
    /// Jobs already popped by a worker are unaffected and run to their normal
    /// end. Each purged job is finalized `cancelled` and its claim released,
    /// so pollers see a terminal state and the fingerprint can be resubmitted.
    pub async fn purge(&self, lane: &str) -> Result<PurgeReport> {
        let lane: Lane = lane.parse()?;
        let purged = self.lanes.purge(lane).await?;
        record_lane_op(lane, "purge");

        for &id in &purged {
            let job = match self.registry.find(id).await {
                Ok(Some(job)) if job.status == Status::Queued => job,
                Ok(_) => continue,
                Err(e) => {
                    warn!(job_id = %id, error = %e, "purged job could not be read");
                    continue;
                }
            };
            if let Err(e) = self.registry.cancel(id, "purged").await {
                warn!(job_id = %id, error = %e, "purged job could not be finalized");
                continue;
            }
            if let Some(fp) = &job.fingerprint {
                if let Err(e) = self.keys.release(fp, id).await {
                    warn!(job_id = %id, error = %e, "purged job claim left to expire");
                }
            }
        }

        info!(%lane, purged = purged.len(), "lane purged");
        Ok(PurgeReport {
            lane,
            purged: purged.len(),
        })
    }
}
