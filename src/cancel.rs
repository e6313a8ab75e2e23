//! Cooperative cancellation.
//!
//! A cancellation request sets a flag `cancel:{id}` in the key/value store.
//! The flag is never unset, and it lives in the store rather than in process
//! memory so a restarted worker still observes it. Workers consult the flag
//! through a [`CancelToken`] at task-defined checkpoints, so a request takes
//! effect within one checkpoint interval, not instantly: a task blocked on a
//! slow step between checkpoints keeps running until it reaches the next one.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tracing::info;

use crate::broker::KeyValueStore;
use crate::error::Result;
use crate::model::JobId;
use crate::registry::Registry;
use crate::telemetry::metrics;

fn cancel_key(id: JobId) -> String {
    format!("cancel:{id}")
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Flag set; the job will stop at its next checkpoint.
    Accepted,
    /// Unknown or expired job id.
    NotFound,
    /// The job already finished, failed or was cancelled. Nothing changed.
    AlreadyTerminal,
}

impl CancelOutcome {
    fn as_str(self) -> &'static str {
        match self {
            CancelOutcome::Accepted => "accepted",
            CancelOutcome::NotFound => "not_found",
            CancelOutcome::AlreadyTerminal => "already_terminal",
        }
    }
}

/// Records cancellation requests and hands out read-only tokens.
#[derive(Clone)]
pub struct CancelCoordinator {
    store: Arc<dyn KeyValueStore>,
    registry: Registry,
}

impl CancelCoordinator {
    pub fn new(store: Arc<dyn KeyValueStore>, registry: Registry) -> Self {
        Self { store, registry }
    }

    /// Request cancellation of a queued or started job.
    pub async fn request_cancel(&self, id: JobId) -> Result<CancelOutcome> {
        let outcome = match self.registry.find(id).await? {
            None => CancelOutcome::NotFound,
            Some(job) if job.status.is_terminal() => CancelOutcome::AlreadyTerminal,
            Some(_) => {
                self.store.set(&cancel_key(id), "1", None).await?;
                // The job may have ended between the read and the write; the
                // flag must not outlive the record.
                if let Some(job) = self.registry.find(id).await? {
                    if let Some(retention) = self.registry.retention(job.status) {
                        self.settle(id, retention).await?;
                    }
                }
                info!(job_id = %id, "cancellation requested");
                CancelOutcome::Accepted
            }
        };

        metrics::cancel_requests().add(1, &[KeyValue::new("result", outcome.as_str())]);
        Ok(outcome)
    }

    /// Whether cancellation has been requested for `id`.
    pub async fn is_requested(&self, id: JobId) -> Result<bool> {
        Ok(self.store.get(&cancel_key(id)).await?.is_some())
    }

    /// A read-only view of the flag for one job.
    pub fn token(&self, id: JobId) -> CancelToken {
        CancelToken {
            store: Arc::clone(&self.store),
            job_id: id,
        }
    }

    /// Give an existing flag the same remaining lifetime as its terminal record.
    pub(crate) async fn settle(&self, id: JobId, retention: Duration) -> Result<()> {
        self.store.expire(&cancel_key(id), retention).await?;
        Ok(())
    }
}

/// Read-only cancellation flag for one job, backed by the store.
#[derive(Clone)]
pub struct CancelToken {
    store: Arc<dyn KeyValueStore>,
    job_id: JobId,
}

impl CancelToken {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub async fn is_cancelled(&self) -> Result<bool> {
        Ok(self.store.get(&cancel_key(self.job_id)).await?.is_some())
    }
}
