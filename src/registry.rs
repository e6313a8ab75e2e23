//! Job registry: the canonical record of each job's state, progress and result.
//!
//! Records live in the key/value store under `job:{id}`. Non-terminal records
//! have no expiry; the terminal transition stamps a retention TTL
//! (`result_ttl` for finished, `failure_ttl` for failed or cancelled) after
//! which the store drops the record and reads return `NotFound`.
//!
//! Mutation is reserved to the worker that owns the job. Callers only read.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::debug;

use crate::broker::KeyValueStore;
use crate::config::JobSettings;
use crate::error::{Error, Result};
use crate::model::{ErrorKind, Job, JobError, JobId, Progress, Status};
use crate::telemetry::metrics;

/// Attempts at a conditional record update before giving up.
const UPDATE_ATTEMPTS: usize = 3;

pub(crate) fn job_key(id: JobId) -> String {
    format!("job:{id}")
}

/// Validate a state transition, returning an error if disallowed.
fn validate_transition(from: Status, to: Status) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn KeyValueStore>,
    settings: JobSettings,
}

impl Registry {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: JobSettings) -> Self {
        Self { store, settings }
    }

    /// How long a record in `status` stays readable. None while non-terminal.
    pub fn retention(&self, status: Status) -> Option<Duration> {
        match status {
            Status::Finished => Some(self.settings.result_ttl),
            Status::Failed | Status::Cancelled => Some(self.settings.failure_ttl),
            Status::Queued | Status::Started => None,
        }
    }

    /// Persist a newly admitted job.
    pub async fn create(&self, job: &Job) -> Result<()> {
        self.write(job).await
    }

    /// Get a job by ID. Unknown and expired ids are both `NotFound`.
    pub async fn get(&self, id: JobId) -> Result<Job> {
        self.find(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Get a job by ID, `None` if unknown or expired.
    pub async fn find(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.load(id).await?.map(|(_, job)| job))
    }

    /// Remove a record outright. Used to roll back a failed admission.
    pub async fn remove(&self, id: JobId) -> Result<()> {
        self.store.delete(&job_key(id)).await?;
        Ok(())
    }

    /// Queued -> Started.
    pub async fn mark_started(&self, id: JobId) -> Result<Job> {
        self.transition(id, Status::Started, |job| {
            job.started_at = Some(Utc::now());
        })
        .await
    }

    /// Store a progress report. A report behind the stored value is dropped, so
    /// readers never observe progress going backwards. Returns what is stored.
    ///
    /// Only lands while the stored record is still `started`: a report racing
    /// the terminal write can never resurrect the job.
    pub async fn record_progress(&self, id: JobId, progress: Progress) -> Result<Progress> {
        let job = self
            .update(id, |job| {
                if job.status != Status::Started {
                    return Err(Error::InvalidTransition {
                        from: job.status.to_string(),
                        to: "progress".to_string(),
                    });
                }
                if let Some(stored) = job.progress.filter(|p| progress.current < p.current) {
                    debug!(%id, stored = stored.current, reported = progress.current, "stale progress dropped");
                    return Ok(false);
                }
                job.progress = Some(progress);
                Ok(true)
            })
            .await?;
        Ok(job.progress.unwrap_or(progress))
    }

    /// Started -> Finished with a result.
    pub async fn finish(&self, id: JobId, result: serde_json::Value) -> Result<Job> {
        self.transition(id, Status::Finished, |job| {
            job.result = Some(result.clone());
        })
        .await
    }

    /// Started -> Failed with a task failure or timeout.
    pub async fn fail(&self, id: JobId, error: JobError) -> Result<Job> {
        self.transition(id, Status::Failed, |job| {
            job.error = Some(error.clone());
        })
        .await
    }

    /// Queued or Started -> Cancelled. Progress is kept as last reported and
    /// the reason goes in `error` with kind `Cancelled`.
    pub async fn cancel(&self, id: JobId, message: &str) -> Result<Job> {
        self.transition(id, Status::Cancelled, |job| {
            job.error = Some(JobError::new(ErrorKind::Cancelled, message));
        })
        .await
    }

    async fn transition(
        &self,
        id: JobId,
        to: Status,
        mut apply: impl FnMut(&mut Job),
    ) -> Result<Job> {
        let mut from = None;
        let job = self
            .update(id, |job| {
                validate_transition(job.status, to)?;
                from = Some(job.status);
                job.status = to;
                if to.is_terminal() {
                    job.ended_at = Some(Utc::now());
                }
                apply(job);
                Ok(true)
            })
            .await?;

        if let Some(from) = from {
            metrics::job_transitions().add(
                1,
                &[
                    KeyValue::new("from", from.to_string()),
                    KeyValue::new("to", to.to_string()),
                ],
            );
        }
        Ok(job)
    }

    /// Read the raw record alongside its decoded form.
    async fn load(&self, id: JobId) -> Result<Option<(String, Job)>> {
        match self.store.get(&job_key(id)).await? {
            Some(raw) => {
                let job = serde_json::from_str(&raw)?;
                Ok(Some((raw, job)))
            }
            None => Ok(None),
        }
    }

    /// Read-modify-write that only lands if the record is unchanged since the
    /// read. `apply` returns false to leave the record as it is.
    async fn update(
        &self,
        id: JobId,
        mut apply: impl FnMut(&mut Job) -> Result<bool>,
    ) -> Result<Job> {
        for _ in 0..UPDATE_ATTEMPTS {
            let (raw, mut job) = self
                .load(id)
                .await?
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            if !apply(&mut job)? {
                return Ok(job);
            }
            let next = serde_json::to_string(&job)?;
            if self
                .store
                .compare_and_swap(&job_key(id), &raw, &next, self.retention(job.status))
                .await?
            {
                return Ok(job);
            }
            debug!(%id, "record changed during update, retrying");
        }
        Err(Error::Other(format!(
            "job {id}: record kept changing, update abandoned"
        )))
    }

    async fn write(&self, job: &Job) -> Result<()> {
        let raw = serde_json::to_string(job)?;
        self.store
            .set(&job_key(job.id), &raw, self.retention(job.status))
            .await
    }
}
