//! Admission: validate a submission, claim its fingerprint, create and enqueue the job.
//!
//! The claim is the one atomic step. Record creation and the lane push follow
//! as separate operations; if either fails the claim and record are rolled
//! back best-effort, and if the process dies in between, the claim TTL is what
//! unblocks resubmission.

use std::sync::Arc;

use opentelemetry::KeyValue;
use serde_json::Value;
use tracing::{info, warn};

use crate::broker::{Broker, LaneQueue};
use crate::config::JobSettings;
use crate::error::Result;
use crate::keys::{Claim, KeyManager};
use crate::model::{Job, JobId, Lane};
use crate::registry::Registry;
use crate::task::TaskCatalog;
use crate::telemetry::metrics;

/// A job submission. The admission API's builder.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub(crate) task_name: String,
    pub(crate) payload: Value,
    pub(crate) lane: String,
    pub(crate) fingerprint_seed: Option<Value>,
    pub(crate) dedup: bool,
}

impl SubmitRequest {
    pub fn new(task_name: impl Into<String>, payload: Value) -> Self {
        Self {
            task_name: task_name.into(),
            payload,
            lane: Lane::Default.as_str().to_string(),
            fingerprint_seed: None,
            dedup: true,
        }
    }

    /// Lane name. Anything other than "high" or "default" is rejected at submit.
    pub fn lane(mut self, lane: impl Into<String>) -> Self {
        self.lane = lane.into();
        self
    }

    pub fn high(self, high: bool) -> Self {
        let lane = if high { Lane::High } else { Lane::Default };
        self.lane(lane.as_str())
    }

    /// Fingerprint on this value instead of the task's own payload fields.
    pub fn fingerprint_seed(mut self, seed: Value) -> Self {
        self.fingerprint_seed = Some(seed);
        self
    }

    /// Skip idempotency: always create a new job.
    pub fn without_dedup(mut self) -> Self {
        self.dedup = false;
        self
    }
}

/// What happened when a job was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// New job created and pushed onto `lane`.
    Created { job_id: JobId, lane: Lane },
    /// A live job with the same fingerprint already exists.
    Duplicate { job_id: JobId },
}

impl SubmitOutcome {
    pub fn job_id(&self) -> JobId {
        match self {
            SubmitOutcome::Created { job_id, .. } | SubmitOutcome::Duplicate { job_id } => *job_id,
        }
    }
}

#[derive(Clone)]
pub struct Admission {
    catalog: Arc<TaskCatalog>,
    keys: KeyManager,
    registry: Registry,
    lanes: Arc<dyn LaneQueue>,
    settings: JobSettings,
}

impl Admission {
    pub fn new(broker: &Broker, catalog: Arc<TaskCatalog>, settings: JobSettings) -> Self {
        Self {
            catalog,
            keys: KeyManager::new(Arc::clone(&broker.store)),
            registry: Registry::new(Arc::clone(&broker.store), settings.clone()),
            lanes: Arc::clone(&broker.lanes),
            settings,
        }
    }

    /// Submit a job. Returns the new job, or the live job it duplicates.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome> {
        let task = request.task_name.clone();
        let result = self.admit(request).await;
        let label = match &result {
            Ok(SubmitOutcome::Created { .. }) => "created",
            Ok(SubmitOutcome::Duplicate { .. }) => "duplicate",
            Err(_) => "rejected",
        };
        metrics::jobs_submitted().add(
            1,
            &[KeyValue::new("task", task), KeyValue::new("result", label)],
        );
        result
    }

    async fn admit(&self, request: SubmitRequest) -> Result<SubmitOutcome> {
        let prepared = self.catalog.prepare(
            &request.task_name,
            &request.payload,
            request.fingerprint_seed.as_ref(),
        )?;
        let lane: Lane = request.lane.parse()?;

        let fingerprint = request.dedup.then_some(prepared.fingerprint);
        let job = Job::queued(request.task_name, lane, request.payload, fingerprint);

        if let Some(fp) = &job.fingerprint {
            let ttl = self.settings.claim_ttl(prepared.expected_duration);
            if let Claim::Held(owner) = self.keys.claim_or_owner(fp, job.id, ttl).await? {
                info!(fingerprint = %fp, job_id = %owner, "duplicate submission");
                return Ok(SubmitOutcome::Duplicate { job_id: owner });
            }
        }

        if let Err(e) = self.enqueue(&job).await {
            if let Some(fp) = &job.fingerprint {
                if let Err(release_err) = self.keys.release(fp, job.id).await {
                    warn!(fingerprint = %fp, error = %release_err, "claim rollback failed, left to expire");
                }
            }
            return Err(e);
        }

        info!(job_id = %job.id, task = %job.task_name, %lane, "job admitted");
        Ok(SubmitOutcome::Created {
            job_id: job.id,
            lane,
        })
    }

    async fn enqueue(&self, job: &Job) -> Result<()> {
        self.registry.create(job).await?;
        if let Err(e) = self.lanes.push(job.lane, job.id).await {
            if let Err(remove_err) = self.registry.remove(job.id).await {
                warn!(job_id = %job.id, error = %remove_err, "record rollback failed");
            }
            return Err(e);
        }
        metrics::lane_operations().add(
            1,
            &[
                KeyValue::new("lane", job.lane.as_str()),
                KeyValue::new("operation", "push"),
            ],
        );
        Ok(())
    }
}
