//! Job executor: pops lanes, runs task bodies, finalizes state, releases claims.
//!
//! The worker that pops a job is its single owner until finalization:
//!
//! ```text
//! queued --start--> started --ok--------> finished
//!                           --error-----> failed     (TaskFailure)
//!                           --timeout---> failed     (Timeout)
//!                           --cancelled-> cancelled
//! queued --cancel flag seen at pop------> cancelled
//! ```
//!
//! The claim is released once, after the terminal state is written, whichever
//! way the body ended. If the terminal write itself fails the claim is kept and
//! left to its TTL. The task body runs on its own tokio task under a wall-clock
//! ceiling; when the ceiling is hit the body is aborted wherever it is and
//! awaited until it has stopped, then finalization and release run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{Instrument, Span, debug, error, info, warn};

use crate::broker::{Broker, Delivery};
use crate::cancel::CancelCoordinator;
use crate::config::JobSettings;
use crate::error::{Error, Result};
use crate::keys::KeyManager;
use crate::lanes::LaneRouter;
use crate::model::{ErrorKind, Job, JobError, JobId, Status};
use crate::registry::Registry;
use crate::task::{TaskCatalog, TaskContext, TaskError};
use crate::telemetry::job::{record_transition, start_job_span};
use crate::telemetry::metrics;

/// Configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs run concurrently by this worker.
    pub concurrency: usize,
    /// Sleep between polls when both lanes are empty.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// How a task body ended.
#[derive(Debug)]
enum Outcome {
    Finished(serde_json::Value),
    Failed(JobError),
    Cancelled,
}

/// Holds a job's claim for the duration of its execution.
///
/// The claim is released only through `close`, after the job has reached a
/// terminal state. Any other exit (a store error before or during
/// finalization, or the execution future being dropped) keeps the claim, and
/// its TTL is what eventually frees the fingerprint.
struct ClaimScope {
    keys: KeyManager,
    fingerprint: Option<String>,
    job_id: JobId,
}

impl ClaimScope {
    fn new(keys: KeyManager, job: &Job) -> Self {
        Self {
            keys,
            fingerprint: job.fingerprint.clone(),
            job_id: job.id,
        }
    }

    async fn close(mut self, release: bool) {
        let Some(fp) = self.fingerprint.take() else {
            return;
        };
        if !release {
            debug!(job_id = %self.job_id, fingerprint = %fp, "claim kept until its ttl");
            return;
        }
        if let Err(e) = self.keys.release(&fp, self.job_id).await {
            warn!(job_id = %self.job_id, fingerprint = %fp, error = %e, "claim release failed, left to expire");
        }
    }
}

impl Drop for ClaimScope {
    fn drop(&mut self) {
        if let Some(fp) = self.fingerprint.take() {
            warn!(job_id = %self.job_id, fingerprint = %fp, "job left without a terminal state, claim left to expire");
        }
    }
}

/// The worker loop: poll lanes, execute jobs, finalize.
#[derive(Clone)]
pub struct Worker {
    router: LaneRouter,
    registry: Registry,
    cancel: CancelCoordinator,
    keys: KeyManager,
    catalog: Arc<TaskCatalog>,
    settings: JobSettings,
    config: WorkerConfig,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Worker {
    pub fn new(
        broker: &Broker,
        catalog: Arc<TaskCatalog>,
        settings: JobSettings,
        config: WorkerConfig,
    ) -> Self {
        let registry = Registry::new(Arc::clone(&broker.store), settings.clone());
        let (shutdown, _) = watch::channel(false);
        Self {
            router: LaneRouter::new(Arc::clone(&broker.lanes)),
            cancel: CancelCoordinator::new(Arc::clone(&broker.store), registry.clone()),
            keys: KeyManager::new(Arc::clone(&broker.store)),
            registry,
            catalog,
            settings,
            config,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Signal every loop to stop after its current job.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run `concurrency` loops until shutdown.
    pub async fn run(&self) -> Result<()> {
        info!(concurrency = self.config.concurrency, "worker started");
        let mut slots = JoinSet::new();
        for slot in 0..self.config.concurrency.max(1) {
            let worker = self.clone();
            slots.spawn(async move { worker.run_slot(slot).await });
        }
        while let Some(joined) = slots.join_next().await {
            joined.map_err(|e| Error::Other(format!("worker slot crashed: {e}")))?;
        }
        info!("worker stopped");
        Ok(())
    }

    async fn run_slot(&self, slot: usize) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if *shutdown.borrow_and_update() {
                return;
            }
            match self.process_next().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => error!(slot, error = %e, "process_next failed"),
            }
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Pop and execute one job. Returns false if both lanes were empty.
    pub async fn process_next(&self) -> Result<bool> {
        let Some(delivery) = self.router.next().await? else {
            return Ok(false);
        };
        self.execute(delivery).await?;
        Ok(true)
    }

    async fn execute(&self, delivery: Delivery) -> Result<()> {
        let job = match self.registry.find(delivery.job_id).await? {
            Some(job) if !job.status.is_terminal() => job,
            Some(job) => {
                debug!(job_id = %job.id, status = %job.status, "redelivered terminal job skipped");
                return self.router.ack(&delivery).await;
            }
            None => {
                warn!(job_id = %delivery.job_id, "popped job has no record, dropping");
                return self.router.ack(&delivery).await;
            }
        };

        let span = start_job_span(&job.task_name, job.id, job.lane);
        async {
            let claim = ClaimScope::new(self.keys.clone(), &job);
            let started = Instant::now();

            let status = match self.drive(&job, &span).await {
                Ok(status) => status,
                Err(e) => {
                    // Not terminal: the message stays unacked and the claim stays held.
                    claim.close(false).await;
                    return Err(e);
                }
            };
            let release = match status {
                Status::Failed => self.settings.release_on_failure,
                other => other.is_terminal(),
            };
            claim.close(release).await;

            metrics::job_duration_ms().record(
                started.elapsed().as_millis() as f64,
                &[
                    KeyValue::new("task", job.task_name.clone()),
                    KeyValue::new("status", status.to_string()),
                ],
            );
            self.router.ack(&delivery).await
        }
        .instrument(span.clone())
        .await
    }

    /// Start (unless cancelled first), run the body, and write the terminal state.
    async fn drive(&self, job: &Job, span: &Span) -> Result<Status> {
        let outcome = if job.status == Status::Queued && self.cancel.is_requested(job.id).await? {
            info!(job_id = %job.id, "cancelled before start");
            Outcome::Cancelled
        } else {
            if job.status == Status::Queued {
                self.registry.mark_started(job.id).await?;
                record_transition(span, Status::Queued, Status::Started);
            } else {
                warn!(job_id = %job.id, "job was started by a lost worker, running again");
            }
            self.run_body(job).await
        };
        self.finalize(job, outcome, span).await
    }

    /// Run the task body on its own task, bounded by the timeout.
    async fn run_body(&self, job: &Job) -> Outcome {
        let handler = match self.catalog.handler(&job.task_name) {
            Ok(handler) => handler,
            Err(e) => return Outcome::Failed(JobError::new(ErrorKind::TaskFailure, e.to_string())),
        };
        let ctx = TaskContext::new(job.id, self.cancel.token(job.id), self.registry.clone());
        let payload = job.payload.clone();

        let mut body = JoinSet::new();
        body.spawn(async move { handler.run(payload, &ctx).await });

        let joined = tokio::time::timeout(self.settings.task_timeout, body.join_next()).await;
        match joined {
            Ok(Some(Ok(Ok(value)))) => Outcome::Finished(value),
            Ok(Some(Ok(Err(TaskError::Cancelled)))) => Outcome::Cancelled,
            Ok(Some(Ok(Err(TaskError::Failed(message))))) => {
                Outcome::Failed(JobError::new(ErrorKind::TaskFailure, message))
            }
            Ok(Some(Err(join_err))) => Outcome::Failed(JobError::new(
                ErrorKind::TaskFailure,
                format!("task aborted: {join_err}"),
            )),
            Ok(None) => Outcome::Failed(JobError::new(
                ErrorKind::TaskFailure,
                "task body vanished",
            )),
            Err(_) => {
                // Wait for the body to actually stop so none of its writes
                // can land after the terminal state.
                body.abort_all();
                while body.join_next().await.is_some() {}
                Outcome::Failed(JobError::new(
                    ErrorKind::Timeout,
                    format!("exceeded timeout of {:?}", self.settings.task_timeout),
                ))
            }
        }
    }

    /// Persist the terminal state and give the cancel flag the record's lifetime.
    async fn finalize(&self, job: &Job, outcome: Outcome, span: &Span) -> Result<Status> {
        let from = self.registry.get(job.id).await?.status;
        let finalized = match outcome {
            Outcome::Finished(value) => self.registry.finish(job.id, value).await?,
            Outcome::Failed(err) => {
                warn!(job_id = %job.id, kind = ?err.kind, error = %err.message, "job failed");
                self.registry.fail(job.id, err).await?
            }
            Outcome::Cancelled => {
                self.registry
                    .cancel(job.id, "cancellation requested")
                    .await?
            }
        };
        record_transition(span, from, finalized.status);

        if let Some(retention) = self.registry.retention(finalized.status) {
            if let Err(e) = self.cancel.settle(job.id, retention).await {
                warn!(job_id = %job.id, error = %e, "cancel flag ttl not set");
            }
        }
        info!(job_id = %job.id, status = %finalized.status, "job finalized");
        Ok(finalized.status)
    }
}
