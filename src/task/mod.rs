//! Task catalog: the closed mapping from task name to typed handler.
//!
//! The catalog is built once at startup and never changes afterwards. Admission
//! uses it to validate payloads and compute fingerprints; workers use it to
//! dispatch. An unknown name is a validation error at submission time rather
//! than a failure when a worker picks the job up.

pub mod builtin;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::keys;
use crate::model::{JobId, Progress};
use crate::registry::Registry;

/// Why a task body stopped without a result.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Cancellation was observed at a checkpoint.
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

/// Handed to a running task: its job id, progress reporting, and checkpoints.
pub struct TaskContext {
    job_id: JobId,
    token: CancelToken,
    registry: Registry,
}

impl TaskContext {
    pub(crate) fn new(job_id: JobId, token: CancelToken, registry: Registry) -> Self {
        Self {
            job_id,
            token,
            registry,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Stop here if cancellation was requested.
    pub async fn checkpoint(&self) -> std::result::Result<(), TaskError> {
        match self.token.is_cancelled().await {
            Ok(true) => Err(TaskError::Cancelled),
            Ok(false) => Ok(()),
            Err(e) => Err(TaskError::Failed(format!("cancellation check failed: {e}"))),
        }
    }

    /// Publish progress. Reports behind the last stored value are ignored.
    pub async fn report_progress(
        &self,
        current: u64,
        total: u64,
    ) -> std::result::Result<(), TaskError> {
        self.registry
            .record_progress(self.job_id, Progress { current, total })
            .await
            .map(|_| ())
            .map_err(|e| TaskError::Failed(format!("progress update failed: {e}")))
    }
}

/// A unit of executable logic with typed arguments.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    type Args: DeserializeOwned + Send;

    /// Name callers submit under.
    fn name(&self) -> &'static str;

    /// Checks beyond what deserialization enforces.
    fn validate(&self, _args: &Self::Args) -> Result<()> {
        Ok(())
    }

    /// How long the task is expected to run. Drives the claim TTL.
    fn expected_duration(&self, args: &Self::Args) -> Duration;

    /// The fields that identify equal logical requests, plus the duration
    /// component of the fingerprint.
    fn fingerprint_material(&self, args: &Self::Args) -> (Value, u64);

    async fn run(
        &self,
        args: Self::Args,
        ctx: &TaskContext,
    ) -> std::result::Result<Value, TaskError>;
}

/// What admission needs to know about a validated submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    pub expected_duration: Duration,
    pub fingerprint: String,
}

/// Object-safe form of [`Task`], with payload parsing folded in.
#[async_trait]
pub(crate) trait Handler: Send + Sync {
    fn prepare(&self, payload: &Value, seed: Option<&Value>) -> Result<Prepared>;

    async fn run(&self, payload: Value, ctx: &TaskContext)
    -> std::result::Result<Value, TaskError>;
}

fn parse_args<A: DeserializeOwned>(task: &str, payload: &Value) -> Result<A> {
    serde_json::from_value(payload.clone())
        .map_err(|e| Error::Validation(format!("{task}: invalid payload: {e}")))
}

#[async_trait]
impl<T: Task> Handler for T {
    fn prepare(&self, payload: &Value, seed: Option<&Value>) -> Result<Prepared> {
        let args: T::Args = parse_args(self.name(), payload)?;
        self.validate(&args)?;
        let fingerprint = match seed {
            Some(seed) => keys::fingerprint(self.name(), seed, 0),
            None => {
                let (material, duration) = self.fingerprint_material(&args);
                keys::fingerprint(self.name(), &material, duration)
            }
        };
        Ok(Prepared {
            expected_duration: self.expected_duration(&args),
            fingerprint,
        })
    }

    async fn run(
        &self,
        payload: Value,
        ctx: &TaskContext,
    ) -> std::result::Result<Value, TaskError> {
        let args: T::Args = parse_args(self.name(), &payload)
            .map_err(|e| TaskError::Failed(e.to_string()))?;
        Task::run(self, args, ctx).await
    }
}

/// Closed name -> handler table.
#[derive(Clone, Default)]
pub struct TaskCatalog {
    tasks: BTreeMap<&'static str, Arc<dyn Handler>>,
}

impl TaskCatalog {
    /// An empty catalog. Add tasks with [`TaskCatalog::with`].
    pub fn new() -> Self {
        Self::default()
    }

    /// `long_task`, `task_a` and `task_b`.
    pub fn builtin() -> Self {
        Self::new()
            .with(builtin::LongTask)
            .with(builtin::UserTask::A)
            .with(builtin::UserTask::B)
    }

    /// Register a task. A later registration under the same name replaces
    /// the earlier one.
    pub fn with<T: Task>(mut self, task: T) -> Self {
        self.tasks.insert(task.name(), Arc::new(task));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tasks.keys().copied()
    }

    /// Validate a submission and compute its claim parameters.
    pub fn prepare(&self, task_name: &str, payload: &Value, seed: Option<&Value>) -> Result<Prepared> {
        self.handler(task_name)?.prepare(payload, seed)
    }

    pub(crate) fn handler(&self, task_name: &str) -> Result<Arc<dyn Handler>> {
        self.tasks.get(task_name).cloned().ok_or_else(|| {
            let known: Vec<_> = self.names().collect();
            Error::Validation(format!(
                "unknown task {task_name:?} (known: {})",
                known.join(", ")
            ))
        })
    }
}
