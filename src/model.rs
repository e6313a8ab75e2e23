//! Core data model.
//!
//! A job is one unit of deferred work: a task name, its arguments, the lane it
//! was routed to, and its lifecycle state. The record is created at admission
//! and from then on only mutated by the worker that owns it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// The canonical record of a job, as stored in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier. Assigned at admission, never reused.
    pub id: JobId,

    /// Which registered task runs this job (e.g. "long_task").
    pub task_name: String,

    /// Lane the job was pushed onto.
    pub lane: Lane,

    /// Task arguments. Opaque to everything except the task itself.
    pub payload: serde_json::Value,

    /// Current lifecycle state.
    pub status: Status,

    /// Last reported progress. Never regresses.
    pub progress: Option<Progress>,

    /// Present only when `status == Finished`.
    pub result: Option<serde_json::Value>,

    /// Present only when `status` is `Failed` or `Cancelled`.
    pub error: Option<JobError>,

    /// Idempotency fingerprint. None for submissions that opted out of dedup.
    pub fingerprint: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A freshly admitted job in the `Queued` state.
    pub fn queued(
        task_name: impl Into<String>,
        lane: Lane,
        payload: serde_json::Value,
        fingerprint: Option<String>,
    ) -> Self {
        Self {
            id: JobId::new(),
            task_name: task_name.into(),
            lane,
            payload,
            status: Status::Queued,
            progress: None,
            result: None,
            error: None,
            fingerprint,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }
}

/// Newtype for job IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|_| Error::NotFound(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Waiting in a lane.
    Queued,
    /// Popped by a worker, task body running.
    Started,
    /// Done successfully. Terminal.
    Finished,
    /// Task body failed or timed out. Terminal.
    Failed,
    /// Stopped on request, or purged before it started. Terminal.
    Cancelled,
}

impl Status {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Queued, Started)
                | (Queued, Cancelled)   // cancelled or purged before start
                | (Started, Finished)
                | (Started, Failed)
                | (Started, Cancelled)
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Finished | Status::Failed | Status::Cancelled)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Queued => "queued",
            Status::Started => "started",
            Status::Finished => "finished",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Lane
// ---------------------------------------------------------------------------

/// A priority partition of the work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    High,
    Default,
}

impl Lane {
    /// Lanes in the order workers drain them.
    pub const PRIORITY_ORDER: [Lane; 2] = [Lane::High, Lane::Default];

    pub fn as_str(self) -> &'static str {
        match self {
            Lane::High => "high",
            Lane::Default => "default",
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Lane {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Lane::High),
            "default" => Ok(Lane::Default),
            other => Err(Error::InvalidLane(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Task-reported progress. `current` is the monotonic component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
}

// ---------------------------------------------------------------------------
// Errors recorded on jobs
// ---------------------------------------------------------------------------

/// Why a job ended without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The task body returned an error or panicked.
    TaskFailure,
    /// The wall-clock ceiling was hit and the body was aborted.
    Timeout,
    /// A cancellation request was observed at a checkpoint, or the job was purged.
    Cancelled,
}

/// Error descriptor stored with a failed or cancelled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
