//! Error types for laneq.
//!
//! A duplicate submission is not an error (see [`crate::admission::SubmitOutcome`]),
//! and task-body failures never surface here: the worker records them on the
//! job as a [`crate::model::JobError`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed submission. Rejected before any state is created.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid lane: {0}")]
    InvalidLane(String),

    /// Unknown job id, or a record that has expired past retention.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Cancellation requested for a finished, failed or cancelled job.
    #[error("job already terminal: {0}")]
    AlreadyTerminal(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Key/value store or lane queue unreachable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::ServiceUnavailable(format!("store: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Other(format!("serialization: {e}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Other(format!("io: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
