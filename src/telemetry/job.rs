//! Job execution span helpers.

use tracing::Span;

use crate::model::{JobId, Lane, Status};

/// Start a span for one job's execution, from pop to finalization.
///
/// `job.status` is declared empty and updated via [`record_transition`].
pub fn start_job_span(task: &str, job_id: JobId, lane: Lane) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.task" = task,
        "job.id" = %job_id,
        "job.lane" = %lane,
        "job.status" = tracing::field::Empty,
    )
}

/// Record a status transition on the span and emit it as an event.
pub fn record_transition(span: &Span, from: Status, to: Status) {
    span.record("job.status", tracing::field::display(to));
    span.in_scope(|| {
        tracing::info!(%from, %to, "state_transition");
    });
}
