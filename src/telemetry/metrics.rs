//! Metric instrument factories for laneq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"laneq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for laneq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("laneq")
}

/// Counter: submissions.
/// Labels: `task`, `result` ("created" | "duplicate" | "rejected").
pub fn jobs_submitted() -> Counter<u64> {
    meter()
        .u64_counter("laneq.jobs.submitted")
        .with_description("Number of job submissions")
        .build()
}

/// Counter: job state transitions.
/// Labels: `from`, `to`.
pub fn job_transitions() -> Counter<u64> {
    meter()
        .u64_counter("laneq.jobs.state_transitions")
        .with_description("Number of job state transitions")
        .build()
}

/// Counter: lane-level operations (push, pop, ack, purge).
/// Labels: `lane`, `operation`.
pub fn lane_operations() -> Counter<u64> {
    meter()
        .u64_counter("laneq.lane.operations")
        .with_description("Number of lane queue operations")
        .build()
}

/// Counter: cancellation requests.
/// Labels: `result` ("accepted" | "not_found" | "already_terminal").
pub fn cancel_requests() -> Counter<u64> {
    meter()
        .u64_counter("laneq.jobs.cancel_requests")
        .with_description("Number of cancellation requests")
        .build()
}

/// Histogram: job execution duration in milliseconds.
/// Labels: `task`, `status`.
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("laneq.jobs.duration_ms")
        .with_description("Job execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
