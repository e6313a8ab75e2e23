//! Integration tests for telemetry initialization and span helpers.

use laneq::model::{JobId, Lane, Status};
use laneq::telemetry::job::{record_transition, start_job_span};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process; a second init
    // returning Err is acceptable.
    let config = laneq::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "laneq-test".to_string(),
        default_filter: "debug".to_string(),
    };
    let _guard = laneq::telemetry::init_telemetry(config);
}

#[test]
fn job_span_creates_and_records_transition() {
    let span = start_job_span("long_task", JobId::new(), Lane::High);
    record_transition(&span, Status::Queued, Status::Started);
    record_transition(&span, Status::Started, Status::Finished);
}

#[test]
fn metric_instruments_accept_records_without_a_provider() {
    use opentelemetry::KeyValue;

    laneq::telemetry::metrics::jobs_submitted()
        .add(1, &[KeyValue::new("task", "long_task")]);
    laneq::telemetry::metrics::job_duration_ms()
        .record(12.5, &[KeyValue::new("status", "finished")]);
}
