//! Integration tests for the job registry and cancellation coordinator.

use std::sync::Arc;
use std::time::Duration;

use laneq::broker::memory::MemoryBroker;
use laneq::cancel::{CancelCoordinator, CancelOutcome};
use laneq::config::JobSettings;
use laneq::error::Error;
use laneq::model::{ErrorKind, Job, JobError, JobId, Lane, Progress, Status};
use laneq::registry::Registry;
use serde_json::json;

fn registry_with(settings: JobSettings) -> (Arc<MemoryBroker>, Registry) {
    let memory = Arc::new(MemoryBroker::new());
    let registry = Registry::new(memory.clone(), settings);
    (memory, registry)
}

async fn queued_job(registry: &Registry) -> Job {
    let job = Job::queued("long_task", Lane::Default, json!({ "duration": 10 }), None);
    registry.create(&job).await.unwrap();
    job
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_job_is_not_found() {
    let (_, registry) = registry_with(JobSettings::default());
    let err = registry.get(JobId::new()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(registry.find(JobId::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn started_then_finished() {
    let (_, registry) = registry_with(JobSettings::default());
    let job = queued_job(&registry).await;

    let started = registry.mark_started(job.id).await.unwrap();
    assert_eq!(started.status, Status::Started);
    assert!(started.started_at.is_some());

    let finished = registry.finish(job.id, json!("ok")).await.unwrap();
    assert_eq!(finished.status, Status::Finished);
    assert_eq!(finished.result, Some(json!("ok")));
    assert!(finished.ended_at.is_some());
}

#[tokio::test]
async fn terminal_states_are_final() {
    let (_, registry) = registry_with(JobSettings::default());
    let job = queued_job(&registry).await;
    registry.mark_started(job.id).await.unwrap();
    registry
        .fail(job.id, JobError::new(ErrorKind::TaskFailure, "boom"))
        .await
        .unwrap();

    let err = registry.finish(job.id, json!("late")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    let err = registry.mark_started(job.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert_eq!(registry.get(job.id).await.unwrap().status, Status::Failed);
}

#[tokio::test]
async fn queued_job_cannot_finish_without_starting() {
    let (_, registry) = registry_with(JobSettings::default());
    let job = queued_job(&registry).await;

    let err = registry.finish(job.id, json!(1)).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn progress_never_regresses() {
    let (_, registry) = registry_with(JobSettings::default());
    let job = queued_job(&registry).await;
    registry.mark_started(job.id).await.unwrap();

    let p = registry
        .record_progress(job.id, Progress { current: 5, total: 10 })
        .await
        .unwrap();
    assert_eq!(p.current, 5);

    let stale = registry
        .record_progress(job.id, Progress { current: 3, total: 10 })
        .await
        .unwrap();
    assert_eq!(stale, Progress { current: 5, total: 10 });
    assert_eq!(
        registry.get(job.id).await.unwrap().progress,
        Some(Progress { current: 5, total: 10 })
    );
}

#[tokio::test]
async fn late_progress_cannot_reopen_a_failed_job() {
    let (_, registry) = registry_with(JobSettings::default());
    let job = queued_job(&registry).await;
    registry.mark_started(job.id).await.unwrap();
    registry
        .record_progress(job.id, Progress { current: 2, total: 10 })
        .await
        .unwrap();
    let failed = registry
        .fail(job.id, JobError::new(ErrorKind::Timeout, "too slow"))
        .await
        .unwrap();

    let err = registry
        .record_progress(job.id, Progress { current: 3, total: 10 })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert_eq!(registry.get(job.id).await.unwrap(), failed);
}

#[tokio::test]
async fn progress_requires_a_started_job() {
    let (_, registry) = registry_with(JobSettings::default());
    let job = queued_job(&registry).await;

    let err = registry
        .record_progress(job.id, Progress { current: 1, total: 10 })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn finished_record_expires_after_result_ttl() {
    let settings = JobSettings {
        result_ttl: Duration::from_secs(60),
        ..JobSettings::default()
    };
    let (_, registry) = registry_with(settings);
    let job = queued_job(&registry).await;
    registry.mark_started(job.id).await.unwrap();
    registry.finish(job.id, json!("ok")).await.unwrap();

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(registry.find(job.id).await.unwrap().is_some());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(matches!(
        registry.get(job.id).await.unwrap_err(),
        Error::NotFound(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_record_uses_failure_ttl() {
    let settings = JobSettings {
        result_ttl: Duration::from_secs(10),
        failure_ttl: Duration::from_secs(100),
        ..JobSettings::default()
    };
    let (_, registry) = registry_with(settings);
    let job = queued_job(&registry).await;
    registry.mark_started(job.id).await.unwrap();
    registry
        .fail(job.id, JobError::new(ErrorKind::Timeout, "too slow"))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(50)).await;
    assert_eq!(registry.get(job.id).await.unwrap().status, Status::Failed);

    tokio::time::advance(Duration::from_secs(51)).await;
    assert!(registry.find(job.id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn live_records_do_not_expire() {
    let (_, registry) = registry_with(JobSettings::default());
    let job = queued_job(&registry).await;

    tokio::time::advance(Duration::from_secs(30 * 86_400)).await;
    assert_eq!(registry.get(job.id).await.unwrap().status, Status::Queued);
}

// ---------------------------------------------------------------------------
// Cancellation requests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_unknown_job_is_not_found() {
    let (memory, registry) = registry_with(JobSettings::default());
    let cancel = CancelCoordinator::new(memory.clone(), registry);

    let outcome = cancel.request_cancel(JobId::new()).await.unwrap();
    assert_eq!(outcome, CancelOutcome::NotFound);
    assert_eq!(memory.live_keys(), 0);
}

#[tokio::test]
async fn cancel_terminal_job_changes_nothing() {
    let (memory, registry) = registry_with(JobSettings::default());
    let cancel = CancelCoordinator::new(memory.clone(), registry.clone());
    let job = queued_job(&registry).await;
    registry.mark_started(job.id).await.unwrap();
    let finished = registry.finish(job.id, json!("ok")).await.unwrap();

    let outcome = cancel.request_cancel(job.id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::AlreadyTerminal);
    assert!(!cancel.is_requested(job.id).await.unwrap());
    assert_eq!(registry.get(job.id).await.unwrap(), finished);
}

#[tokio::test]
async fn cancel_sets_flag_seen_by_token() {
    let (memory, registry) = registry_with(JobSettings::default());
    let cancel = CancelCoordinator::new(memory, registry.clone());
    let job = queued_job(&registry).await;
    let token = cancel.token(job.id);

    assert!(!token.is_cancelled().await.unwrap());
    assert_eq!(
        cancel.request_cancel(job.id).await.unwrap(),
        CancelOutcome::Accepted
    );
    assert!(token.is_cancelled().await.unwrap());
    assert_eq!(token.job_id(), job.id);

    // Repeating the request is harmless.
    assert_eq!(
        cancel.request_cancel(job.id).await.unwrap(),
        CancelOutcome::Accepted
    );
    // The record is untouched until a worker observes the flag.
    assert_eq!(registry.get(job.id).await.unwrap().status, Status::Queued);
}
