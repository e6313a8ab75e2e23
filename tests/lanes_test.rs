//! Integration tests for lane listing and purge.

use std::sync::Arc;

use laneq::admission::{Admission, SubmitOutcome, SubmitRequest};
use laneq::broker::Broker;
use laneq::broker::memory::MemoryBroker;
use laneq::config::JobSettings;
use laneq::error::Error;
use laneq::lanes::{LaneCount, QueueAdmin};
use laneq::model::{ErrorKind, Lane, Status};
use laneq::registry::Registry;
use laneq::task::TaskCatalog;
use laneq::worker::{Worker, WorkerConfig};
use serde_json::json;

struct Harness {
    admission: Admission,
    admin: QueueAdmin,
    registry: Registry,
    worker: Worker,
}

fn harness() -> Harness {
    let broker = Broker::shared(Arc::new(MemoryBroker::new()));
    let catalog = Arc::new(TaskCatalog::builtin());
    let settings = JobSettings::default();
    Harness {
        admission: Admission::new(&broker, Arc::clone(&catalog), settings.clone()),
        admin: QueueAdmin::new(&broker, settings.clone()),
        registry: Registry::new(Arc::clone(&broker.store), settings.clone()),
        worker: Worker::new(&broker, catalog, settings, WorkerConfig::default()),
    }
}

fn user_task(user_id: i64, high: bool) -> SubmitRequest {
    SubmitRequest::new("task_a", json!({ "user_id": user_id, "duration": 1 })).high(high)
}

#[tokio::test]
async fn list_lanes_reports_pending_counts() {
    let h = harness();
    h.admission.submit(user_task(1, false)).await.unwrap();
    h.admission.submit(user_task(2, false)).await.unwrap();
    h.admission.submit(user_task(3, true)).await.unwrap();

    let counts = h.admin.list_lanes().await.unwrap();
    assert_eq!(
        counts,
        vec![
            LaneCount { lane: Lane::Default, pending: 2 },
            LaneCount { lane: Lane::High, pending: 1 },
        ]
    );

    let body = serde_json::to_value(&counts).unwrap();
    assert_eq!(body[0], json!({ "name": "default", "count": 2 }));
}

#[tokio::test]
async fn purge_drops_only_the_named_lane() {
    let h = harness();
    let a = h.admission.submit(user_task(1, false)).await.unwrap().job_id();
    let b = h.admission.submit(user_task(2, false)).await.unwrap().job_id();
    let high = h.admission.submit(user_task(3, true)).await.unwrap().job_id();

    let report = h.admin.purge("default").await.unwrap();
    assert_eq!(report.lane, Lane::Default);
    assert_eq!(report.purged, 2);

    for id in [a, b] {
        let job = h.registry.get(id).await.unwrap();
        assert_eq!(job.status, Status::Cancelled);
        let err = job.error.unwrap();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(err.message, "purged");
    }
    assert_eq!(h.registry.get(high).await.unwrap().status, Status::Queued);

    let counts = h.admin.list_lanes().await.unwrap();
    assert_eq!(counts[0].pending, 0);
    assert_eq!(counts[1].pending, 1);
}

#[tokio::test]
async fn purged_request_can_be_resubmitted() {
    let h = harness();
    let first = h.admission.submit(user_task(1, false)).await.unwrap().job_id();
    h.admin.purge("default").await.unwrap();

    let again = h.admission.submit(user_task(1, false)).await.unwrap();
    assert!(matches!(again, SubmitOutcome::Created { job_id, .. } if job_id != first));
}

#[tokio::test]
async fn purge_of_empty_lane_is_zero() {
    let h = harness();
    let report = h.admin.purge("high").await.unwrap();
    assert_eq!(report.purged, 0);
    assert_eq!(
        serde_json::to_value(report).unwrap(),
        json!({ "queue": "high", "purged": 0 })
    );
}

#[tokio::test]
async fn purge_rejects_unknown_lane() {
    let h = harness();
    let err = h.admin.purge("urgent").await.unwrap_err();
    assert!(matches!(err, Error::InvalidLane(_)));
}

#[tokio::test(start_paused = true)]
async fn purge_leaves_popped_jobs_alone() {
    let h = harness();
    let done = h.admission.submit(user_task(1, false)).await.unwrap().job_id();
    h.worker.process_next().await.unwrap();

    let report = h.admin.purge("default").await.unwrap();
    assert_eq!(report.purged, 0);
    assert_eq!(h.registry.get(done).await.unwrap().status, Status::Finished);
}
