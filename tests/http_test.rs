//! Router tests for the HTTP binding, driven with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use laneq::broker::Broker;
use laneq::broker::memory::MemoryBroker;
use laneq::config::JobSettings;
use laneq::http::{AppState, build_router};
use laneq::task::TaskCatalog;
use laneq::worker::{Worker, WorkerConfig};
use serde_json::{Value, json};
use tower::ServiceExt;

struct Harness {
    memory: Arc<MemoryBroker>,
    app: Router,
    worker: Worker,
}

fn harness() -> Harness {
    let memory = Arc::new(MemoryBroker::new());
    let broker = Broker::shared(Arc::clone(&memory));
    let catalog = Arc::new(TaskCatalog::builtin());
    let settings = JobSettings::default();
    let worker = Worker::new(
        &broker,
        Arc::clone(&catalog),
        settings.clone(),
        WorkerConfig::default(),
    );
    let state = Arc::new(AppState::new(broker, catalog, settings));
    Harness {
        memory,
        app: build_router(state),
        worker,
    }
}

impl Harness {
    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = self.app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

#[tokio::test]
async fn create_task_then_duplicate() {
    let h = harness();
    let body = json!({ "duration": 5, "payload": { "x": 1 } });

    let (status, created) = h.call(Method::POST, "/tasks", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["queue"], "default");
    let job_id = created["job_id"].as_str().unwrap().to_string();

    let (status, dup) = h.call(Method::POST, "/tasks", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dup, json!({ "duplicate": true, "job_id": job_id }));
}

#[tokio::test]
async fn create_task_on_high_lane() {
    let h = harness();
    let (status, created) = h
        .call(Method::POST, "/tasks", Some(json!({ "duration": 1, "high": true })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["queue"], "high");
}

#[tokio::test]
async fn invalid_submission_is_unprocessable() {
    let h = harness();
    let (status, body) = h
        .call(Method::POST, "/tasks", Some(json!({ "duration": 0 })))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("duration"));

    let (status, _) = h
        .call(
            Method::POST,
            "/tasks",
            Some(json!({ "task_name": "nope", "duration": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn user_task_endpoints() {
    let h = harness();

    let (status, a) = h
        .call(Method::POST, "/tasks/a", Some(json!({ "user_id": 7 })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(a["task"], "task_a");

    let (status, again) = h
        .call(
            Method::POST,
            "/tasks/a",
            Some(json!({ "user_id": 7, "duration": 2 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["job_id"], a["job_id"]);

    let (status, b) = h
        .call(Method::POST, "/tasks/b", Some(json!({ "user_id": 7, "high": true })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(b["task"], "task_b");
    assert_eq!(b["queue"], "high");
}

#[tokio::test(start_paused = true)]
async fn get_task_reports_status_and_result() {
    let h = harness();
    let (_, created) = h
        .call(Method::POST, "/tasks", Some(json!({ "duration": 2 })))
        .await;
    let uri = format!("/tasks/{}", created["job_id"].as_str().unwrap());

    let (status, job) = h.call(Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "queued");

    h.worker.process_next().await.unwrap();

    let (status, job) = h.call(Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "finished");
    assert_eq!(job["result"], "done:long_task");
    assert_eq!(job["progress"], json!({ "current": 2, "total": 2 }));
}

#[tokio::test]
async fn unknown_task_id_is_not_found() {
    let h = harness();
    let (status, _) = h
        .call(
            Method::GET,
            "/tasks/00000000-0000-0000-0000-000000000000",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = h.call(Method::GET, "/tasks/not-a-job", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = h.call(Method::DELETE, "/tasks/not-a-job", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn cancel_then_conflict_once_terminal() {
    let h = harness();
    let (_, created) = h
        .call(Method::POST, "/tasks", Some(json!({ "duration": 10 })))
        .await;
    let uri = format!("/tasks/{}", created["job_id"].as_str().unwrap());

    let (status, body) = h.call(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["cancel_requested"], true);

    h.worker.process_next().await.unwrap();
    let (_, job) = h.call(Method::GET, &uri, None).await;
    assert_eq!(job["status"], "cancelled");

    let (status, _) = h.call(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn queues_and_purge() {
    let h = harness();
    h.call(Method::POST, "/tasks", Some(json!({ "duration": 1 })))
        .await;
    h.call(
        Method::POST,
        "/tasks",
        Some(json!({ "duration": 1, "high": true })),
    )
    .await;

    let (status, queues) = h.call(Method::GET, "/queues", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        queues,
        json!([{ "name": "default", "count": 1 }, { "name": "high", "count": 1 }])
    );

    let (status, report) = h.call(Method::DELETE, "/queues/high/purge", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report, json!({ "queue": "high", "purged": 1 }));

    let (status, _) = h.call(Method::DELETE, "/queues/urgent/purge", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reflects_store_availability() {
    let h = harness();
    let (status, body) = h.call(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));

    h.memory.set_store_available(false);
    let (status, _) = h.call(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = h
        .call(Method::POST, "/tasks", Some(json!({ "duration": 1 })))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
