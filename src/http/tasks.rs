use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use super::AppState;
use super::error::ApiError;
use crate::admission::{SubmitOutcome, SubmitRequest};
use crate::cancel::CancelOutcome;
use crate::error::Error;
use crate::model::{Job, JobId};

fn default_task_name() -> String {
    "long_task".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskBody {
    #[serde(default = "default_task_name")]
    pub task_name: String,
    pub duration: u64,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub high: bool,
}

#[derive(Debug, Deserialize)]
pub struct UserTaskBody {
    pub user_id: i64,
    pub duration: Option<u64>,
    #[serde(default)]
    pub high: bool,
}

async fn submit(
    state: &AppState,
    request: SubmitRequest,
    task: Option<&str>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    match state.admission.submit(request).await? {
        SubmitOutcome::Created { job_id, lane } => {
            let mut body = json!({ "job_id": job_id, "queue": lane });
            if let Some(task) = task {
                body["task"] = json!(task);
            }
            Ok((StatusCode::CREATED, Json(body)))
        }
        SubmitOutcome::Duplicate { job_id } => Ok((
            StatusCode::OK,
            Json(json!({ "duplicate": true, "job_id": job_id })),
        )),
    }
}

/// POST /tasks
/// Submit a task with an explicit duration and free-form payload.
pub async fn create(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<CreateTaskBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let payload = json!({ "duration": body.duration, "payload": body.payload });
    let request = SubmitRequest::new(body.task_name, payload).high(body.high);
    submit(&state, request, None).await
}

fn user_task_request(task: &str, body: UserTaskBody) -> SubmitRequest {
    let mut payload = json!({ "user_id": body.user_id });
    if let Some(duration) = body.duration {
        payload["duration"] = json!(duration);
    }
    SubmitRequest::new(task, payload).high(body.high)
}

/// POST /tasks/a
pub async fn create_a(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<UserTaskBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    submit(&state, user_task_request("task_a", body), Some("task_a")).await
}

/// POST /tasks/b
pub async fn create_b(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<UserTaskBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    submit(&state, user_task_request("task_b", body), Some("task_b")).await
}

/// GET /tasks/{job_id}
/// Status, progress, and result or error. 404 once retention has lapsed.
pub async fn get(
    Extension(state): Extension<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let id: JobId = job_id.parse()?;
    Ok(Json(state.registry.get(id).await?))
}

/// DELETE /tasks/{job_id}
/// Request cooperative cancellation.
pub async fn cancel(
    Extension(state): Extension<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let id: JobId = job_id.parse()?;
    match state.cancel.request_cancel(id).await? {
        CancelOutcome::Accepted => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "id": id, "cancel_requested": true })),
        )),
        CancelOutcome::NotFound => Err(Error::NotFound(id.to_string()).into()),
        CancelOutcome::AlreadyTerminal => Err(Error::AlreadyTerminal(id.to_string()).into()),
    }
}
