use std::sync::Arc;

use axum::Json;
use axum::extract::Extension;
use serde_json::{Value, json};

use super::AppState;
use super::error::ApiError;

/// GET /health
/// Store and lane queue connectivity.
pub async fn health(Extension(state): Extension<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    state.broker.store.ping().await?;
    Ok(Json(json!({ "status": "ok" })))
}
