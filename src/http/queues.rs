use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Path};

use super::AppState;
use super::error::ApiError;
use crate::lanes::{LaneCount, PurgeReport};

/// GET /queues
/// Pending entries per lane.
pub async fn list(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<LaneCount>>, ApiError> {
    Ok(Json(state.admin.list_lanes().await?))
}

/// DELETE /queues/{lane}/purge
/// Drop every entry still waiting in a lane. Running jobs are unaffected.
pub async fn purge(
    Extension(state): Extension<Arc<AppState>>,
    Path(lane): Path<String>,
) -> Result<Json<PurgeReport>, ApiError> {
    Ok(Json(state.admin.purge(&lane).await?))
}
