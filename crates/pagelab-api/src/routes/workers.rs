//! Live worker records.

use crate::{ApiError, AppState};
use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::get;
use pagelab_core::{WorkerId, WorkerRecord};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_workers))
        .route("/{id}", get(get_worker))
}

async fn list_workers(State(state): State<AppState>) -> Result<Json<Vec<WorkerRecord>>, ApiError> {
    let records = state.pool_state.worker_records().await?;
    Ok(Json(records))
}

async fn get_worker(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<WorkerRecord>, ApiError> {
    let id = WorkerId::new(id);
    state
        .pool_state
        .worker_record(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("worker {} is not running", id)))
}
