//! Service banner and status document.

use crate::AppState;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use chrono::Utc;
use pagelab_core::{APP_NAME, VERSION};
use pagelab_scheduler::ServerStatus;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
}

async fn index() -> String {
    format!("{} {}", APP_NAME, VERSION)
}

async fn status(State(state): State<AppState>) -> Json<ServerStatus> {
    let pool = state.pool.borrow().clone();
    let status = ServerStatus::collect(
        &state.settings,
        state.queue.as_ref(),
        &state.pool_state,
        &pool,
        Utc::now(),
    )
    .await;
    Json(status)
}
