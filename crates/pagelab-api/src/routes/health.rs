//! Health check endpoints.

use crate::{ApiError, AppState};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use serde_json::{Value, json};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Ready once the job queue and the state store both answer.
async fn ready(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state
        .queue
        .attributes(&state.settings.queue_name)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    state.pool_state.counters().await?;
    Ok(Json(json!({ "status": "ready" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::testing::*;
    use axum::http::StatusCode;
    use pagelab_store::MemoryJobQueue;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_health() {
        let (state, _, _tx) = app_state(seeded_queue(&[]).await);
        let response = send_get(state, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_ready_with_backends_up() {
        let (state, _, _tx) = app_state(seeded_queue(&[]).await);
        let response = send_get(state, "/health/ready").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ready"}));
    }

    #[tokio::test]
    async fn test_not_ready_without_queue() {
        let (state, _, _tx) = app_state(Arc::new(MemoryJobQueue::new()));
        let response = send_get(state, "/health/ready").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_json(response).await["error"].is_string());
    }
}
