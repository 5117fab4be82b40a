//! API routes.

pub mod health;
pub mod status;
pub mod workers;

use crate::AppState;
use axum::Router;

/// Create the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(status::router())
        .nest("/workers", workers::router())
        .with_state(state)
}
