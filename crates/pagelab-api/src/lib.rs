//! HTTP surface of the PageLab audit pool.
//!
//! Serves the service banner, the `/status` document, health checks and the
//! live worker records.

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use state::AppState;
