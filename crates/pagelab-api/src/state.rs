//! Application state.

use pagelab_config::Settings;
use pagelab_core::{JobQueue, PoolState};
use pagelab_scheduler::PoolSnapshot;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub queue: Arc<dyn JobQueue>,
    pub pool_state: PoolState,
    /// Live view of the orchestrator's pool.
    pub pool: watch::Receiver<PoolSnapshot>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        queue: Arc<dyn JobQueue>,
        pool_state: PoolState,
        pool: watch::Receiver<PoolSnapshot>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            queue,
            pool_state,
            pool,
        }
    }
}
