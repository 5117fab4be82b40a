//! Server status document.
//!
//! Field names on the wire match the long-standing `/status` format consumed
//! by existing dashboards.

use chrono::{DateTime, Utc};
use pagelab_config::Settings;
use pagelab_core::{JobQueue, PoolState, VERSION, WorkerRecord};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::orchestrator::PoolSnapshot;
use crate::policy::elapsed_since;

/// Worker records plus the time the pool last emptied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolView {
    pub workers: Vec<WorkerRecord>,
    pub workers_cleared_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub version: String,
    pub number_of_actual_workers: usize,
    pub current_q_length: u64,
    pub errors: Vec<String>,
    pub app_state: PoolView,
    pub num_workers_configured: usize,
    pub q_time_created: Option<DateTime<Utc>>,
    pub server_start: DateTime<Utc>,
    /// URLs fetched by the most recent fill.
    pub q_length: usize,
    pub urls_processed_successfully: u64,
    pub elapsed_time_seconds: f64,
    /// `None` until the first successful run.
    pub average_run_time_seconds: Option<f64>,
    pub max_runs_before_restart: u64,
    pub attempted_runs: u64,
}

impl ServerStatus {
    /// Gather the status from the queue, the state store and the live pool.
    ///
    /// Backend failures do not fail the status; their messages are listed
    /// under `errors` and the affected fields fall back to zero.
    pub async fn collect(
        settings: &Settings,
        queue: &dyn JobQueue,
        state: &PoolState,
        pool: &PoolSnapshot,
        now: DateTime<Utc>,
    ) -> Self {
        let mut errors = Vec::new();

        let (current_q_length, q_time_created) = match queue.attributes(&settings.queue_name).await {
            Ok(snapshot) => (snapshot.depth, Some(snapshot.created_at)),
            Err(e) => {
                warn!(error = %e, "Status: queue attributes unavailable");
                errors.push(e.to_string());
                (0, None)
            }
        };

        let counters = state.counters().await.unwrap_or_else(|e| {
            errors.push(e.to_string());
            Default::default()
        });
        let workers = state.worker_records().await.unwrap_or_else(|e| {
            errors.push(e.to_string());
            Vec::new()
        });
        match state.recent_errors().await {
            Ok(recent) => errors.extend(recent),
            Err(e) => errors.push(e.to_string()),
        }

        let elapsed = elapsed_since(pool.server_started_at, now).as_secs_f64();

        Self {
            version: VERSION.to_string(),
            number_of_actual_workers: pool.active_workers,
            current_q_length,
            errors,
            app_state: PoolView {
                workers,
                workers_cleared_at: counters.workers_cleared_at,
            },
            num_workers_configured: settings.num_workers,
            q_time_created,
            server_start: pool.server_started_at,
            q_length: pool.last_fill_count,
            urls_processed_successfully: counters.successful_runs,
            elapsed_time_seconds: elapsed,
            average_run_time_seconds: average_run_seconds(elapsed, counters.successful_runs),
            max_runs_before_restart: settings.max_runs_before_restart,
            attempted_runs: counters.attempted_runs,
        }
    }
}

/// Mean wall-clock seconds per successful run.
pub fn average_run_seconds(elapsed_seconds: f64, successful_runs: u64) -> Option<f64> {
    (successful_runs > 0).then(|| elapsed_seconds / successful_runs as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pagelab_core::WorkerId;
    use pagelab_store::{MemoryJobQueue, MemoryStateStore};
    use serde_json::json;
    use std::sync::Arc;

    const QUEUE: &str = "lighthouse-queue";

    fn snapshot(now: DateTime<Utc>) -> PoolSnapshot {
        PoolSnapshot {
            active_workers: 0,
            last_fill_count: 0,
            server_started_at: now - Duration::seconds(100),
        }
    }

    #[test]
    fn test_average_run_seconds() {
        assert_eq!(average_run_seconds(100.0, 0), None);
        assert_eq!(average_run_seconds(100.0, 4), Some(25.0));
    }

    #[tokio::test]
    async fn test_idle_pool_status() {
        let now = Utc::now();
        let queue = MemoryJobQueue::seeded(QUEUE, &[]).await.unwrap();
        let state = PoolState::new(Arc::new(MemoryStateStore::new()));

        let status =
            ServerStatus::collect(&Settings::default(), &queue, &state, &snapshot(now), now).await;

        assert_eq!(status.current_q_length, 0);
        assert_eq!(status.number_of_actual_workers, 0);
        assert_eq!(status.urls_processed_successfully, 0);
        assert_eq!(status.average_run_time_seconds, None);
        assert_eq!(status.num_workers_configured, 12);
        assert_eq!(status.max_runs_before_restart, 1000);
        assert!(status.q_time_created.is_some());
        assert!(status.errors.is_empty());
        assert!((status.elapsed_time_seconds - 100.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_status_reflects_pool_state() {
        let now = Utc::now();
        let queue = MemoryJobQueue::seeded(QUEUE, &["https://a.test", "https://b.test"])
            .await
            .unwrap();
        let state = PoolState::new(Arc::new(MemoryStateStore::new()));
        state.record_attempted_run().await.unwrap();
        state.record_attempted_run().await.unwrap();
        state.record_successful_run().await.unwrap();
        state.push_error("worker 2: result delivery failed").await.unwrap();
        state
            .put_worker_record(&WorkerRecord {
                url: Some("https://c.test/".to_string()),
                ..WorkerRecord::new(WorkerId::new(2))
            })
            .await
            .unwrap();
        let pool = PoolSnapshot {
            active_workers: 1,
            last_fill_count: 3,
            ..snapshot(now)
        };

        let status = ServerStatus::collect(&Settings::default(), &queue, &state, &pool, now).await;

        assert_eq!(status.current_q_length, 2);
        assert_eq!(status.number_of_actual_workers, 1);
        assert_eq!(status.q_length, 3);
        assert_eq!(status.urls_processed_successfully, 1);
        assert_eq!(status.attempted_runs, 2);
        assert_eq!(status.average_run_time_seconds, Some(100.0));
        assert_eq!(status.errors, vec!["worker 2: result delivery failed"]);
        assert_eq!(status.app_state.workers.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_queue_is_reported_not_fatal() {
        let now = Utc::now();
        let queue = MemoryJobQueue::new();
        let state = PoolState::new(Arc::new(MemoryStateStore::new()));

        let status =
            ServerStatus::collect(&Settings::default(), &queue, &state, &snapshot(now), now).await;

        assert_eq!(status.current_q_length, 0);
        assert_eq!(status.q_time_created, None);
        assert_eq!(status.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_wire_names() {
        let now = Utc::now();
        let queue = MemoryJobQueue::seeded(QUEUE, &[]).await.unwrap();
        let state = PoolState::new(Arc::new(MemoryStateStore::new()));
        let status =
            ServerStatus::collect(&Settings::default(), &queue, &state, &snapshot(now), now).await;

        let value = serde_json::to_value(&status).unwrap();
        for key in [
            "version",
            "numberOfActualWorkers",
            "currentQLength",
            "errors",
            "appState",
            "numWorkersConfigured",
            "qTimeCreated",
            "serverStart",
            "qLength",
            "urlsProcessedSuccessfully",
            "elapsedTimeSeconds",
            "averageRunTimeSeconds",
            "maxRunsBeforeRestart",
            "attemptedRuns",
        ] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(value["averageRunTimeSeconds"], json!(null));
    }
}
