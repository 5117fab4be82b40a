//! Restart policy and hung-worker detection.
//!
//! Both are pure functions of observed state so the orchestrator loop only
//! has to gather inputs and act on the answer.

use chrono::{DateTime, Utc};
use pagelab_core::{WorkerId, WorkerRecord};
use std::time::Duration;

/// Engine runtime after which a worker counts as hung.
pub const HUNG_WORKER_THRESHOLD: Duration = Duration::from_secs(20);

/// How long a draining pool waits for its workers before killing them.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// What the orchestrator does after a worker exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Queue is empty and will not be refilled.
    Idle,
    /// Queue is empty; fetch more jobs.
    Refill,
    /// Jobs remain; start one worker in place of the one that exited.
    SpawnReplacement,
    /// Run budget is spent; stop spawning and shut down once the pool is empty.
    Drain,
}

/// Decide the next pool action.
///
/// An empty queue outside infinity mode always idles, whatever the run
/// budget. Otherwise, once `successful_runs` reaches `max_runs` no more jobs
/// are fetched or started.
pub fn decide_next_action(
    successful_runs: u64,
    queue_depth: u64,
    infinity_mode: bool,
    max_runs: u64,
) -> Action {
    if queue_depth == 0 && !infinity_mode {
        Action::Idle
    } else if successful_runs >= max_runs {
        Action::Drain
    } else if queue_depth == 0 {
        Action::Refill
    } else {
        Action::SpawnReplacement
    }
}

/// Workers whose engine started more than `threshold` before `now`.
///
/// Records without an engine start time are never considered hung.
pub fn reap_hung_workers(
    records: &[WorkerRecord],
    now: DateTime<Utc>,
    threshold: Duration,
) -> Vec<WorkerId> {
    records
        .iter()
        .filter(|record| match record.browser_started_at {
            Some(started) => elapsed_since(started, now) > threshold,
            None => false,
        })
        .map(|record| record.worker_id)
        .collect()
}

/// Time from `since` to `now`, zero if `since` is in the future.
pub fn elapsed_since(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
