//! Events reported by a worker process to the orchestrator.
//!
//! Workers write one JSON object per line on stdout. The orchestrator is the
//! only consumer; the channel is one-directional.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle event emitted by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// The single dequeue attempt found nothing to do.
    QueueEmpty,
    /// A job was popped from the queue.
    Claimed { url: String },
    /// The audit engine was launched.
    EngineStarted {
        pid: Option<u32>,
        started_at: DateTime<Utc>,
    },
    /// The result was handed to the result sink. Sent at most once.
    Completed,
    /// Informational failure report. Never changes the orchestrator's control flow.
    Error { detail: String },
}

impl WorkerEvent {
    pub fn error(detail: impl Into<String>) -> Self {
        WorkerEvent::Error {
            detail: detail.into(),
        }
    }

    /// Encode as a single line of JSON (without the trailing newline).
    pub fn to_line(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one line written by [`WorkerEvent::to_line`].
    pub fn from_line(line: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}
