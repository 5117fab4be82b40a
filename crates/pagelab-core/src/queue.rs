//! Job queue contract.
//!
//! The queue is an external durable FIFO. Dequeue removes the message: there
//! is no visibility timeout and no redelivery, so a job whose worker dies is
//! gone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Job, JobId, Result};

/// What `create_if_absent` found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExisted,
}

/// Queue attributes read on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub depth: u64,
    pub created_at: DateTime<Utc>,
}

impl QueueSnapshot {
    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }
}

/// Trait for job queue backends.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Create the named queue unless it already exists.
    ///
    /// Any failure is reported as `Error::QueueProvisioning`.
    async fn create_if_absent(&self, name: &str) -> Result<CreateOutcome>;

    /// Append a payload and return the id of the new message.
    async fn enqueue(&self, name: &str, payload: &str) -> Result<JobId>;

    /// Pop the oldest message, removing it. `None` when the queue is empty.
    async fn dequeue(&self, name: &str) -> Result<Option<Job>>;

    /// Current depth and creation time. `Error::NotFound` for an unknown queue.
    async fn attributes(&self, name: &str) -> Result<QueueSnapshot>;
}
