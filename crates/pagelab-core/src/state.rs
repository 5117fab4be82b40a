//! State store contract and typed accessors.
//!
//! The store is a flat key/value space holding JSON values. Only the
//! orchestrator writes to it; the status endpoint reads it. [`PoolState`]
//! wraps a store with the typed accessors the rest of the system uses, so no
//! caller touches raw keys.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::{Result, WorkerId};

const WORKER_PREFIX: &str = "worker:";
const SUCCESSFUL_RUNS: &str = "successfulRuns";
const ATTEMPTED_RUNS: &str = "attemptedRuns";
const WORKERS_CLEARED_AT: &str = "workersClearedAt";
const RECENT_ERRORS: &str = "recentErrors";

/// Number of worker error details retained for the status endpoint.
pub const RECENT_ERROR_LIMIT: usize = 25;

/// Trait for key/value state store backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Every key/value pair currently held, in no particular order.
    async fn list_all(&self) -> Result<Vec<(String, Value)>>;
}

/// What the orchestrator knows about one live worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    pub worker_id: WorkerId,
    pub pid: Option<u32>,
    pub url: Option<String>,
    pub browser_started_at: Option<DateTime<Utc>>,
}

impl WorkerRecord {
    pub fn new(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            pid: None,
            url: None,
            browser_started_at: None,
        }
    }
}

/// Run counters shared by the whole pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateCounters {
    pub successful_runs: u64,
    pub attempted_runs: u64,
    /// `None` while any worker is alive; set when the last one exits.
    pub workers_cleared_at: Option<DateTime<Utc>>,
}

/// Typed view over a [`StateStore`].
#[derive(Clone)]
pub struct PoolState {
    store: Arc<dyn StateStore>,
}

impl PoolState {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Zero the counters and drop every worker record and error.
    ///
    /// Called once when the orchestrator starts: each orchestrator lifetime
    /// gets a fresh run budget, and records left by a previous process can
    /// never match a live worker.
    pub async fn reset(&self) -> Result<()> {
        for record in self.worker_records().await? {
            self.clear_worker_record(record.worker_id).await?;
        }
        self.store.set(SUCCESSFUL_RUNS, Value::from(0u64)).await?;
        self.store.set(ATTEMPTED_RUNS, Value::from(0u64)).await?;
        self.store.set(WORKERS_CLEARED_AT, Value::from(0i64)).await?;
        self.store.delete(RECENT_ERRORS).await
    }

    pub async fn worker_record(&self, id: WorkerId) -> Result<Option<WorkerRecord>> {
        match self.store.get(&worker_key(id)).await? {
            Some(Value::Null) | None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    /// Store `record`, replacing whatever was kept for its worker id.
    pub async fn put_worker_record(&self, record: &WorkerRecord) -> Result<()> {
        self.store
            .set(&worker_key(record.worker_id), serde_json::to_value(record)?)
            .await
    }

    pub async fn clear_worker_record(&self, id: WorkerId) -> Result<()> {
        self.store.delete(&worker_key(id)).await
    }

    /// All worker records, ordered by worker id.
    pub async fn worker_records(&self) -> Result<Vec<WorkerRecord>> {
        let mut records = Vec::new();
        for (key, value) in self.store.list_all().await? {
            if !key.starts_with(WORKER_PREFIX) || value.is_null() {
                continue;
            }
            records.push(serde_json::from_value::<WorkerRecord>(value)?);
        }
        records.sort_by_key(|r| r.worker_id);
        Ok(records)
    }

    pub async fn counters(&self) -> Result<AggregateCounters> {
        let cleared_ms = self.read_i64(WORKERS_CLEARED_AT).await?;
        Ok(AggregateCounters {
            successful_runs: self.read_u64(SUCCESSFUL_RUNS).await?,
            attempted_runs: self.read_u64(ATTEMPTED_RUNS).await?,
            workers_cleared_at: match cleared_ms {
                0 => None,
                ms => Utc.timestamp_millis_opt(ms).single(),
            },
        })
    }

    pub async fn successful_runs(&self) -> Result<u64> {
        self.read_u64(SUCCESSFUL_RUNS).await
    }

    /// Count one completed worker. Returns the new total.
    pub async fn record_successful_run(&self) -> Result<u64> {
        self.increment(SUCCESSFUL_RUNS).await
    }

    /// Count one audit-engine launch. Returns the new total.
    pub async fn record_attempted_run(&self) -> Result<u64> {
        self.increment(ATTEMPTED_RUNS).await
    }

    pub async fn set_workers_cleared_at(&self, at: Option<DateTime<Utc>>) -> Result<()> {
        let ms = at.map(|t| t.timestamp_millis()).unwrap_or(0);
        self.store.set(WORKERS_CLEARED_AT, Value::from(ms)).await
    }

    /// Remember a worker error detail, keeping the newest [`RECENT_ERROR_LIMIT`].
    pub async fn push_error(&self, detail: &str) -> Result<()> {
        let mut errors = self.recent_errors().await?;
        errors.push(detail.to_string());
        if errors.len() > RECENT_ERROR_LIMIT {
            let excess = errors.len() - RECENT_ERROR_LIMIT;
            errors.drain(..excess);
        }
        self.store
            .set(RECENT_ERRORS, serde_json::to_value(errors)?)
            .await
    }

    pub async fn recent_errors(&self) -> Result<Vec<String>> {
        match self.store.get(RECENT_ERRORS).await? {
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }

    async fn increment(&self, key: &str) -> Result<u64> {
        let next = self.read_u64(key).await? + 1;
        self.store.set(key, Value::from(next)).await?;
        Ok(next)
    }

    async fn read_u64(&self, key: &str) -> Result<u64> {
        Ok(self
            .store
            .get(key)
            .await?
            .and_then(|v| v.as_u64())
            .unwrap_or(0))
    }

    async fn read_i64(&self, key: &str) -> Result<i64> {
        Ok(self
            .store
            .get(key)
            .await?
            .and_then(|v| v.as_i64())
            .unwrap_or(0))
    }
}

fn worker_key(id: WorkerId) -> String {
    format!("{}{}", WORKER_PREFIX, id)
}
