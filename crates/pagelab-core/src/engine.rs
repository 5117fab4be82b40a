//! Audit engine trait and run types.
//!
//! The audit engine measures one page per run. It lives outside this system
//! (a headless browser driven by an external tool); workers drive it through
//! [`AuditEngine`] and the orchestrator uses it to clean up stray processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::{JobId, Result};

/// Handle to a launched audit run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditHandle {
    /// The job being audited.
    pub job_id: JobId,
    /// OS process id of the engine, if the platform reported one.
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    /// Name of the engine running this audit.
    pub engine_name: String,
}

/// What an audit run produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditOutput {
    /// The engine's report document. `None` when the run ended without one.
    pub report: Option<Value>,
}

/// Trait for audit engines.
#[async_trait]
pub trait AuditEngine: Send + Sync {
    /// Name of this engine.
    fn name(&self) -> &'static str;

    /// Start auditing `url`.
    async fn launch(&self, job_id: JobId, url: &Url) -> Result<AuditHandle>;

    /// Wait for a launched run to finish.
    async fn wait(&self, handle: &AuditHandle) -> Result<AuditOutput>;

    /// Forcibly stop a launched run.
    async fn kill(&self, handle: &AuditHandle) -> Result<()>;

    /// Forcibly stop an engine process known only by pid.
    async fn terminate_process(&self, pid: u32) -> Result<()>;

    /// Terminate every engine process on this host.
    async fn terminate_all(&self) -> Result<()>;
}
