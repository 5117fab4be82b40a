//! Worker-pool orchestration for PageLab.
//!
//! The orchestrator owns the pool of audit workers: it fills the job queue,
//! spawns workers with a staggered backoff, folds their events into the
//! shared state store, reaps hung workers and drains the pool once the run
//! budget is spent. Each worker pops one job, audits it and posts the report.

pub mod filler;
pub mod http;
pub mod orchestrator;
pub mod policy;
pub mod pool;
pub mod sink;
pub mod status;
pub mod worker;

pub use filler::{FillOutcome, QueueFiller};
pub use orchestrator::{Orchestrator, PoolSnapshot, Shutdown};
pub use policy::{Action, decide_next_action, reap_hung_workers};
pub use pool::{PoolEvent, ProcessLauncher, TaskLauncher, WorkerHandle, WorkerLauncher};
pub use sink::ResultSink;
pub use status::ServerStatus;
pub use worker::{AuditWorker, EventEmitter, StdoutEmitter, WorkerExit};
