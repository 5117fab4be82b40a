//! Core domain types and traits for the PageLab audit pool.
//!
//! This crate contains:
//! - Job and worker identifiers
//! - The typed worker event protocol
//! - Job queue and state store traits
//! - Worker records and aggregate counters
//! - The audit engine trait

pub mod engine;
pub mod error;
pub mod event;
pub mod id;
pub mod job;
pub mod queue;
pub mod state;

pub use engine::{AuditEngine, AuditHandle, AuditOutput};
pub use error::{Error, Result};
pub use event::WorkerEvent;
pub use id::{JobId, WorkerId};
pub use job::Job;
pub use queue::{CreateOutcome, JobQueue, QueueSnapshot};
pub use state::{AggregateCounters, PoolState, StateStore, WorkerRecord};

/// Service name reported on the root endpoint.
pub const APP_NAME: &str = "PageLab";

/// Service version reported on the root and status endpoints.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
