//! Audit engine drivers for the PageLab audit pool.
//!
//! Provides:
//! - [`LighthouseEngine`]: runs the audit tool as a child process per job
//! - Host-level process cleanup used by the orchestrator

pub mod lighthouse;
pub mod process;

pub use lighthouse::LighthouseEngine;
pub use pagelab_core::engine::{AuditEngine, AuditHandle, AuditOutput};
