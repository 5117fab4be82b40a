//! Worker launching and supervision.
//!
//! A launcher starts one worker lifetime and hands back a [`WorkerHandle`].
//! Everything the worker reports, followed by its exit, flows into the
//! orchestrator's event channel in order.

use async_trait::async_trait;
use pagelab_core::{Error, Result, WorkerEvent, WorkerId};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::filler::FillOutcome;
use crate::worker::{AuditWorker, EventEmitter};

/// Everything the orchestrator loop reacts to.
#[derive(Debug)]
pub enum PoolEvent {
    /// A staggered spawn timer fired.
    SpawnDue,
    /// A worker reported progress.
    Worker { id: WorkerId, event: WorkerEvent },
    /// A worker lifetime ended. `code` is `None` when killed by a signal.
    Exited { id: WorkerId, code: Option<i32> },
    /// A queue fill finished.
    QueueFilled(Result<FillOutcome>),
}

pub type PoolSender = mpsc::UnboundedSender<PoolEvent>;

/// Control handle for one running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    /// OS process id, for process-backed workers.
    pub pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
}

impl WorkerHandle {
    pub fn new(pid: Option<u32>, kill: oneshot::Sender<()>) -> Self {
        Self {
            pid,
            kill: Some(kill),
        }
    }

    /// Ask the worker to stop. Its `Exited` event still follows.
    /// Returns false if a kill was already sent.
    pub fn kill(&mut self) -> bool {
        match self.kill.take() {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }
}

/// Starts worker lifetimes.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, id: WorkerId, events: PoolSender) -> Result<WorkerHandle>;
}

/// Runs each worker as a child process of the current executable.
///
/// The child is started as `<program> worker --worker-id <id>` with the
/// resolved settings in its environment. Its stdout carries one event per
/// line; stderr is inherited so worker logs land next to the orchestrator's.
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(&'static str, String)>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, env: Vec<(&'static str, String)>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env,
        }
    }

    /// Arguments placed before the `worker` subcommand.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Launch workers from the running binary.
    pub fn current_exe(env: Vec<(&'static str, String)>) -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| Error::Internal(format!("cannot locate current executable: {}", e)))?;
        Ok(Self::new(program, env))
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, id: WorkerId, events: PoolSender) -> Result<WorkerHandle> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("worker")
            .arg("--worker-id")
            .arg(id.to_string())
            .envs(self.env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to spawn worker {}: {}", id, e)))?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal(format!("worker {} has no stdout", id)))?;
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

        info!(worker_id = %id, pid = ?pid, "Worker started");

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut kill_armed = true;
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => forward_line(id, &line, &events),
                        Ok(None) => break,
                        Err(e) => {
                            warn!(worker_id = %id, error = %e, "Failed to read worker output");
                            break;
                        }
                    },
                    signal = &mut kill_rx, if kill_armed => match signal {
                        Ok(()) => {
                            info!(worker_id = %id, "Killing worker");
                            if let Err(e) = child.start_kill() {
                                warn!(worker_id = %id, error = %e, "Failed to kill worker");
                            }
                            break;
                        }
                        // handle dropped without a kill
                        Err(_) => kill_armed = false,
                    },
                }
            }

            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(worker_id = %id, error = %e, "Failed to reap worker");
                    None
                }
            };
            let _ = events.send(PoolEvent::Exited { id, code });
        });

        Ok(WorkerHandle::new(pid, kill_tx))
    }
}

fn forward_line(id: WorkerId, line: &str, events: &PoolSender) {
    if line.trim().is_empty() {
        return;
    }
    match WorkerEvent::from_line(line) {
        Ok(event) => {
            let _ = events.send(PoolEvent::Worker { id, event });
        }
        Err(e) => warn!(worker_id = %id, line = %line, error = %e, "Ignoring malformed worker line"),
    }
}

/// Emits a worker's events straight into the orchestrator channel.
pub struct ChannelEmitter {
    id: WorkerId,
    events: PoolSender,
}

impl ChannelEmitter {
    pub fn new(id: WorkerId, events: PoolSender) -> Self {
        Self { id, events }
    }
}

#[async_trait]
impl EventEmitter for ChannelEmitter {
    async fn emit(&self, event: WorkerEvent) -> Result<()> {
        self.events
            .send(PoolEvent::Worker { id: self.id, event })
            .map_err(|_| Error::Internal("orchestrator channel closed".to_string()))
    }
}

/// Runs each worker lifetime as a task inside this process.
pub struct TaskLauncher {
    worker: Arc<AuditWorker>,
}

impl TaskLauncher {
    pub fn new(worker: Arc<AuditWorker>) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl WorkerLauncher for TaskLauncher {
    async fn launch(&self, id: WorkerId, events: PoolSender) -> Result<WorkerHandle> {
        let worker = self.worker.clone();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let emitter = ChannelEmitter::new(id, events.clone());
            let code = tokio::select! {
                exit = worker.run(id, &emitter) => Some(exit.code()),
                Ok(()) = kill_rx => {
                    debug!(worker_id = %id, "Worker task killed");
                    None
                }
            };
            let _ = events.send(PoolEvent::Exited { id, code });
        });

        Ok(WorkerHandle::new(None, kill_tx))
    }
}
