//! Pool orchestrator.
//!
//! A single task owns the pool and consumes one channel of [`PoolEvent`]s.
//! Spawn timers, queue fills and worker supervisors run on their own tasks
//! and post back into that channel, so the loop never waits on them.

use chrono::{DateTime, Utc};
use pagelab_config::Settings;
use pagelab_core::{
    AuditEngine, CreateOutcome, Error, JobQueue, PoolState, Result, WorkerEvent, WorkerId,
    WorkerRecord,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::filler::{FillOutcome, QueueFiller};
use crate::policy::{
    self, Action, DRAIN_GRACE, HUNG_WORKER_THRESHOLD, decide_next_action, reap_hung_workers,
};
use crate::pool::{PoolEvent, PoolSender, WorkerHandle, WorkerLauncher};

/// Floor for the delay between fills of an idle pool in infinity mode.
const MIN_REFILL_BACKOFF: Duration = Duration::from_secs(1);

/// Live view of the pool, published for the status endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSnapshot {
    pub active_workers: usize,
    /// URLs fetched by the most recent fill.
    pub last_fill_count: usize,
    pub server_started_at: DateTime<Utc>,
}

/// Why the orchestrator stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The run budget was spent and every worker has exited.
    RunBudgetExhausted,
    /// The shutdown signal fired.
    Interrupted,
}

struct WorkerSlot {
    handle: WorkerHandle,
    /// Whether this lifetime has reported anything yet.
    reported: bool,
}

pub struct Orchestrator {
    settings: Settings,
    queue: Arc<dyn JobQueue>,
    state: PoolState,
    engine: Arc<dyn AuditEngine>,
    launcher: Arc<dyn WorkerLauncher>,
    filler: Arc<QueueFiller>,
    slots: BTreeMap<WorkerId, WorkerSlot>,
    draining_since: Option<DateTime<Utc>>,
    snapshot: watch::Sender<PoolSnapshot>,
    events_tx: PoolSender,
    events_rx: mpsc::UnboundedReceiver<PoolEvent>,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        queue: Arc<dyn JobQueue>,
        state: PoolState,
        engine: Arc<dyn AuditEngine>,
        launcher: Arc<dyn WorkerLauncher>,
        filler: Arc<QueueFiller>,
    ) -> Self {
        let (snapshot, _) = watch::channel(PoolSnapshot {
            active_workers: 0,
            last_fill_count: 0,
            server_started_at: Utc::now(),
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            settings,
            queue,
            state,
            engine,
            launcher,
            filler,
            slots: BTreeMap::new(),
            draining_since: None,
            snapshot,
            events_tx,
            events_rx,
        }
    }

    /// Receiver for the live pool snapshot.
    pub fn subscribe(&self) -> watch::Receiver<PoolSnapshot> {
        self.snapshot.subscribe()
    }

    /// Run until the run budget is spent or `shutdown` resolves.
    ///
    /// Errors are fatal: a failed startup, a backend failure while no worker
    /// is alive, or failure to terminate the audit engine on the way out.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<Shutdown> {
        self.start().await?;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    self.stop_all().await;
                    return Ok(Shutdown::Interrupted);
                }
                Some(event) = self.events_rx.recv() => {
                    if let Some(done) = self.handle(event).await? {
                        return Ok(done);
                    }
                }
            }
        }
    }

    async fn start(&mut self) -> Result<()> {
        let name = self.settings.queue_name.clone();
        match self.queue.create_if_absent(&name).await? {
            CreateOutcome::Created => info!(queue = %name, "Queue created"),
            CreateOutcome::AlreadyExisted => info!(queue = %name, "Queue already exists"),
        }

        self.state.reset().await?;
        let depth = self.queue.attributes(&name).await?.depth;
        info!(
            queue = %name,
            depth,
            workers = self.settings.num_workers,
            max_runs = self.settings.max_runs_before_restart,
            "Orchestrator started"
        );

        if depth == 0 {
            self.request_fill(Duration::ZERO);
        } else {
            self.schedule_pool_spawn();
        }
        Ok(())
    }

    async fn handle(&mut self, event: PoolEvent) -> Result<Option<Shutdown>> {
        match event {
            PoolEvent::SpawnDue => {
                self.spawn_worker().await?;
                Ok(None)
            }
            PoolEvent::Worker { id, event } => {
                if let Err(e) = self.apply_event(id, event).await {
                    self.backend_failure(e)?;
                }
                Ok(None)
            }
            PoolEvent::Exited { id, code } => self.worker_exited(id, code).await,
            PoolEvent::QueueFilled(outcome) => {
                self.queue_filled(outcome).await?;
                Ok(None)
            }
        }
    }

    /// Fold one worker event into the state store.
    async fn apply_event(&mut self, id: WorkerId, event: WorkerEvent) -> Result<()> {
        let Some(slot) = self.slots.get_mut(&id) else {
            debug!(worker_id = %id, event = ?event, "Event from unknown worker");
            return Ok(());
        };

        // a new lifetime never inherits the record of a previous worker with this id
        let mut record = if slot.reported {
            self.state
                .worker_record(id)
                .await?
                .unwrap_or_else(|| WorkerRecord::new(id))
        } else {
            WorkerRecord::new(id)
        };
        slot.reported = true;

        match event {
            WorkerEvent::QueueEmpty => {
                info!(worker_id = %id, "Worker found the queue empty");
            }
            WorkerEvent::Claimed { url } => {
                debug!(worker_id = %id, url = %url, "Worker claimed job");
                record.url = Some(url);
            }
            WorkerEvent::EngineStarted { pid, started_at } => {
                record.pid = pid;
                record.browser_started_at = Some(started_at);
                let attempted = self.state.record_attempted_run().await?;
                debug!(worker_id = %id, pid = ?pid, attempted, "Audit engine started");
            }
            WorkerEvent::Completed => {
                self.state.clear_worker_record(id).await?;
                let successful = self.state.record_successful_run().await?;
                info!(worker_id = %id, successful, "Worker completed job");
                return Ok(());
            }
            WorkerEvent::Error { detail } => {
                warn!(worker_id = %id, detail = %detail, "Worker reported an error");
                self.state
                    .push_error(&format!("worker {}: {}", id, detail))
                    .await?;
            }
        }

        self.state.put_worker_record(&record).await
    }

    async fn worker_exited(&mut self, id: WorkerId, code: Option<i32>) -> Result<Option<Shutdown>> {
        if self.slots.remove(&id).is_none() {
            debug!(worker_id = %id, "Exit from unknown worker");
        }
        match code {
            Some(0) => info!(worker_id = %id, "Worker exited"),
            _ => warn!(worker_id = %id, code = ?code, "Worker exited abnormally"),
        }

        let swept = self.sweep_records().await;
        self.publish();
        if let Err(e) = swept {
            self.backend_failure(e)?;
            return Ok(None);
        }

        let (depth, successful_runs) = match self.observe().await {
            Ok(observed) => observed,
            Err(e) => {
                self.backend_failure(e)?;
                return Ok(None);
            }
        };

        let action = if self.draining_since.is_some() {
            Action::Drain
        } else {
            decide_next_action(
                successful_runs,
                depth,
                self.settings.infinity_mode,
                self.settings.max_runs_before_restart,
            )
        };
        debug!(depth, successful_runs, action = ?action, "Next pool action");

        match action {
            Action::Idle => {
                if self.slots.is_empty() {
                    info!("Queue exhausted, pool is idle");
                }
                Ok(None)
            }
            Action::Refill => {
                self.request_fill(Duration::ZERO);
                Ok(None)
            }
            Action::SpawnReplacement => {
                self.spawn_worker().await?;
                Ok(None)
            }
            Action::Drain => self.drain().await,
        }
    }

    /// Drop records of workers that are gone and kill workers that hang.
    async fn sweep_records(&mut self) -> Result<()> {
        let now = Utc::now();
        if self.slots.is_empty() {
            self.state.set_workers_cleared_at(Some(now)).await?;
        }

        let mut live = Vec::new();
        for record in self.state.worker_records().await? {
            if self.slots.contains_key(&record.worker_id) {
                live.push(record);
            } else {
                debug!(worker_id = %record.worker_id, "Clearing stale worker record");
                self.state.clear_worker_record(record.worker_id).await?;
            }
        }

        for id in reap_hung_workers(&live, now, HUNG_WORKER_THRESHOLD) {
            warn!(worker_id = %id, "Killing hung worker");
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.handle.kill();
            }
            let pid = live
                .iter()
                .find(|record| record.worker_id == id)
                .and_then(|record| record.pid);
            if let Some(pid) = pid {
                if let Err(e) = self.engine.terminate_process(pid).await {
                    warn!(worker_id = %id, pid, error = %e, "Failed to kill hung audit engine");
                }
            }
            self.state.clear_worker_record(id).await?;
        }
        Ok(())
    }

    async fn observe(&self) -> Result<(u64, u64)> {
        let depth = self
            .queue
            .attributes(&self.settings.queue_name)
            .await?
            .depth;
        let successful_runs = self.state.successful_runs().await?;
        Ok((depth, successful_runs))
    }

    /// Stop spawning; shut down once the pool is empty.
    async fn drain(&mut self) -> Result<Option<Shutdown>> {
        let now = Utc::now();
        let since = match self.draining_since {
            Some(since) => since,
            None => {
                info!(
                    max_runs = self.settings.max_runs_before_restart,
                    "Run budget reached, draining pool"
                );
                self.draining_since = Some(now);
                if let Err(e) = self.state.set_workers_cleared_at(Some(now)).await {
                    self.backend_failure(e)?;
                }
                now
            }
        };

        if self.slots.is_empty() {
            info!(engine = self.engine.name(), "Pool drained, terminating audit engine processes");
            self.engine.terminate_all().await?;
            return Ok(Some(Shutdown::RunBudgetExhausted));
        }

        if policy::elapsed_since(since, now) > DRAIN_GRACE {
            warn!(remaining = self.slots.len(), "Killing hanging workers");
            for slot in self.slots.values_mut() {
                slot.handle.kill();
            }
        }
        Ok(None)
    }

    async fn queue_filled(&mut self, outcome: Result<FillOutcome>) -> Result<()> {
        let retry = match outcome {
            Ok(FillOutcome::Filled { fetched, enqueued }) => {
                self.snapshot.send_modify(|s| s.last_fill_count = fetched);
                if enqueued > 0 {
                    self.schedule_pool_spawn();
                    return Ok(());
                }
                info!(fetched, "Fill produced no jobs");
                self.refill_backoff()
            }
            Ok(FillOutcome::NotEmpty) => {
                debug!("Queue refilled elsewhere");
                if self.slots.is_empty() {
                    self.schedule_pool_spawn();
                }
                return Ok(());
            }
            Ok(FillOutcome::Debounced { retry_in }) => retry_in,
            Err(e) => {
                warn!(error = %e, "Queue fill failed");
                if let Err(e) = self.state.push_error(&e.to_string()).await {
                    self.backend_failure(e)?;
                }
                self.refill_backoff()
            }
        };

        // an idle pool in infinity mode has nothing else that would trigger a fill
        if self.settings.infinity_mode && self.slots.is_empty() && self.draining_since.is_none() {
            debug!(retry_in = ?retry, "Retrying fill");
            self.request_fill(retry);
        }
        Ok(())
    }

    fn refill_backoff(&self) -> Duration {
        self.settings.fill_timeout.max(MIN_REFILL_BACKOFF)
    }

    /// Start one worker in the lowest free slot, if the pool has room.
    async fn spawn_worker(&mut self) -> Result<()> {
        if self.draining_since.is_some() {
            debug!("Draining, spawn dropped");
            return Ok(());
        }
        let Some(id) = self.free_slot() else {
            debug!("Pool is full, spawn dropped");
            return Ok(());
        };

        match self.state.successful_runs().await {
            Ok(runs) if runs >= self.settings.max_runs_before_restart => {
                debug!(runs, "Run budget reached, spawn dropped");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => return self.backend_failure(e),
        }

        match self.launcher.launch(id, self.events_tx.clone()).await {
            Ok(handle) => {
                self.slots.insert(
                    id,
                    WorkerSlot {
                        handle,
                        reported: false,
                    },
                );
                self.publish();
                if let Err(e) = self.state.set_workers_cleared_at(None).await {
                    self.backend_failure(e)?;
                }
                Ok(())
            }
            Err(e) => {
                error!(worker_id = %id, error = %e, "Failed to launch worker");
                self.backend_failure(e)
            }
        }
    }

    fn free_slot(&self) -> Option<WorkerId> {
        let capacity = u32::try_from(self.settings.num_workers).unwrap_or(u32::MAX);
        (1..=capacity)
            .map(WorkerId::new)
            .find(|id| !self.slots.contains_key(id))
    }

    /// Queue `numWorkers` spawns, worker `i` after `delay + backoff * i`.
    fn schedule_pool_spawn(&self) {
        let delay = self.settings.spawn_delay;
        let backoff = self.settings.spawn_backoff;
        for i in 0..self.settings.num_workers {
            let due = spawn_delay(delay, backoff, i);
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(due).await;
                let _ = tx.send(PoolEvent::SpawnDue);
            });
        }
        debug!(count = self.settings.num_workers, "Pool spawn scheduled");
    }

    fn request_fill(&self, after: Duration) {
        let filler = self.filler.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            if !after.is_zero() {
                tokio::time::sleep(after).await;
            }
            let outcome = filler.fill().await;
            let _ = tx.send(PoolEvent::QueueFilled(outcome));
        });
    }

    /// Kill every live worker and wait briefly for their exits.
    async fn stop_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.handle.kill();
        }

        let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
        while !self.slots.is_empty() {
            match tokio::time::timeout_at(deadline, self.events_rx.recv()).await {
                Ok(Some(PoolEvent::Exited { id, .. })) => {
                    self.slots.remove(&id);
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }
        if !self.slots.is_empty() {
            warn!(remaining = self.slots.len(), "Workers still running at shutdown");
        }
        self.publish();
    }

    /// Backend failures are only fatal once no worker is left to drive progress.
    fn backend_failure(&self, e: Error) -> Result<()> {
        if self.slots.is_empty() {
            error!(error = %e, "Backend failure with no live workers");
            Err(e)
        } else {
            warn!(error = %e, workers = self.slots.len(), "Backend failure");
            Ok(())
        }
    }

    fn publish(&self) {
        let active = self.slots.len();
        self.snapshot.send_modify(|s| s.active_workers = active);
    }
}

/// Spawn delay for worker `index` of a pool spawn.
pub fn spawn_delay(base: Duration, backoff: Duration, index: usize) -> Duration {
    base + backoff.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX))
}
