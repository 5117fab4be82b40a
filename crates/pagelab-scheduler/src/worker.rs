//! A worker runs exactly one job per lifetime.
//!
//! `started -> claimed -> auditing -> reporting -> done`, with a jump to
//! `failed` from any step. Progress is reported through an [`EventEmitter`];
//! the emitted events never steer the orchestrator's control flow beyond
//! bookkeeping.

use async_trait::async_trait;
use pagelab_core::{AuditEngine, Error, Job, JobQueue, Result, WorkerEvent, WorkerId};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::sink::ResultSink;

/// Destination for a worker's lifecycle events.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn emit(&self, event: WorkerEvent) -> Result<()>;
}

/// Writes events as JSON lines on stdout.
pub struct StdoutEmitter;

#[async_trait]
impl EventEmitter for StdoutEmitter {
    async fn emit(&self, event: WorkerEvent) -> Result<()> {
        let mut line = event.to_line()?;
        line.push('\n');
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Internal(format!("stdout: {}", e)))?;
        stdout
            .flush()
            .await
            .map_err(|e| Error::Internal(format!("stdout: {}", e)))
    }
}

/// How a worker lifetime ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Finished normally, including "queue was empty".
    Done,
    /// Failed before completing its job.
    Failed,
}

impl WorkerExit {
    /// Process exit code for this outcome.
    pub fn code(self) -> i32 {
        match self {
            WorkerExit::Done => 0,
            WorkerExit::Failed => 1,
        }
    }
}

pub struct AuditWorker {
    queue: Arc<dyn JobQueue>,
    queue_name: String,
    engine: Arc<dyn AuditEngine>,
    sink: ResultSink,
}

impl AuditWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        queue_name: impl Into<String>,
        engine: Arc<dyn AuditEngine>,
        sink: ResultSink,
    ) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            engine,
            sink,
        }
    }

    /// Run one worker lifetime as worker `id`.
    pub async fn run(&self, id: WorkerId, events: &dyn EventEmitter) -> WorkerExit {
        match self.execute(id, events).await {
            Ok(()) => WorkerExit::Done,
            Err(e) => {
                error!(worker_id = %id, error = %e, "Worker failed");
                send(events, WorkerEvent::error(e.to_string())).await;
                WorkerExit::Failed
            }
        }
    }

    async fn execute(&self, id: WorkerId, events: &dyn EventEmitter) -> Result<()> {
        let Some(job) = self.queue.dequeue(&self.queue_name).await? else {
            info!(worker_id = %id, queue = %self.queue_name, "Queue is empty");
            send(events, WorkerEvent::QueueEmpty).await;
            return Ok(());
        };

        let target = job.target()?;
        info!(worker_id = %id, job_id = %job.id, url = %target, "Claimed job");
        send(
            events,
            WorkerEvent::Claimed {
                url: target.to_string(),
            },
        )
        .await;

        let handle = self.engine.launch(job.id, &target).await?;
        send(
            events,
            WorkerEvent::EngineStarted {
                pid: handle.pid,
                started_at: handle.started_at,
            },
        )
        .await;

        let output = match self.engine.wait(&handle).await {
            Ok(output) => output,
            Err(e) => {
                if let Err(kill_err) = self.engine.kill(&handle).await {
                    warn!(worker_id = %id, error = %kill_err, "Failed to kill audit engine");
                }
                return Err(e);
            }
        };

        let report = match output.report {
            Some(report) => report,
            None => {
                warn!(worker_id = %id, url = %target, "Audit finished without a report");
                send(
                    events,
                    WorkerEvent::error(format!("no report produced for {}", target)),
                )
                .await;
                missing_report(&job)
            }
        };

        if let Err(e) = self.sink.deliver(report).await {
            warn!(worker_id = %id, url = %target, error = %e, "Result delivery failed");
            send(events, WorkerEvent::error(e.to_string())).await;
        }

        info!(worker_id = %id, url = %target, "Job complete");
        send(events, WorkerEvent::Completed).await;
        Ok(())
    }
}

/// Stand-in report for an audit that produced none.
fn missing_report(job: &Job) -> Value {
    json!({
        "error": "audit engine produced no report",
        "url": job.url,
    })
}

async fn send(events: &dyn EventEmitter, event: WorkerEvent) {
    if let Err(e) = events.emit(event).await {
        warn!(error = %e, "Failed to emit worker event");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use chrono::Utc;
    use pagelab_core::{AuditHandle, AuditOutput, JobId};
    use pagelab_store::MemoryJobQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;
    use url::Url;

    const QUEUE: &str = "lighthouse-queue";

    /// Engine that answers every audit with a canned outcome.
    pub(crate) struct FakeEngine {
        pub outcome: FakeOutcome,
        pub launched: Mutex<Vec<String>>,
        pub killed: AtomicUsize,
        pub terminated: Mutex<Vec<u32>>,
        pub terminate_all_calls: AtomicUsize,
    }

    #[derive(Clone)]
    pub(crate) enum FakeOutcome {
        Report,
        NoReport,
        LaunchFails,
        WaitFails,
        /// Reports an engine start time this far in the past, then never finishes.
        Hang(chrono::Duration),
    }

    impl FakeEngine {
        pub fn new(outcome: FakeOutcome) -> Self {
            Self {
                outcome,
                launched: Mutex::new(Vec::new()),
                killed: AtomicUsize::new(0),
                terminated: Mutex::new(Vec::new()),
                terminate_all_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AuditEngine for FakeEngine {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn launch(&self, job_id: JobId, url: &Url) -> Result<AuditHandle> {
            if matches!(self.outcome, FakeOutcome::LaunchFails) {
                return Err(Error::AuditEngine("no browser".to_string()));
            }
            let mut launched = self.launched.lock().await;
            launched.push(url.to_string());
            let started_at = match &self.outcome {
                FakeOutcome::Hang(age) => Utc::now() - *age,
                _ => Utc::now(),
            };
            Ok(AuditHandle {
                job_id,
                pid: Some(40_000 + launched.len() as u32),
                started_at,
                engine_name: "fake".to_string(),
            })
        }

        async fn wait(&self, handle: &AuditHandle) -> Result<AuditOutput> {
            match &self.outcome {
                FakeOutcome::Report => Ok(AuditOutput {
                    report: Some(json!({"jobId": handle.job_id.to_string()})),
                }),
                FakeOutcome::NoReport => Ok(AuditOutput::default()),
                FakeOutcome::WaitFails => Err(Error::AuditEngine("crashed".to_string())),
                FakeOutcome::Hang(_) => std::future::pending().await,
                FakeOutcome::LaunchFails => unreachable!(),
            }
        }

        async fn kill(&self, _handle: &AuditHandle) -> Result<()> {
            self.killed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn terminate_process(&self, pid: u32) -> Result<()> {
            self.terminated.lock().await.push(pid);
            Ok(())
        }

        async fn terminate_all(&self) -> Result<()> {
            self.terminate_all_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Collects events in memory.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<WorkerEvent>>,
    }

    #[async_trait]
    impl EventEmitter for Recorder {
        async fn emit(&self, event: WorkerEvent) -> Result<()> {
            self.events.lock().await.push(event);
            Ok(())
        }
    }

    impl Recorder {
        async fn kinds(&self) -> Vec<&'static str> {
            self.events
                .lock()
                .await
                .iter()
                .map(|event| match event {
                    WorkerEvent::QueueEmpty => "queue_empty",
                    WorkerEvent::Claimed { .. } => "claimed",
                    WorkerEvent::EngineStarted { .. } => "engine_started",
                    WorkerEvent::Completed => "completed",
                    WorkerEvent::Error { .. } => "error",
                })
                .collect()
        }
    }

    /// Result sink on an ephemeral port that counts posts.
    pub(crate) async fn sink_server(status: StatusCode) -> (Url, Arc<AtomicUsize>) {
        let posts = Arc::new(AtomicUsize::new(0));
        let counter = posts.clone();
        let app = Router::new().route(
            "/collect/report/",
            post(move |_body: String| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    status
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let url = Url::parse(&format!("http://{}/collect/report/", addr)).unwrap();
        (url, posts)
    }

    async fn worker(
        urls: &[&str],
        engine: Arc<FakeEngine>,
        sink_status: StatusCode,
    ) -> (AuditWorker, Arc<MemoryJobQueue>, Arc<AtomicUsize>) {
        let queue = Arc::new(MemoryJobQueue::seeded(QUEUE, urls).await.unwrap());
        let (url, posts) = sink_server(sink_status).await;
        let sink = ResultSink::new(reqwest::Client::new(), url, "https://reports.test/");
        let worker = AuditWorker::new(queue.clone(), QUEUE, engine, sink);
        (worker, queue, posts)
    }

    #[tokio::test]
    async fn test_successful_job_reports_in_order() {
        let engine = Arc::new(FakeEngine::new(FakeOutcome::Report));
        let (worker, queue, posts) = worker(&["https://a.test"], engine.clone(), StatusCode::OK).await;
        let events = Recorder::default();

        let exit = worker.run(WorkerId::new(1), &events).await;

        assert_eq!(exit, WorkerExit::Done);
        assert_eq!(exit.code(), 0);
        assert_eq!(events.kinds().await, vec!["claimed", "engine_started", "completed"]);
        assert_eq!(posts.load(Ordering::SeqCst), 1);
        assert_eq!(*engine.launched.lock().await, vec!["https://a.test/"]);
        assert!(queue.attributes(QUEUE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_queue_exits_cleanly_without_audit() {
        let engine = Arc::new(FakeEngine::new(FakeOutcome::Report));
        let (worker, _queue, posts) = worker(&[], engine.clone(), StatusCode::OK).await;
        let events = Recorder::default();

        assert_eq!(worker.run(WorkerId::new(1), &events).await, WorkerExit::Done);
        assert_eq!(events.kinds().await, vec!["queue_empty"]);
        assert!(engine.launched.lock().await.is_empty());
        assert_eq!(posts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_url_fails_worker() {
        let engine = Arc::new(FakeEngine::new(FakeOutcome::Report));
        let (worker, queue, _posts) = worker(&["not a url"], engine.clone(), StatusCode::OK).await;
        let events = Recorder::default();

        assert_eq!(worker.run(WorkerId::new(1), &events).await, WorkerExit::Failed);
        assert_eq!(events.kinds().await, vec!["error"]);
        assert!(engine.launched.lock().await.is_empty());
        // the job is gone
        assert!(queue.attributes(QUEUE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_still_completes() {
        let engine = Arc::new(FakeEngine::new(FakeOutcome::Report));
        let (worker, _queue, posts) =
            worker(&["https://a.test"], engine, StatusCode::INTERNAL_SERVER_ERROR).await;
        let events = Recorder::default();

        assert_eq!(worker.run(WorkerId::new(1), &events).await, WorkerExit::Done);
        assert_eq!(
            events.kinds().await,
            vec!["claimed", "engine_started", "error", "completed"]
        );
        assert_eq!(posts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_report_is_synthesized_and_delivered() {
        let engine = Arc::new(FakeEngine::new(FakeOutcome::NoReport));
        let (worker, _queue, posts) = worker(&["https://a.test"], engine, StatusCode::OK).await;
        let events = Recorder::default();

        assert_eq!(worker.run(WorkerId::new(1), &events).await, WorkerExit::Done);
        assert_eq!(
            events.kinds().await,
            vec!["claimed", "engine_started", "error", "completed"]
        );
        assert_eq!(posts.load(Ordering::SeqCst), 1);

        let job = Job::new(JobId::new(), "https://a.test");
        assert_eq!(missing_report(&job)["url"], "https://a.test");
    }

    #[tokio::test]
    async fn test_launch_failure_fails_without_completion() {
        let engine = Arc::new(FakeEngine::new(FakeOutcome::LaunchFails));
        let (worker, _queue, posts) = worker(&["https://a.test"], engine, StatusCode::OK).await;
        let events = Recorder::default();

        assert_eq!(worker.run(WorkerId::new(1), &events).await, WorkerExit::Failed);
        assert_eq!(events.kinds().await, vec!["claimed", "error"]);
        assert_eq!(posts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_engine_crash_kills_engine_and_fails() {
        let engine = Arc::new(FakeEngine::new(FakeOutcome::WaitFails));
        let (worker, _queue, _posts) =
            worker(&["https://a.test"], engine.clone(), StatusCode::OK).await;
        let events = Recorder::default();

        assert_eq!(worker.run(WorkerId::new(1), &events).await, WorkerExit::Failed);
        assert_eq!(events.kinds().await, vec!["claimed", "engine_started", "error"]);
        assert_eq!(engine.killed.load(Ordering::SeqCst), 1);
    }
}
