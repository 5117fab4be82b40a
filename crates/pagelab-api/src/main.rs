//! PageLab server.
//!
//! Without a subcommand this runs the orchestrator and the status server.
//! `worker --worker-id <n>` runs a single worker lifetime; the orchestrator
//! spawns these itself.

use anyhow::Context;
use clap::{Parser, Subcommand};
use pagelab_api::{AppState, routes};
use pagelab_config::{Settings, SettingsArgs};
use pagelab_core::{AuditEngine, JobQueue, PoolState, WorkerEvent, WorkerId};
use pagelab_engine::LighthouseEngine;
use pagelab_scheduler::{
    AuditWorker, EventEmitter, Orchestrator, ProcessLauncher, QueueFiller, ResultSink,
    StdoutEmitter, WorkerExit, http,
};
use pagelab_store::{PgJobQueue, RedisStateStore, create_pool, run_migrations};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pagelab-server")]
#[command(about = "Job-queue driven pool of web page audit workers")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand)]
enum Mode {
    /// Run the orchestrator and the status server (default)
    Serve,
    /// Run one worker lifetime and exit
    Worker {
        /// Pool slot this worker occupies
        #[arg(long)]
        worker_id: WorkerId,
    },
}

fn init_tracing(to_stderr: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if to_stderr {
        // stdout carries worker events
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.mode {
        Some(Mode::Worker { worker_id }) => {
            init_tracing(true);
            let exit = match cli.settings.resolve() {
                Ok(settings) => run_worker(settings, worker_id).await,
                Err(e) => Err(anyhow::Error::new(e).context("invalid settings")),
            };
            let code = match exit {
                Ok(exit) => exit.code(),
                Err(e) => {
                    error!(worker_id = %worker_id, error = %format!("{:#}", e), "Worker failed to start");
                    if let Err(emit_err) = StdoutEmitter
                        .emit(WorkerEvent::error(format!("{:#}", e)))
                        .await
                    {
                        warn!(error = %emit_err, "Failed to report worker error");
                    }
                    WorkerExit::Failed.code()
                }
            };
            std::process::exit(code);
        }
        Some(Mode::Serve) | None => {
            init_tracing(false);
            let settings = cli.settings.resolve().context("invalid settings")?;
            serve(settings).await
        }
    }
}

fn build_engine(settings: &Settings) -> Arc<dyn AuditEngine> {
    Arc::new(
        LighthouseEngine::new(&settings.engine.command, &settings.engine.process_name)
            .with_chrome_flags(settings.engine.chrome_flags.clone())
            .with_config_path(settings.engine.config_path.clone()),
    )
}

async fn run_worker(settings: Settings, id: WorkerId) -> anyhow::Result<WorkerExit> {
    let db = create_pool(&settings.database_url)
        .await
        .context("connecting to the job queue database")?;
    let queue: Arc<dyn JobQueue> = Arc::new(PgJobQueue::new(db));
    let client = http::client(settings.insecure_tls)?;
    let sink = ResultSink::new(client, settings.report_url.clone(), settings.referrer.clone());
    let worker = AuditWorker::new(queue, settings.queue_name.clone(), build_engine(&settings), sink);

    Ok(worker.run(id, &StdoutEmitter).await)
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    info!("Connecting to database...");
    let db = create_pool(&settings.database_url)
        .await
        .context("connecting to the job queue database")?;
    run_migrations(&db).await.context("running migrations")?;
    let queue: Arc<dyn JobQueue> = Arc::new(PgJobQueue::new(db));
    info!("Database connected");

    let store = RedisStateStore::connect(&settings.redis_url, &settings.redis_namespace)
        .await
        .context("connecting to the state store")?;
    let pool_state = PoolState::new(Arc::new(store));

    let filler = Arc::new(QueueFiller::new(
        http::client(settings.insecure_tls)?,
        settings.list_url.clone(),
        queue.clone(),
        settings.queue_name.clone(),
        settings.fill_timeout,
    ));
    let launcher = Arc::new(ProcessLauncher::current_exe(settings.to_env())?);
    let orchestrator = Orchestrator::new(
        settings.clone(),
        queue.clone(),
        pool_state.clone(),
        build_engine(&settings),
        launcher,
        filler,
    );

    let state = AppState::new(settings.clone(), queue, pool_state, orchestrator.subscribe());
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;
    info!("Starting server on {}", settings.listen);
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Status server stopped");
        }
    });

    let outcome = orchestrator.run(shutdown_signal()).await;
    server.abort();

    let reason = outcome.context("orchestrator failed")?;
    info!(reason = ?reason, "PageLab stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
