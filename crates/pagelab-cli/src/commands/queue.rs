//! Job queue commands.

use anyhow::{Context, Result, bail};
use pagelab_config::Settings;
use pagelab_core::JobQueue;
use pagelab_scheduler::{FillOutcome, QueueFiller, http};
use pagelab_store::{PgJobQueue, create_pool, run_migrations};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

async fn connect(settings: &Settings) -> Result<Arc<dyn JobQueue>> {
    let db = create_pool(&settings.database_url)
        .await
        .context("Failed to connect to the job queue database")?;
    run_migrations(&db).await.context("Failed to run migrations")?;
    Ok(Arc::new(PgJobQueue::new(db)))
}

/// Check every URL before anything is enqueued.
fn parse_targets(urls: &[String]) -> Result<Vec<Url>> {
    let mut targets = Vec::with_capacity(urls.len());
    for raw in urls {
        let url = Url::parse(raw).with_context(|| format!("Invalid URL: {}", raw))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("Unsupported scheme in {}", raw);
        }
        targets.push(url);
    }
    Ok(targets)
}

async fn enqueue_all(queue: &dyn JobQueue, queue_name: &str, targets: &[Url]) -> Result<usize> {
    queue
        .create_if_absent(queue_name)
        .await
        .with_context(|| format!("Failed to create queue {}", queue_name))?;
    for url in targets {
        let id = queue
            .enqueue(queue_name, url.as_str())
            .await
            .with_context(|| format!("Failed to enqueue {}", url))?;
        println!("  {} {}", id, url);
    }
    Ok(targets.len())
}

pub async fn enqueue(settings: &Settings, urls: &[String]) -> Result<()> {
    let targets = parse_targets(urls)?;
    let queue = connect(settings).await?;
    let count = enqueue_all(queue.as_ref(), &settings.queue_name, &targets).await?;
    println!("Enqueued {} job(s) on {}", count, settings.queue_name);
    Ok(())
}

pub async fn fill(settings: &Settings) -> Result<()> {
    let queue = connect(settings).await?;
    queue
        .create_if_absent(&settings.queue_name)
        .await
        .with_context(|| format!("Failed to create queue {}", settings.queue_name))?;

    let filler = QueueFiller::new(
        http::client(settings.insecure_tls)?,
        settings.list_url.clone(),
        queue,
        settings.queue_name.clone(),
        Duration::ZERO,
    );
    match filler.fill().await.context("Queue fill failed")? {
        FillOutcome::Filled { fetched, enqueued } => {
            println!("Fetched {} URL(s), enqueued {}", fetched, enqueued);
        }
        FillOutcome::NotEmpty => {
            println!("Queue {} still holds jobs, nothing fetched", settings.queue_name);
        }
        FillOutcome::Debounced { retry_in } => {
            println!("Fill deferred, retry in {:?}", retry_in);
        }
    }
    Ok(())
}
