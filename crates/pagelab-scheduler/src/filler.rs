//! Queue filler: pulls URLs from the job source into the job queue.

use chrono::{DateTime, Utc};
use pagelab_core::{Error, JobQueue, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::policy::elapsed_since;

/// Body returned by the job source.
#[derive(Debug, Deserialize)]
struct UrlList {
    message: Vec<UrlEntry>,
}

#[derive(Debug, Deserialize)]
struct UrlEntry {
    url: String,
}

/// Result of a fill request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// The job source was read; `enqueued` of `fetched` URLs made it into the queue.
    Filled { fetched: usize, enqueued: usize },
    /// The queue still holds jobs; nothing was fetched.
    NotEmpty,
    /// The previous fill was too recent; try again after `retry_in`.
    Debounced { retry_in: Duration },
}

pub struct QueueFiller {
    client: reqwest::Client,
    list_url: Url,
    queue: Arc<dyn JobQueue>,
    queue_name: String,
    debounce: Duration,
    /// Time of the last successful fill.
    last_fill_at: Mutex<Option<DateTime<Utc>>>,
}

impl QueueFiller {
    pub fn new(
        client: reqwest::Client,
        list_url: Url,
        queue: Arc<dyn JobQueue>,
        queue_name: impl Into<String>,
        debounce: Duration,
    ) -> Self {
        Self {
            client,
            list_url,
            queue,
            queue_name: queue_name.into(),
            debounce,
            last_fill_at: Mutex::new(None),
        }
    }

    /// Fetch the job source and enqueue one job per URL.
    ///
    /// Fills are serialized and only run against an empty queue. A request
    /// arriving within the debounce window of the last successful fill is
    /// deferred. Individual enqueue failures are logged and do not abort the
    /// fill.
    pub async fn fill(&self) -> Result<FillOutcome> {
        let mut last_fill_at = self.last_fill_at.lock().await;

        let depth = self.queue.attributes(&self.queue_name).await?.depth;
        if depth > 0 {
            debug!(depth, "Queue is not empty, fill skipped");
            return Ok(FillOutcome::NotEmpty);
        }

        if let Some(previous) = *last_fill_at {
            let elapsed = elapsed_since(previous, Utc::now());
            if elapsed < self.debounce {
                let retry_in = self.debounce - elapsed;
                debug!(last_fill = %previous, retry_in = ?retry_in, "Fill debounced");
                return Ok(FillOutcome::Debounced { retry_in });
            }
        }

        let urls = self.fetch().await?;
        let fetched = urls.len();
        let mut enqueued = 0;
        for url in urls {
            match self.queue.enqueue(&self.queue_name, &url).await {
                Ok(id) => {
                    debug!(job_id = %id, url = %url, "Url added to queue");
                    enqueued += 1;
                }
                Err(e) => warn!(url = %url, error = %e, "Failed to enqueue url"),
            }
        }

        *last_fill_at = Some(Utc::now());
        info!(queue = %self.queue_name, fetched, enqueued, "Queue filled");
        Ok(FillOutcome::Filled { fetched, enqueued })
    }

    async fn fetch(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.list_url.clone())
            .send()
            .await
            .map_err(|e| Error::JobSource(format!("{}: {}", self.list_url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::JobSource(format!(
                "{} returned {}",
                self.list_url, status
            )));
        }

        let body: UrlList = response
            .json()
            .await
            .map_err(|e| Error::JobSource(format!("{}: unexpected body: {}", self.list_url, e)))?;

        Ok(body.message.into_iter().map(|entry| entry.url).collect())
    }
}
