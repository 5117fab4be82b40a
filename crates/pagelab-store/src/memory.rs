//! In-process queue and state store.
//!
//! Both behave like their external counterparts: dequeue removes the message,
//! and the store keeps JSON values under flat keys. State lives only as long
//! as the value, so these are meant for tests and single-process trials.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pagelab_core::{CreateOutcome, Error, Job, JobId, JobQueue, QueueSnapshot, Result, StateStore};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::Mutex;

struct MemoryQueue {
    created_at: DateTime<Utc>,
    messages: VecDeque<Job>,
}

/// FIFO job queue held in memory.
#[derive(Default)]
pub struct MemoryJobQueue {
    queues: Mutex<HashMap<String, MemoryQueue>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `name` and enqueue `urls` in order.
    pub async fn seeded(name: &str, urls: &[&str]) -> Result<Self> {
        let queue = Self::new();
        queue.create_if_absent(name).await?;
        for url in urls {
            queue.enqueue(name, url).await?;
        }
        Ok(queue)
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn create_if_absent(&self, name: &str) -> Result<CreateOutcome> {
        let mut queues = self.queues.lock().await;
        if queues.contains_key(name) {
            return Ok(CreateOutcome::AlreadyExisted);
        }
        queues.insert(
            name.to_string(),
            MemoryQueue {
                created_at: Utc::now(),
                messages: VecDeque::new(),
            },
        );
        Ok(CreateOutcome::Created)
    }

    async fn enqueue(&self, name: &str, payload: &str) -> Result<JobId> {
        let mut queues = self.queues.lock().await;
        let queue = queues
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("queue {}", name)))?;
        let id = JobId::new();
        queue.messages.push_back(Job::new(id, payload));
        Ok(id)
    }

    async fn dequeue(&self, name: &str) -> Result<Option<Job>> {
        let mut queues = self.queues.lock().await;
        let queue = queues
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("queue {}", name)))?;
        Ok(queue.messages.pop_front())
    }

    async fn attributes(&self, name: &str) -> Result<QueueSnapshot> {
        let queues = self.queues.lock().await;
        let queue = queues
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("queue {}", name)))?;
        Ok(QueueSnapshot {
            depth: queue.messages.len() as u64,
            created_at: queue.created_at,
        })
    }
}

/// Key/value state store held in memory.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<(String, Value)>> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pagelab_core::state::RECENT_ERROR_LIMIT;
    use pagelab_core::{PoolState, WorkerId, WorkerRecord};
    use std::sync::Arc;

    fn pool_state() -> PoolState {
        PoolState::new(Arc::new(MemoryStateStore::new()))
    }

    #[tokio::test]
    async fn test_queue_is_fifo_and_pop_removes() {
        let queue = MemoryJobQueue::seeded("q", &["https://a.test", "https://b.test"])
            .await
            .unwrap();

        assert_eq!(queue.attributes("q").await.unwrap().depth, 2);

        let first = queue.dequeue("q").await.unwrap().unwrap();
        let second = queue.dequeue("q").await.unwrap().unwrap();
        assert_eq!(first.url, "https://a.test");
        assert_eq!(second.url, "https://b.test");
        assert_ne!(first.id, second.id);

        assert!(queue.dequeue("q").await.unwrap().is_none());
        assert!(queue.attributes("q").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_if_absent_reports_existing_queue() {
        let queue = MemoryJobQueue::new();
        assert_eq!(
            queue.create_if_absent("q").await.unwrap(),
            CreateOutcome::Created
        );
        let created_at = queue.attributes("q").await.unwrap().created_at;

        assert_eq!(
            queue.create_if_absent("q").await.unwrap(),
            CreateOutcome::AlreadyExisted
        );
        assert_eq!(queue.attributes("q").await.unwrap().created_at, created_at);
    }

    #[tokio::test]
    async fn test_unknown_queue_is_not_found() {
        let queue = MemoryJobQueue::new();
        assert!(matches!(
            queue.attributes("missing").await,
            Err(Error::NotFound(_))
        ));
        assert!(queue.enqueue("missing", "https://a.test").await.is_err());
    }

    #[tokio::test]
    async fn test_worker_record_put_overwrites() {
        let state = pool_state();
        let id = WorkerId::new(1);

        let mut stale = WorkerRecord::new(id);
        stale.pid = Some(99);
        stale.url = Some("https://old.test".to_string());
        state.put_worker_record(&stale).await.unwrap();

        let fresh = WorkerRecord {
            url: Some("https://new.test".to_string()),
            ..WorkerRecord::new(id)
        };
        state.put_worker_record(&fresh).await.unwrap();

        let stored = state.worker_record(id).await.unwrap().unwrap();
        assert_eq!(stored, fresh);
        assert_eq!(stored.pid, None);
    }

    #[tokio::test]
    async fn test_worker_records_lists_only_workers_in_order() {
        let state = pool_state();
        for id in [3, 1, 2] {
            state
                .put_worker_record(&WorkerRecord::new(WorkerId::new(id)))
                .await
                .unwrap();
        }
        state.record_successful_run().await.unwrap();
        state.push_error("boom").await.unwrap();

        let ids: Vec<u32> = state
            .worker_records()
            .await
            .unwrap()
            .iter()
            .map(|r| r.worker_id.get())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);

        state.clear_worker_record(WorkerId::new(2)).await.unwrap();
        assert_eq!(state.worker_records().await.unwrap().len(), 2);
        assert!(state.worker_record(WorkerId::new(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_counters_increment_and_reset() {
        let state = pool_state();
        assert_eq!(state.counters().await.unwrap(), Default::default());

        state.record_attempted_run().await.unwrap();
        state.record_attempted_run().await.unwrap();
        assert_eq!(state.record_successful_run().await.unwrap(), 1);

        let cleared = Utc::now() - Duration::seconds(5);
        state.set_workers_cleared_at(Some(cleared)).await.unwrap();
        state
            .put_worker_record(&WorkerRecord::new(WorkerId::new(4)))
            .await
            .unwrap();

        let counters = state.counters().await.unwrap();
        assert_eq!(counters.successful_runs, 1);
        assert_eq!(counters.attempted_runs, 2);
        assert_eq!(
            counters.workers_cleared_at.map(|t| t.timestamp_millis()),
            Some(cleared.timestamp_millis())
        );

        state.reset().await.unwrap();
        assert_eq!(state.counters().await.unwrap(), Default::default());
        assert!(state.worker_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_errors_are_capped() {
        let state = pool_state();
        for i in 0..(RECENT_ERROR_LIMIT + 5) {
            state.push_error(&format!("error {}", i)).await.unwrap();
        }
        let errors = state.recent_errors().await.unwrap();
        assert_eq!(errors.len(), RECENT_ERROR_LIMIT);
        assert_eq!(errors[0], "error 5");
        assert_eq!(
            errors.last().unwrap(),
            &format!("error {}", RECENT_ERROR_LIMIT + 4)
        );
    }
}
