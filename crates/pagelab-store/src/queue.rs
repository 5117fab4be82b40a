//! Job queue backed by PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pagelab_core::{CreateOutcome, Error, Job, JobId, JobQueue, QueueSnapshot, Result};
use sqlx::PgPool;

use crate::StoreError;

/// A message row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
struct QueuedMessage {
    id: uuid::Uuid,
    payload: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct QueueAttributes {
    created_at: DateTime<Utc>,
    depth: i64,
}

/// Job queue backed by PostgreSQL.
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn create_if_absent(&self, name: &str) -> Result<CreateOutcome> {
        let created: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            INSERT INTO job_queues (name, created_at)
            VALUES ($1, NOW())
            ON CONFLICT (name) DO NOTHING
            RETURNING created_at
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::QueueProvisioning(format!("queue {}: {}", name, e)))?;

        Ok(match created {
            Some(_) => CreateOutcome::Created,
            None => CreateOutcome::AlreadyExisted,
        })
    }

    async fn enqueue(&self, name: &str, payload: &str) -> Result<JobId> {
        let id = JobId::new();
        sqlx::query(
            r#"
            INSERT INTO job_queue_messages (id, queue_name, payload, enqueued_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(id.as_uuid())
        .bind(name)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(id)
    }

    /// Pop the oldest message.
    /// Uses SKIP LOCKED so concurrent workers never pop the same row.
    async fn dequeue(&self, name: &str) -> Result<Option<Job>> {
        let message = sqlx::query_as::<_, QueuedMessage>(
            r#"
            DELETE FROM job_queue_messages
            WHERE id = (
                SELECT id FROM job_queue_messages
                WHERE queue_name = $1
                ORDER BY enqueued_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, payload
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(message.map(|m| Job::new(JobId::from(m.id), m.payload)))
    }

    async fn attributes(&self, name: &str) -> Result<QueueSnapshot> {
        let attrs = sqlx::query_as::<_, QueueAttributes>(
            r#"
            SELECT q.created_at, COUNT(m.id) AS depth
            FROM job_queues q
            LEFT JOIN job_queue_messages m ON m.queue_name = q.name
            WHERE q.name = $1
            GROUP BY q.created_at
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?
        .ok_or_else(|| StoreError::QueueNotFound(name.to_string()))?;

        Ok(QueueSnapshot {
            depth: attrs.depth.max(0) as u64,
            created_at: attrs.created_at,
        })
    }
}
