//! Storage backend errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("invalid stored value: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for pagelab_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::QueueNotFound(name) => pagelab_core::Error::NotFound(format!("queue {}", name)),
            StoreError::Database(_) | StoreError::Migration(_) => {
                pagelab_core::Error::Queue(err.to_string())
            }
            StoreError::Redis(_) | StoreError::Decode(_) => pagelab_core::Error::Store(err.to_string()),
        }
    }
}
