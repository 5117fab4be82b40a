//! Job queue and state store backends for the PageLab audit pool.
//!
//! - [`PgJobQueue`]: PostgreSQL job queue, one row per message
//! - [`RedisStateStore`]: Redis hash holding worker records and counters
//! - [`MemoryJobQueue`] / [`MemoryStateStore`]: in-process versions for tests
//!   and local runs

pub mod error;
pub mod memory;
pub mod queue;
pub mod redis_store;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryJobQueue, MemoryStateStore};
pub use queue::PgJobQueue;
pub use redis_store::RedisStateStore;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> StoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
