//! State store backed by a single Redis hash.
//!
//! All keys live as fields of `{namespace}:state`, so listing the whole store
//! is one `HGETALL` and nothing outside the namespace is ever touched.

use async_trait::async_trait;
use pagelab_core::{Result, StateStore};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use crate::{StoreError, StoreResult};

/// Redis-based state store.
#[derive(Clone)]
pub struct RedisStateStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    /// Hash holding every key of this store.
    hash_key: String,
}

impl RedisStateStore {
    /// Connect to Redis and use `{namespace}:state` as the backing hash.
    pub async fn connect(redis_url: &str, namespace: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(redis, namespace))
    }

    /// Creates a store from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager, namespace: &str) -> Self {
        Self {
            redis,
            hash_key: format!("{}:state", namespace),
        }
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn
            .hget(&self.hash_key, key)
            .await
            .map_err(StoreError::from)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw).map_err(StoreError::from)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut conn = self.redis.clone();
        let raw = serde_json::to_string(&value).map_err(StoreError::from)?;
        conn.hset::<_, _, _, ()>(&self.hash_key, key, raw)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        conn.hdel::<_, _, ()>(&self.hash_key, key)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<(String, Value)>> {
        let mut conn = self.redis.clone();
        let raw: HashMap<String, String> = conn
            .hgetall(&self.hash_key)
            .await
            .map_err(StoreError::from)?;

        let mut entries = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            match serde_json::from_str(&value) {
                Ok(value) => entries.push((key, value)),
                Err(e) => warn!(key = %key, error = %e, "Skipping undecodable state entry"),
            }
        }
        Ok(entries)
    }
}
