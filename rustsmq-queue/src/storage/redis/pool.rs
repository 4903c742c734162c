//! Redis connection pool management.

use bb8_redis::bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use serde::Deserialize;
use std::time::Duration;

use crate::storage::StorageError;

/// Configuration for the Redis connection pool.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RedisPoolConfig {
    /// Maximum number of connections in the pool
    pub max_size: u32,
    /// Minimum number of idle connections
    pub min_idle: u32,
    /// Connection timeout in seconds
    pub conn_timeout_secs: u64,
    /// Idle connection timeout in seconds
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds
    pub max_lifetime_secs: u64,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: 50,
            min_idle: 5,
            conn_timeout_secs: 30,
            idle_timeout_secs: 300,
            max_lifetime_secs: 1800,
        }
    }
}

/// Build a pool and verify it with a single PING.
pub(super) async fn create_pool(
    redis_url: &str,
    config: RedisPoolConfig,
) -> Result<Pool<RedisConnectionManager>, StorageError> {
    if config.max_size == 0 {
        return Err(StorageError::Configuration("max_size must be > 0".into()));
    }

    tracing::info!(
        max_size = config.max_size,
        min_idle = config.min_idle,
        conn_timeout_secs = config.conn_timeout_secs,
        "Creating Redis pool"
    );

    let manager = RedisConnectionManager::new(redis_url).map_err(|e| {
        StorageError::Configuration(format!(
            "invalid redis url: {} - {}",
            redacted(redis_url),
            e
        ))
    })?;

    let min_idle = config.min_idle.max(1).min(config.max_size);
    let pool = Pool::builder()
        .max_size(config.max_size)
        .min_idle(Some(min_idle))
        .connection_timeout(Duration::from_secs(config.conn_timeout_secs))
        .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
        .max_lifetime(Some(Duration::from_secs(config.max_lifetime_secs)))
        .build(manager)
        .await
        .map_err(|e| StorageError::Unavailable(format!("failed to build Redis pool: {}", e)))?;

    {
        let mut conn = pool
            .get()
            .await
            .map_err(|e| StorageError::Unavailable(format!("get() from pool: {}", e)))?;
        ping(&mut conn).await?;
    }

    Ok(pool)
}

async fn ping(
    conn: &mut PooledConnection<'_, RedisConnectionManager>,
) -> Result<(), StorageError> {
    let _: String = redis::cmd("PING")
        .query_async(&mut **conn)
        .await
        .map_err(|e| StorageError::Unavailable(format!("Redis PING failed: {}", e)))?;
    Ok(())
}

/// Hide the password part of a redis URL for logging
fn redacted(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}://***{}", &url[..scheme], &url[at..])
        }
        _ => url.to_string(),
    }
}
