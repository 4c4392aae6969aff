//! Redis cache driver.
//!
//! Entries are plain `SET key value PX ttl_ms`, so Redis expires them on its own and a
//! `GET` past the TTL reads as absent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use recsys_core::CacheError;
use recsys_storage::{CacheBackend, CacheStats};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, ConnectionInfo};

fn redis_err(e: redis::RedisError) -> CacheError {
    CacheError::backend(format!("redis: {}", e))
}

/// `host:port/db` for logs. Credentials in the URL never reach the output.
fn endpoint(info: &ConnectionInfo) -> String {
    format!("{}/{}", info.addr, info.redis.db)
}

/// Cache backend over a multiplexed, auto-reconnecting Redis connection.
#[derive(Clone)]
pub struct RedisCacheBackend {
    conn: ConnectionManager,
    hits: std::sync::Arc<AtomicU64>,
    misses: std::sync::Arc<AtomicU64>,
}

impl std::fmt::Debug for RedisCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheBackend")
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RedisCacheBackend {
    /// Connect to `url`. Fails when the URL is malformed or the first connection is refused.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(redis_err)?;
        let endpoint = endpoint(client.get_connection_info());
        let conn = ConnectionManager::new(client).await.map_err(redis_err)?;
        tracing::info!(endpoint = %endpoint, "Connected to Redis cache");
        Ok(Self {
            conn,
            hits: Default::default(),
            misses: Default::default(),
        })
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn.clone();
        let value = conn
            .get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(redis_err)?;
        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        // PX 0 is rejected by Redis; a sub-millisecond TTL still gets one millisecond.
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(redis_err)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(redis_err)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ..Default::default()
        })
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(redis_err)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
