//! Cache backend trait and statistics.

use std::time::Duration;

use async_trait::async_trait;
use recsys_core::CacheError;

/// Byte-oriented key/value cache with per-entry TTL.
///
/// Implementations must be safe for concurrent use. Writers racing on the same key
/// resolve as last-write-wins. An entry past its TTL must read as absent.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a live value, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Remove a value. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Current statistics.
    async fn stats(&self) -> Result<CacheStats, CacheError>;

    /// Round trip proving the backend answers.
    async fn health_check(&self) -> Result<(), CacheError> {
        self.get("__recsys_health__").await.map(|_| ())
    }

    /// Short name for logs and health output.
    fn name(&self) -> &'static str;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, expired entries included.
    pub misses: u64,
    /// Number of entries currently stored, when the backend can tell.
    pub entry_count: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
