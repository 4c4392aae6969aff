//! Recommendation cache and its pluggable backends.
//!
//! The cache is a read-through accelerator in front of the recommendation store. It is
//! never the source of truth: a lost or stale entry costs a store round trip, nothing
//! more. Backends only move bytes with a TTL; [`RecommendationCache`] owns the key
//! scheme, the value encoding and the per-call deadline.

pub mod lmdb_backend;
pub mod memory;
pub mod recommendation_cache;
pub mod traits;

pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory::InMemoryCacheBackend;
pub use recommendation_cache::{CacheConfig, RecommendationCache};
pub use traits::{CacheBackend, CacheStats};
