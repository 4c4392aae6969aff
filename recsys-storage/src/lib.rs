//! RECSYS Storage - Store Traits, Mock Implementation and Cache
//!
//! Defines the storage abstraction for the catalog and the recommendation edge set.
//! The Postgres implementation lives in recsys-api; this crate carries the in-memory
//! store, the per-call timeout decorator and the cache layer.

pub mod cache;
pub mod mock;
pub mod store;
pub mod timed;

pub use cache::{
    CacheBackend, CacheConfig, CacheStats, InMemoryCacheBackend, LmdbCacheBackend,
    LmdbCacheError, RecommendationCache,
};
pub use mock::MockStorage;
pub use store::{CatalogStore, ProductEdges, RecommendationStore, ReplaceOutcome, Store};
pub use timed::Timed;
