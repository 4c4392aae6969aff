//! RECSYS API - HTTP Service and Process Wiring
//!
//! - Postgres store ([`PgStore`]) over deadpool-postgres
//! - Redis cache driver ([`RedisCacheBackend`])
//! - Identity middleware and the `GET /recommendations` route
//! - Environment configuration, telemetry and startup wiring

pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod macros;
pub mod middleware;
pub mod redis_cache;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use bootstrap::{build_cache_backend, build_event_sources, drain_workers, EventWiring};
pub use config::{AppConfig, CacheBackendKind, EventTransport, ServiceConfig, TimeoutConfig};
pub use db::{DbConfig, PgStore};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{AdminIdentity, AuthClient, AuthError, HttpAuthClient, Identity};
pub use redis_cache::RedisCacheBackend;
pub use routes::create_router;
pub use state::{AppState, SharedRuntime};
