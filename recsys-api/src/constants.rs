//! Constants for the RECSYS service
//!
//! Centralized defaults. Everything here can be overridden through the
//! environment (see `config`).

// ============================================================================
// SERVER
// ============================================================================

/// Default bind address
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 3000;

/// Default per-request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default time allowed for workers to drain on shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// IDENTITY
// ============================================================================

/// Default identity collaborator endpoint
pub const DEFAULT_AUTH_URL: &str = "http://localhost:8080/auth/whoami";

/// Timeout for one identity lookup
pub const AUTH_REQUEST_TIMEOUT_MS: u64 = 2_000;

// ============================================================================
// STORE AND CACHE
// ============================================================================

/// Default deadline for a single store call
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;

/// Default deadline for a single cache call
pub const DEFAULT_CACHE_TIMEOUT_MS: u64 = 500;

/// Default cache entry TTL (5 minutes)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Upper bound on the configured cache TTL (30 days)
pub const MAX_CACHE_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Default Redis endpoint
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default LMDB cache directory
pub const DEFAULT_LMDB_PATH: &str = "./data/cache";

/// Default LMDB map size
pub const DEFAULT_LMDB_MAX_SIZE_MB: usize = 256;

// ============================================================================
// DATABASE
// ============================================================================

/// Default connection pool size
pub const DEFAULT_DB_POOL_SIZE: usize = 16;

/// Default pool checkout timeout
pub const DEFAULT_DB_CONNECT_TIMEOUT_MS: u64 = 5_000;
