//! Service Configuration Module
//!
//! Everything is read from `RECSYS_*` environment variables with defaults suited to a
//! local run. Values that are present but unparseable fail startup with a
//! [`ConfigError`]; absent values fall back to defaults.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use recsys_core::ConfigError;
use recsys_engine::{ConsumerConfig, ProcessorConfig};
use recsys_storage::CacheConfig;

use crate::constants::*;
use crate::db::DbConfig;

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Parse a present variable strictly; absent means `default`.
fn env_strict<T: FromStr>(name: &str, default: T, reason: &str) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            field: name.to_string(),
            value,
            reason: reason.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

// ============================================================================
// BACKEND SELECTION
// ============================================================================

/// Which transport feeds the topic workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTransport {
    /// In-process bus, fed through `POST /events/{topic}`.
    Memory,
    /// Kafka consumer group (requires the `kafka` feature).
    Kafka,
}

impl FromStr for EventTransport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(EventTransport::Memory),
            "kafka" => Ok(EventTransport::Kafka),
            other => Err(format!("unknown transport '{}'", other)),
        }
    }
}

/// Which cache driver backs the recommendation cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Redis,
    Lmdb,
    Memory,
}

impl FromStr for CacheBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(CacheBackendKind::Redis),
            "lmdb" => Ok(CacheBackendKind::Lmdb),
            "memory" => Ok(CacheBackendKind::Memory),
            other => Err(format!("unknown cache backend '{}'", other)),
        }
    }
}

// ============================================================================
// SERVICE CONFIGURATION
// ============================================================================

/// HTTP surface, collaborators and backend selection.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Identity collaborator endpoint
    pub auth_url: String,
    pub request_timeout: Duration,
    /// How long workers get to drain on shutdown
    pub shutdown_timeout: Duration,
    pub event_transport: EventTransport,
    pub cache_backend: CacheBackendKind,
    pub redis_url: String,
    pub lmdb_path: String,
    pub lmdb_max_size_mb: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            port: DEFAULT_PORT,
            auth_url: DEFAULT_AUTH_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            event_transport: EventTransport::Memory,
            cache_backend: CacheBackendKind::Redis,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            lmdb_path: DEFAULT_LMDB_PATH.to_string(),
            lmdb_max_size_mb: DEFAULT_LMDB_MAX_SIZE_MB,
        }
    }
}

impl ServiceConfig {
    /// Create ServiceConfig from environment variables.
    ///
    /// Environment variables:
    /// - `RECSYS_BIND_ADDR`: Interface to bind (default: 0.0.0.0)
    /// - `RECSYS_PORT`: HTTP port (default: 3000)
    /// - `RECSYS_AUTH_URL`: Identity collaborator endpoint
    /// - `RECSYS_REQUEST_TIMEOUT_SECS`: Per-request timeout (default: 30)
    /// - `RECSYS_SHUTDOWN_TIMEOUT_SECS`: Worker drain budget (default: 30)
    /// - `RECSYS_EVENT_TRANSPORT`: memory | kafka (default: memory)
    /// - `RECSYS_CACHE_BACKEND`: redis | lmdb | memory (default: redis)
    /// - `RECSYS_REDIS_URL`, `RECSYS_LMDB_PATH`, `RECSYS_LMDB_MAX_SIZE_MB`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            bind_addr: std::env::var("RECSYS_BIND_ADDR").unwrap_or(defaults.bind_addr),
            port: env_strict("RECSYS_PORT", defaults.port, "must be a port number")?,
            auth_url: std::env::var("RECSYS_AUTH_URL").unwrap_or(defaults.auth_url),
            request_timeout: Duration::from_secs(env_or(
                "RECSYS_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            shutdown_timeout: Duration::from_secs(env_or(
                "RECSYS_SHUTDOWN_TIMEOUT_SECS",
                DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            )),
            event_transport: env_strict(
                "RECSYS_EVENT_TRANSPORT",
                defaults.event_transport,
                "expected memory or kafka",
            )?,
            cache_backend: env_strict(
                "RECSYS_CACHE_BACKEND",
                defaults.cache_backend,
                "expected redis, lmdb or memory",
            )?,
            redis_url: std::env::var("RECSYS_REDIS_URL").unwrap_or(defaults.redis_url),
            lmdb_path: std::env::var("RECSYS_LMDB_PATH").unwrap_or(defaults.lmdb_path),
            lmdb_max_size_mb: env_or("RECSYS_LMDB_MAX_SIZE_MB", DEFAULT_LMDB_MAX_SIZE_MB),
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.bind_addr, self.port);
        addr.parse().map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
            field: "RECSYS_BIND_ADDR".to_string(),
            value: addr.clone(),
            reason: e.to_string(),
        })
    }
}

// ============================================================================
// TIMEOUTS
// ============================================================================

/// Per-call deadlines for the store and the cache, and the cache TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub store_timeout: Duration,
    pub cache_timeout: Duration,
    pub cache_ttl: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            cache_timeout: Duration::from_millis(DEFAULT_CACHE_TIMEOUT_MS),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

fn bounded_cache_ttl(secs: u64) -> Duration {
    if secs > MAX_CACHE_TTL_SECS {
        tracing::warn!(
            requested_secs = secs,
            max_secs = MAX_CACHE_TTL_SECS,
            "Cache TTL above the maximum, clamping"
        );
    }
    Duration::from_secs(secs.min(MAX_CACHE_TTL_SECS))
}

impl TimeoutConfig {
    /// Environment variables:
    /// - `RECSYS_STORE_TIMEOUT_MS` (default: 2000)
    /// - `RECSYS_CACHE_TIMEOUT_MS` (default: 500)
    /// - `RECSYS_CACHE_TTL_SECS` (default: 300, capped at 30 days)
    pub fn from_env() -> Self {
        Self {
            store_timeout: Duration::from_millis(env_or(
                "RECSYS_STORE_TIMEOUT_MS",
                DEFAULT_STORE_TIMEOUT_MS,
            )),
            cache_timeout: Duration::from_millis(env_or(
                "RECSYS_CACHE_TIMEOUT_MS",
                DEFAULT_CACHE_TIMEOUT_MS,
            )),
            cache_ttl: bounded_cache_ttl(env_or("RECSYS_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::default()
            .with_ttl(self.cache_ttl)
            .with_action_timeout(self.cache_timeout)
    }
}

// ============================================================================
// AGGREGATE
// ============================================================================

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub db: DbConfig,
    pub timeouts: TimeoutConfig,
    pub processor: ProcessorConfig,
    pub consumer: ConsumerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            service: ServiceConfig::from_env()?,
            db: DbConfig::from_env(),
            timeouts: TimeoutConfig::from_env(),
            processor: ProcessorConfig::from_env(),
            consumer: ConsumerConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_config_default() {
        let config = ServiceConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.event_transport, EventTransport::Memory);
        assert_eq!(config.cache_backend, CacheBackendKind::Redis);
    }

    #[test]
    fn test_backend_kinds_parse_case_insensitively() {
        assert_eq!("KAFKA".parse::<EventTransport>(), Ok(EventTransport::Kafka));
        assert_eq!("Lmdb".parse::<CacheBackendKind>(), Ok(CacheBackendKind::Lmdb));
        assert!("rabbit".parse::<EventTransport>().is_err());
        assert!("memcached".parse::<CacheBackendKind>().is_err());
    }

    #[test]
    fn test_socket_addr() {
        let config = ServiceConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 8081,
            ..Default::default()
        };
        assert_eq!(config.socket_addr().unwrap().port(), 8081);

        let config = ServiceConfig {
            bind_addr: "not an address".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.socket_addr(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_timeouts_feed_cache_config() {
        let timeouts = TimeoutConfig {
            store_timeout: Duration::from_millis(100),
            cache_timeout: Duration::from_millis(50),
            cache_ttl: Duration::from_secs(10),
        };
        let cache = timeouts.cache_config();
        assert_eq!(cache.ttl, Duration::from_secs(10));
        assert_eq!(cache.action_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_cache_ttl_is_capped() {
        assert_eq!(bounded_cache_ttl(60), Duration::from_secs(60));
        assert_eq!(
            bounded_cache_ttl(u64::MAX),
            Duration::from_secs(MAX_CACHE_TTL_SECS)
        );
    }

    #[test]
    fn test_strict_parse_rejects_garbage() {
        std::env::set_var("RECSYS_TEST_STRICT_PORT", "http");
        let result = env_strict::<u16>("RECSYS_TEST_STRICT_PORT", 1, "must be a port number");
        std::env::remove_var("RECSYS_TEST_STRICT_PORT");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        assert_eq!(env_strict::<u16>("RECSYS_TEST_STRICT_PORT", 7, "x"), Ok(7));
    }
}
