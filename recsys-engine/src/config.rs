//! Engine configuration: processor behaviour and consumer runtime tuning.

use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Users fetched per page during the product fan-out.
pub const DEFAULT_USER_PAGE_SIZE: usize = 500;

/// Deliveries of a poison message before it is dead-lettered.
pub const DEFAULT_MAX_POISON_ATTEMPTS: u32 = 3;

/// Pause before a nacked message is redelivered.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Upper bound on the backoff after repeated transient failures.
pub const DEFAULT_MAX_RETRY_BACKOFF_MS: u64 = 30_000;

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|s| !matches!(s.to_lowercase().as_str(), "false" | "0" | "no" | "off"))
        .unwrap_or(default)
}

// ============================================================================
// PROCESSOR
// ============================================================================

/// How the event processor applies its protocols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Page size for the "all users" scan on product mutations.
    pub user_page_size: usize,
    /// Invalidate cache entries of users whose edges a product mutation touched.
    pub invalidate_on_product_change: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            user_page_size: DEFAULT_USER_PAGE_SIZE,
            invalidate_on_product_change: true,
        }
    }
}

impl ProcessorConfig {
    /// Create ProcessorConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `RECSYS_USER_PAGE_SIZE`: Users per fan-out page (default: 500)
    /// - `RECSYS_INVALIDATE_ON_PRODUCT_CHANGE`: Invalidate affected users on product events (default: true)
    pub fn from_env() -> Self {
        Self {
            user_page_size: env_parse::<usize>("RECSYS_USER_PAGE_SIZE")
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_USER_PAGE_SIZE),
            invalidate_on_product_change: env_bool("RECSYS_INVALIDATE_ON_PRODUCT_CHANGE", true),
        }
    }

    pub fn with_user_page_size(mut self, size: usize) -> Self {
        self.user_page_size = size.max(1);
        self
    }

    pub fn with_product_invalidation(mut self, enabled: bool) -> Self {
        self.invalidate_on_product_change = enabled;
        self
    }
}

// ============================================================================
// CONSUMER
// ============================================================================

/// Retry and dead-letter policy for topic workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Deliveries a poison message gets before it is dead-lettered and acknowledged.
    pub max_poison_attempts: u32,
    /// Pause before the first redelivery of a failed message.
    pub retry_backoff: Duration,
    /// Cap for the doubling backoff on repeated transient failures.
    pub max_retry_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_poison_attempts: DEFAULT_MAX_POISON_ATTEMPTS,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            max_retry_backoff: Duration::from_millis(DEFAULT_MAX_RETRY_BACKOFF_MS),
        }
    }
}

impl ConsumerConfig {
    /// Create ConsumerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `RECSYS_MAX_POISON_ATTEMPTS`: Deliveries before dead-lettering (default: 3)
    /// - `RECSYS_RETRY_BACKOFF_MS`: Initial redelivery backoff (default: 500)
    /// - `RECSYS_MAX_RETRY_BACKOFF_MS`: Backoff cap (default: 30000)
    pub fn from_env() -> Self {
        Self {
            max_poison_attempts: env_parse::<u32>("RECSYS_MAX_POISON_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_POISON_ATTEMPTS),
            retry_backoff: Duration::from_millis(
                env_parse("RECSYS_RETRY_BACKOFF_MS").unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
            ),
            max_retry_backoff: Duration::from_millis(
                env_parse("RECSYS_MAX_RETRY_BACKOFF_MS").unwrap_or(DEFAULT_MAX_RETRY_BACKOFF_MS),
            ),
        }
    }

    /// Short backoffs for local runs and tests.
    pub fn development() -> Self {
        Self {
            max_poison_attempts: 2,
            retry_backoff: Duration::from_millis(10),
            max_retry_backoff: Duration::from_millis(100),
        }
    }

    pub fn production() -> Self {
        Self {
            max_poison_attempts: 5,
            retry_backoff: Duration::from_secs(1),
            max_retry_backoff: Duration::from_secs(60),
        }
    }

    /// Backoff before delivery attempt `attempt + 1`, doubling from `retry_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(factor)
            .min(self.max_retry_backoff)
    }
}
