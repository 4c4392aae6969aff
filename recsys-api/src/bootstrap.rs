//! Process wiring: cache backend selection, event sources and worker drain.

use std::sync::Arc;
use std::time::Duration;

use recsys_engine::{EventPublisher, EventSource, InMemoryEventBus};
use recsys_storage::{CacheBackend, InMemoryCacheBackend, LmdbCacheBackend};

use crate::config::{CacheBackendKind, EventTransport, ServiceConfig};
use crate::error::{ApiError, ApiResult};
use crate::redis_cache::RedisCacheBackend;
use crate::state::SharedRuntime;

/// Open the configured cache backend and prove it answers. Unreachable is fatal.
pub async fn build_cache_backend(service: &ServiceConfig) -> ApiResult<Arc<dyn CacheBackend>> {
    let backend: Arc<dyn CacheBackend> = match service.cache_backend {
        CacheBackendKind::Redis => Arc::new(RedisCacheBackend::connect(&service.redis_url).await?),
        CacheBackendKind::Lmdb => Arc::new(
            LmdbCacheBackend::new(&service.lmdb_path, service.lmdb_max_size_mb).map_err(|e| {
                ApiError::internal_error(format!("Failed to open LMDB cache: {}", e))
            })?,
        ),
        CacheBackendKind::Memory => Arc::new(InMemoryCacheBackend::new()),
    };

    backend.health_check().await?;
    tracing::info!(backend = backend.name(), "Cache backend ready");
    Ok(backend)
}

/// Sources for the topic workers, plus the bus publisher when the transport is
/// in-process.
pub struct EventWiring {
    pub sources: Vec<Box<dyn EventSource>>,
    pub publisher: Option<EventPublisher>,
}

impl std::fmt::Debug for EventWiring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWiring")
            .field("sources", &self.sources.len())
            .field("publisher", &self.publisher.is_some())
            .finish()
    }
}

pub fn build_event_sources(service: &ServiceConfig) -> ApiResult<EventWiring> {
    match service.event_transport {
        EventTransport::Memory => {
            let mut bus = InMemoryEventBus::default();
            let publisher = bus.publisher();
            let sources = bus
                .take_all_sources()
                .into_iter()
                .map(|source| Box::new(source) as Box<dyn EventSource>)
                .collect();
            tracing::info!("Using in-process event bus");
            Ok(EventWiring {
                sources,
                publisher: Some(publisher),
            })
        }
        EventTransport::Kafka => Ok(EventWiring {
            sources: kafka_sources()?,
            publisher: None,
        }),
    }
}

#[cfg(feature = "kafka")]
fn kafka_sources() -> ApiResult<Vec<Box<dyn EventSource>>> {
    use recsys_engine::{KafkaConfig, KafkaEventSource};

    let config = KafkaConfig::from_env();
    let sources = KafkaEventSource::for_all_topics(&config)?
        .into_iter()
        .map(|source| Box::new(source) as Box<dyn EventSource>)
        .collect();
    Ok(sources)
}

#[cfg(not(feature = "kafka"))]
fn kafka_sources() -> ApiResult<Vec<Box<dyn EventSource>>> {
    Err(ApiError::internal_error(
        "Kafka transport selected but the 'kafka' feature is not enabled. \
         Rebuild with --features kafka or set RECSYS_EVENT_TRANSPORT=memory",
    ))
}

/// Stop the topic workers and wait for in-flight deliveries, bounded by `timeout`.
pub async fn drain_workers(runtime: &SharedRuntime, timeout: Duration) {
    let Some(runtime) = runtime.write().await.take() else {
        return;
    };

    match tokio::time::timeout(timeout, runtime.shutdown()).await {
        Ok(finals) => {
            for (topic, metrics) in finals {
                tracing::info!(
                    topic = %topic,
                    received = metrics.received,
                    handled = metrics.handled,
                    ignored = metrics.ignored,
                    failed = metrics.failed,
                    dead_lettered = metrics.dead_lettered,
                    "Topic worker drained"
                );
            }
        }
        Err(_) => tracing::warn!(?timeout, "Topic workers did not drain before the shutdown timeout"),
    }
}
