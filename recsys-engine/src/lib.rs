//! RECSYS Engine - Event Processing, Query Path and Consumer Runtime
//!
//! Everything between the transport and the store:
//! - [`EventProcessor`] applies user and product events
//! - [`QueryService`] serves reads through the cache
//! - [`ConsumerRuntime`] runs one sequential worker per topic
//!
//! The Kafka transport is behind the `kafka` feature; the in-process bus is always
//! available.

pub mod config;
pub mod consumer;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod processor;
pub mod query;
pub mod transport;

pub use config::{ConsumerConfig, ProcessorConfig};
pub use consumer::{
    run_worker, ConsumerRuntime, DeadLetter, DeadLetterSink, InMemoryDeadLetterSink,
    TracingDeadLetterSink, WorkerMetrics, WorkerMetricsSnapshot,
};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaEventSource};
pub use processor::{EventProcessor, IgnoreReason, Outcome};
pub use query::{QueryError, QueryService, ReadSource, RecommendationRead};
pub use transport::{
    Delivery, EventPublisher, EventSource, InMemoryEventBus, InMemoryEventSource,
    RedeliveryLedger, TransportError,
};
