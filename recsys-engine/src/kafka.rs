//! Kafka event source (feature `kafka`).
//!
//! One consumer per topic, all in the same group. Offsets are committed manually after a
//! delivery is acknowledged; a nack seeks the partition back to the failed offset so the
//! same message is fetched again before anything behind it.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use recsys_core::Topic;

use crate::transport::{Delivery, EventSource, RedeliveryLedger, TransportError};

/// Kafka consumer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub group_id: String,
    pub session_timeout_ms: u64,
    /// `earliest` or `latest`, used when the group has no committed offset.
    pub auto_offset_reset: String,
    pub seek_timeout: Duration,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            group_id: "recsys".to_string(),
            session_timeout_ms: 6000,
            auto_offset_reset: "earliest".to_string(),
            seek_timeout: Duration::from_secs(5),
        }
    }
}

impl KafkaConfig {
    /// Create KafkaConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `RECSYS_KAFKA_BROKERS`: Comma-separated bootstrap servers (default: localhost:9092)
    /// - `RECSYS_KAFKA_GROUP_ID`: Consumer group (default: recsys)
    /// - `RECSYS_KAFKA_SESSION_TIMEOUT_MS`: Session timeout (default: 6000)
    /// - `RECSYS_KAFKA_AUTO_OFFSET_RESET`: earliest | latest (default: earliest)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            brokers: std::env::var("RECSYS_KAFKA_BROKERS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|b| !b.is_empty())
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .filter(|b| !b.is_empty())
                .unwrap_or(defaults.brokers),
            group_id: std::env::var("RECSYS_KAFKA_GROUP_ID").unwrap_or(defaults.group_id),
            session_timeout_ms: std::env::var("RECSYS_KAFKA_SESSION_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.session_timeout_ms),
            auto_offset_reset: std::env::var("RECSYS_KAFKA_AUTO_OFFSET_RESET")
                .unwrap_or(defaults.auto_offset_reset),
            seek_timeout: defaults.seek_timeout,
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", self.brokers.join(","))
            .set("group.id", &self.group_id)
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false");
        client_config
    }
}

fn backend_err(e: rdkafka::error::KafkaError) -> TransportError {
    TransportError::Backend(e.to_string())
}

/// Consumes a single topic.
pub struct KafkaEventSource {
    topic: Topic,
    consumer: StreamConsumer,
    seek_timeout: Duration,
    redeliveries: RedeliveryLedger,
}

impl KafkaEventSource {
    pub fn new(config: &KafkaConfig, topic: Topic) -> Result<Self, TransportError> {
        let consumer: StreamConsumer = config.client_config().create().map_err(backend_err)?;
        consumer
            .subscribe(&[topic.as_str()])
            .map_err(backend_err)?;

        tracing::info!(
            topic = %topic,
            brokers = %config.brokers.join(","),
            group_id = %config.group_id,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            topic,
            consumer,
            seek_timeout: config.seek_timeout,
            redeliveries: RedeliveryLedger::new(),
        })
    }

    /// One source per subscribed topic.
    pub fn for_all_topics(config: &KafkaConfig) -> Result<Vec<Self>, TransportError> {
        Topic::ALL
            .into_iter()
            .map(|topic| Self::new(config, topic))
            .collect()
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    fn topic(&self) -> Topic {
        self.topic
    }

    async fn next(&mut self) -> Result<Option<Delivery>, TransportError> {
        let message = self.consumer.recv().await.map_err(backend_err)?;
        let partition = message.partition();
        let offset = message.offset();

        let attempt = self.redeliveries.attempt_for(partition, offset);

        Ok(Some(Delivery {
            topic: self.topic,
            key: message.key().map(<[u8]>::to_vec).unwrap_or_default(),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            partition,
            offset,
            attempt,
        }))
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        let mut positions = TopicPartitionList::new();
        positions
            .add_partition_offset(
                self.topic.as_str(),
                delivery.partition,
                Offset::Offset(delivery.offset + 1),
            )
            .map_err(backend_err)?;
        self.consumer
            .commit(&positions, CommitMode::Async)
            .map_err(backend_err)
    }

    async fn nack(&mut self, delivery: Delivery) -> Result<(), TransportError> {
        self.redeliveries.record_nack(&delivery);
        self.consumer
            .seek(
                self.topic.as_str(),
                delivery.partition,
                Offset::Offset(delivery.offset),
                self.seek_timeout,
            )
            .map_err(backend_err)
    }
}
