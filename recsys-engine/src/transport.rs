//! Message transport abstraction and the in-process event bus.
//!
//! A worker pulls one [`Delivery`] at a time from an [`EventSource`], and then either
//! acknowledges it or hands it back for redelivery. A nacked delivery comes back before
//! anything queued behind it, so per-key order survives retries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use recsys_core::Topic;
use tokio::sync::mpsc;

/// Default per-topic queue depth for the in-process bus.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport closed for topic {0}")]
    Closed(Topic),

    #[error("Transport has no channel for topic {0}")]
    UnknownTopic(String),

    #[error("Transport error: {0}")]
    Backend(String),
}

/// One message handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: Topic,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: u32,
}

impl Delivery {
    pub fn key_lossy(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

/// A single topic's stream of deliveries.
#[async_trait]
pub trait EventSource: Send {
    fn topic(&self) -> Topic;

    /// Next delivery, or `None` once the source is closed for good.
    async fn next(&mut self) -> Result<Option<Delivery>, TransportError>;

    /// Mark `delivery` as done; it will not be delivered again.
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Hand `delivery` back; it is the next thing [`EventSource::next`] returns.
    async fn nack(&mut self, delivery: Delivery) -> Result<(), TransportError>;
}

/// Attempt counts for nacked messages on a partitioned, seekable log.
///
/// An entry lives until that exact `(partition, offset)` is fetched again, so messages
/// from other partitions arriving in between leave the count alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedeliveryLedger {
    pending: HashMap<(i32, i64), u32>,
}

impl RedeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that `delivery` will be fetched again as its next attempt.
    pub fn record_nack(&mut self, delivery: &Delivery) {
        self.pending.insert(
            (delivery.partition, delivery.offset),
            delivery.attempt.saturating_add(1),
        );
    }

    /// Attempt number for a freshly fetched message, consuming its entry if any.
    pub fn attempt_for(&mut self, partition: i32, offset: i64) -> u32 {
        self.pending.remove(&(partition, offset)).unwrap_or(1)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

// ============================================================================
// IN-PROCESS BUS
// ============================================================================

/// Publishing side of the in-process bus. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    senders: Arc<HashMap<Topic, mpsc::Sender<Delivery>>>,
    next_offset: Arc<AtomicI64>,
}

impl EventPublisher {
    /// Queue a message, waiting for room if the topic is full. Returns its offset.
    pub async fn publish(
        &self,
        topic: Topic,
        key: impl Into<Vec<u8>>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<i64, TransportError> {
        let sender = self
            .senders
            .get(&topic)
            .ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))?;
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        let delivery = Delivery {
            topic,
            key: key.into(),
            payload: payload.into(),
            partition: 0,
            offset,
            attempt: 1,
        };
        sender
            .send(delivery)
            .await
            .map_err(|_| TransportError::Closed(topic))?;
        Ok(offset)
    }
}

/// In-process bus with one bounded queue per topic.
#[derive(Debug)]
pub struct InMemoryEventBus {
    publisher: EventPublisher,
    receivers: HashMap<Topic, mpsc::Receiver<Delivery>>,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl InMemoryEventBus {
    pub fn new(capacity: usize) -> Self {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for topic in Topic::ALL {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            senders.insert(topic, tx);
            receivers.insert(topic, rx);
        }
        Self {
            publisher: EventPublisher {
                senders: Arc::new(senders),
                next_offset: Arc::new(AtomicI64::new(0)),
            },
            receivers,
        }
    }

    pub fn publisher(&self) -> EventPublisher {
        self.publisher.clone()
    }

    /// Take the consuming side for `topic`. Each topic has exactly one consumer.
    pub fn take_source(&mut self, topic: Topic) -> Option<InMemoryEventSource> {
        self.receivers
            .remove(&topic)
            .map(|rx| InMemoryEventSource {
                topic,
                rx,
                pending: None,
                acked: 0,
            })
    }

    /// Sources for every topic not yet taken.
    pub fn take_all_sources(&mut self) -> Vec<InMemoryEventSource> {
        Topic::ALL
            .into_iter()
            .filter_map(|t| self.take_source(t))
            .collect()
    }
}

/// Consuming side of one in-process topic.
#[derive(Debug)]
pub struct InMemoryEventSource {
    topic: Topic,
    rx: mpsc::Receiver<Delivery>,
    pending: Option<Delivery>,
    acked: u64,
}

impl InMemoryEventSource {
    pub fn acked(&self) -> u64 {
        self.acked
    }
}

#[async_trait]
impl EventSource for InMemoryEventSource {
    fn topic(&self) -> Topic {
        self.topic
    }

    async fn next(&mut self) -> Result<Option<Delivery>, TransportError> {
        if let Some(delivery) = self.pending.take() {
            return Ok(Some(delivery));
        }
        Ok(self.rx.recv().await)
    }

    async fn ack(&mut self, _delivery: &Delivery) -> Result<(), TransportError> {
        self.acked += 1;
        Ok(())
    }

    async fn nack(&mut self, mut delivery: Delivery) -> Result<(), TransportError> {
        delivery.attempt += 1;
        self.pending = Some(delivery);
        Ok(())
    }
}
