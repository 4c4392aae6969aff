//! Topic workers.
//!
//! One sequential worker per topic. Each worker pulls a delivery, runs it through the
//! processor to completion, then acknowledges it or hands it back:
//!
//! - success or ignored action: ack
//! - transient failure (store, cache): nack and retry after a backoff, without limit
//! - poison message: nack until it has been delivered `max_poison_attempts` times, then
//!   record it in the dead-letter sink and ack
//!
//! Shutdown is signalled over a watch channel. A worker never abandons a delivery it has
//! started; it checks for shutdown only between deliveries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recsys_core::Topic;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ConsumerConfig;
use crate::processor::EventProcessor;
use crate::transport::{Delivery, EventSource};

// ============================================================================
// DEAD LETTERS
// ============================================================================

/// A poison message that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub topic: Topic,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Where poison messages go once the worker gives up on them.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, letter: DeadLetter);
}

/// Logs dead letters at error level. Payload is logged lossily.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDeadLetterSink;

#[async_trait]
impl DeadLetterSink for TracingDeadLetterSink {
    async fn record(&self, letter: DeadLetter) {
        tracing::error!(
            topic = %letter.topic,
            key = %String::from_utf8_lossy(&letter.key),
            payload = %String::from_utf8_lossy(&letter.payload),
            partition = letter.partition,
            offset = letter.offset,
            attempts = letter.attempts,
            error = %letter.error,
            "Message dead-lettered"
        );
    }
}

/// Keeps dead letters in memory, for tests and the in-process transport.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterSink {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.letters.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn record(&self, letter: DeadLetter) {
        TracingDeadLetterSink.record(letter.clone()).await;
        if let Ok(mut letters) = self.letters.lock() {
            letters.push(letter);
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for one topic worker.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    /// Deliveries pulled from the source, redeliveries included
    pub received: AtomicU64,
    /// Deliveries that changed state
    pub handled: AtomicU64,
    /// Deliveries acknowledged without effect
    pub ignored: AtomicU64,
    /// Failed attempts that were handed back for redelivery
    pub failed: AtomicU64,
    /// Poison messages given up on
    pub dead_lettered: AtomicU64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> WorkerMetricsSnapshot {
        WorkerMetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`WorkerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerMetricsSnapshot {
    pub received: u64,
    pub handled: u64,
    pub ignored: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

// ============================================================================
// WORKER
// ============================================================================

enum Disposition {
    Ack,
    Retry,
}

async fn process_delivery(
    delivery: &Delivery,
    processor: &EventProcessor,
    dead_letters: &dyn DeadLetterSink,
    config: &ConsumerConfig,
    metrics: &WorkerMetrics,
) -> Disposition {
    metrics.received.fetch_add(1, Ordering::Relaxed);

    let err = match processor
        .handle_message(delivery.topic, &delivery.key, &delivery.payload)
        .await
    {
        Ok(outcome) if outcome.is_ignored() => {
            metrics.ignored.fetch_add(1, Ordering::Relaxed);
            return Disposition::Ack;
        }
        Ok(_) => {
            metrics.handled.fetch_add(1, Ordering::Relaxed);
            return Disposition::Ack;
        }
        Err(e) => e,
    };

    if err.is_poison() && delivery.attempt >= config.max_poison_attempts {
        metrics.dead_lettered.fetch_add(1, Ordering::Relaxed);
        dead_letters
            .record(DeadLetter {
                topic: delivery.topic,
                key: delivery.key.clone(),
                payload: delivery.payload.clone(),
                partition: delivery.partition,
                offset: delivery.offset,
                attempts: delivery.attempt,
                error: err.to_string(),
                failed_at: Utc::now(),
            })
            .await;
        return Disposition::Ack;
    }

    metrics.failed.fetch_add(1, Ordering::Relaxed);
    if err.is_poison() {
        tracing::warn!(
            error = %err,
            topic = %delivery.topic,
            key = %delivery.key_lossy(),
            attempt = delivery.attempt,
            "Rejected malformed message"
        );
    } else {
        tracing::error!(
            error = %err,
            topic = %delivery.topic,
            key = %delivery.key_lossy(),
            attempt = delivery.attempt,
            "Failed to handle message, will retry"
        );
    }
    Disposition::Retry
}

/// Run one topic's worker until shutdown is signalled or the source closes.
///
/// Returns the worker's metrics for final reporting.
pub async fn run_worker(
    mut source: Box<dyn EventSource>,
    processor: Arc<EventProcessor>,
    dead_letters: Arc<dyn DeadLetterSink>,
    config: ConsumerConfig,
    metrics: Arc<WorkerMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<WorkerMetrics> {
    let topic = source.topic();
    tracing::info!(
        topic = %topic,
        max_poison_attempts = config.max_poison_attempts,
        retry_backoff_ms = config.retry_backoff.as_millis() as u64,
        "Topic worker started"
    );

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let next = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!(topic = %topic, "Topic worker received shutdown signal");
                    break;
                }
                continue;
            }
            next = source.next() => next,
        };

        let delivery = match next {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                tracing::info!(topic = %topic, "Event source closed");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, topic = %topic, "Failed to receive message");
                tokio::time::sleep(config.retry_backoff).await;
                continue;
            }
        };

        match process_delivery(&delivery, &processor, dead_letters.as_ref(), &config, &metrics)
            .await
        {
            Disposition::Ack => {
                if let Err(e) = source.ack(&delivery).await {
                    tracing::error!(error = %e, topic = %topic, offset = delivery.offset, "Failed to acknowledge message");
                }
            }
            Disposition::Retry => {
                let backoff = config.backoff_for(delivery.attempt);
                let offset = delivery.offset;
                if let Err(e) = source.nack(delivery).await {
                    tracing::error!(error = %e, topic = %topic, offset, "Failed to return message for redelivery");
                }
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        topic = %topic,
        received = snapshot.received,
        handled = snapshot.handled,
        ignored = snapshot.ignored,
        failed = snapshot.failed,
        dead_lettered = snapshot.dead_lettered,
        "Topic worker stopped"
    );

    metrics
}

// ============================================================================
// RUNTIME
// ============================================================================

struct TopicWorker {
    topic: Topic,
    metrics: Arc<WorkerMetrics>,
    handle: JoinHandle<Arc<WorkerMetrics>>,
}

/// All topic workers plus the shutdown channel that stops them.
pub struct ConsumerRuntime {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<TopicWorker>,
}

impl std::fmt::Debug for ConsumerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerRuntime")
            .field("topics", &self.topics())
            .finish()
    }
}

impl ConsumerRuntime {
    /// Spawn one worker per source.
    pub fn spawn(
        sources: Vec<Box<dyn EventSource>>,
        processor: Arc<EventProcessor>,
        dead_letters: Arc<dyn DeadLetterSink>,
        config: ConsumerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = sources
            .into_iter()
            .map(|source| {
                let topic = source.topic();
                let metrics = Arc::new(WorkerMetrics::new());
                let handle = tokio::spawn(run_worker(
                    source,
                    processor.clone(),
                    dead_letters.clone(),
                    config.clone(),
                    metrics.clone(),
                    shutdown_rx.clone(),
                ));
                TopicWorker {
                    topic,
                    metrics,
                    handle,
                }
            })
            .collect();

        Self {
            shutdown_tx,
            workers,
        }
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.workers.iter().map(|w| w.topic).collect()
    }

    /// Current counters per topic.
    pub fn snapshot(&self) -> Vec<(Topic, WorkerMetricsSnapshot)> {
        self.workers
            .iter()
            .map(|w| (w.topic, w.metrics.snapshot()))
            .collect()
    }

    /// Whether every worker is still running.
    pub fn is_running(&self) -> bool {
        self.workers.iter().all(|w| !w.handle.is_finished())
    }

    /// Signal shutdown and wait for each worker to finish its in-flight delivery.
    pub async fn shutdown(self) -> Vec<(Topic, WorkerMetricsSnapshot)> {
        let _ = self.shutdown_tx.send(true);
        let mut finals = Vec::with_capacity(self.workers.len());
        for worker in self.workers {
            match worker.handle.await {
                Ok(metrics) => finals.push((worker.topic, metrics.snapshot())),
                Err(e) => {
                    tracing::error!(error = %e, topic = %worker.topic, "Topic worker panicked");
                    finals.push((worker.topic, worker.metrics.snapshot()));
                }
            }
        }
        finals
    }
}
