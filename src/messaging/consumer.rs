//! # Queue Consumer
//!
//! A background tokio task pulls deliveries from one queue and hands each to a
//! [`DeliveryProcessor`]. The processor's verdict decides the broker call:
//!
//! | Outcome | Broker call |
//! |---------|-------------|
//! | `Ack` | `ack` |
//! | `Requeue` | `nack(requeue = true)` |
//! | `Reject` | `nack(requeue = false)`, dead-lettered through the DLX |
//!
//! [`HandlerRegistry`] is the processor for main queues: it decodes the
//! envelope and dispatches to the handler registered for the message type.
//! The dead-letter handler is the processor for `.dlq` queues.
//!
//! Each delivery is processed on its own task. A processor that panics has its
//! delivery rejected and the worker keeps polling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::envelope::{decode, DecodedMessage, FailureInfo, MessageType, TriageMessage};
use super::errors::MessagingError;
use super::service::{Delivery, MessageBroker, QueueStats};
use crate::logging::log_queue_operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Ack,
    Requeue,
    Reject,
}

/// Decides what happens to one delivery
#[async_trait]
pub trait DeliveryProcessor: Send + Sync + 'static {
    async fn process(&self, delivery: &Delivery) -> DeliveryOutcome;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Retry later; the message is requeued
    #[error("Transient handler failure: {0}")]
    Transient(String),

    /// Never retry; the message is dead-lettered
    #[error("Permanent handler failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }
}

/// A decoded message together with its delivery metadata
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub message: TriageMessage,
    pub failure_info: Option<FailureInfo>,
    pub queue_name: String,
    pub routing_key: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
}

impl InboundMessage {
    fn new(decoded: DecodedMessage, delivery: &Delivery) -> Self {
        Self {
            message_type: decoded.message_type,
            timestamp: decoded.timestamp,
            message: decoded.message,
            failure_info: decoded.failure_info,
            queue_name: delivery.queue_name.clone(),
            routing_key: delivery.routing_key.clone(),
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
        }
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: &InboundMessage) -> Result<(), HandlerError>;
}

/// One handler per message type; the last registration wins
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<MessageType, Arc<dyn MessageHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("message_types", &self.registered_types())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, message_type: MessageType, handler: Arc<dyn MessageHandler>) {
        if self.handlers.insert(message_type, handler).is_some() {
            warn!(message_type = %message_type, "Replacing existing handler for message type");
        } else {
            debug!(message_type = %message_type, "Registered message handler");
        }
    }

    pub fn handler_for(&self, message_type: MessageType) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(&message_type).map(|h| Arc::clone(h.value()))
    }

    pub fn registered_types(&self) -> Vec<MessageType> {
        let mut types: Vec<MessageType> = self.handlers.iter().map(|e| *e.key()).collect();
        types.sort();
        types
    }
}

#[async_trait]
impl DeliveryProcessor for HandlerRegistry {
    async fn process(&self, delivery: &Delivery) -> DeliveryOutcome {
        let decoded = match decode(&delivery.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    queue = %delivery.queue_name,
                    delivery_tag = delivery.delivery_tag,
                    error = %e,
                    "Rejecting undecodable message"
                );
                return DeliveryOutcome::Reject;
            }
        };

        let Some(handler) = self.handler_for(decoded.message_type) else {
            warn!(
                queue = %delivery.queue_name,
                message_type = %decoded.message_type,
                "No handler registered for message type"
            );
            return DeliveryOutcome::Reject;
        };

        let inbound = InboundMessage::new(decoded, delivery);
        match handler.handle(&inbound).await {
            Ok(()) => DeliveryOutcome::Ack,
            Err(HandlerError::Transient(reason)) => {
                warn!(
                    message_type = %inbound.message_type,
                    redelivered = inbound.redelivered,
                    reason = %reason,
                    "Handler failed transiently, requeueing"
                );
                DeliveryOutcome::Requeue
            }
            Err(HandlerError::Permanent(reason)) => {
                warn!(
                    message_type = %inbound.message_type,
                    reason = %reason,
                    "Handler failed permanently, dead-lettering"
                );
                DeliveryOutcome::Reject
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Deliveries pulled per poll
    pub prefetch: usize,
    /// Sleep between polls when the queue is empty
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            prefetch: 10,
            poll_interval: Duration::from_millis(500),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumeStats {
    pub total_consumed: u64,
    pub successful: u64,
    pub failed: u64,
    pub last_consume_time: Option<DateTime<Utc>>,
}

impl ConsumeStats {
    pub fn success_rate(&self) -> f64 {
        let processed = self.successful + self.failed;
        if processed == 0 {
            0.0
        } else {
            self.successful as f64 / processed as f64
        }
    }
}

/// A message pulled by [`QueueConsumer::consume_single`], not yet acked
#[derive(Debug, Clone)]
pub struct ConsumedMessage {
    pub message: InboundMessage,
    pub delivery_tag: u64,
}

struct ConsumerInner {
    queue_name: String,
    broker: Arc<dyn MessageBroker>,
    processor: Arc<dyn DeliveryProcessor>,
    config: ConsumerConfig,
    stats: Mutex<ConsumeStats>,
    running: AtomicBool,
    shutdown: Notify,
}

impl ConsumerInner {
    /// Pulls and settles one batch.
    ///
    /// Returns how many deliveries left the queue (acked or rejected). A batch
    /// of requeues counts as no progress so the worker idles instead of spinning.
    async fn run_batch(&self) -> Result<usize, MessagingError> {
        let deliveries = self
            .broker
            .receive(&self.queue_name, self.config.prefetch)
            .await?;
        let total = deliveries.len();
        let mut pending = deliveries.into_iter();

        let mut settled = 0;
        let mut progressed = 0;
        for delivery in pending.by_ref() {
            let outcome = self.process_isolated(&delivery).await;
            self.settle(&delivery, outcome).await;
            settled += 1;
            if outcome != DeliveryOutcome::Requeue {
                progressed += 1;
            }
            if !self.running.load(Ordering::Acquire) {
                break;
            }
        }

        // Stopped mid-batch: hand the rest back untouched.
        for delivery in pending {
            if let Err(e) = self
                .broker
                .nack(&self.queue_name, delivery.delivery_tag, true)
                .await
            {
                warn!(queue = %self.queue_name, error = %e, "Failed to return prefetched delivery");
            }
        }
        if settled < total {
            debug!(queue = %self.queue_name, returned = total - settled, "Returned prefetched deliveries on stop");
        }
        Ok(progressed)
    }

    async fn process_isolated(&self, delivery: &Delivery) -> DeliveryOutcome {
        let processor = Arc::clone(&self.processor);
        let owned = delivery.clone();
        match tokio::spawn(async move { processor.process(&owned).await }).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                error!(
                    queue = %self.queue_name,
                    delivery_tag = delivery.delivery_tag,
                    "Processor panicked; rejecting delivery"
                );
                DeliveryOutcome::Reject
            }
            Err(e) => {
                warn!(queue = %self.queue_name, error = %e, "Processor task cancelled; requeueing");
                DeliveryOutcome::Requeue
            }
        }
    }

    async fn settle(&self, delivery: &Delivery, outcome: DeliveryOutcome) {
        let result = match outcome {
            DeliveryOutcome::Ack => self.broker.ack(&self.queue_name, delivery.delivery_tag).await,
            DeliveryOutcome::Requeue => {
                self.broker
                    .nack(&self.queue_name, delivery.delivery_tag, true)
                    .await
            }
            DeliveryOutcome::Reject => {
                self.broker
                    .nack(&self.queue_name, delivery.delivery_tag, false)
                    .await
            }
        };

        {
            let mut stats = self.stats.lock();
            stats.total_consumed += 1;
            stats.last_consume_time = Some(Utc::now());
            if outcome == DeliveryOutcome::Ack {
                stats.successful += 1;
            } else {
                stats.failed += 1;
            }
        }

        let status = match (&result, outcome) {
            (Err(_), _) => "settle_failed",
            (Ok(()), DeliveryOutcome::Ack) => "acked",
            (Ok(()), DeliveryOutcome::Requeue) => "requeued",
            (Ok(()), DeliveryOutcome::Reject) => "rejected",
        };
        let error = result.err().map(|e| e.to_string());
        log_queue_operation("consume", &self.queue_name, None, status, error.as_deref());
    }

    async fn run(self: Arc<Self>) {
        info!(queue = %self.queue_name, prefetch = self.config.prefetch, "Consumer started");
        while self.running.load(Ordering::Acquire) {
            match self.run_batch().await {
                Ok(0) => self.idle().await,
                Ok(_) => {}
                Err(e) => {
                    warn!(queue = %self.queue_name, error = %e, "Consumer poll failed");
                    if e.is_connection() {
                        if let Err(reconnect_error) = self.broker.reconnect().await {
                            warn!(error = %reconnect_error, "Consumer reconnect failed");
                        }
                    }
                    self.idle().await;
                }
            }
        }
        info!(queue = %self.queue_name, "Consumer stopped");
    }

    async fn idle(&self) {
        tokio::select! {
            _ = self.shutdown.notified() => {}
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }
}

/// Background consumer for one queue
pub struct QueueConsumer {
    inner: Arc<ConsumerInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for QueueConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("queue_name", &self.inner.queue_name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl QueueConsumer {
    pub fn new(
        queue_name: impl Into<String>,
        broker: Arc<dyn MessageBroker>,
        processor: Arc<dyn DeliveryProcessor>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ConsumerInner {
                queue_name: queue_name.into(),
                broker,
                processor,
                config,
                stats: Mutex::new(ConsumeStats::default()),
                running: AtomicBool::new(false),
                shutdown: Notify::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.inner.queue_name
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Spawns the worker task. Returns `false` if already running.
    pub fn start(&self) -> bool {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            warn!(queue = %self.inner.queue_name, "Consumer already running");
            return false;
        }
        let handle = tokio::spawn(Arc::clone(&self.inner).run());
        *self.worker.lock() = Some(handle);
        true
    }

    /// Stops with the configured timeout
    pub async fn stop(&self) -> bool {
        self.stop_with_timeout(self.inner.config.stop_timeout).await
    }

    /// Cooperative stop: the in-flight delivery finishes, the join is bounded.
    /// Returns `false` if the worker did not finish in time.
    pub async fn stop_with_timeout(&self, timeout: Duration) -> bool {
        self.inner.running.store(false, Ordering::Release);
        self.inner.shutdown.notify_one();

        let handle = self.worker.lock().take();
        let Some(handle) = handle else {
            return true;
        };
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(queue = %self.inner.queue_name, error = %e, "Consumer task ended abnormally");
                false
            }
            Err(_) => {
                warn!(
                    queue = %self.inner.queue_name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Consumer did not stop within timeout"
                );
                false
            }
        }
    }

    /// Processes one batch on the calling task; returns acked plus rejected
    pub async fn poll_once(&self) -> Result<usize, MessagingError> {
        let was_running = self.inner.running.swap(true, Ordering::AcqRel);
        let result = self.inner.run_batch().await;
        if !was_running {
            self.inner.running.store(false, Ordering::Release);
        }
        result
    }

    /// Pulls one message and decodes it without settling it.
    ///
    /// A poison message is rejected on the spot and yields `None`. The caller
    /// settles a returned message with [`acknowledge`](Self::acknowledge) or
    /// [`reject`](Self::reject).
    pub async fn consume_single(&self) -> Result<Option<ConsumedMessage>, MessagingError> {
        let mut deliveries = self.inner.broker.receive(&self.inner.queue_name, 1).await?;
        let Some(delivery) = deliveries.pop() else {
            return Ok(None);
        };

        match decode(&delivery.payload) {
            Ok(decoded) => Ok(Some(ConsumedMessage {
                delivery_tag: delivery.delivery_tag,
                message: InboundMessage::new(decoded, &delivery),
            })),
            Err(e) => {
                warn!(queue = %self.inner.queue_name, error = %e, "Rejecting undecodable message");
                self.inner
                    .broker
                    .nack(&self.inner.queue_name, delivery.delivery_tag, false)
                    .await?;
                Ok(None)
            }
        }
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), MessagingError> {
        self.inner.broker.ack(&self.inner.queue_name, delivery_tag).await
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), MessagingError> {
        self.inner
            .broker
            .nack(&self.inner.queue_name, delivery_tag, requeue)
            .await
    }

    pub async fn queue_info(&self) -> Result<QueueStats, MessagingError> {
        self.inner.broker.queue_stats(&self.inner.queue_name).await
    }

    pub async fn purge(&self) -> Result<u64, MessagingError> {
        self.inner.broker.purge(&self.inner.queue_name).await
    }

    pub fn stats(&self) -> ConsumeStats {
        self.inner.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        *self.inner.stats.lock() = ConsumeStats::default();
    }
}

impl Drop for QueueConsumer {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::envelope::encode;
    use crate::messaging::service::{InMemoryBroker, MessageProperties};
    use crate::messaging::topology::Topology;
    use crate::models::SystemEvent;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedHandler {
        calls: AtomicUsize,
        result: Result<(), HandlerError>,
        saw_redelivered: AtomicBool,
    }

    impl ScriptedHandler {
        fn new(result: Result<(), HandlerError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result,
                saw_redelivered: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl MessageHandler for ScriptedHandler {
        async fn handle(&self, message: &InboundMessage) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if message.redelivered {
                self.saw_redelivered.store(true, Ordering::SeqCst);
            }
            self.result.clone()
        }
    }

    fn event_payload() -> Vec<u8> {
        encode(&TriageMessage::SystemEvent(SystemEvent::new(
            "ping",
            serde_json::json!({}),
            Utc::now(),
        )))
        .unwrap()
    }

    async fn setup(handler: Arc<ScriptedHandler>) -> (Arc<InMemoryBroker>, QueueConsumer) {
        let broker = Arc::new(InMemoryBroker::new());
        broker
            .declare_topology(&Topology::new(
                "bug_triage",
                &[("system_events".to_string(), "events_queue".to_string())]
                    .into_iter()
                    .collect(),
            ))
            .await
            .unwrap();
        let registry = HandlerRegistry::new();
        registry.register(MessageType::SystemEvent, handler);
        let consumer = QueueConsumer::new(
            "events_queue",
            broker.clone(),
            Arc::new(registry),
            ConsumerConfig::default(),
        );
        (broker, consumer)
    }

    async fn publish(broker: &InMemoryBroker, payload: &[u8]) {
        broker
            .publish("bug_triage.system_events", payload, &MessageProperties::persistent(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn success_acks() {
        let handler = ScriptedHandler::new(Ok(()));
        let (broker, consumer) = setup(handler.clone()).await;
        publish(&broker, &event_payload()).await;

        assert_eq!(consumer.poll_once().await.unwrap(), 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.ready_count("events_queue"), 0);
        assert_eq!(broker.unacked_count("events_queue"), 0);
        assert_eq!(consumer.stats().success_rate(), 1.0);
    }

    #[tokio::test]
    async fn transient_failure_requeues_with_redelivered_flag() {
        let handler = ScriptedHandler::new(Err(HandlerError::transient("db busy")));
        let (broker, consumer) = setup(handler.clone()).await;
        publish(&broker, &event_payload()).await;

        consumer.poll_once().await.unwrap();
        assert_eq!(broker.ready_count("events_queue"), 1);
        consumer.poll_once().await.unwrap();
        assert!(handler.saw_redelivered.load(Ordering::SeqCst));
        assert_eq!(consumer.stats().failed, 2);
    }

    #[tokio::test]
    async fn permanent_failure_dead_letters() {
        let handler = ScriptedHandler::new(Err(HandlerError::permanent("bad data")));
        let (broker, consumer) = setup(handler).await;
        publish(&broker, &event_payload()).await;

        consumer.poll_once().await.unwrap();
        assert_eq!(broker.ready_count("events_queue"), 0);
        assert_eq!(broker.ready_count("events_queue.dlq"), 1);
    }

    #[tokio::test]
    async fn poison_and_unhandled_messages_are_rejected() {
        let handler = ScriptedHandler::new(Ok(()));
        let (broker, consumer) = setup(handler.clone()).await;
        publish(&broker, b"{not json").await;
        let unhandled = serde_json::json!({
            "type": "bug_report",
            "timestamp": "2026-01-01T00:00:00Z",
            "data": {"id": "gh_1", "title": "t", "description": "long enough text", "reporter": "r",
                     "platform": "github", "created_at": "2026-01-01T00:00:00Z"}
        })
        .to_string();
        publish(&broker, unhandled.as_bytes()).await;

        assert_eq!(consumer.poll_once().await.unwrap(), 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(broker.ready_count("events_queue.dlq"), 2);
    }

    #[tokio::test]
    async fn background_worker_drains_and_stops() {
        let handler = ScriptedHandler::new(Ok(()));
        let (broker, consumer) = setup(handler.clone()).await;
        for _ in 0..3 {
            publish(&broker, &event_payload()).await;
        }

        assert!(consumer.start());
        assert!(!consumer.start());
        for _ in 0..100 {
            if handler.calls.load(Ordering::SeqCst) == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(consumer.stop_with_timeout(Duration::from_secs(2)).await);
        assert!(!consumer.is_running());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(consumer.stats().total_consumed, 3);
    }

    /// Panics on the first delivery, acks the rest
    struct PanicsOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DeliveryProcessor for PanicsOnce {
        async fn process(&self, _delivery: &Delivery) -> DeliveryOutcome {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("handler bug");
            }
            DeliveryOutcome::Ack
        }
    }

    #[tokio::test]
    async fn panicking_processor_rejects_and_worker_survives() {
        let (broker, _) = setup(ScriptedHandler::new(Ok(()))).await;
        let processor = Arc::new(PanicsOnce {
            calls: AtomicUsize::new(0),
        });
        let consumer = QueueConsumer::new(
            "events_queue",
            broker.clone(),
            processor.clone(),
            ConsumerConfig {
                poll_interval: Duration::from_millis(10),
                ..ConsumerConfig::default()
            },
        );
        publish(&broker, &event_payload()).await;
        publish(&broker, &event_payload()).await;

        assert!(consumer.start());
        for _ in 0..200 {
            if consumer.stats().total_consumed == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stats = consumer.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.successful, 1);
        assert_eq!(broker.ready_count("events_queue.dlq"), 1);
        assert_eq!(broker.unacked_count("events_queue"), 0);
        assert!(consumer.is_running());
        assert!(consumer.stop_with_timeout(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn consume_single_leaves_settling_to_caller() {
        let handler = ScriptedHandler::new(Ok(()));
        let (broker, consumer) = setup(handler).await;
        publish(&broker, b"garbage").await;
        publish(&broker, &event_payload()).await;

        assert!(consumer.consume_single().await.unwrap().is_none());
        let consumed = consumer.consume_single().await.unwrap().unwrap();
        assert_eq!(consumed.message.message_type, MessageType::SystemEvent);
        assert_eq!(broker.unacked_count("events_queue"), 1);
        consumer.acknowledge(consumed.delivery_tag).await.unwrap();
        assert_eq!(broker.unacked_count("events_queue"), 0);
        assert!(consumer.consume_single().await.unwrap().is_none());
    }
}
