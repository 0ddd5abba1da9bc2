//! # In-Memory Broker
//!
//! Thread-safe in-process broker for tests and dry runs.
//!
//! ## Features
//!
//! - **Topic routing**: `*` matches one word, `#` matches zero or more
//! - **Dead lettering**: `nack(requeue = false)` routes through the queue's DLX
//!   and stamps the delivery's `dead_lettered_at`
//! - **Redelivery flag**: requeued messages come back with `redelivered = true`
//! - **Fault injection**: [`InMemoryBroker::fail_next_publishes`] simulates a
//!   dropped connection for the next N publishes

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::messaging::errors::MessagingError;
use crate::messaging::service::traits::MessageBroker;
use crate::messaging::service::types::{Delivery, MessageProperties, QueueStats};
use crate::messaging::topology::Topology;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeKind {
    Topic,
    Direct,
}

#[derive(Debug, Clone)]
struct Binding {
    exchange: String,
    pattern: String,
    queue: String,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    routing_key: String,
    properties: MessageProperties,
    redelivered: bool,
    dead_lettered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct InMemoryQueue {
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, StoredMessage>,
    /// (exchange, routing key) used when a delivery is rejected
    dead_letter: Option<(String, String)>,
}

#[derive(Debug, Default)]
struct BrokerState {
    main_exchange: Option<String>,
    exchanges: HashMap<String, ExchangeKind>,
    bindings: Vec<Binding>,
    queues: HashMap<String, InMemoryQueue>,
}

impl BrokerState {
    fn route(&mut self, exchange: &str, routing_key: &str, message: StoredMessage) -> usize {
        let Some(kind) = self.exchanges.get(exchange).copied() else {
            return 0;
        };
        let targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange)
            .filter(|b| match kind {
                ExchangeKind::Direct => b.pattern == routing_key,
                ExchangeKind::Topic => topic_matches(&b.pattern, routing_key),
            })
            .map(|b| b.queue.clone())
            .collect();

        let mut delivered = 0;
        for queue_name in targets {
            if let Some(queue) = self.queues.get_mut(&queue_name) {
                queue.ready.push_back(StoredMessage {
                    routing_key: routing_key.to_string(),
                    ..message.clone()
                });
                delivered += 1;
            }
        }
        delivered
    }

    fn bind(&mut self, exchange: &str, pattern: &str, queue: &str) {
        let exists = self
            .bindings
            .iter()
            .any(|b| b.exchange == exchange && b.pattern == pattern && b.queue == queue);
        if !exists {
            self.bindings.push(Binding {
                exchange: exchange.to_string(),
                pattern: pattern.to_string(),
                queue: queue.to_string(),
            });
        }
    }
}

/// AMQP topic match: `*` is exactly one word, `#` is zero or more words
pub(crate) fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}

/// In-memory broker with exchange, binding and DLX semantics
///
/// # Example
///
/// ```rust
/// use bug_triage_core::messaging::service::{InMemoryBroker, MessageBroker, MessageProperties};
/// use bug_triage_core::messaging::topology::Topology;
///
/// # tokio_test::block_on(async {
/// let broker = InMemoryBroker::new();
/// broker.declare_topology(&Topology::default()).await.unwrap();
///
/// broker
///     .publish("bug_triage.new_bugs", b"{}", &MessageProperties::persistent(5))
///     .await
///     .unwrap();
///
/// let deliveries = broker.receive("new_bugs_queue", 10).await.unwrap();
/// assert_eq!(deliveries.len(), 1);
/// broker.ack("new_bugs_queue", deliveries[0].delivery_tag).await.unwrap();
/// # });
/// ```
#[derive(Debug)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    next_delivery_tag: AtomicU64,
    failing_publishes: AtomicU32,
    reconnects: AtomicU64,
    healthy: AtomicBool,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            next_delivery_tag: AtomicU64::new(1),
            failing_publishes: AtomicU32::new(0),
            reconnects: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    /// The next `n` publishes fail with a connection error
    pub fn fail_next_publishes(&self, n: u32) {
        self.failing_publishes.store(n, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Ready messages in `queue_name` (0 for unknown queues)
    pub fn ready_count(&self, queue_name: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue_name)
            .map_or(0, |q| q.ready.len())
    }

    pub fn unacked_count(&self, queue_name: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue_name)
            .map_or(0, |q| q.unacked.len())
    }

    /// Copies of the ready payloads without consuming them
    pub fn peek_payloads(&self, queue_name: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .queues
            .get(queue_name)
            .map(|q| q.ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare_topology(&self, topology: &Topology) -> Result<(), MessagingError> {
        let mut state = self.state.lock();
        state.main_exchange = Some(topology.exchange.clone());
        state
            .exchanges
            .insert(topology.exchange.clone(), ExchangeKind::Topic);
        state
            .exchanges
            .insert(topology.dead_letter_exchange.clone(), ExchangeKind::Direct);

        for queue in &topology.queues {
            state
                .queues
                .entry(queue.name.clone())
                .or_default()
                .dead_letter = Some((
                topology.dead_letter_exchange.clone(),
                queue.dead_letter_routing_key.clone(),
            ));
            state.queues.entry(queue.dead_letter_queue.clone()).or_default();

            state.bind(&topology.exchange, &queue.binding_key, &queue.name);
            state.bind(
                &topology.dead_letter_exchange,
                &queue.dead_letter_routing_key,
                &queue.dead_letter_queue,
            );
        }
        debug!(
            exchange = %topology.exchange,
            queues = topology.queues.len(),
            "In-memory topology declared"
        );
        Ok(())
    }

    async fn publish(
        &self,
        routing_key: &str,
        payload: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), MessagingError> {
        if self.take_injected_failure() {
            return Err(MessagingError::connection("injected publish failure"));
        }

        let mut state = self.state.lock();
        let exchange = state
            .main_exchange
            .clone()
            .ok_or_else(|| MessagingError::configuration("in_memory", "topology not declared"))?;
        let routed = state.route(
            &exchange,
            routing_key,
            StoredMessage {
                payload: payload.to_vec(),
                routing_key: routing_key.to_string(),
                properties: properties.clone(),
                redelivered: false,
                dead_lettered_at: None,
            },
        );
        if routed == 0 {
            debug!(routing_key = %routing_key, "Message unroutable, dropped");
        }
        Ok(())
    }

    async fn receive(
        &self,
        queue_name: &str,
        max_messages: usize,
    ) -> Result<Vec<Delivery>, MessagingError> {
        let mut state = self.state.lock();
        let queue = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let mut deliveries = Vec::with_capacity(max_messages.min(queue.ready.len()));
        while deliveries.len() < max_messages {
            let Some(message) = queue.ready.pop_front() else {
                break;
            };
            let delivery_tag = self.next_delivery_tag.fetch_add(1, Ordering::SeqCst);
            deliveries.push(Delivery {
                queue_name: queue_name.to_string(),
                delivery_tag,
                payload: message.payload.clone(),
                redelivered: message.redelivered,
                routing_key: message.routing_key.clone(),
                properties: message.properties.clone(),
                dead_lettered_at: message.dead_lettered_at,
            });
            queue.unacked.insert(delivery_tag, message);
        }
        Ok(deliveries)
    }

    async fn ack(&self, queue_name: &str, delivery_tag: u64) -> Result<(), MessagingError> {
        let mut state = self.state.lock();
        let queue = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        queue
            .unacked
            .remove(&delivery_tag)
            .map(|_| ())
            .ok_or_else(|| MessagingError::unknown_delivery(queue_name, delivery_tag))
    }

    async fn nack(
        &self,
        queue_name: &str,
        delivery_tag: u64,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let mut state = self.state.lock();
        let queue = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let mut message = queue
            .unacked
            .remove(&delivery_tag)
            .ok_or_else(|| MessagingError::unknown_delivery(queue_name, delivery_tag))?;

        if requeue {
            message.redelivered = true;
            queue.ready.push_front(message);
            return Ok(());
        }

        if let Some((exchange, routing_key)) = queue.dead_letter.clone() {
            message.redelivered = false;
            message.dead_lettered_at = Some(Utc::now());
            state.route(&exchange, &routing_key, message);
        }
        Ok(())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let state = self.state.lock();
        let queue = state
            .queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        Ok(QueueStats::new(queue_name, queue.ready.len() as u64)
            .with_unacked(queue.unacked.len() as u64))
    }

    async fn purge(&self, queue_name: &str) -> Result<u64, MessagingError> {
        let mut state = self.state.lock();
        let queue = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let purged = queue.ready.len() as u64;
        queue.ready.clear();
        Ok(purged)
    }

    async fn reconnect(&self) -> Result<(), MessagingError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(self.healthy.load(Ordering::SeqCst))
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn broker() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker.declare_topology(&Topology::default()).await.unwrap();
        broker
    }

    #[test]
    fn topic_wildcards() {
        assert!(topic_matches("bug_triage.new_bugs", "bug_triage.new_bugs"));
        assert!(topic_matches("bug_triage.*", "bug_triage.new_bugs"));
        assert!(!topic_matches("bug_triage.*", "bug_triage.new_bugs.extra"));
        assert!(topic_matches("bug_triage.#", "bug_triage.new_bugs.extra"));
        assert!(topic_matches("bug_triage.#", "bug_triage"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(!topic_matches("bug_triage.assignments", "bug_triage.new_bugs"));
    }

    #[tokio::test]
    async fn publish_routes_by_binding() {
        let broker = broker().await;
        let props = MessageProperties::persistent(5);
        broker.publish("bug_triage.new_bugs", b"a", &props).await.unwrap();
        broker.publish("bug_triage.assignments", b"b", &props).await.unwrap();
        broker.publish("bug_triage.unknown", b"c", &props).await.unwrap();

        assert_eq!(broker.ready_count("new_bugs_queue"), 1);
        assert_eq!(broker.ready_count("assignments_queue"), 1);
        assert_eq!(broker.ready_count("notifications_queue"), 0);
    }

    #[tokio::test]
    async fn requeue_sets_redelivered() {
        let broker = broker().await;
        broker
            .publish("bug_triage.new_bugs", b"x", &MessageProperties::default())
            .await
            .unwrap();

        let first = broker.receive("new_bugs_queue", 10).await.unwrap();
        assert!(!first[0].redelivered);
        assert_eq!(broker.unacked_count("new_bugs_queue"), 1);
        broker
            .nack("new_bugs_queue", first[0].delivery_tag, true)
            .await
            .unwrap();

        let second = broker.receive("new_bugs_queue", 10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(second[0].redelivered);
        assert_ne!(second[0].delivery_tag, first[0].delivery_tag);
    }

    #[tokio::test]
    async fn reject_routes_to_dead_letter_queue() {
        let broker = broker().await;
        broker
            .publish("bug_triage.triaged_bugs", b"poison", &MessageProperties::default())
            .await
            .unwrap();
        let delivery = broker.receive("triaged_bugs_queue", 1).await.unwrap().remove(0);
        broker
            .nack("triaged_bugs_queue", delivery.delivery_tag, false)
            .await
            .unwrap();

        assert_eq!(broker.ready_count("triaged_bugs_queue"), 0);
        assert_eq!(broker.peek_payloads("triaged_bugs_queue.dlq"), vec![b"poison".to_vec()]);
        let dead = broker.receive("triaged_bugs_queue.dlq", 1).await.unwrap();
        assert_eq!(dead[0].routing_key, "triaged_bugs_queue.failed");
        assert!(delivery.dead_lettered_at.is_none());
        let stamped = dead[0].dead_lettered_at.unwrap();

        // A deferred requeue on the DLQ keeps the original stamp.
        broker
            .nack("triaged_bugs_queue.dlq", dead[0].delivery_tag, true)
            .await
            .unwrap();
        let again = broker.receive("triaged_bugs_queue.dlq", 1).await.unwrap();
        assert_eq!(again[0].dead_lettered_at, Some(stamped));
    }

    #[tokio::test]
    async fn ack_is_single_use() {
        let broker = broker().await;
        broker
            .publish("bug_triage.new_bugs", b"x", &MessageProperties::default())
            .await
            .unwrap();
        let tag = broker.receive("new_bugs_queue", 1).await.unwrap()[0].delivery_tag;
        broker.ack("new_bugs_queue", tag).await.unwrap();
        assert!(matches!(
            broker.ack("new_bugs_queue", tag).await,
            Err(MessagingError::UnknownDelivery { .. })
        ));
    }

    #[tokio::test]
    async fn injected_failures_are_connection_errors() {
        let broker = broker().await;
        broker.fail_next_publishes(2);
        let props = MessageProperties::default();
        for _ in 0..2 {
            let err = broker.publish("bug_triage.new_bugs", b"x", &props).await.unwrap_err();
            assert!(err.is_connection());
        }
        broker.publish("bug_triage.new_bugs", b"x", &props).await.unwrap();
        assert_eq!(broker.ready_count("new_bugs_queue"), 1);
    }

    #[tokio::test]
    async fn purge_and_stats() {
        let broker = broker().await;
        for _ in 0..3 {
            broker
                .publish("bug_triage.notifications", b"n", &MessageProperties::default())
                .await
                .unwrap();
        }
        let _held = broker.receive("notifications_queue", 1).await.unwrap();
        let stats = broker.queue_stats("notifications_queue").await.unwrap();
        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.unacked_count, 1);

        assert_eq!(broker.purge("notifications_queue").await.unwrap(), 2);
        assert!(broker.queue_stats("missing").await.is_err());
    }
}
