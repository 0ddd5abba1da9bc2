//! # Broker Trait
//!
//! The seam between the publisher/consumer/dead-letter logic and a concrete
//! broker. Implementations must be safe to share behind an `Arc` across tasks.

use async_trait::async_trait;

use super::types::{Delivery, MessageProperties, QueueStats};
use crate::messaging::errors::MessagingError;
use crate::messaging::topology::Topology;

/// Provider-agnostic broker operations
///
/// Semantics follow AMQP 0.9.1:
///
/// - `publish` goes to the main exchange of the declared topology
/// - `receive` is a pull (`basic_get` with manual ack)
/// - `nack(requeue = false)` dead-letters through the queue's DLX
#[async_trait]
pub trait MessageBroker: Send + Sync + 'static {
    /// Declares exchanges, queues, DLX wiring and bindings (idempotent)
    async fn declare_topology(&self, topology: &Topology) -> Result<(), MessagingError>;

    async fn publish(
        &self,
        routing_key: &str,
        payload: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), MessagingError>;

    /// Pulls up to `max_messages` ready deliveries
    async fn receive(&self, queue_name: &str, max_messages: usize)
        -> Result<Vec<Delivery>, MessagingError>;

    async fn ack(&self, queue_name: &str, delivery_tag: u64) -> Result<(), MessagingError>;

    async fn nack(
        &self,
        queue_name: &str,
        delivery_tag: u64,
        requeue: bool,
    ) -> Result<(), MessagingError>;

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError>;

    /// Drops every ready message; returns how many were removed
    async fn purge(&self, queue_name: &str) -> Result<u64, MessagingError>;

    /// Re-establishes the connection after a connection-class failure
    async fn reconnect(&self) -> Result<(), MessagingError>;

    async fn health_check(&self) -> Result<bool, MessagingError>;

    fn provider_name(&self) -> &'static str;
}

impl std::fmt::Debug for dyn MessageBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageBroker({})", self.provider_name())
    }
}
