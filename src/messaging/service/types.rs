//! # Broker Types
//!
//! Provider-agnostic shapes for what goes onto and comes off a queue.

use chrono::{DateTime, Utc};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// AMQP-style properties attached to a published message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProperties {
    pub message_id: Option<String>,
    pub priority: u8,
    /// Delivery mode 2 when set
    pub persistent: bool,
    pub content_type: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl MessageProperties {
    /// Persistent JSON message with the given priority
    pub fn persistent(priority: u8) -> Self {
        Self {
            message_id: None,
            priority,
            persistent: true,
            content_type: JSON_CONTENT_TYPE.to_string(),
            timestamp: None,
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

impl Default for MessageProperties {
    fn default() -> Self {
        Self::persistent(0)
    }
}

/// A message pulled from a queue and awaiting ack or nack
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue_name: String,
    pub delivery_tag: u64,
    pub payload: Vec<u8>,
    /// True when the broker has delivered this message before
    pub redelivered: bool,
    pub routing_key: String,
    pub properties: MessageProperties,
    /// When the broker last moved this message to a dead-letter queue
    pub dead_lettered_at: Option<DateTime<Utc>>,
}

/// Point-in-time queue counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queue_name: String,
    /// Messages ready for delivery
    pub message_count: u64,
    pub consumer_count: u32,
    /// Delivered but not yet acked (0 where the provider cannot tell)
    pub unacked_count: u64,
}

impl QueueStats {
    pub fn new(queue_name: impl Into<String>, message_count: u64) -> Self {
        Self {
            queue_name: queue_name.into(),
            message_count,
            ..Default::default()
        }
    }

    pub fn with_consumers(mut self, consumer_count: u32) -> Self {
        self.consumer_count = consumer_count;
        self
    }

    pub fn with_unacked(mut self, unacked_count: u64) -> Self {
        self.unacked_count = unacked_count;
        self
    }
}
