//! # Message Publisher
//!
//! Encodes typed messages into envelopes and publishes them persistently, with
//! a bounded retry on connection-class failures. Publishing never surfaces an
//! error to the caller: the result is `true` or `false` and the failure is
//! logged and counted.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

use super::envelope::{encode, TriageMessage};
use super::service::{MessageBroker, MessageProperties};
use super::topology::{default_priority, routing_key_for};
use crate::logging::log_queue_operation;
use crate::models::{
    Assignment, AssignmentFeedback, BugReport, CategorizedBug, DeveloperStatus,
    NotificationPayload, SystemEvent,
};

static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique, monotonic message id: `msg_{counter}_{uuid}`
pub fn next_message_id() -> String {
    let counter = MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("msg_{counter}_{}", Uuid::new_v4().simple())
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Retries after the first attempt
    pub retry_count: u32,
    /// Sleep before retry `n` (0-based) is `retry_base_delay * (n + 1)`
    pub retry_base_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishStats {
    pub total_published: u64,
    pub failed_publishes: u64,
    pub last_publish_time: Option<DateTime<Utc>>,
}

impl PublishStats {
    pub fn success_rate(&self) -> f64 {
        let total = self.total_published + self.failed_publishes;
        if total == 0 {
            0.0
        } else {
            self.total_published as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub success: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct MessagePublisher {
    broker: Arc<dyn MessageBroker>,
    config: PublisherConfig,
    stats: Arc<Mutex<PublishStats>>,
}

impl MessagePublisher {
    pub fn new(broker: Arc<dyn MessageBroker>, config: PublisherConfig) -> Self {
        Self {
            broker,
            config,
            stats: Arc::new(Mutex::new(PublishStats::default())),
        }
    }

    pub fn broker(&self) -> &Arc<dyn MessageBroker> {
        &self.broker
    }

    /// Encodes `message` and publishes it on `routing_key`
    pub async fn publish_message(
        &self,
        message: &TriageMessage,
        routing_key: &str,
        priority: u8,
    ) -> bool {
        let message_type = message.message_type();
        match encode(message) {
            Ok(payload) => {
                self.publish_payload(&payload, routing_key, priority, message_type.as_str())
                    .await
            }
            Err(e) => {
                error!(
                    message_type = %message_type,
                    error = %e,
                    "Failed to encode message for publishing"
                );
                self.stats.lock().failed_publishes += 1;
                false
            }
        }
    }

    /// Publishes on the type's default routing key with its default priority
    pub async fn publish(&self, message: &TriageMessage) -> bool {
        self.publish_message(
            message,
            routing_key_for(message.message_type()),
            default_priority(message),
        )
        .await
    }

    /// Publishes an already encoded envelope, retrying connection failures
    pub async fn publish_payload(
        &self,
        payload: &[u8],
        routing_key: &str,
        priority: u8,
        message_type: &str,
    ) -> bool {
        let properties = MessageProperties::persistent(priority)
            .with_message_id(next_message_id())
            .with_timestamp(Utc::now());

        for attempt in 0..=self.config.retry_count {
            match self.broker.publish(routing_key, payload, &properties).await {
                Ok(()) => {
                    let mut stats = self.stats.lock();
                    stats.total_published += 1;
                    stats.last_publish_time = Some(Utc::now());
                    drop(stats);
                    log_queue_operation("publish", routing_key, Some(message_type), "ok", None);
                    return true;
                }
                Err(e) if e.is_connection() => {
                    warn!(
                        attempt = attempt + 1,
                        routing_key = %routing_key,
                        error = %e,
                        "Connection error on publish attempt"
                    );
                    if attempt < self.config.retry_count {
                        if let Err(reconnect_error) = self.broker.reconnect().await {
                            warn!(error = %reconnect_error, "Reconnect before publish retry failed");
                        }
                        tokio::time::sleep(self.config.retry_base_delay * (attempt + 1)).await;
                    }
                }
                Err(e) => {
                    error!(
                        routing_key = %routing_key,
                        message_type = %message_type,
                        error = %e,
                        "Unexpected error publishing message"
                    );
                    self.stats.lock().failed_publishes += 1;
                    return false;
                }
            }
        }

        error!(
            routing_key = %routing_key,
            attempts = self.config.retry_count + 1,
            "Failed to publish message after all attempts"
        );
        self.stats.lock().failed_publishes += 1;
        false
    }

    pub async fn publish_bug_report(&self, bug: &BugReport) -> bool {
        self.publish(&TriageMessage::BugReport(bug.clone())).await
    }

    /// Critical bugs go out at priority 10
    pub async fn publish_categorized_bug(&self, bug: &CategorizedBug) -> bool {
        self.publish(&TriageMessage::CategorizedBug(bug.clone())).await
    }

    pub async fn publish_assignment(&self, assignment: &Assignment) -> bool {
        self.publish(&TriageMessage::Assignment(assignment.clone())).await
    }

    pub async fn publish_feedback(&self, feedback: &AssignmentFeedback) -> bool {
        self.publish(&TriageMessage::AssignmentFeedback(feedback.clone()))
            .await
    }

    pub async fn publish_notification(&self, notification: &NotificationPayload) -> bool {
        self.publish(&TriageMessage::Notification(notification.clone()))
            .await
    }

    pub async fn publish_developer_status_update(&self, status: &DeveloperStatus) -> bool {
        self.publish(&TriageMessage::DeveloperStatusUpdate(status.clone()))
            .await
    }

    pub async fn publish_system_event(&self, event: &SystemEvent, priority: u8) -> bool {
        let message = TriageMessage::SystemEvent(event.clone());
        self.publish_message(&message, routing_key_for(message.message_type()), priority)
            .await
    }

    /// Publishes each message once on `routing_key`; no retries
    pub async fn publish_batch(&self, messages: &[TriageMessage], routing_key: &str) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for message in messages {
            let result = match encode(message) {
                Ok(payload) => {
                    let properties = MessageProperties::persistent(default_priority(message))
                        .with_message_id(next_message_id())
                        .with_timestamp(Utc::now());
                    self.broker
                        .publish(routing_key, &payload, &properties)
                        .await
                        .map_err(|e| e.to_string())
                }
                Err(e) => Err(e.to_string()),
            };
            match result {
                Ok(()) => outcome.success += 1,
                Err(e) => {
                    error!(routing_key = %routing_key, error = %e, "Failed to publish message in batch");
                    outcome.failed += 1;
                }
            }
        }

        let mut stats = self.stats.lock();
        stats.total_published += outcome.success as u64;
        stats.failed_publishes += outcome.failed as u64;
        if outcome.success > 0 {
            stats.last_publish_time = Some(Utc::now());
        }
        outcome
    }

    pub fn stats(&self) -> PublishStats {
        self.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = PublishStats::default();
    }
}
