//! # Dead-Letter Handler
//!
//! Consumes `{queue}.dlq` queues and decides, per message, whether to retry,
//! wait, or give up.
//!
//! `failure_info.failure_count` is the number of dead-letter retries already
//! made. A message with no `failure_info` is on its first dead-lettering
//! (count 0). With the default policy the delays are 5, 15 and 60 minutes and
//! the fourth failure is permanent.
//!
//! Failure times come from the broker's dead-letter stamp on the delivery.
//! Without one, the first failure falls back to the envelope timestamp.
//!
//! | Decision | Condition | Broker effect |
//! |----------|-----------|---------------|
//! | Retry | count < max, age < max age, delay elapsed | republish at priority 1, ack |
//! | Defer | only the delay has not elapsed | requeue on the DLQ |
//! | PermanentFailure | anything else | log + alert, ack |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use super::consumer::{DeliveryOutcome, DeliveryProcessor};
use super::envelope::{FailureInfo, MessageType, RawEnvelope};
use super::errors::MessagingError;
use super::publisher::MessagePublisher;
use super::service::{Delivery, QueueStats};
use super::topology::{queue_for_dead_letter_queue, routing_key_for, Topology, ALERT_PRIORITY, RETRY_PRIORITY};
use crate::logging::log_dead_letter_decision;
use crate::models::events::PERMANENT_MESSAGE_FAILURE;
use crate::models::SystemEvent;

/// Characters of payload kept in a permanent-failure record
const PERMANENT_FAILURE_DATA_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retry_attempts: u32,
    /// Indexed by retry attempt; the last entry repeats
    pub retry_delays: Vec<Duration>,
    pub max_age: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            retry_delays: [5, 15, 60]
                .into_iter()
                .map(|m| Duration::from_secs(m * 60))
                .collect(),
            max_age: Duration::from_secs(24 * 3600),
        }
    }
}

impl RetryPolicy {
    /// Delay required before retry number `failure_count + 1`
    pub fn delay_for(&self, failure_count: u32) -> Duration {
        if self.retry_delays.is_empty() {
            return Duration::ZERO;
        }
        let index = (failure_count as usize).min(self.retry_delays.len() - 1);
        self.retry_delays[index]
    }

    pub fn evaluate(&self, message: &FailedMessage, now: DateTime<Utc>) -> DeadLetterDecision {
        if message.failure_count >= self.max_retry_attempts {
            return DeadLetterDecision::PermanentFailure;
        }
        let age = (now - message.first_failed_at).to_std().unwrap_or(Duration::ZERO);
        if age >= self.max_age {
            return DeadLetterDecision::PermanentFailure;
        }
        let since_last = (now - message.last_failed_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if since_last < self.delay_for(message.failure_count) {
            return DeadLetterDecision::Defer;
        }
        DeadLetterDecision::Retry
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterDecision {
    Retry,
    Defer,
    PermanentFailure,
}

impl DeadLetterDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Defer => "defer",
            Self::PermanentFailure => "permanent_failure",
        }
    }
}

/// A dead-lettered message with its failure bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct FailedMessage {
    pub original_queue: String,
    pub message_type: MessageType,
    pub data: Value,
    pub failure_reason: String,
    pub failure_count: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
    pub original_routing_key: Option<String>,
    pub original_properties: Value,
}

impl FailedMessage {
    /// Reads `failure_info` when present; otherwise a first failure from the
    /// queue behind `dlq_name`. `dead_lettered_at` is the broker's stamp for
    /// this dead-lettering and dates the latest failure when known.
    pub fn from_envelope(
        envelope: &RawEnvelope,
        dlq_name: &str,
        dead_lettered_at: Option<DateTime<Utc>>,
    ) -> Self {
        match &envelope.failure_info {
            Some(info) => Self {
                original_queue: info
                    .original_queue
                    .clone()
                    .unwrap_or_else(|| queue_for_dead_letter_queue(dlq_name).to_string()),
                message_type: envelope.message_type,
                data: envelope.data.clone(),
                failure_reason: info.reason.clone(),
                failure_count: info.failure_count,
                first_failed_at: info.first_failed_at,
                last_failed_at: dead_lettered_at
                    .map_or(info.last_failed_at, |at| at.max(info.last_failed_at)),
                original_routing_key: info.original_routing_key.clone(),
                original_properties: info.original_properties.clone(),
            },
            None => Self {
                original_queue: queue_for_dead_letter_queue(dlq_name).to_string(),
                message_type: envelope.message_type,
                data: envelope.data.clone(),
                failure_reason: "rejected by consumer".to_string(),
                failure_count: 0,
                first_failed_at: dead_lettered_at.unwrap_or(envelope.timestamp),
                last_failed_at: dead_lettered_at.unwrap_or(envelope.timestamp),
                original_routing_key: None,
                original_properties: Value::Null,
            },
        }
    }

    pub fn routing_key(&self) -> &str {
        self.original_routing_key
            .as_deref()
            .unwrap_or_else(|| routing_key_for(self.message_type))
    }

    /// Bookkeeping for the next retry
    fn next_failure_info(&self, now: DateTime<Utc>) -> FailureInfo {
        FailureInfo {
            original_queue: Some(self.original_queue.clone()),
            reason: self.failure_reason.clone(),
            failure_count: self.failure_count + 1,
            first_failed_at: self.first_failed_at,
            last_failed_at: now,
            original_routing_key: Some(self.routing_key().to_string()),
            original_properties: self.original_properties.clone(),
            retry_attempt: Some(self.failure_count + 1),
        }
    }
}

/// Replaces the default policy for one message type: `true` retries, `false` gives up
pub type RetryPredicate = Arc<dyn Fn(&FailedMessage) -> bool + Send + Sync>;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct DeadLetterHandler {
    publisher: MessagePublisher,
    topology: Topology,
    policy: RetryPolicy,
    strategies: DashMap<MessageType, RetryPredicate>,
    clock: Clock,
}

impl std::fmt::Debug for DeadLetterHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterHandler")
            .field("policy", &self.policy)
            .field("custom_strategies", &self.strategies.len())
            .finish()
    }
}

impl DeadLetterHandler {
    pub fn new(publisher: MessagePublisher, topology: Topology, policy: RetryPolicy) -> Self {
        Self {
            publisher,
            topology,
            policy,
            strategies: DashMap::new(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Substitutes the time source used for backoff and age checks
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn register_retry_strategy(
        &self,
        message_type: MessageType,
        predicate: impl Fn(&FailedMessage) -> bool + Send + Sync + 'static,
    ) {
        self.strategies.insert(message_type, Arc::new(predicate));
        tracing::info!(message_type = %message_type, "Registered retry strategy");
    }

    pub fn decide(&self, message: &FailedMessage, now: DateTime<Utc>) -> DeadLetterDecision {
        let strategy = self
            .strategies
            .get(&message.message_type)
            .map(|s| Arc::clone(s.value()));
        match strategy {
            Some(predicate) if predicate(message) => DeadLetterDecision::Retry,
            Some(_) => DeadLetterDecision::PermanentFailure,
            None => self.policy.evaluate(message, now),
        }
    }

    /// Evaluates one DLQ delivery and performs the side effects of the decision
    pub async fn handle(&self, delivery: &Delivery) -> DeliveryOutcome {
        let now = (self.clock)();

        let envelope = match RawEnvelope::parse(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.fail_unreadable(delivery, &e.to_string(), now).await;
                return DeliveryOutcome::Ack;
            }
        };

        let failed =
            FailedMessage::from_envelope(&envelope, &delivery.queue_name, delivery.dead_lettered_at);

        // A payload that cannot become its declared type will never succeed.
        let decision = match envelope.clone().into_message() {
            Ok(_) => self.decide(&failed, now),
            Err(e) => {
                warn!(queue = %delivery.queue_name, error = %e, "Dead-lettered payload is undecodable");
                DeadLetterDecision::PermanentFailure
            }
        };

        log_dead_letter_decision(
            &delivery.queue_name,
            Some(failed.message_type.as_str()),
            failed.failure_count,
            decision.as_str(),
            Some(&failed.failure_reason),
        );

        match decision {
            DeadLetterDecision::Retry => {
                if self.retry(envelope, &failed, now).await {
                    DeliveryOutcome::Ack
                } else {
                    DeliveryOutcome::Requeue
                }
            }
            DeadLetterDecision::Defer => DeliveryOutcome::Requeue,
            DeadLetterDecision::PermanentFailure => {
                self.fail_permanently(&failed, now).await;
                DeliveryOutcome::Ack
            }
        }
    }

    async fn retry(&self, mut envelope: RawEnvelope, failed: &FailedMessage, now: DateTime<Utc>) -> bool {
        envelope.failure_info = Some(failed.next_failure_info(now));
        let payload = match envelope.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to re-encode dead-lettered message");
                return false;
            }
        };
        let published = self
            .publisher
            .publish_payload(&payload, failed.routing_key(), RETRY_PRIORITY, failed.message_type.as_str())
            .await;
        if published {
            tracing::info!(
                message_type = %failed.message_type,
                attempt = failed.failure_count + 1,
                routing_key = %failed.routing_key(),
                "Retried dead-lettered message"
            );
        } else {
            error!(message_type = %failed.message_type, "Failed to republish message for retry");
        }
        published
    }

    async fn fail_permanently(&self, failed: &FailedMessage, now: DateTime<Utc>) {
        let data = failed.data.to_string();
        let record = json!({
            "timestamp": now.to_rfc3339(),
            "message_type": failed.message_type.as_str(),
            "original_queue": failed.original_queue,
            "failure_reason": failed.failure_reason,
            "failure_count": failed.failure_count,
            "first_failed_at": failed.first_failed_at.to_rfc3339(),
            "last_failed_at": failed.last_failed_at.to_rfc3339(),
            "message_data": truncate_chars(&data, PERMANENT_FAILURE_DATA_LIMIT),
        });
        error!(record = %record, "PERMANENT_FAILURE");

        self.alert(
            json!({
                "alert_type": PERMANENT_MESSAGE_FAILURE,
                "message_type": failed.message_type.as_str(),
                "original_queue": failed.original_queue,
                "failure_count": failed.failure_count,
                "failure_reason": failed.failure_reason,
            }),
            now,
        )
        .await;
    }

    async fn fail_unreadable(&self, delivery: &Delivery, reason: &str, now: DateTime<Utc>) {
        let raw = String::from_utf8_lossy(&delivery.payload);
        log_dead_letter_decision(
            &delivery.queue_name,
            None,
            0,
            DeadLetterDecision::PermanentFailure.as_str(),
            Some(reason),
        );
        let record = json!({
            "timestamp": now.to_rfc3339(),
            "message_type": "unknown",
            "original_queue": queue_for_dead_letter_queue(&delivery.queue_name),
            "failure_reason": reason,
            "message_data": truncate_chars(&raw, PERMANENT_FAILURE_DATA_LIMIT),
        });
        error!(record = %record, "PERMANENT_FAILURE");

        self.alert(
            json!({
                "alert_type": PERMANENT_MESSAGE_FAILURE,
                "message_type": "unknown",
                "original_queue": queue_for_dead_letter_queue(&delivery.queue_name),
                "failure_reason": reason,
            }),
            now,
        )
        .await;
    }

    async fn alert(&self, details: Value, now: DateTime<Utc>) {
        let event = SystemEvent::new(PERMANENT_MESSAGE_FAILURE, details, now);
        if !self.publisher.publish_system_event(&event, ALERT_PRIORITY).await {
            error!("Failed to publish permanent failure alert");
        }
    }

    /// Depth of every dead-letter queue, keyed by queue key
    pub async fn dead_letter_stats(&self) -> BTreeMap<String, Result<QueueStats, String>> {
        let mut stats = BTreeMap::new();
        for queue in &self.topology.queues {
            let result = self
                .publisher
                .broker()
                .queue_stats(&queue.dead_letter_queue)
                .await
                .map_err(|e| {
                    warn!(queue = %queue.dead_letter_queue, error = %e, "Could not get DLQ stats");
                    e.to_string()
                });
            stats.insert(queue.key.clone(), result);
        }
        stats
    }

    /// Purges the DLQ of `queue_key`; returns the number of dropped messages
    pub async fn purge_dead_letter_queue(&self, queue_key: &str) -> Result<u64, MessagingError> {
        let queue = self.topology.queue(queue_key).ok_or_else(|| {
            MessagingError::configuration("dead_letter", format!("Unknown queue key: {queue_key}"))
        })?;
        let purged = self.publisher.broker().purge(&queue.dead_letter_queue).await?;
        tracing::info!(queue = %queue.dead_letter_queue, purged = purged, "Purged dead-letter queue");
        Ok(purged)
    }
}

#[async_trait]
impl DeliveryProcessor for DeadLetterHandler {
    async fn process(&self, delivery: &Delivery) -> DeliveryOutcome {
        self.handle(delivery).await
    }
}

fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}
