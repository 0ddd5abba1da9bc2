//! # Broker Topology
//!
//! Names, bindings and default priorities shared by every provider.
//!
//! ```text
//! bug_triage (topic) --bug_triage.{key}--> {queue}
//!                                           | reject / nack(requeue=false)
//!                                           v
//! bug_triage.dlx (direct) --{queue}.failed--> {queue}.dlq
//! ```

use std::collections::BTreeMap;

use super::envelope::{MessageType, TriageMessage};
use crate::models::Severity;

pub const DEFAULT_EXCHANGE: &str = "bug_triage";
pub const ROUTING_KEY_PREFIX: &str = "bug_triage";
pub const UNKNOWN_ROUTING_KEY: &str = "bug_triage.unknown";

pub const DEAD_LETTER_QUEUE_SUFFIX: &str = ".dlq";
pub const FAILED_ROUTING_SUFFIX: &str = ".failed";

/// Priority used when republishing from a dead-letter queue
pub const RETRY_PRIORITY: u8 = 1;
/// Priority of operator alerts and escalations
pub const ALERT_PRIORITY: u8 = 8;

/// Default queue key to queue name mapping
pub fn default_queue_names() -> BTreeMap<String, String> {
    [
        ("new_bugs", "new_bugs_queue"),
        ("triaged_bugs", "triaged_bugs_queue"),
        ("assignments", "assignments_queue"),
        ("notifications", "notifications_queue"),
        ("system_events", "system_events_queue"),
        ("developer_status", "developer_status_queue"),
        ("feedback", "feedback_queue"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Routing key a message type is published on when the caller gives none
pub fn routing_key_for(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::BugReport => "bug_triage.new_bugs",
        MessageType::CategorizedBug => "bug_triage.triaged_bugs",
        MessageType::Assignment => "bug_triage.assignments",
        MessageType::Notification => "bug_triage.notifications",
        MessageType::DeveloperStatusUpdate => "bug_triage.developer_status",
        MessageType::SystemEvent => "bug_triage.system_events",
        MessageType::AssignmentFeedback => "bug_triage.feedback",
    }
}

pub fn default_priority(message: &TriageMessage) -> u8 {
    match message {
        TriageMessage::BugReport(_) => 5,
        TriageMessage::CategorizedBug(bug) if bug.severity == Severity::Critical => 10,
        TriageMessage::CategorizedBug(_) => 5,
        TriageMessage::Assignment(_) => 7,
        TriageMessage::AssignmentFeedback(_) => 3,
        TriageMessage::Notification(_) => 3,
        TriageMessage::DeveloperStatusUpdate(_) => 2,
        TriageMessage::SystemEvent(_) => 1,
    }
}

pub fn dead_letter_queue_name(queue_name: &str) -> String {
    format!("{queue_name}{DEAD_LETTER_QUEUE_SUFFIX}")
}

/// `new_bugs_queue.dlq` -> `new_bugs_queue`
pub fn queue_for_dead_letter_queue(dlq_name: &str) -> &str {
    dlq_name
        .strip_suffix(DEAD_LETTER_QUEUE_SUFFIX)
        .unwrap_or(dlq_name)
}

/// One main queue with its dead-letter wiring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclaration {
    pub key: String,
    pub name: String,
    /// Topic binding on the main exchange, `bug_triage.{key}`
    pub binding_key: String,
    /// `{name}.failed`, set as `x-dead-letter-routing-key`
    pub dead_letter_routing_key: String,
    /// `{name}.dlq`
    pub dead_letter_queue: String,
}

impl QueueDeclaration {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        let key = key.into();
        let name = name.into();
        Self {
            binding_key: format!("{ROUTING_KEY_PREFIX}.{key}"),
            dead_letter_routing_key: format!("{name}{FAILED_ROUTING_SUFFIX}"),
            dead_letter_queue: dead_letter_queue_name(&name),
            key,
            name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub dead_letter_exchange: String,
    pub queues: Vec<QueueDeclaration>,
}

impl Topology {
    /// Builds the topology for `exchange`; the DLX is `{exchange}.dlx`
    pub fn new(exchange: impl Into<String>, queue_names: &BTreeMap<String, String>) -> Self {
        let exchange = exchange.into();
        Self {
            dead_letter_exchange: format!("{exchange}.dlx"),
            exchange,
            queues: queue_names
                .iter()
                .map(|(key, name)| QueueDeclaration::new(key, name))
                .collect(),
        }
    }

    pub fn queue(&self, key: &str) -> Option<&QueueDeclaration> {
        self.queues.iter().find(|q| q.key == key)
    }

    pub fn queue_by_name(&self, name: &str) -> Option<&QueueDeclaration> {
        self.queues.iter().find(|q| q.name == name)
    }

    pub fn queue_name(&self, key: &str) -> Option<&str> {
        self.queue(key).map(|q| q.name.as_str())
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::new(DEFAULT_EXCHANGE, &default_queue_names())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topology_wiring() {
        let topology = Topology::default();
        assert_eq!(topology.exchange, "bug_triage");
        assert_eq!(topology.dead_letter_exchange, "bug_triage.dlx");
        assert_eq!(topology.queues.len(), 7);
        assert_eq!(topology.queue_name("feedback"), Some("feedback_queue"));

        let new_bugs = topology.queue("new_bugs").unwrap();
        assert_eq!(new_bugs.name, "new_bugs_queue");
        assert_eq!(new_bugs.binding_key, "bug_triage.new_bugs");
        assert_eq!(new_bugs.dead_letter_routing_key, "new_bugs_queue.failed");
        assert_eq!(new_bugs.dead_letter_queue, "new_bugs_queue.dlq");
    }

    #[test]
    fn every_type_has_a_routing_key() {
        for t in MessageType::ALL {
            assert!(routing_key_for(t).starts_with("bug_triage."));
        }
        assert_eq!(routing_key_for(MessageType::AssignmentFeedback), "bug_triage.feedback");
    }

    #[test]
    fn dlq_name_maps_back() {
        assert_eq!(queue_for_dead_letter_queue("assignments_queue.dlq"), "assignments_queue");
        assert_eq!(queue_for_dead_letter_queue("odd"), "odd");
    }
}
