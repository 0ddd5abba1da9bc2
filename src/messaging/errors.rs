//! # Messaging Error Types
//!
//! Structured errors for the broker seam, publisher, consumer and dead-letter
//! handler. Envelope problems keep their own type and convert in via `From`.

use thiserror::Error;

use super::envelope::EnvelopeError;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Publish failed: {routing_key}: {message}")]
    Publish {
        routing_key: String,
        message: String,
    },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Unknown delivery tag {delivery_tag} on queue {queue_name}")]
    UnknownDelivery {
        queue_name: String,
        delivery_tag: u64,
    },

    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Network timeout: operation {operation} timed out after {timeout_seconds}s")]
    Timeout {
        operation: String,
        timeout_seconds: u64,
    },

    #[error("Health check failed: {message}")]
    HealthCheck { message: String },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a publish error
    pub fn publish(routing_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            routing_key: routing_key.into(),
            message: message.into(),
        }
    }

    /// Create a queue operation error
    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a queue declaration error
    pub fn queue_creation(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::queue_operation(queue_name, "declare", message)
    }

    /// Create a receive error
    pub fn receive(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::queue_operation(queue_name, "receive", message)
    }

    /// Create an ack error
    pub fn ack(queue_name: impl Into<String>, delivery_tag: u64, message: impl Into<String>) -> Self {
        Self::queue_operation(
            queue_name,
            format!("ack({delivery_tag})"),
            message,
        )
    }

    /// Create a nack error
    pub fn nack(queue_name: impl Into<String>, delivery_tag: u64, message: impl Into<String>) -> Self {
        Self::queue_operation(
            queue_name,
            format!("nack({delivery_tag})"),
            message,
        )
    }

    /// Create a queue stats error
    pub fn queue_stats(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::queue_operation(queue_name, "stats", message)
    }

    /// Create a queue not found error
    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    pub fn unknown_delivery(queue_name: impl Into<String>, delivery_tag: u64) -> Self {
        Self::UnknownDelivery {
            queue_name: queue_name.into(),
            delivery_tag,
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_seconds,
        }
    }

    /// Create a health check error
    pub fn health_check(message: impl Into<String>) -> Self {
        Self::HealthCheck {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Errors a reconnect may cure. The publisher retries only these.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::HealthCheck { .. }
        )
    }
}

impl From<lapin::Error> for MessagingError {
    fn from(err: lapin::Error) -> Self {
        match err {
            lapin::Error::InvalidChannelState(_)
            | lapin::Error::InvalidConnectionState(_)
            | lapin::Error::IOError(_)
            | lapin::Error::ChannelsLimitReached => Self::connection(err.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_classification() {
        assert!(MessagingError::connection("reset by peer").is_connection());
        assert!(MessagingError::timeout("publish", 5).is_connection());
        assert!(!MessagingError::publish("bug_triage.new_bugs", "nack").is_connection());
        assert!(!MessagingError::queue_not_found("x").is_connection());
    }

    #[test]
    fn display_includes_context() {
        let err = MessagingError::ack("new_bugs_queue", 7, "channel closed");
        assert_eq!(
            err.to_string(),
            "Queue operation failed: new_bugs_queue: ack(7): channel closed"
        );
    }
}
