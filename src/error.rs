use thiserror::Error;

use crate::classifier::ClassifierError;
use crate::config::ConfigurationError;
use crate::database::MigrationError;
use crate::messaging::{EnvelopeError, HandlerError, MessagingError};
use crate::models::ValidationError;
use crate::state_machine::StateMachineError;
use crate::store::StoreError;
use crate::tracker::TrackerError;

#[derive(Debug, Error)]
pub enum TriageError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateMachineError),

    /// Publisher gave up after its retry budget
    #[error("Failed to publish {what}")]
    PublishFailed { what: String },

    #[error("Orchestration error: {0}")]
    Orchestration(String),
}

impl TriageError {
    pub fn publish_failed(what: impl Into<String>) -> Self {
        Self::PublishFailed { what: what.into() }
    }

    pub fn orchestration(message: impl Into<String>) -> Self {
        Self::Orchestration(message.into())
    }

    /// Whether retrying the same work later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Messaging(e) => e.is_connection(),
            Self::Tracker(e) => e.is_transient(),
            Self::Classifier(ClassifierError::Unavailable(_)) => true,
            Self::PublishFailed { .. } => true,
            _ => false,
        }
    }
}

impl From<TriageError> for HandlerError {
    fn from(error: TriageError) -> Self {
        if error.is_transient() {
            HandlerError::transient(error.to_string())
        } else {
            HandlerError::permanent(error.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, TriageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_requeue() {
        let err: HandlerError = TriageError::from(StoreError::Database("timeout".into())).into();
        assert!(matches!(err, HandlerError::Transient(_)));

        let err: HandlerError = TriageError::publish_failed("assignment").into();
        assert!(matches!(err, HandlerError::Transient(_)));

        let err: HandlerError =
            TriageError::from(StoreError::contention("developer_status", "dev_a")).into();
        assert!(matches!(err, HandlerError::Transient(_)));
    }

    #[test]
    fn data_errors_dead_letter() {
        let err: HandlerError =
            TriageError::from(StoreError::not_found("assignment", "a-1")).into();
        assert!(matches!(err, HandlerError::Permanent(_)));

        let err: HandlerError =
            TriageError::from(TrackerError::InvalidReference("x".into())).into();
        assert!(matches!(err, HandlerError::Permanent(_)));
    }
}
