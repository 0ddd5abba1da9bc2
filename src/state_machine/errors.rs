use chrono::{DateTime, Utc};
use thiserror::Error;

use super::states::AssignmentState;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on {event}")]
    InvalidTransition {
        from: AssignmentState,
        event: &'static str,
    },

    #[error("Assignment is already terminal: {state}")]
    AlreadyTerminal { state: AssignmentState },

    #[error("completed_at {completed_at} precedes assigned_at {assigned_at}")]
    CompletionBeforeAssignment {
        assigned_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },

    #[error("Guard condition failed: {reason}")]
    GuardFailed { reason: String },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
