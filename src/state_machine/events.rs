use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events that can trigger assignment state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AssignmentEvent {
    /// Developer resolved the bug at the given instant
    Complete { at: DateTime<Utc> },
    /// Bug handed to another developer
    Reassign { to_developer: String },
    /// Assignment withdrawn
    Cancel,
}

impl AssignmentEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Complete { .. } => "complete",
            Self::Reassign { .. } => "reassign",
            Self::Cancel => "cancel",
        }
    }
}
