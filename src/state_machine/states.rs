use serde::{Deserialize, Serialize};
use std::fmt;

/// Assignment lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentState {
    /// Assignment handed to a developer and still open
    Active,
    /// Developer resolved the bug
    Completed,
    /// Bug moved to a different developer
    Reassigned,
    /// Assignment withdrawn
    Cancelled,
}

impl AssignmentState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Reassigned | Self::Cancelled)
    }

    /// Check if the assignment still counts against the developer's workload
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Reassigned => "reassigned",
            Self::Cancelled => "cancelled",
        }
    }
}

impl Default for AssignmentState {
    fn default() -> Self {
        Self::Active
    }
}

impl fmt::Display for AssignmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AssignmentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "reassigned" => Ok(Self::Reassigned),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid assignment state: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!AssignmentState::Active.is_terminal());
        assert!(AssignmentState::Completed.is_terminal());
        assert!(AssignmentState::Reassigned.is_terminal());
        assert!(AssignmentState::Cancelled.is_terminal());
    }

    #[test]
    fn string_round_trip() {
        for state in [
            AssignmentState::Active,
            AssignmentState::Completed,
            AssignmentState::Reassigned,
            AssignmentState::Cancelled,
        ] {
            assert_eq!(state.to_string().parse::<AssignmentState>(), Ok(state));
        }
        assert!("done".parse::<AssignmentState>().is_err());
    }
}
