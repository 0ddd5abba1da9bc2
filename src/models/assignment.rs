use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bug::BugCategory;
use super::validation::{
    validate_identifier, validate_max_length, validate_unit_interval, ValidationError,
    ValidationResult, MAX_COMMENT_LENGTH, MAX_RESOLUTION_MINUTES,
};
use crate::state_machine::AssignmentState;

/// A bug handed to a developer. `(bug_id, developer_id)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub bug_id: String,
    pub developer_id: String,
    pub assigned_at: DateTime<Utc>,
    pub reasoning: String,
    pub confidence_score: f64,
    pub status: AssignmentState,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn new(
        bug_id: impl Into<String>,
        developer_id: impl Into<String>,
        confidence_score: f64,
        reasoning: impl Into<String>,
        assigned_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            bug_id: bug_id.into(),
            developer_id: developer_id.into(),
            assigned_at,
            reasoning: reasoning.into(),
            confidence_score: confidence_score.clamp(0.0, 1.0),
            status: AssignmentState::Active,
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AssignmentState::Active
    }

    pub fn validate(&self) -> ValidationResult {
        validate_identifier("assignment.bug_id", &self.bug_id)?;
        validate_identifier("assignment.developer_id", &self.developer_id)?;
        validate_unit_interval("assignment.confidence_score", self.confidence_score)?;
        if let Some(completed_at) = self.completed_at {
            if completed_at < self.assigned_at {
                return Err(ValidationError::Invariant(format!(
                    "assignment {} completed_at {completed_at} precedes assigned_at {}",
                    self.id, self.assigned_at
                )));
            }
        }
        Ok(())
    }
}

/// Developer feedback on one assignment. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentFeedback {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub developer_id: String,
    pub rating: u8,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub resolution_time_minutes: Option<i64>,
    pub was_appropriate: bool,
    pub feedback_timestamp: DateTime<Utc>,
    /// Category of the assigned bug, carried so per-category confidence can be
    /// derived from feedback history alone.
    #[serde(default)]
    pub bug_category: Option<BugCategory>,
}

impl AssignmentFeedback {
    pub fn new(
        assignment_id: Uuid,
        developer_id: impl Into<String>,
        rating: u8,
        was_appropriate: bool,
        feedback_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            assignment_id,
            developer_id: developer_id.into(),
            rating,
            comments: None,
            resolution_time_minutes: None,
            was_appropriate,
            feedback_timestamp,
            bug_category: None,
        }
    }

    /// Blank comments collapse to `None`
    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        let comments = comments.into();
        self.comments = if comments.trim().is_empty() {
            None
        } else {
            Some(comments.trim().to_string())
        };
        self
    }

    pub fn with_resolution_time(mut self, minutes: i64) -> Self {
        self.resolution_time_minutes = Some(minutes);
        self
    }

    pub fn with_category(mut self, category: BugCategory) -> Self {
        self.bug_category = Some(category);
        self
    }

    pub fn validate(&self) -> ValidationResult {
        validate_identifier("feedback.developer_id", &self.developer_id)?;
        if !(1..=5).contains(&self.rating) {
            return Err(ValidationError::out_of_range(
                "feedback.rating",
                self.rating,
                "1..=5",
            ));
        }
        if let Some(comments) = &self.comments {
            validate_max_length("feedback.comments", comments, MAX_COMMENT_LENGTH)?;
        }
        if let Some(minutes) = self.resolution_time_minutes {
            if !(0..=MAX_RESOLUTION_MINUTES).contains(&minutes) {
                return Err(ValidationError::out_of_range(
                    "feedback.resolution_time_minutes",
                    minutes,
                    format!("0..={MAX_RESOLUTION_MINUTES}"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_assignment_is_active_and_clamped() {
        let a = Assignment::new("bug_1", "dev_1", 1.3, "best match", Utc::now());
        assert!(a.is_active());
        assert_eq!(a.confidence_score, 1.0);
        assert!(a.validate().is_ok());
    }

    #[test]
    fn completed_before_assigned_is_invalid() {
        let now = Utc::now();
        let mut a = Assignment::new("bug_1", "dev_1", 0.8, "r", now);
        a.completed_at = Some(now - Duration::minutes(1));
        assert!(matches!(a.validate(), Err(ValidationError::Invariant(_))));
    }

    #[test]
    fn feedback_bounds() {
        let now = Utc::now();
        let fb = AssignmentFeedback::new(Uuid::new_v4(), "dev_1", 6, true, now);
        assert!(fb.validate().is_err());

        let fb = AssignmentFeedback::new(Uuid::new_v4(), "dev_1", 4, true, now)
            .with_resolution_time(-5);
        assert!(fb.validate().is_err());

        let fb = AssignmentFeedback::new(Uuid::new_v4(), "dev_1", 4, true, now)
            .with_comments("x".repeat(2001));
        assert!(fb.validate().is_err());
    }

    #[test]
    fn resolution_time_is_bounded_above() {
        let now = Utc::now();
        let fb = AssignmentFeedback::new(Uuid::new_v4(), "dev_1", 4, true, now)
            .with_resolution_time(MAX_RESOLUTION_MINUTES);
        assert!(fb.validate().is_ok());

        for minutes in [MAX_RESOLUTION_MINUTES + 1, i64::MAX] {
            let fb = AssignmentFeedback::new(Uuid::new_v4(), "dev_1", 4, true, now)
                .with_resolution_time(minutes);
            assert!(matches!(
                fb.validate(),
                Err(ValidationError::OutOfRange { field: "feedback.resolution_time_minutes", .. })
            ));
        }
    }

    #[test]
    fn blank_comments_become_none() {
        let fb = AssignmentFeedback::new(Uuid::new_v4(), "dev_1", 3, false, Utc::now())
            .with_comments("   ");
        assert!(fb.comments.is_none());
    }
}
