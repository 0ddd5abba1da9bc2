use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::bug::{BugCategory, CategorizedBug, Severity};
use super::developer::DeveloperProfile;

/// Event type raised when no developer clears the confidence floor
pub const MANUAL_ASSIGNMENT_REQUIRED: &str = "manual_assignment_required";

/// Event type raised when a dead-lettered message is abandoned
pub const PERMANENT_MESSAGE_FAILURE: &str = "permanent_message_failure";

/// Notification kind for a completed assignment
pub const BUG_ASSIGNMENT_NOTIFICATION: &str = "bug_assignment";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugSummary {
    pub id: String,
    pub title: String,
    pub category: BugCategory,
    pub severity: Severity,
    #[serde(default)]
    pub url: Option<String>,
}

impl From<&CategorizedBug> for BugSummary {
    fn from(bug: &CategorizedBug) -> Self {
        Self {
            id: bug.bug_report.id.clone(),
            title: bug.bug_report.title.clone(),
            category: bug.category,
            severity: bug.severity,
            url: bug.bug_report.url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeveloperSummary {
    pub id: String,
    pub name: String,
    pub email: String,
    pub github_username: String,
}

impl From<&DeveloperProfile> for DeveloperSummary {
    fn from(dev: &DeveloperProfile) -> Self {
        Self {
            id: dev.id.clone(),
            name: dev.name.clone(),
            email: dev.email.clone(),
            github_username: dev.github_username.clone(),
        }
    }
}

/// Outbound notification for a developer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub assignment_id: Uuid,
    pub bug: BugSummary,
    pub developer: DeveloperSummary,
    pub reasoning: String,
    pub confidence_score: f64,
    pub timestamp: DateTime<Utc>,
}

impl NotificationPayload {
    pub fn bug_assignment(
        assignment_id: Uuid,
        bug: &CategorizedBug,
        developer: &DeveloperProfile,
        reasoning: impl Into<String>,
        confidence_score: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: BUG_ASSIGNMENT_NOTIFICATION.to_string(),
            assignment_id,
            bug: bug.into(),
            developer: developer.into(),
            reasoning: reasoning.into(),
            confidence_score,
            timestamp,
        }
    }
}

/// Operational event for operators: escalations, alerts, lifecycle notices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    #[serde(alias = "type")]
    pub event_type: String,
    #[serde(default)]
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

impl SystemEvent {
    pub fn new(event_type: impl Into<String>, details: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type: event_type.into(),
            details,
            timestamp,
        }
    }

    pub fn manual_assignment_required(
        bug: &CategorizedBug,
        reason: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(
            MANUAL_ASSIGNMENT_REQUIRED,
            serde_json::json!({
                "bug": BugSummary::from(bug),
                "classifier_confidence": bug.confidence_score,
                "reason": reason,
            }),
            timestamp,
        )
    }
}
