use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::bug::BugCategory;
use super::validation::{
    validate_email, validate_github_username, validate_identifier, validate_not_blank,
    ValidationError, ValidationResult,
};

/// Seniority ladder. Parsing accepts the `mid-level` spelling as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    Junior,
    Mid,
    Senior,
    Lead,
    Principal,
}

impl ExperienceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Junior => "junior",
            Self::Mid => "mid",
            Self::Senior => "senior",
            Self::Lead => "lead",
            Self::Principal => "principal",
        }
    }

    /// Concurrent issue capacity granted to a freshly discovered developer
    pub fn default_capacity(&self) -> u32 {
        match self {
            Self::Junior => 5,
            Self::Mid => 8,
            Self::Senior => 12,
            Self::Lead => 15,
            Self::Principal => 20,
        }
    }
}

impl fmt::Display for ExperienceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExperienceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "junior" => Ok(Self::Junior),
            "mid" | "mid-level" => Ok(Self::Mid),
            "senior" => Ok(Self::Senior),
            "lead" => Ok(Self::Lead),
            "principal" => Ok(Self::Principal),
            _ => Err(format!("Invalid experience level: {s}")),
        }
    }
}

/// Developer availability as reported by the status poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Busy,
    Unavailable,
    FocusTime,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Busy => "busy",
            Self::Unavailable => "unavailable",
            Self::FocusTime => "focus_time",
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Availability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Self::Available),
            "busy" => Ok(Self::Busy),
            "unavailable" => Ok(Self::Unavailable),
            "focus_time" => Ok(Self::FocusTime),
            _ => Err(format!("Invalid availability: {s}")),
        }
    }
}

/// Static profile of a developer who can receive assignments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeveloperProfile {
    pub id: String,
    pub name: String,
    pub github_username: String,
    pub email: String,
    pub skills: Vec<String>,
    /// Free-form on the wire; see [`ExperienceLevel`] for the recognised values.
    pub experience_level: String,
    pub max_capacity: u32,
    #[serde(default)]
    pub preferred_categories: Vec<BugCategory>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub contributions: u32,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

pub const MAX_DEVELOPER_CAPACITY: u32 = 50;

impl DeveloperProfile {
    pub fn experience(&self) -> Option<ExperienceLevel> {
        self.experience_level.parse().ok()
    }

    pub fn validate(&self) -> ValidationResult {
        validate_identifier("developer.id", &self.id)?;
        validate_not_blank("developer.name", &self.name)?;
        validate_github_username(&self.github_username)?;
        validate_email(&self.email)?;
        if self.skills.iter().all(|s| s.trim().is_empty()) {
            return Err(ValidationError::Blank {
                field: "developer.skills",
            });
        }
        if self.experience().is_none() {
            return Err(ValidationError::invalid_format(
                "developer.experience_level",
                &self.experience_level,
            ));
        }
        if !(1..=MAX_DEVELOPER_CAPACITY).contains(&self.max_capacity) {
            return Err(ValidationError::out_of_range(
                "developer.max_capacity",
                self.max_capacity,
                format!("1..={MAX_DEVELOPER_CAPACITY}"),
            ));
        }
        Ok(())
    }
}

/// Mutable, frequently polled state of a developer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeveloperStatus {
    pub developer_id: String,
    pub current_workload: i32,
    pub open_issues_count: i32,
    #[serde(default)]
    pub complexity_score: f64,
    pub availability: Availability,
    #[serde(default = "default_true")]
    pub calendar_free: bool,
    #[serde(default)]
    pub focus_time_active: bool,
    pub last_activity_timestamp: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl DeveloperStatus {
    pub fn available(developer_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            developer_id: developer_id.into(),
            current_workload: 0,
            open_issues_count: 0,
            complexity_score: 0.0,
            availability: Availability::Available,
            calendar_free: true,
            focus_time_active: false,
            last_activity_timestamp: now,
            last_updated: now,
        }
    }

    pub fn is_available(&self) -> bool {
        self.availability == Availability::Available
    }

    pub fn validate(&self) -> ValidationResult {
        validate_identifier("developer_status.developer_id", &self.developer_id)?;
        if self.open_issues_count < 0 || self.current_workload < 0 {
            return Err(ValidationError::Invariant(format!(
                "negative workload for {}: workload={} open_issues={}",
                self.developer_id, self.current_workload, self.open_issues_count
            )));
        }
        if self.current_workload < self.open_issues_count {
            return Err(ValidationError::Invariant(format!(
                "current_workload ({}) < open_issues_count ({}) for {}",
                self.current_workload, self.open_issues_count, self.developer_id
            )));
        }
        Ok(())
    }

    /// Applies a new assignment to the counters
    pub fn record_assignment(&mut self, now: DateTime<Utc>) {
        self.current_workload += 1;
        self.open_issues_count += 1;
        self.last_updated = now;
    }

    /// Applies a completed assignment, never dropping below zero
    pub fn record_completion(&mut self, now: DateTime<Utc>) {
        self.current_workload = (self.current_workload - 1).max(0);
        self.open_issues_count = (self.open_issues_count - 1).max(0);
        self.last_updated = now;
    }
}
