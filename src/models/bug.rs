use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::validation::{
    validate_identifier, validate_max_length, validate_not_blank, validate_unit_interval,
    ValidationError, ValidationResult, MAX_LABEL_LENGTH, MIN_DESCRIPTION_LENGTH,
};

/// Functional area a bug belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugCategory {
    Frontend,
    Backend,
    Database,
    Api,
    Mobile,
    Security,
    Performance,
    Unknown,
}

impl BugCategory {
    pub const ALL: [BugCategory; 8] = [
        Self::Frontend,
        Self::Backend,
        Self::Database,
        Self::Api,
        Self::Mobile,
        Self::Security,
        Self::Performance,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Frontend => "frontend",
            Self::Backend => "backend",
            Self::Database => "database",
            Self::Api => "api",
            Self::Mobile => "mobile",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BugCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BugCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Invalid bug category: {s}"))
    }
}

/// Severity of a categorized bug, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid severity: {s}")),
        }
    }
}

/// A raw bug report as observed on the tracker. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugReport {
    pub id: String,
    pub title: String,
    pub description: String,
    pub reporter: String,
    pub created_at: DateTime<Utc>,
    pub platform: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default = "empty_object")]
    pub raw_data: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl BugReport {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        reporter: impl Into<String>,
        platform: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            reporter: reporter.into(),
            created_at,
            platform: platform.into(),
            url: None,
            labels: Vec::new(),
            raw_data: empty_object(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> ValidationResult {
        validate_identifier("bug.id", &self.id)?;
        validate_not_blank("bug.title", &self.title)?;
        validate_not_blank("bug.description", &self.description)?;
        let description_len = self.description.trim().chars().count();
        if description_len < MIN_DESCRIPTION_LENGTH {
            return Err(ValidationError::out_of_range(
                "bug.description",
                description_len,
                format!(">= {MIN_DESCRIPTION_LENGTH} characters"),
            ));
        }
        for label in &self.labels {
            validate_max_length("bug.labels", label, MAX_LABEL_LENGTH)?;
        }
        Ok(())
    }
}

/// A bug report enriched with classifier output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizedBug {
    pub bug_report: BugReport,
    pub category: BugCategory,
    pub severity: Severity,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub confidence_score: f64,
    pub analysis_timestamp: DateTime<Utc>,
}

impl CategorizedBug {
    pub fn id(&self) -> &str {
        &self.bug_report.id
    }

    pub fn validate(&self) -> ValidationResult {
        self.bug_report.validate()?;
        validate_unit_interval("categorized_bug.confidence_score", self.confidence_score)
    }
}
