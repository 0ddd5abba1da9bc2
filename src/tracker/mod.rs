//! # Issue Tracker
//!
//! Seam to the external issue tracker. [`GitHubClient`] talks to the GitHub
//! REST API with every request going through a rate limiter and a circuit
//! breaker; [`RecordingTracker`] keeps everything in memory for tests and dry
//! runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::models::BugReport;
use crate::resilience::GuardError;

pub mod github;
pub mod recording;

pub use github::GitHubClient;
pub use recording::{RecordingTracker, TrackerCall};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Invalid issue reference '{0}'")]
    InvalidReference(String),

    #[error("Tracker rejected credentials: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Tracker rate limit exhausted: {0}")]
    RateLimited(String),

    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    #[error("Tracker returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected response body: {0}")]
    Decode(String),
}

impl TrackerError {
    /// Whether the same call may succeed later unchanged
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited(_) | Self::CircuitOpen { .. } | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<GuardError<TrackerError>> for TrackerError {
    fn from(error: GuardError<TrackerError>) -> Self {
        match error {
            GuardError::CircuitOpen { component } => Self::CircuitOpen { component },
            GuardError::RateLimited {
                component,
                requested,
            } => Self::RateLimited(format!("{component} refused {requested} tokens")),
            GuardError::Operation(inner) => inner,
        }
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;

/// `owner/repo`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl FromStr for RepoRef {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((owner, repo))
                if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') =>
            {
                Ok(Self::new(owner, repo))
            }
            _ => Err(TrackerError::InvalidReference(s.to_string())),
        }
    }
}

/// One issue in one repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl IssueRef {
    /// Parses `https://github.com/{owner}/{repo}/issues/{number}`
    pub fn from_url(url: &str) -> TrackerResult<Self> {
        let segments: Vec<&str> = url.trim().split('/').collect();
        let invalid = || TrackerError::InvalidReference(url.to_string());

        let owner = segments.get(3).filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let repo = segments.get(4).filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let number = segments
            .get(6)
            .and_then(|s| s.split(['?', '#']).next())
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(invalid)?;

        Ok(Self {
            owner: (*owner).to_string(),
            repo: (*repo).to_string(),
            number,
        })
    }

    pub fn repo_ref(&self) -> RepoRef {
        RepoRef::new(&self.owner, &self.repo)
    }
}

impl fmt::Display for IssueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerIssue {
    /// Tracker-wide id
    pub id: u64,
    pub number: u64,
    pub title: String,
    pub body: String,
    pub author: String,
    pub labels: Vec<String>,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
}

impl TrackerIssue {
    pub fn to_bug_report(&self) -> BugReport {
        BugReport::new(
            format!("github_{}", self.id),
            &self.title,
            &self.body,
            &self.author,
            "github",
            self.created_at,
        )
        .with_url(&self.html_url)
        .with_labels(self.labels.iter().cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub id: u64,
    pub login: String,
    pub contributions: u32,
    pub html_url: String,
}

#[async_trait]
pub trait IssueTracker: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn assign(&self, issue: &IssueRef, assignees: &[String]) -> TrackerResult<()>;

    async fn add_comment(&self, issue: &IssueRef, body: &str) -> TrackerResult<()>;

    async fn add_labels(&self, issue: &IssueRef, labels: &[String]) -> TrackerResult<()>;

    /// Open issues, newest first, pull requests excluded
    async fn get_open_issues(&self, repo: &RepoRef, limit: usize)
        -> TrackerResult<Vec<TrackerIssue>>;

    async fn list_contributors(&self, repo: &RepoRef) -> TrackerResult<Vec<Contributor>>;

    /// Languages used in the repository, most used first
    async fn repository_languages(&self, _repo: &RepoRef) -> TrackerResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn test_connection(&self) -> TrackerResult<()>;
}

impl fmt::Debug for dyn IssueTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IssueTracker({})", self.name())
    }
}
