//! # Relational Store
//!
//! Persistence seam for bugs, developers, developer status, assignments and
//! feedback. [`PgStore`] is the production implementation on sqlx;
//! [`InMemoryStore`] backs tests and dry runs with the same semantics.
//!
//! Assignment writes are the one place where two records change together: the
//! assignment row and the developer's workload counters. Both implementations
//! make that pair atomic (a transaction for Postgres, one mutex for memory).
//! The same holds for feedback that completes its assignment.
//!
//! A decision is scored against a status snapshot read outside that write.
//! [`TriageStore::record_assignment_if_unchanged`] re-checks the chosen
//! developer's [`WorkloadSnapshot`] under the row lock and reports
//! [`RecordOutcome::Stale`] when another writer got there first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Assignment, AssignmentFeedback, Availability, CategorizedBug, DeveloperProfile,
    DeveloperStatus, ValidationError,
};
use crate::state_machine::StateMachineError;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Unique constraint violated
    #[error("Conflict on {entity}: {message}")]
    Conflict { entity: &'static str, message: String },

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid assignment transition: {0}")]
    Transition(#[from] StateMachineError),

    #[error("Corrupt {entity} row: {message}")]
    Corrupt { entity: &'static str, message: String },

    #[error("Database error: {0}")]
    Database(String),

    /// Concurrent writers kept invalidating the decision; retry later
    #[error("Contention on {entity}: {message}")]
    Contention { entity: &'static str, message: String },
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(entity: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict {
            entity,
            message: message.into(),
        }
    }

    pub fn corrupt(entity: &'static str, message: impl Into<String>) -> Self {
        Self::Corrupt {
            entity,
            message: message.into(),
        }
    }

    pub fn contention(entity: &'static str, message: impl Into<String>) -> Self {
        Self::Contention {
            entity,
            message: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Worth retrying once the database settles
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Contention { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Conflict {
                entity: "record",
                message: db.message().to_string(),
            },
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => Self::NotFound {
                entity: "referenced record",
                id: db.message().to_string(),
            },
            _ => Self::Database(error.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of recording an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// New row written and the developer's workload incremented
    Recorded,
    /// (bug, developer) pair already existed; nothing changed
    AlreadyAssigned,
    /// The developer's status moved since the decision was scored; nothing changed
    Stale,
}

impl RecordOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded)
    }
}

/// The parts of a developer's status that the decision engine scored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadSnapshot {
    pub current_workload: i32,
    pub availability: Availability,
}

impl WorkloadSnapshot {
    pub fn of(status: &DeveloperStatus) -> Self {
        Self {
            current_workload: status.current_workload,
            availability: status.availability,
        }
    }

    pub fn matches(&self, status: &DeveloperStatus) -> bool {
        *self == Self::of(status)
    }
}

#[async_trait]
pub trait TriageStore: Send + Sync + 'static {
    /// Inserts or refreshes a categorized bug
    async fn save_bug(&self, bug: &CategorizedBug) -> StoreResult<()>;

    async fn get_bug(&self, bug_id: &str) -> StoreResult<Option<CategorizedBug>>;

    /// Inserts a profile; `false` when the id or GitHub username already exists
    async fn save_developer(&self, developer: &DeveloperProfile) -> StoreResult<bool>;

    async fn get_developer(&self, developer_id: &str) -> StoreResult<Option<DeveloperProfile>>;

    async fn find_developer_by_username(
        &self,
        github_username: &str,
    ) -> StoreResult<Option<DeveloperProfile>>;

    async fn list_developers(&self) -> StoreResult<Vec<DeveloperProfile>>;

    async fn upsert_developer_status(&self, status: &DeveloperStatus) -> StoreResult<()>;

    async fn get_developer_status(&self, developer_id: &str)
        -> StoreResult<Option<DeveloperStatus>>;

    async fn list_developer_statuses(&self) -> StoreResult<HashMap<String, DeveloperStatus>>;

    /// Inserts the assignment unless (bug_id, developer_id) exists; only a new
    /// row increments the developer's workload
    async fn record_assignment(&self, assignment: &Assignment) -> StoreResult<RecordOutcome>;

    /// Like [`record_assignment`](Self::record_assignment), but only while the
    /// developer's status still matches `expected`; otherwise
    /// [`RecordOutcome::Stale`] and nothing is written
    async fn record_assignment_if_unchanged(
        &self,
        assignment: &Assignment,
        expected: WorkloadSnapshot,
    ) -> StoreResult<RecordOutcome>;

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>>;

    async fn active_assignment_for_bug(&self, bug_id: &str) -> StoreResult<Option<Assignment>>;

    async fn assignments_for_developer(&self, developer_id: &str) -> StoreResult<Vec<Assignment>>;

    /// Active → Completed; releases one unit of the developer's workload
    async fn complete_assignment(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<Assignment>;

    /// Active → Cancelled; releases one unit of the developer's workload
    async fn cancel_assignment(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<Assignment>;

    /// Marks `id` Reassigned and records its successor for `to_developer`,
    /// moving one unit of workload between the two developers
    async fn reassign_assignment(
        &self,
        id: Uuid,
        to_developer: &str,
        confidence_score: f64,
        reasoning: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Assignment>;

    /// Stores feedback; a second feedback for one assignment is a conflict
    async fn save_feedback(&self, feedback: &AssignmentFeedback) -> StoreResult<()>;

    /// Stores feedback and, when `complete_at` is set and the assignment is
    /// still active, completes it in the same write. Either both land or
    /// neither does. Returns the completed assignment.
    async fn record_feedback(
        &self,
        feedback: &AssignmentFeedback,
        complete_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<Assignment>>;

    async fn feedback_for_assignment(
        &self,
        assignment_id: Uuid,
    ) -> StoreResult<Option<AssignmentFeedback>>;

    /// Feedback grouped by developer, oldest first, optionally since a cutoff
    async fn feedback_history(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<HashMap<String, Vec<AssignmentFeedback>>>;
}

impl std::fmt::Debug for dyn TriageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn TriageStore")
    }
}
