//! PostgreSQL [`TriageStore`] on sqlx.
//!
//! Multi-row changes run in one transaction. Assignment state changes lock the
//! assignment row (`FOR UPDATE`) and apply the lifecycle rules in Rust before
//! writing, so the database and the in-memory store agree on every transition.
//! Snapshot-checked assignment writes lock the developer's status row the
//! same way before comparing it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use super::{RecordOutcome, StoreError, StoreResult, TriageStore, WorkloadSnapshot};
use crate::models::{
    Assignment, AssignmentFeedback, BugCategory, BugReport, CategorizedBug, DeveloperProfile,
    DeveloperStatus,
};
use crate::state_machine::{AssignmentEvent, AssignmentStateMachine};

const ASSIGNMENT_COLUMNS: &str = "id, bug_id, developer_id, assigned_at, assignment_reason, \
     confidence_score, status, completed_at";

const DEVELOPER_COLUMNS: &str = "id, name, github_username, email, skills, experience_level, \
     max_capacity, preferred_categories, timezone, contributions";

const STATUS_COLUMNS: &str = "developer_id, current_workload, open_issues_count, \
     complexity_score, availability, calendar_free, focus_time_active, \
     last_activity_timestamp, last_updated";

const FEEDBACK_COLUMNS: &str = "id, assignment_id, developer_id, rating, comments, \
     resolution_time_minutes, was_appropriate, feedback_timestamp, bug_category";

#[derive(Debug, FromRow)]
struct BugRow {
    id: String,
    title: String,
    description: String,
    reporter: String,
    created_at: DateTime<Utc>,
    platform: String,
    url: Option<String>,
    labels: Json<Vec<String>>,
    raw_data: Json<Value>,
    category: String,
    severity: String,
    keywords: Json<Vec<String>>,
    confidence_score: f64,
    analysis_timestamp: DateTime<Utc>,
}

impl TryFrom<BugRow> for CategorizedBug {
    type Error = StoreError;

    fn try_from(row: BugRow) -> Result<Self, Self::Error> {
        Ok(Self {
            category: row
                .category
                .parse()
                .map_err(|e: String| StoreError::corrupt("bug", e))?,
            severity: row
                .severity
                .parse()
                .map_err(|e: String| StoreError::corrupt("bug", e))?,
            keywords: row.keywords.0,
            confidence_score: row.confidence_score,
            analysis_timestamp: row.analysis_timestamp,
            bug_report: BugReport {
                id: row.id,
                title: row.title,
                description: row.description,
                reporter: row.reporter,
                created_at: row.created_at,
                platform: row.platform,
                url: row.url,
                labels: row.labels.0,
                raw_data: row.raw_data.0,
            },
        })
    }
}

#[derive(Debug, FromRow)]
struct DeveloperRow {
    id: String,
    name: String,
    github_username: String,
    email: String,
    skills: Json<Vec<String>>,
    experience_level: String,
    max_capacity: i32,
    preferred_categories: Json<Vec<BugCategory>>,
    timezone: String,
    contributions: i32,
}

impl From<DeveloperRow> for DeveloperProfile {
    fn from(row: DeveloperRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            github_username: row.github_username,
            email: row.email,
            skills: row.skills.0,
            experience_level: row.experience_level,
            max_capacity: u32::try_from(row.max_capacity).unwrap_or(0),
            preferred_categories: row.preferred_categories.0,
            timezone: row.timezone,
            contributions: u32::try_from(row.contributions).unwrap_or(0),
        }
    }
}

#[derive(Debug, FromRow)]
struct StatusRow {
    developer_id: String,
    current_workload: i32,
    open_issues_count: i32,
    complexity_score: f64,
    availability: String,
    calendar_free: bool,
    focus_time_active: bool,
    last_activity_timestamp: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl TryFrom<StatusRow> for DeveloperStatus {
    type Error = StoreError;

    fn try_from(row: StatusRow) -> Result<Self, Self::Error> {
        Ok(Self {
            availability: row
                .availability
                .parse()
                .map_err(|e: String| StoreError::corrupt("developer_status", e))?,
            developer_id: row.developer_id,
            current_workload: row.current_workload,
            open_issues_count: row.open_issues_count,
            complexity_score: row.complexity_score,
            calendar_free: row.calendar_free,
            focus_time_active: row.focus_time_active,
            last_activity_timestamp: row.last_activity_timestamp,
            last_updated: row.last_updated,
        })
    }
}

#[derive(Debug, FromRow)]
struct AssignmentRow {
    id: Uuid,
    bug_id: String,
    developer_id: String,
    assigned_at: DateTime<Utc>,
    assignment_reason: String,
    confidence_score: f64,
    status: String,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<AssignmentRow> for Assignment {
    type Error = StoreError;

    fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row
                .status
                .parse()
                .map_err(|e: String| StoreError::corrupt("assignment", e))?,
            id: row.id,
            bug_id: row.bug_id,
            developer_id: row.developer_id,
            assigned_at: row.assigned_at,
            reasoning: row.assignment_reason,
            confidence_score: row.confidence_score,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct FeedbackRow {
    id: Uuid,
    assignment_id: Uuid,
    developer_id: String,
    rating: i32,
    comments: Option<String>,
    resolution_time_minutes: Option<i64>,
    was_appropriate: bool,
    feedback_timestamp: DateTime<Utc>,
    bug_category: Option<String>,
}

impl TryFrom<FeedbackRow> for AssignmentFeedback {
    type Error = StoreError;

    fn try_from(row: FeedbackRow) -> Result<Self, Self::Error> {
        let bug_category = row
            .bug_category
            .map(|c| c.parse::<BugCategory>())
            .transpose()
            .map_err(|e| StoreError::corrupt("assignment_feedback", e))?;
        Ok(Self {
            rating: u8::try_from(row.rating)
                .map_err(|e| StoreError::corrupt("assignment_feedback", e.to_string()))?,
            id: row.id,
            assignment_id: row.assignment_id,
            developer_id: row.developer_id,
            comments: row.comments,
            resolution_time_minutes: row.resolution_time_minutes,
            was_appropriate: row.was_appropriate,
            feedback_timestamp: row.feedback_timestamp,
            bug_category,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_assignment(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> StoreResult<Assignment> {
        let row: Option<AssignmentRow> = sqlx::query_as(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
        row.ok_or_else(|| StoreError::not_found("assignment", id))?
            .try_into()
    }

    async fn write_assignment_state(
        tx: &mut Transaction<'_, Postgres>,
        assignment: &Assignment,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE assignments SET status = $2, completed_at = $3 WHERE id = $1")
            .bind(assignment.id)
            .bind(assignment.status.as_str())
            .bind(assignment.completed_at)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn insert_assignment(
        tx: &mut Transaction<'_, Postgres>,
        assignment: &Assignment,
        on_conflict: &str,
    ) -> StoreResult<u64> {
        let result = sqlx::query(&format!(
            "INSERT INTO assignments ({ASSIGNMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) {on_conflict}"
        ))
        .bind(assignment.id)
        .bind(&assignment.bug_id)
        .bind(&assignment.developer_id)
        .bind(assignment.assigned_at)
        .bind(&assignment.reasoning)
        .bind(assignment.confidence_score)
        .bind(assignment.status.as_str())
        .bind(assignment.completed_at)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn adjust_workload(
        tx: &mut Transaction<'_, Postgres>,
        developer_id: &str,
        delta: i32,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE developer_status \
             SET current_workload = GREATEST(current_workload + $2, 0), \
                 open_issues_count = GREATEST(open_issues_count + $2, 0), \
                 last_updated = $3 \
             WHERE developer_id = $1",
        )
        .bind(developer_id)
        .bind(delta)
        .bind(at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn lock_workload(
        tx: &mut Transaction<'_, Postgres>,
        developer_id: &str,
    ) -> StoreResult<Option<WorkloadSnapshot>> {
        let row: Option<(i32, String)> = sqlx::query_as(
            "SELECT current_workload, availability FROM developer_status \
             WHERE developer_id = $1 FOR UPDATE",
        )
        .bind(developer_id)
        .fetch_optional(&mut **tx)
        .await?;
        row.map(|(current_workload, availability)| {
            Ok(WorkloadSnapshot {
                current_workload,
                availability: availability
                    .parse()
                    .map_err(|e: String| StoreError::corrupt("developer_status", e))?,
            })
        })
        .transpose()
    }

    async fn record(
        &self,
        assignment: &Assignment,
        expected: Option<WorkloadSnapshot>,
    ) -> StoreResult<RecordOutcome> {
        assignment.validate()?;
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_workload(&mut tx, &assignment.developer_id).await?;
        let inserted = Self::insert_assignment(
            &mut tx,
            assignment,
            "ON CONFLICT (bug_id, developer_id) DO NOTHING",
        )
        .await?;
        if inserted == 0 {
            tx.rollback().await?;
            return Ok(RecordOutcome::AlreadyAssigned);
        }
        if expected.is_some_and(|expected| current != Some(expected)) {
            tx.rollback().await?;
            return Ok(RecordOutcome::Stale);
        }
        Self::adjust_workload(&mut tx, &assignment.developer_id, 1, assignment.assigned_at)
            .await?;
        tx.commit().await?;
        Ok(RecordOutcome::Recorded)
    }

    async fn insert_feedback(
        tx: &mut Transaction<'_, Postgres>,
        feedback: &AssignmentFeedback,
    ) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO assignment_feedback ({FEEDBACK_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(feedback.id)
        .bind(feedback.assignment_id)
        .bind(&feedback.developer_id)
        .bind(i32::from(feedback.rating))
        .bind(&feedback.comments)
        .bind(feedback.resolution_time_minutes)
        .bind(feedback.was_appropriate)
        .bind(feedback.feedback_timestamp)
        .bind(feedback.bug_category.map(|c| c.as_str()))
        .execute(&mut **tx)
        .await
        .map_err(|e| match StoreError::from(e) {
            StoreError::Conflict { .. } => StoreError::conflict(
                "assignment_feedback",
                format!("feedback already recorded for {}", feedback.assignment_id),
            ),
            StoreError::NotFound { .. } => {
                StoreError::not_found("assignment", feedback.assignment_id)
            }
            other => other,
        })?;
        Ok(())
    }

    async fn close_assignment(
        &self,
        id: Uuid,
        event: AssignmentEvent,
        at: DateTime<Utc>,
    ) -> StoreResult<Assignment> {
        let mut tx = self.pool.begin().await?;
        let mut assignment = Self::lock_assignment(&mut tx, id).await?;
        AssignmentStateMachine::new(&mut assignment).transition(event)?;
        Self::write_assignment_state(&mut tx, &assignment).await?;
        Self::adjust_workload(&mut tx, &assignment.developer_id, -1, at).await?;
        tx.commit().await?;
        Ok(assignment)
    }
}

#[async_trait]
impl TriageStore for PgStore {
    async fn save_bug(&self, bug: &CategorizedBug) -> StoreResult<()> {
        bug.validate()?;
        let report = &bug.bug_report;
        sqlx::query(
            "INSERT INTO bugs (id, title, description, reporter, created_at, platform, url, \
                 labels, raw_data, category, severity, keywords, confidence_score, analysis_timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (id) DO UPDATE SET \
                 category = EXCLUDED.category, \
                 severity = EXCLUDED.severity, \
                 keywords = EXCLUDED.keywords, \
                 confidence_score = EXCLUDED.confidence_score, \
                 analysis_timestamp = EXCLUDED.analysis_timestamp",
        )
        .bind(&report.id)
        .bind(&report.title)
        .bind(&report.description)
        .bind(&report.reporter)
        .bind(report.created_at)
        .bind(&report.platform)
        .bind(&report.url)
        .bind(Json(&report.labels))
        .bind(Json(&report.raw_data))
        .bind(bug.category.as_str())
        .bind(bug.severity.as_str())
        .bind(Json(&bug.keywords))
        .bind(bug.confidence_score)
        .bind(bug.analysis_timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_bug(&self, bug_id: &str) -> StoreResult<Option<CategorizedBug>> {
        let row: Option<BugRow> = sqlx::query_as(
            "SELECT id, title, description, reporter, created_at, platform, url, labels, \
                 raw_data, category, severity, keywords, confidence_score, analysis_timestamp \
             FROM bugs WHERE id = $1",
        )
        .bind(bug_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CategorizedBug::try_from).transpose()
    }

    async fn save_developer(&self, developer: &DeveloperProfile) -> StoreResult<bool> {
        developer.validate()?;
        let result = sqlx::query(&format!(
            "INSERT INTO developers ({DEVELOPER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) ON CONFLICT DO NOTHING"
        ))
        .bind(&developer.id)
        .bind(&developer.name)
        .bind(&developer.github_username)
        .bind(&developer.email)
        .bind(Json(&developer.skills))
        .bind(&developer.experience_level)
        .bind(i32::try_from(developer.max_capacity).unwrap_or(i32::MAX))
        .bind(Json(&developer.preferred_categories))
        .bind(&developer.timezone)
        .bind(i32::try_from(developer.contributions).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_developer(&self, developer_id: &str) -> StoreResult<Option<DeveloperProfile>> {
        let row: Option<DeveloperRow> = sqlx::query_as(&format!(
            "SELECT {DEVELOPER_COLUMNS} FROM developers WHERE id = $1"
        ))
        .bind(developer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn find_developer_by_username(
        &self,
        github_username: &str,
    ) -> StoreResult<Option<DeveloperProfile>> {
        let row: Option<DeveloperRow> = sqlx::query_as(&format!(
            "SELECT {DEVELOPER_COLUMNS} FROM developers WHERE LOWER(github_username) = LOWER($1)"
        ))
        .bind(github_username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_developers(&self) -> StoreResult<Vec<DeveloperProfile>> {
        let rows: Vec<DeveloperRow> = sqlx::query_as(&format!(
            "SELECT {DEVELOPER_COLUMNS} FROM developers ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn upsert_developer_status(&self, status: &DeveloperStatus) -> StoreResult<()> {
        status.validate()?;
        sqlx::query(&format!(
            "INSERT INTO developer_status ({STATUS_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (developer_id) DO UPDATE SET \
                 current_workload = EXCLUDED.current_workload, \
                 open_issues_count = EXCLUDED.open_issues_count, \
                 complexity_score = EXCLUDED.complexity_score, \
                 availability = EXCLUDED.availability, \
                 calendar_free = EXCLUDED.calendar_free, \
                 focus_time_active = EXCLUDED.focus_time_active, \
                 last_activity_timestamp = EXCLUDED.last_activity_timestamp, \
                 last_updated = EXCLUDED.last_updated"
        ))
        .bind(&status.developer_id)
        .bind(status.current_workload)
        .bind(status.open_issues_count)
        .bind(status.complexity_score)
        .bind(status.availability.as_str())
        .bind(status.calendar_free)
        .bind(status.focus_time_active)
        .bind(status.last_activity_timestamp)
        .bind(status.last_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_developer_status(
        &self,
        developer_id: &str,
    ) -> StoreResult<Option<DeveloperStatus>> {
        let row: Option<StatusRow> = sqlx::query_as(&format!(
            "SELECT {STATUS_COLUMNS} FROM developer_status WHERE developer_id = $1"
        ))
        .bind(developer_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DeveloperStatus::try_from).transpose()
    }

    async fn list_developer_statuses(&self) -> StoreResult<HashMap<String, DeveloperStatus>> {
        let rows: Vec<StatusRow> =
            sqlx::query_as(&format!("SELECT {STATUS_COLUMNS} FROM developer_status"))
                .fetch_all(&self.pool)
                .await?;
        Ok(collect::<_, DeveloperStatus>(rows)?
            .into_iter()
            .map(|s| (s.developer_id.clone(), s))
            .collect())
    }

    async fn record_assignment(&self, assignment: &Assignment) -> StoreResult<RecordOutcome> {
        self.record(assignment, None).await
    }

    async fn record_assignment_if_unchanged(
        &self,
        assignment: &Assignment,
        expected: WorkloadSnapshot,
    ) -> StoreResult<RecordOutcome> {
        self.record(assignment, Some(expected)).await
    }

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>> {
        let row: Option<AssignmentRow> = sqlx::query_as(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Assignment::try_from).transpose()
    }

    async fn active_assignment_for_bug(&self, bug_id: &str) -> StoreResult<Option<Assignment>> {
        let row: Option<AssignmentRow> = sqlx::query_as(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments \
             WHERE bug_id = $1 AND status = 'active' \
             ORDER BY assigned_at DESC LIMIT 1"
        ))
        .bind(bug_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Assignment::try_from).transpose()
    }

    async fn assignments_for_developer(&self, developer_id: &str) -> StoreResult<Vec<Assignment>> {
        let rows: Vec<AssignmentRow> = sqlx::query_as(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments \
             WHERE developer_id = $1 ORDER BY assigned_at"
        ))
        .bind(developer_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn complete_assignment(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<Assignment> {
        self.close_assignment(id, AssignmentEvent::Complete { at }, at)
            .await
    }

    async fn cancel_assignment(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<Assignment> {
        self.close_assignment(id, AssignmentEvent::Cancel, at).await
    }

    async fn reassign_assignment(
        &self,
        id: Uuid,
        to_developer: &str,
        confidence_score: f64,
        reasoning: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Assignment> {
        let mut tx = self.pool.begin().await?;
        let mut current = Self::lock_assignment(&mut tx, id).await?;
        let successor = AssignmentStateMachine::new(&mut current).reassign(
            to_developer,
            confidence_score,
            reasoning,
            at,
        )?;

        Self::write_assignment_state(&mut tx, &current).await?;
        Self::insert_assignment(&mut tx, &successor, "")
            .await
            .map_err(|e| match e {
                StoreError::Conflict { message, .. } => StoreError::conflict("assignment", message),
                other => other,
            })?;
        Self::adjust_workload(&mut tx, &current.developer_id, -1, at).await?;
        Self::adjust_workload(&mut tx, to_developer, 1, at).await?;
        tx.commit().await?;
        Ok(successor)
    }

    async fn save_feedback(&self, feedback: &AssignmentFeedback) -> StoreResult<()> {
        self.record_feedback(feedback, None).await.map(|_| ())
    }

    async fn record_feedback(
        &self,
        feedback: &AssignmentFeedback,
        complete_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<Assignment>> {
        feedback.validate()?;
        let mut tx = self.pool.begin().await?;
        let mut assignment = Self::lock_assignment(&mut tx, feedback.assignment_id).await?;
        Self::insert_feedback(&mut tx, feedback).await?;

        let completed = match complete_at {
            Some(at) if assignment.is_active() => {
                AssignmentStateMachine::new(&mut assignment)
                    .transition(AssignmentEvent::Complete { at })?;
                Self::write_assignment_state(&mut tx, &assignment).await?;
                Self::adjust_workload(&mut tx, &assignment.developer_id, -1, at).await?;
                Some(assignment)
            }
            _ => None,
        };
        tx.commit().await?;
        Ok(completed)
    }

    async fn feedback_for_assignment(
        &self,
        assignment_id: Uuid,
    ) -> StoreResult<Option<AssignmentFeedback>> {
        let row: Option<FeedbackRow> = sqlx::query_as(&format!(
            "SELECT {FEEDBACK_COLUMNS} FROM assignment_feedback WHERE assignment_id = $1"
        ))
        .bind(assignment_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AssignmentFeedback::try_from).transpose()
    }

    async fn feedback_history(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<HashMap<String, Vec<AssignmentFeedback>>> {
        let rows: Vec<FeedbackRow> = sqlx::query_as(&format!(
            "SELECT {FEEDBACK_COLUMNS} FROM assignment_feedback \
             WHERE $1::timestamptz IS NULL OR feedback_timestamp >= $1 \
             ORDER BY feedback_timestamp"
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut history: HashMap<String, Vec<AssignmentFeedback>> = HashMap::new();
        for feedback in collect::<_, AssignmentFeedback>(rows)? {
            history
                .entry(feedback.developer_id.clone())
                .or_default()
                .push(feedback);
        }
        Ok(history)
    }
}
