//! In-memory [`TriageStore`]. One mutex guards every table, so each trait
//! method is atomic the same way a Postgres transaction is.
//!
//! Tests can stage a concurrent status write or a failed completion; both
//! take effect inside the next matching write, under the same lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use uuid::Uuid;

use super::{RecordOutcome, StoreError, StoreResult, TriageStore, WorkloadSnapshot};
use crate::models::{
    Assignment, AssignmentFeedback, CategorizedBug, DeveloperProfile, DeveloperStatus,
};
use crate::state_machine::{AssignmentEvent, AssignmentStateMachine};

#[derive(Debug, Default)]
struct Tables {
    bugs: HashMap<String, CategorizedBug>,
    developers: BTreeMap<String, DeveloperProfile>,
    statuses: HashMap<String, DeveloperStatus>,
    assignments: HashMap<Uuid, Assignment>,
    /// Insertion order, for stable listing
    assignment_order: Vec<Uuid>,
    feedback: HashMap<Uuid, AssignmentFeedback>,
    /// One is applied at the start of each assignment write
    staged_statuses: VecDeque<DeveloperStatus>,
    /// Returned by the next completions instead of writing
    completion_failures: VecDeque<StoreError>,
}

impl Tables {
    fn find_pair(&self, bug_id: &str, developer_id: &str) -> Option<&Assignment> {
        self.assignments
            .values()
            .find(|a| a.bug_id == bug_id && a.developer_id == developer_id)
    }

    fn bump_workload(&mut self, developer_id: &str, at: DateTime<Utc>) {
        if let Some(status) = self.statuses.get_mut(developer_id) {
            status.record_assignment(at);
        }
    }

    fn release_workload(&mut self, developer_id: &str, at: DateTime<Utc>) {
        if let Some(status) = self.statuses.get_mut(developer_id) {
            status.record_completion(at);
        }
    }

    fn insert_assignment(&mut self, assignment: Assignment) {
        self.assignment_order.push(assignment.id);
        self.assignments.insert(assignment.id, assignment);
    }

    fn assignment_mut(&mut self, id: Uuid) -> StoreResult<&mut Assignment> {
        self.assignments
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("assignment", id))
    }

    fn apply_staged_status(&mut self) {
        if let Some(status) = self.staged_statuses.pop_front() {
            self.statuses.insert(status.developer_id.clone(), status);
        }
    }

    fn record(
        &mut self,
        assignment: &Assignment,
        expected: Option<WorkloadSnapshot>,
    ) -> StoreResult<RecordOutcome> {
        self.apply_staged_status();
        if self
            .find_pair(&assignment.bug_id, &assignment.developer_id)
            .is_some()
        {
            return Ok(RecordOutcome::AlreadyAssigned);
        }
        if self.assignments.contains_key(&assignment.id) {
            return Err(StoreError::conflict(
                "assignment",
                format!("duplicate id {}", assignment.id),
            ));
        }
        if let Some(expected) = expected {
            let current = self.statuses.get(&assignment.developer_id);
            if !current.is_some_and(|status| expected.matches(status)) {
                return Ok(RecordOutcome::Stale);
            }
        }
        self.insert_assignment(assignment.clone());
        self.bump_workload(&assignment.developer_id, assignment.assigned_at);
        Ok(RecordOutcome::Recorded)
    }

    /// Applies a workload-releasing event to an active assignment
    fn close_assignment(
        &mut self,
        id: Uuid,
        event: AssignmentEvent,
        at: DateTime<Utc>,
    ) -> StoreResult<Assignment> {
        let is_completion = matches!(event, AssignmentEvent::Complete { .. });
        let assignment = self.assignment_mut(id)?;
        let mut next = assignment.clone();
        AssignmentStateMachine::new(&mut next).transition(event)?;
        if is_completion {
            if let Some(error) = self.completion_failures.pop_front() {
                return Err(error);
            }
        }
        let assignment = self.assignment_mut(id)?;
        *assignment = next;
        let closed = assignment.clone();
        self.release_workload(&closed.developer_id, at);
        Ok(closed)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored assignments in any state
    pub fn assignment_count(&self) -> usize {
        self.tables.lock().assignments.len()
    }

    /// Overwrites a developer's status at the start of the next assignment
    /// write, as a concurrent writer committing first would. Staged changes
    /// apply one per write, in order.
    pub fn stage_status_change(&self, status: DeveloperStatus) {
        self.tables.lock().staged_statuses.push_back(status);
    }

    /// Makes the next assignment completion fail with `error`, leaving every
    /// table of that write untouched
    pub fn fail_next_completion(&self, error: StoreError) {
        self.tables.lock().completion_failures.push_back(error);
    }
}

#[async_trait]
impl TriageStore for InMemoryStore {
    async fn save_bug(&self, bug: &CategorizedBug) -> StoreResult<()> {
        bug.validate()?;
        self.tables
            .lock()
            .bugs
            .insert(bug.id().to_string(), bug.clone());
        Ok(())
    }

    async fn get_bug(&self, bug_id: &str) -> StoreResult<Option<CategorizedBug>> {
        Ok(self.tables.lock().bugs.get(bug_id).cloned())
    }

    async fn save_developer(&self, developer: &DeveloperProfile) -> StoreResult<bool> {
        developer.validate()?;
        let mut tables = self.tables.lock();
        let exists = tables.developers.contains_key(&developer.id)
            || tables
                .developers
                .values()
                .any(|d| d.github_username.eq_ignore_ascii_case(&developer.github_username));
        if exists {
            return Ok(false);
        }
        tables
            .developers
            .insert(developer.id.clone(), developer.clone());
        Ok(true)
    }

    async fn get_developer(&self, developer_id: &str) -> StoreResult<Option<DeveloperProfile>> {
        Ok(self.tables.lock().developers.get(developer_id).cloned())
    }

    async fn find_developer_by_username(
        &self,
        github_username: &str,
    ) -> StoreResult<Option<DeveloperProfile>> {
        Ok(self
            .tables
            .lock()
            .developers
            .values()
            .find(|d| d.github_username.eq_ignore_ascii_case(github_username))
            .cloned())
    }

    async fn list_developers(&self) -> StoreResult<Vec<DeveloperProfile>> {
        Ok(self.tables.lock().developers.values().cloned().collect())
    }

    async fn upsert_developer_status(&self, status: &DeveloperStatus) -> StoreResult<()> {
        status.validate()?;
        self.tables
            .lock()
            .statuses
            .insert(status.developer_id.clone(), status.clone());
        Ok(())
    }

    async fn get_developer_status(
        &self,
        developer_id: &str,
    ) -> StoreResult<Option<DeveloperStatus>> {
        Ok(self.tables.lock().statuses.get(developer_id).cloned())
    }

    async fn list_developer_statuses(&self) -> StoreResult<HashMap<String, DeveloperStatus>> {
        Ok(self.tables.lock().statuses.clone())
    }

    async fn record_assignment(&self, assignment: &Assignment) -> StoreResult<RecordOutcome> {
        assignment.validate()?;
        self.tables.lock().record(assignment, None)
    }

    async fn record_assignment_if_unchanged(
        &self,
        assignment: &Assignment,
        expected: WorkloadSnapshot,
    ) -> StoreResult<RecordOutcome> {
        assignment.validate()?;
        self.tables.lock().record(assignment, Some(expected))
    }

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>> {
        Ok(self.tables.lock().assignments.get(&id).cloned())
    }

    async fn active_assignment_for_bug(&self, bug_id: &str) -> StoreResult<Option<Assignment>> {
        let tables = self.tables.lock();
        Ok(tables
            .assignment_order
            .iter()
            .rev()
            .filter_map(|id| tables.assignments.get(id))
            .find(|a| a.bug_id == bug_id && a.is_active())
            .cloned())
    }

    async fn assignments_for_developer(&self, developer_id: &str) -> StoreResult<Vec<Assignment>> {
        let tables = self.tables.lock();
        Ok(tables
            .assignment_order
            .iter()
            .filter_map(|id| tables.assignments.get(id))
            .filter(|a| a.developer_id == developer_id)
            .cloned()
            .collect())
    }

    async fn complete_assignment(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<Assignment> {
        self.tables
            .lock()
            .close_assignment(id, AssignmentEvent::Complete { at }, at)
    }

    async fn cancel_assignment(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<Assignment> {
        self.tables
            .lock()
            .close_assignment(id, AssignmentEvent::Cancel, at)
    }

    async fn reassign_assignment(
        &self,
        id: Uuid,
        to_developer: &str,
        confidence_score: f64,
        reasoning: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Assignment> {
        let mut tables = self.tables.lock();

        let current = tables.assignment_mut(id)?;
        let (bug_id, holder) = (current.bug_id.clone(), current.developer_id.clone());
        if holder != to_developer && tables.find_pair(&bug_id, to_developer).is_some() {
            return Err(StoreError::conflict(
                "assignment",
                format!("bug {bug_id} was already assigned to {to_developer}"),
            ));
        }

        let current = tables.assignment_mut(id)?;
        let previous_developer = current.developer_id.clone();
        let successor = AssignmentStateMachine::new(current).reassign(
            to_developer,
            confidence_score,
            reasoning,
            at,
        )?;

        tables.release_workload(&previous_developer, at);
        tables.insert_assignment(successor.clone());
        tables.bump_workload(to_developer, at);
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
        let mut tables = self.tables.lock();
        let active = match tables.assignments.get(&feedback.assignment_id) {
            Some(assignment) => assignment.is_active(),
            None => return Err(StoreError::not_found("assignment", feedback.assignment_id)),
        };
        if tables.feedback.contains_key(&feedback.assignment_id) {
            return Err(StoreError::conflict(
                "assignment_feedback",
                format!("feedback already recorded for {}", feedback.assignment_id),
            ));
        }
        let completed = match complete_at {
            Some(at) if active => Some(tables.close_assignment(
                feedback.assignment_id,
                AssignmentEvent::Complete { at },
                at,
            )?),
            _ => None,
        };
        tables
            .feedback
            .insert(feedback.assignment_id, feedback.clone());
        Ok(completed)
    }

    async fn feedback_for_assignment(
        &self,
        assignment_id: Uuid,
    ) -> StoreResult<Option<AssignmentFeedback>> {
        Ok(self.tables.lock().feedback.get(&assignment_id).cloned())
    }

    async fn feedback_history(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<HashMap<String, Vec<AssignmentFeedback>>> {
        let tables = self.tables.lock();
        let mut history: HashMap<String, Vec<AssignmentFeedback>> = HashMap::new();
        for feedback in tables.feedback.values() {
            if since.is_some_and(|cutoff| feedback.feedback_timestamp < cutoff) {
                continue;
            }
            history
                .entry(feedback.developer_id.clone())
                .or_default()
                .push(feedback.clone());
        }
        for entries in history.values_mut() {
            entries.sort_by_key(|f| f.feedback_timestamp);
        }
        Ok(history)
    }
}
