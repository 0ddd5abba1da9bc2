//! In-memory tracker that records every mutating call.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use super::{
    Contributor, IssueRef, IssueTracker, RepoRef, TrackerError, TrackerIssue, TrackerResult,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerCall {
    Assign { issue: IssueRef, assignees: Vec<String> },
    Comment { issue: IssueRef, body: String },
    Labels { issue: IssueRef, labels: Vec<String> },
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<TrackerCall>,
    issues: HashMap<RepoRef, Vec<TrackerIssue>>,
    contributors: HashMap<RepoRef, Vec<Contributor>>,
    languages: HashMap<RepoRef, Vec<String>>,
    /// Errors returned by the next mutating calls, in order
    failures: VecDeque<TrackerError>,
}

#[derive(Debug, Default)]
pub struct RecordingTracker {
    state: Mutex<State>,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_issues(self, repo: RepoRef, issues: Vec<TrackerIssue>) -> Self {
        self.state.lock().issues.insert(repo, issues);
        self
    }

    pub fn with_contributors(self, repo: RepoRef, contributors: Vec<Contributor>) -> Self {
        self.state.lock().contributors.insert(repo, contributors);
        self
    }

    pub fn with_languages(self, repo: RepoRef, languages: Vec<String>) -> Self {
        self.state.lock().languages.insert(repo, languages);
        self
    }

    pub fn push_issue(&self, repo: &RepoRef, issue: TrackerIssue) {
        self.state
            .lock()
            .issues
            .entry(repo.clone())
            .or_default()
            .push(issue);
    }

    /// Drops an issue from the open list
    pub fn close_issue(&self, repo: &RepoRef, issue_id: u64) {
        if let Some(issues) = self.state.lock().issues.get_mut(repo) {
            issues.retain(|issue| issue.id != issue_id);
        }
    }

    /// Queues an error for the next mutating call
    pub fn fail_next(&self, error: TrackerError) {
        self.state.lock().failures.push_back(error);
    }

    pub fn calls(&self) -> Vec<TrackerCall> {
        self.state.lock().calls.clone()
    }

    pub fn assignments(&self) -> Vec<(IssueRef, Vec<String>)> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                TrackerCall::Assign { issue, assignees } => {
                    Some((issue.clone(), assignees.clone()))
                }
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: TrackerCall) -> TrackerResult<()> {
        let mut state = self.state.lock();
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        state.calls.push(call);
        Ok(())
    }
}

#[async_trait]
impl IssueTracker for RecordingTracker {
    fn name(&self) -> &str {
        "recording"
    }

    async fn assign(&self, issue: &IssueRef, assignees: &[String]) -> TrackerResult<()> {
        self.record(TrackerCall::Assign {
            issue: issue.clone(),
            assignees: assignees.to_vec(),
        })
    }

    async fn add_comment(&self, issue: &IssueRef, body: &str) -> TrackerResult<()> {
        self.record(TrackerCall::Comment {
            issue: issue.clone(),
            body: body.to_string(),
        })
    }

    async fn add_labels(&self, issue: &IssueRef, labels: &[String]) -> TrackerResult<()> {
        self.record(TrackerCall::Labels {
            issue: issue.clone(),
            labels: labels.to_vec(),
        })
    }

    async fn get_open_issues(
        &self,
        repo: &RepoRef,
        limit: usize,
    ) -> TrackerResult<Vec<TrackerIssue>> {
        let state = self.state.lock();
        let mut issues = state.issues.get(repo).cloned().unwrap_or_default();
        issues.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        issues.truncate(limit);
        Ok(issues)
    }

    async fn list_contributors(&self, repo: &RepoRef) -> TrackerResult<Vec<Contributor>> {
        self.state
            .lock()
            .contributors
            .get(repo)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(repo.to_string()))
    }

    async fn repository_languages(&self, repo: &RepoRef) -> TrackerResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .languages
            .get(repo)
            .cloned()
            .unwrap_or_default())
    }

    async fn test_connection(&self) -> TrackerResult<()> {
        Ok(())
    }
}
