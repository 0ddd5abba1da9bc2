//! # Repository Monitor
//!
//! Polls one repository for open issues and publishes every issue not seen
//! before as a `bug_report` message. An issue counts as seen once it has been
//! published in this process or once a bug with its id is in the store. The
//! in-process set only keeps issues from the latest listing; anything that
//! drops out and comes back is caught by the store check.
//!
//! [`StopMarker`] lets a second process stop a running monitor: `monitor stop`
//! writes a marker file that the running monitor checks between polls.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::context::TriageContext;
use super::periodic::PeriodicTask;
use crate::error::Result;
use crate::logging::log_error;
use crate::tracker::RepoRef;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorPollStats {
    pub fetched: usize,
    pub published: usize,
    pub skipped: usize,
    /// Issues whose publish failed; they are retried on the next poll
    pub failed: usize,
}

#[derive(Debug)]
pub struct RepositoryMonitor {
    ctx: TriageContext,
    repo: RepoRef,
    seen: Mutex<HashSet<u64>>,
}

impl RepositoryMonitor {
    pub fn new(ctx: TriageContext, repo: RepoRef) -> Self {
        Self {
            ctx,
            repo,
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    /// Issues remembered from the latest listing
    pub fn seen_count(&self) -> usize {
        self.seen.lock().len()
    }

    #[instrument(skip(self), fields(repo = %self.repo))]
    pub async fn poll_once(&self) -> Result<MonitorPollStats> {
        let limit = self.ctx.config.agents.triage_batch_size;
        let issues = self.ctx.tracker.get_open_issues(&self.repo, limit).await?;
        let mut stats = MonitorPollStats {
            fetched: issues.len(),
            ..MonitorPollStats::default()
        };
        let listed: HashSet<u64> = issues.iter().map(|issue| issue.id).collect();
        self.seen.lock().retain(|id| listed.contains(id));

        for issue in issues {
            if self.seen.lock().contains(&issue.id) {
                stats.skipped += 1;
                continue;
            }
            let report = issue.to_bug_report();
            if self.ctx.store.get_bug(&report.id).await?.is_some() {
                debug!(bug_id = %report.id, "Issue already triaged");
                self.seen.lock().insert(issue.id);
                stats.skipped += 1;
                continue;
            }
            if let Err(e) = report.validate() {
                // unfixable on our side; do not fetch it again
                warn!(issue = issue.number, error = %e, "Skipping issue with invalid content");
                self.seen.lock().insert(issue.id);
                stats.skipped += 1;
                continue;
            }

            if self.ctx.publisher.publish_bug_report(&report).await {
                self.seen.lock().insert(issue.id);
                stats.published += 1;
            } else {
                stats.failed += 1;
            }
        }

        info!(
            fetched = stats.fetched,
            published = stats.published,
            skipped = stats.skipped,
            failed = stats.failed,
            "Repository poll complete"
        );
        Ok(stats)
    }

    /// Polls on the configured listener interval until the task is stopped
    pub fn spawn(self: Arc<Self>, interval: Duration) -> PeriodicTask {
        let name = format!("monitor:{}", self.repo);
        PeriodicTask::spawn(name, interval, move || {
            let monitor = Arc::clone(&self);
            async move {
                if let Err(e) = monitor.poll_once().await {
                    log_error(
                        "repository_monitor",
                        "poll",
                        &e.to_string(),
                        Some(&monitor.repo.to_string()),
                    );
                }
            }
        })
    }
}

/// File whose presence asks a running monitor for `repo` to stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopMarker {
    path: PathBuf,
}

impl StopMarker {
    pub fn for_repo(repo: &RepoRef) -> Self {
        Self::in_dir(&std::env::temp_dir(), repo)
    }

    pub fn in_dir(dir: &Path, repo: &RepoRef) -> Self {
        Self {
            path: dir.join(format!("bug-triage-monitor-{}-{}.stop", repo.owner, repo.repo)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self) -> std::io::Result<()> {
        std::fs::write(&self.path, chrono::Utc::now().to_rfc3339())
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Removes the marker; a missing marker is not an error
    pub fn clear(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Resolves once the marker appears
    pub async fn wait(&self, check_every: Duration) {
        while !self.exists() {
            tokio::time::sleep(check_every).await;
        }
    }
}
