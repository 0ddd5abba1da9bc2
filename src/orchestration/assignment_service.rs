//! # Assignment Service
//!
//! Drives one categorized bug through the decision engine and applies the
//! decision:
//!
//! 1. persist the bug; an already active assignment short-circuits
//! 2. snapshot developers, statuses and recent feedback from the store
//! 3. primary floor, then the relaxed floor, then escalate to manual review
//! 4. record the assignment (the store bumps the workload in the same write)
//!    unless the winner's status moved since step 2; then go back to step 2
//! 5. publish the assignment, update the tracker, publish the notification
//!
//! Only steps 1-4 can fail the call. Side effects after the assignment is
//! recorded are logged and reported in the outcome but never undo it, so a
//! redelivered message finds the active assignment and stops at step 1.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::context::TriageContext;
use crate::engine::{required_skills, AssignmentResult, DecisionContext};
use crate::error::{Result, TriageError};
use crate::logging::{log_assignment_decision, log_error};
use crate::messaging::topology::ALERT_PRIORITY;
use crate::messaging::{HandlerError, InboundMessage, MessageHandler, TriageMessage};
use crate::models::{
    Assignment, CategorizedBug, DeveloperProfile, NotificationPayload, SystemEvent,
};
use crate::store::{RecordOutcome, StoreError, WorkloadSnapshot};
use crate::tracker::{IssueRef, TrackerError};

const TRACKER_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Decisions scored before giving up on a developer whose status keeps moving
const MAX_DECISION_ATTEMPTS: u32 = 3;

/// Which floor the winner cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionPath {
    Primary,
    Fallback,
}

impl DecisionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "assigned",
            Self::Fallback => "assigned_fallback",
        }
    }
}

/// Side effects performed after the assignment was recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SideEffects {
    pub published: bool,
    pub tracker_updated: bool,
    pub notified: bool,
}

/// A scored winner and the status it was scored against
#[derive(Debug, Clone)]
struct Decision {
    result: AssignmentResult,
    path: DecisionPath,
    snapshot: WorkloadSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentOutcome {
    Assigned {
        assignment: Assignment,
        path: DecisionPath,
        skill_confidence: f64,
        side_effects: SideEffects,
    },
    /// The bug already has an active assignment, or the chosen pair exists
    AlreadyAssigned { bug_id: String, developer_id: String },
    ManualAssignmentRequired { reason: String, escalated: bool },
}

impl AssignmentOutcome {
    pub fn assignment(&self) -> Option<&Assignment> {
        match self {
            Self::Assigned { assignment, .. } => Some(assignment),
            _ => None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, Self::Assigned { .. })
    }
}

#[derive(Debug, Clone)]
pub struct AssignmentService {
    ctx: TriageContext,
}

impl AssignmentService {
    pub fn new(ctx: TriageContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &TriageContext {
        &self.ctx
    }

    #[instrument(skip(self, bug), fields(bug_id = %bug.id(), category = %bug.category))]
    pub async fn assign(&self, bug: &CategorizedBug) -> Result<AssignmentOutcome> {
        let now = self.ctx.now();
        self.ctx.store.save_bug(bug).await?;

        if let Some(existing) = self.ctx.store.active_assignment_for_bug(bug.id()).await? {
            debug!(
                assignment_id = %existing.id,
                developer_id = %existing.developer_id,
                "Bug already has an active assignment"
            );
            log_assignment_decision(
                bug.id(),
                Some(&existing.developer_id),
                Some(existing.confidence_score),
                "already_assigned",
                None,
            );
            return Ok(AssignmentOutcome::AlreadyAssigned {
                bug_id: existing.bug_id,
                developer_id: existing.developer_id,
            });
        }

        let developers = self.ctx.store.list_developers().await?;
        let mut attempt = 1;
        let (assignment, Decision { result, path, .. }) = loop {
            let Some(decision) = self.decide(bug, &developers, None, now).await? else {
                return self.escalate(bug, "no developer cleared the confidence floor", now).await;
            };
            let assignment = Assignment::new(
                bug.id(),
                &decision.result.developer_id,
                decision.result.confidence_score,
                &decision.result.reasoning,
                now,
            );
            match self
                .ctx
                .store
                .record_assignment_if_unchanged(&assignment, decision.snapshot)
                .await?
            {
                RecordOutcome::Recorded => break (assignment, decision),
                RecordOutcome::AlreadyAssigned => {
                    log_assignment_decision(
                        bug.id(),
                        Some(&decision.result.developer_id),
                        Some(decision.result.confidence_score),
                        "already_assigned",
                        Some("pair already recorded"),
                    );
                    return Ok(AssignmentOutcome::AlreadyAssigned {
                        bug_id: bug.id().to_string(),
                        developer_id: decision.result.developer_id,
                    });
                }
                RecordOutcome::Stale if attempt < MAX_DECISION_ATTEMPTS => {
                    debug!(
                        developer_id = %decision.result.developer_id,
                        attempt,
                        "Developer status moved since scoring; deciding again"
                    );
                    attempt += 1;
                }
                RecordOutcome::Stale => {
                    return Err(StoreError::contention(
                        "developer_status",
                        format!(
                            "status of {} changed during {attempt} decisions",
                            decision.result.developer_id
                        ),
                    )
                    .into());
                }
            }
        };

        log_assignment_decision(
            bug.id(),
            Some(&assignment.developer_id),
            Some(assignment.confidence_score),
            path.as_str(),
            Some(&assignment.reasoning),
        );

        let developer = developers
            .iter()
            .find(|d| d.id == assignment.developer_id)
            .ok_or_else(|| StoreError::not_found("developer", &assignment.developer_id))?;
        let side_effects = self.apply_side_effects(bug, developer, &assignment, now).await;

        Ok(AssignmentOutcome::Assigned {
            assignment,
            path,
            skill_confidence: result.skill_confidence,
            side_effects,
        })
    }

    /// Moves an active assignment to the best other developer. `Ok(None)` when
    /// nobody else clears the relaxed floor; the bug is then escalated.
    #[instrument(skip(self))]
    pub async fn reassign(&self, assignment_id: Uuid) -> Result<Option<Assignment>> {
        let now = self.ctx.now();
        let current = self
            .ctx
            .store
            .get_assignment(assignment_id)
            .await?
            .ok_or_else(|| StoreError::not_found("assignment", assignment_id))?;
        let bug = self
            .ctx
            .store
            .get_bug(&current.bug_id)
            .await?
            .ok_or_else(|| StoreError::not_found("bug", &current.bug_id))?;

        let developers = self.ctx.store.list_developers().await?;
        let Some(Decision { result, path, .. }) = self
            .decide(&bug, &developers, Some(&current.developer_id), now)
            .await?
        else {
            self.escalate(&bug, "no other developer available for reassignment", now)
                .await?;
            return Ok(None);
        };

        let successor = self
            .ctx
            .store
            .reassign_assignment(
                assignment_id,
                &result.developer_id,
                result.confidence_score,
                &result.reasoning,
                now,
            )
            .await?;

        info!(
            from = %current.developer_id,
            to = %successor.developer_id,
            new_assignment_id = %successor.id,
            "Assignment reassigned"
        );
        log_assignment_decision(
            bug.id(),
            Some(&successor.developer_id),
            Some(successor.confidence_score),
            if path == DecisionPath::Primary {
                "reassigned"
            } else {
                "reassigned_fallback"
            },
            Some(&successor.reasoning),
        );

        if let Some(developer) = developers.iter().find(|d| d.id == successor.developer_id) {
            self.apply_side_effects(&bug, developer, &successor, now).await;
        }
        Ok(Some(successor))
    }

    async fn decide(
        &self,
        bug: &CategorizedBug,
        developers: &[DeveloperProfile],
        exclude: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Decision>> {
        let candidates: Vec<DeveloperProfile> = developers
            .iter()
            .filter(|d| Some(d.id.as_str()) != exclude)
            .cloned()
            .collect();
        let statuses = self.ctx.store.list_developer_statuses().await?;
        let since = now - ChronoDuration::days(self.ctx.config.performance.lookback_days);
        let feedback_history = self.ctx.store.feedback_history(Some(since)).await?;
        let skills = required_skills(bug);

        let decision = DecisionContext {
            bug,
            required_skills: &skills,
            candidates: &candidates,
            statuses: &statuses,
            feedback_history: &feedback_history,
            now,
        };

        let scored = match self.ctx.engine.find_best_developer(&decision) {
            Some(result) => Some((result, DecisionPath::Primary)),
            None => {
                debug!(candidates = candidates.len(), "No candidate cleared the primary floor");
                self.ctx
                    .engine
                    .find_fallback_developer(&decision)
                    .map(|result| (result, DecisionPath::Fallback))
            }
        };
        let Some((result, path)) = scored else {
            return Ok(None);
        };
        let snapshot = statuses
            .get(&result.developer_id)
            .map(WorkloadSnapshot::of)
            .ok_or_else(|| StoreError::not_found("developer_status", &result.developer_id))?;
        Ok(Some(Decision {
            result,
            path,
            snapshot,
        }))
    }

    async fn escalate(
        &self,
        bug: &CategorizedBug,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<AssignmentOutcome> {
        log_assignment_decision(bug.id(), None, None, "manual_assignment_required", Some(reason));

        if !self.ctx.config.assignment.fallback_to_manual {
            warn!(bug_id = %bug.id(), reason, "Bug left unassigned; manual fallback disabled");
            return Ok(AssignmentOutcome::ManualAssignmentRequired {
                reason: reason.to_string(),
                escalated: false,
            });
        }

        let event = SystemEvent::manual_assignment_required(bug, reason, now);
        if !self.ctx.publisher.publish_system_event(&event, ALERT_PRIORITY).await {
            return Err(TriageError::publish_failed("manual assignment escalation"));
        }
        Ok(AssignmentOutcome::ManualAssignmentRequired {
            reason: reason.to_string(),
            escalated: true,
        })
    }

    async fn apply_side_effects(
        &self,
        bug: &CategorizedBug,
        developer: &DeveloperProfile,
        assignment: &Assignment,
        now: DateTime<Utc>,
    ) -> SideEffects {
        let mut effects = SideEffects {
            published: self.ctx.publisher.publish_assignment(assignment).await,
            ..SideEffects::default()
        };
        if !effects.published {
            warn!(assignment_id = %assignment.id, "Assignment recorded but not published");
        }

        if self.ctx.config.assignment.enable_github_assignment {
            effects.tracker_updated = match self.update_tracker(bug, developer, assignment).await {
                Ok(updated) => updated,
                Err(e) => {
                    log_error(
                        "assignment_service",
                        "update_tracker",
                        &e.to_string(),
                        Some(&format!("bug_id={} assignment_id={}", bug.id(), assignment.id)),
                    );
                    false
                }
            };
        }

        if self.ctx.config.assignment.enable_notifications {
            let notification = NotificationPayload::bug_assignment(
                assignment.id,
                bug,
                developer,
                &assignment.reasoning,
                assignment.confidence_score,
                now,
            );
            effects.notified = self.ctx.publisher.publish_notification(&notification).await;
        }
        effects
    }

    /// `Ok(false)` when the bug has no tracker URL to write back to
    async fn update_tracker(
        &self,
        bug: &CategorizedBug,
        developer: &DeveloperProfile,
        assignment: &Assignment,
    ) -> std::result::Result<bool, TrackerError> {
        let Some(url) = bug.bug_report.url.as_deref() else {
            debug!(bug_id = %bug.id(), "Bug has no URL; skipping tracker update");
            return Ok(false);
        };
        let issue = IssueRef::from_url(url)?;
        let assignees = vec![developer.github_username.clone()];
        let comment = assignment_comment(developer, assignment);
        let labels = vec![
            format!("category:{}", bug.category),
            format!("severity:{}", bug.severity),
        ];

        self.with_tracker_retry("assign", || self.ctx.tracker.assign(&issue, &assignees))
            .await?;
        self.with_tracker_retry("comment", || self.ctx.tracker.add_comment(&issue, &comment))
            .await?;
        self.with_tracker_retry("labels", || self.ctx.tracker.add_labels(&issue, &labels))
            .await?;
        info!(issue = %issue, assignee = %developer.github_username, "Tracker updated");
        Ok(true)
    }

    /// Retries transient tracker failures; each attempt is bounded by the
    /// assignment timeout
    async fn with_tracker_retry<F, Fut>(
        &self,
        operation: &str,
        mut call: F,
    ) -> std::result::Result<(), TrackerError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<(), TrackerError>>,
    {
        let attempts = self.ctx.config.assignment.max_assignment_retries.max(1);
        let timeout = self.ctx.config.assignment.assignment_timeout();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(TrackerError::Transport(format!(
                    "{operation} timed out after {}s",
                    timeout.as_secs()
                ))),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(operation, attempt, error = %e, "Tracker call failed; retrying");
                    tokio::time::sleep(TRACKER_RETRY_BASE_DELAY * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn assignment_comment(developer: &DeveloperProfile, assignment: &Assignment) -> String {
    format!(
        "Assigned to @{} (confidence {:.0}%).\n\n{}",
        developer.github_username,
        assignment.confidence_score * 100.0,
        assignment.reasoning
    )
}

/// Consumes `categorized_bug` messages
#[derive(Debug, Clone)]
pub struct AssignmentHandler {
    service: Arc<AssignmentService>,
}

impl AssignmentHandler {
    pub fn new(service: Arc<AssignmentService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl MessageHandler for AssignmentHandler {
    async fn handle(&self, message: &InboundMessage) -> std::result::Result<(), HandlerError> {
        let TriageMessage::CategorizedBug(bug) = &message.message else {
            return Err(HandlerError::permanent(format!(
                "assignment handler cannot process {}",
                message.message_type
            )));
        };
        if message.redelivered {
            debug!(bug_id = %bug.id(), "Processing redelivered categorized bug");
        }
        self.service.assign(bug).await.map(|_| ()).map_err(HandlerError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriageConfig;
    use crate::messaging::envelope::decode;
    use crate::messaging::{
        InMemoryBroker, MessageBroker, MessagePublisher, PublisherConfig, Topology,
    };
    use crate::models::events::MANUAL_ASSIGNMENT_REQUIRED;
    use crate::models::{Availability, BugCategory, BugReport, DeveloperStatus, Severity};
    use crate::store::{InMemoryStore, TriageStore};
    use crate::tracker::{RecordingTracker, TrackerCall};
    use chrono::TimeZone;

    struct Harness {
        store: Arc<InMemoryStore>,
        broker: Arc<InMemoryBroker>,
        tracker: Arc<RecordingTracker>,
        service: AssignmentService,
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn developer(id: &str, login: &str, skills: &[&str], level: &str) -> DeveloperProfile {
        DeveloperProfile {
            id: id.to_string(),
            name: login.to_string(),
            github_username: login.to_string(),
            email: format!("{login}@example.com"),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            experience_level: level.to_string(),
            max_capacity: 5,
            preferred_categories: vec![],
            timezone: "UTC".into(),
            contributions: 40,
        }
    }

    fn bug(id: &str) -> CategorizedBug {
        CategorizedBug {
            bug_report: BugReport::new(
                id,
                "Slow SQL query on orders",
                "The orders query times out on PostgreSQL after the last migration",
                "reporter",
                "github",
                now(),
            )
            .with_url("https://github.com/acme/shop/issues/42"),
            category: BugCategory::Database,
            severity: Severity::High,
            keywords: vec!["sql".into(), "postgresql".into()],
            confidence_score: 0.8,
            analysis_timestamp: now(),
        }
    }

    async fn harness(config: TriageConfig) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        broker.declare_topology(&Topology::default()).await.unwrap();
        let tracker = Arc::new(RecordingTracker::new());
        let ctx = TriageContext::new(
            store.clone(),
            MessagePublisher::new(broker.clone(), PublisherConfig::default()),
            tracker.clone(),
            config,
        )
        .with_clock(now);
        Harness {
            store,
            broker,
            tracker,
            service: AssignmentService::new(ctx),
        }
    }

    async fn add_developer(store: &InMemoryStore, dev: DeveloperProfile) {
        store
            .upsert_developer_status(&DeveloperStatus::available(&dev.id, now()))
            .await
            .unwrap();
        store.save_developer(&dev).await.unwrap();
    }

    fn config() -> TriageConfig {
        let mut config = TriageConfig::default();
        config.api.github_token = "test-token".into();
        config
    }

    #[tokio::test]
    async fn assigns_best_match_and_applies_side_effects() {
        let h = harness(config()).await;
        add_developer(&h.store, developer("dev_db", "dana", &["SQL", "PostgreSQL", "Database"], "senior")).await;
        add_developer(&h.store, developer("dev_ui", "uma", &["CSS", "React"], "junior")).await;

        let outcome = h.service.assign(&bug("gh_42")).await.unwrap();
        let AssignmentOutcome::Assigned { assignment, side_effects, .. } = &outcome else {
            panic!("unexpected {outcome:?}");
        };
        assert_eq!(assignment.developer_id, "dev_db");
        assert_eq!(
            *side_effects,
            SideEffects { published: true, tracker_updated: true, notified: true }
        );

        let status = h.store.get_developer_status("dev_db").await.unwrap().unwrap();
        assert_eq!(status.current_workload, 1);
        assert_eq!(h.tracker.assignments()[0].1, vec!["dana".to_string()]);
        assert!(h
            .tracker
            .calls()
            .iter()
            .any(|c| matches!(c, TrackerCall::Comment { body, .. } if body.contains("@dana"))));
        assert_eq!(h.broker.ready_count("assignments_queue"), 1);
        assert_eq!(h.broker.ready_count("notifications_queue"), 1);
    }

    #[tokio::test]
    async fn second_delivery_is_idempotent() {
        let h = harness(config()).await;
        add_developer(&h.store, developer("dev_db", "dana", &["SQL", "PostgreSQL"], "senior")).await;

        assert!(h.service.assign(&bug("gh_42")).await.unwrap().is_assigned());
        let again = h.service.assign(&bug("gh_42")).await.unwrap();
        assert!(matches!(again, AssignmentOutcome::AlreadyAssigned { ref developer_id, .. } if developer_id == "dev_db"));

        assert_eq!(h.store.assignment_count(), 1);
        let status = h.store.get_developer_status("dev_db").await.unwrap().unwrap();
        assert_eq!(status.current_workload, 1);
        assert_eq!(h.tracker.assignments().len(), 1);
    }

    fn busy(developer_id: &str) -> DeveloperStatus {
        let mut status = DeveloperStatus::available(developer_id, now());
        status.availability = Availability::Busy;
        status
    }

    #[tokio::test]
    async fn status_change_after_scoring_forces_a_new_decision() {
        let h = harness(config()).await;
        add_developer(&h.store, developer("dev_db", "dana", &["SQL", "PostgreSQL", "Database"], "senior")).await;
        add_developer(&h.store, developer("dev_pg", "pat", &["SQL", "PostgreSQL", "Database"], "mid")).await;

        h.store.stage_status_change(busy("dev_db"));
        let outcome = h.service.assign(&bug("gh_42")).await.unwrap();
        assert_eq!(outcome.assignment().unwrap().developer_id, "dev_pg");

        let db = h.store.get_developer_status("dev_db").await.unwrap().unwrap();
        let pg = h.store.get_developer_status("dev_pg").await.unwrap().unwrap();
        assert_eq!((db.current_workload, pg.current_workload), (0, 1));
        assert_eq!(h.store.assignment_count(), 1);
    }

    #[tokio::test]
    async fn stale_only_candidate_is_not_assigned() {
        let h = harness(config()).await;
        add_developer(&h.store, developer("dev_db", "dana", &["SQL", "PostgreSQL"], "senior")).await;

        h.store.stage_status_change(busy("dev_db"));
        let outcome = h.service.assign(&bug("gh_42")).await.unwrap();
        assert!(matches!(outcome, AssignmentOutcome::ManualAssignmentRequired { .. }));
        assert_eq!(h.store.assignment_count(), 0);
    }

    #[tokio::test]
    async fn persistent_contention_is_retried_later() {
        let h = harness(config()).await;
        add_developer(&h.store, developer("dev_db", "dana", &["SQL", "PostgreSQL"], "senior")).await;

        for workload in 1..=MAX_DECISION_ATTEMPTS {
            let mut status = DeveloperStatus::available("dev_db", now());
            for _ in 0..workload {
                status.record_assignment(now());
            }
            h.store.stage_status_change(status);
        }
        let err = h.service.assign(&bug("gh_42")).await.unwrap_err();
        assert!(matches!(err, TriageError::Store(StoreError::Contention { .. })));
        assert!(err.is_transient());
        assert_eq!(h.store.assignment_count(), 0);
        let status = h.store.get_developer_status("dev_db").await.unwrap().unwrap();
        assert_eq!(status.current_workload, MAX_DECISION_ATTEMPTS as i32);
    }

    #[tokio::test]
    async fn empty_pool_escalates_at_alert_priority() {
        let h = harness(config()).await;
        let outcome = h.service.assign(&bug("gh_42")).await.unwrap();
        assert!(matches!(
            outcome,
            AssignmentOutcome::ManualAssignmentRequired { escalated: true, .. }
        ));

        let events = h.broker.receive("system_events_queue", 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].properties.priority, ALERT_PRIORITY);
        match decode(&events[0].payload).unwrap().message {
            TriageMessage::SystemEvent(e) => assert_eq!(e.event_type, MANUAL_ASSIGNMENT_REQUIRED),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn escalation_can_be_disabled() {
        let mut config = config();
        config.assignment.fallback_to_manual = false;
        let h = harness(config).await;
        let outcome = h.service.assign(&bug("gh_42")).await.unwrap();
        assert!(matches!(
            outcome,
            AssignmentOutcome::ManualAssignmentRequired { escalated: false, .. }
        ));
    }

    #[tokio::test]
    async fn tracker_failure_does_not_undo_assignment() {
        let h = harness(config()).await;
        add_developer(&h.store, developer("dev_db", "dana", &["SQL", "PostgreSQL"], "senior")).await;
        h.tracker.fail_next(TrackerError::Unauthorized("bad token".into()));

        let outcome = h.service.assign(&bug("gh_42")).await.unwrap();
        let AssignmentOutcome::Assigned { side_effects, .. } = outcome else {
            panic!("expected assignment");
        };
        assert!(!side_effects.tracker_updated);
        assert!(side_effects.notified);
        assert_eq!(h.store.assignment_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_tracker_failure_is_retried() {
        let h = harness(config()).await;
        add_developer(&h.store, developer("dev_db", "dana", &["SQL", "PostgreSQL"], "senior")).await;
        h.tracker.fail_next(TrackerError::Http { status: 502, message: "bad gateway".into() });

        let outcome = h.service.assign(&bug("gh_42")).await.unwrap();
        let AssignmentOutcome::Assigned { side_effects, .. } = outcome else {
            panic!("expected assignment");
        };
        assert!(side_effects.tracker_updated);
        assert_eq!(h.tracker.assignments().len(), 1);
    }

    #[tokio::test]
    async fn reassign_moves_to_other_developer() {
        let h = harness(config()).await;
        add_developer(&h.store, developer("dev_db", "dana", &["SQL", "PostgreSQL"], "senior")).await;
        add_developer(&h.store, developer("dev_b2", "bo", &["SQL", "PostgreSQL"], "mid")).await;

        let first = h.service.assign(&bug("gh_42")).await.unwrap();
        let original = first.assignment().cloned().unwrap();

        let successor = h.service.reassign(original.id).await.unwrap().unwrap();
        assert_ne!(successor.developer_id, original.developer_id);

        let old = h.store.get_assignment(original.id).await.unwrap().unwrap();
        assert!(!old.is_active());
        let active = h.store.active_assignment_for_bug("gh_42").await.unwrap().unwrap();
        assert_eq!(active.id, successor.id);
    }

    #[tokio::test]
    async fn reassign_without_alternative_escalates() {
        let h = harness(config()).await;
        add_developer(&h.store, developer("dev_db", "dana", &["SQL", "PostgreSQL"], "senior")).await;
        let original = h.service.assign(&bug("gh_42")).await.unwrap().assignment().cloned().unwrap();

        assert!(h.service.reassign(original.id).await.unwrap().is_none());
        assert!(h.store.get_assignment(original.id).await.unwrap().unwrap().is_active());
        assert_eq!(h.broker.ready_count("system_events_queue"), 1);
    }

    #[tokio::test]
    async fn handler_rejects_wrong_message_type() {
        let h = harness(config()).await;
        let handler = AssignmentHandler::new(Arc::new(h.service));
        let message = InboundMessage {
            message_type: crate::messaging::MessageType::SystemEvent,
            timestamp: now(),
            message: TriageMessage::SystemEvent(SystemEvent::new("ping", serde_json::json!({}), now())),
            failure_info: None,
            queue_name: "triaged_bugs_queue".into(),
            routing_key: "bug_triage.triaged_bugs".into(),
            delivery_tag: 1,
            redelivered: false,
        };
        assert!(matches!(
            handler.handle(&message).await,
            Err(HandlerError::Permanent(_))
        ));
    }
}
