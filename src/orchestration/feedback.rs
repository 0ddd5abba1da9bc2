//! Feedback intake: stores the rating, completes the assignment when a
//! resolution time is reported and refreshes the developer's confidence prior.
//!
//! The rating and the completion are one store write, so a failed completion
//! leaves no feedback behind and the redelivered message retries both.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::context::TriageContext;
use crate::engine::skill_confidence::category_confidence;
use crate::error::{Result, TriageError};
use crate::messaging::{HandlerError, InboundMessage, MessageHandler, TriageMessage};
use crate::models::{AssignmentFeedback, BugCategory, DeveloperStatus, ValidationError};
use crate::store::{StoreError, TriageStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackSummary {
    pub assignment_id: Uuid,
    pub developer_id: String,
    pub bug_category: Option<BugCategory>,
    /// The assignment was completed by this feedback
    pub completed: bool,
    /// Confidence prior per category over the lookback window
    pub category_confidence: BTreeMap<BugCategory, f64>,
    pub status: Option<DeveloperStatus>,
}

impl FeedbackSummary {
    /// Prior for the category of the rated bug, when known
    pub fn skill_confidence(&self) -> Option<f64> {
        self.bug_category
            .and_then(|c| self.category_confidence.get(&c).copied())
    }
}

#[derive(Debug, Clone)]
pub struct FeedbackProcessor {
    ctx: TriageContext,
}

impl FeedbackProcessor {
    pub fn new(ctx: TriageContext) -> Self {
        Self { ctx }
    }

    /// A second feedback for the same assignment fails with a store conflict
    #[instrument(skip(self, feedback), fields(assignment_id = %feedback.assignment_id))]
    pub async fn record_feedback(&self, mut feedback: AssignmentFeedback) -> Result<FeedbackSummary> {
        let store = &self.ctx.store;
        let assignment = store
            .get_assignment(feedback.assignment_id)
            .await?
            .ok_or_else(|| StoreError::not_found("assignment", feedback.assignment_id))?;

        if assignment.developer_id != feedback.developer_id {
            return Err(ValidationError::Invariant(format!(
                "feedback from {} for assignment {} held by {}",
                feedback.developer_id, assignment.id, assignment.developer_id
            ))
            .into());
        }

        if feedback.bug_category.is_none() {
            feedback.bug_category = store.get_bug(&assignment.bug_id).await?.map(|b| b.category);
        }
        feedback.validate()?;

        let complete_at = match feedback.resolution_time_minutes {
            Some(minutes) if assignment.is_active() => {
                Some(completion_time(assignment.assigned_at, minutes)?)
            }
            Some(_) => {
                debug!(status = %assignment.status, "Assignment already closed; not completing");
                None
            }
            None => None,
        };
        let completed = store
            .record_feedback(&feedback, complete_at)
            .await?
            .is_some();

        let since = self.ctx.now()
            - ChronoDuration::days(self.ctx.config.performance.skill_confidence_lookback_days);
        let history = store.feedback_history(Some(since)).await?;
        let confidence = history
            .get(&feedback.developer_id)
            .map(|entries| category_confidence(entries))
            .unwrap_or_else(|| category_confidence(&[]));

        let status = self.publish_status(store.as_ref(), &feedback.developer_id).await?;

        info!(
            developer_id = %feedback.developer_id,
            rating = feedback.rating,
            was_appropriate = feedback.was_appropriate,
            completed,
            "Feedback recorded"
        );

        Ok(FeedbackSummary {
            assignment_id: assignment.id,
            developer_id: feedback.developer_id,
            bug_category: feedback.bug_category,
            completed,
            category_confidence: confidence,
            status,
        })
    }

    async fn publish_status(
        &self,
        store: &dyn TriageStore,
        developer_id: &str,
    ) -> Result<Option<DeveloperStatus>> {
        let status = store.get_developer_status(developer_id).await?;
        if let Some(status) = &status {
            if !self.ctx.publisher.publish_developer_status_update(status).await {
                warn!(developer_id, "Developer status update not published");
            }
        }
        Ok(status)
    }
}

/// `assigned_at` plus the reported resolution time, when that instant exists
fn completion_time(
    assigned_at: DateTime<Utc>,
    minutes: i64,
) -> std::result::Result<DateTime<Utc>, ValidationError> {
    ChronoDuration::try_minutes(minutes)
        .and_then(|elapsed| assigned_at.checked_add_signed(elapsed))
        .ok_or_else(|| {
            ValidationError::out_of_range(
                "feedback.resolution_time_minutes",
                minutes,
                "a representable completion time",
            )
        })
}

/// Consumes `assignment_feedback` messages; a duplicate is acknowledged
#[derive(Debug, Clone)]
pub struct FeedbackHandler {
    processor: FeedbackProcessor,
}

impl FeedbackHandler {
    pub fn new(processor: FeedbackProcessor) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl MessageHandler for FeedbackHandler {
    async fn handle(&self, message: &InboundMessage) -> std::result::Result<(), HandlerError> {
        let TriageMessage::AssignmentFeedback(feedback) = &message.message else {
            return Err(HandlerError::permanent(format!(
                "feedback handler cannot process {}",
                message.message_type
            )));
        };
        match self.processor.record_feedback(feedback.clone()).await {
            Ok(_) => Ok(()),
            Err(TriageError::Store(e)) if e.is_conflict() => {
                debug!(assignment_id = %feedback.assignment_id, "Duplicate feedback ignored");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriageConfig;
    use crate::messaging::{InMemoryBroker, MessageBroker, MessagePublisher, PublisherConfig, Topology};
    use crate::models::{Assignment, BugReport, CategorizedBug, DeveloperProfile, Severity};
    use crate::state_machine::AssignmentState;
    use crate::store::InMemoryStore;
    use crate::tracker::RecordingTracker;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn inbound(feedback: AssignmentFeedback, redelivered: bool) -> InboundMessage {
        InboundMessage {
            message_type: crate::messaging::MessageType::AssignmentFeedback,
            timestamp: now(),
            message: TriageMessage::AssignmentFeedback(feedback),
            failure_info: None,
            queue_name: "feedback_queue".into(),
            routing_key: "bug_triage.feedback".into(),
            delivery_tag: 7,
            redelivered,
        }
    }

    async fn setup() -> (Arc<InMemoryStore>, Arc<InMemoryBroker>, FeedbackProcessor, Assignment) {
        let store = Arc::new(InMemoryStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        broker.declare_topology(&Topology::default()).await.unwrap();

        let developer = DeveloperProfile {
            id: "dev_a".into(),
            name: "Ann".into(),
            github_username: "ann".into(),
            email: "ann@example.com".into(),
            skills: vec!["SQL".into()],
            experience_level: "senior".into(),
            max_capacity: 5,
            preferred_categories: vec![],
            timezone: "UTC".into(),
            contributions: 10,
        };
        store.save_developer(&developer).await.unwrap();
        store
            .upsert_developer_status(&DeveloperStatus::available("dev_a", now()))
            .await
            .unwrap();
        let bug = CategorizedBug {
            bug_report: BugReport::new(
                "gh_1",
                "Deadlock in checkout",
                "Two checkout transactions deadlock on the orders table",
                "r",
                "github",
                now(),
            ),
            category: BugCategory::Database,
            severity: Severity::High,
            keywords: vec![],
            confidence_score: 0.8,
            analysis_timestamp: now(),
        };
        store.save_bug(&bug).await.unwrap();
        let assignment = Assignment::new("gh_1", "dev_a", 0.7, "match", now());
        store.record_assignment(&assignment).await.unwrap();

        let ctx = TriageContext::new(
            store.clone(),
            MessagePublisher::new(broker.clone(), PublisherConfig::default()),
            Arc::new(RecordingTracker::new()),
            TriageConfig::default(),
        )
        .with_clock(|| now() + ChronoDuration::hours(3));
        (store, broker, FeedbackProcessor::new(ctx), assignment)
    }

    #[tokio::test]
    async fn resolution_time_completes_assignment() {
        let (store, broker, processor, assignment) = setup().await;
        let feedback = AssignmentFeedback::new(assignment.id, "dev_a", 5, true, now() + ChronoDuration::hours(3))
            .with_resolution_time(120);

        let summary = processor.record_feedback(feedback).await.unwrap();
        assert!(summary.completed);
        assert_eq!(summary.bug_category, Some(BugCategory::Database));
        assert!(summary.skill_confidence().unwrap() > 0.5);
        assert_eq!(summary.status.as_ref().unwrap().current_workload, 0);

        let stored = store.get_assignment(assignment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AssignmentState::Completed);
        assert_eq!(stored.completed_at, Some(now() + ChronoDuration::minutes(120)));
        assert_eq!(broker.ready_count("developer_status_queue"), 1);
    }

    #[tokio::test]
    async fn feedback_without_resolution_keeps_assignment_open() {
        let (store, _broker, processor, assignment) = setup().await;
        let feedback = AssignmentFeedback::new(assignment.id, "dev_a", 2, false, now());

        let summary = processor.record_feedback(feedback).await.unwrap();
        assert!(!summary.completed);
        assert!(summary.skill_confidence().unwrap() < 0.5);
        assert!(store.get_assignment(assignment.id).await.unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn wrong_developer_is_rejected() {
        let (_store, _broker, processor, assignment) = setup().await;
        let feedback = AssignmentFeedback::new(assignment.id, "dev_z", 4, true, now());
        assert!(matches!(
            processor.record_feedback(feedback).await,
            Err(TriageError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_feedback_is_acknowledged_by_handler() {
        let (_store, _broker, processor, assignment) = setup().await;
        let feedback = AssignmentFeedback::new(assignment.id, "dev_a", 4, true, now());
        processor.record_feedback(feedback.clone()).await.unwrap();

        let err = processor.record_feedback(feedback.clone()).await.unwrap_err();
        assert!(matches!(err, TriageError::Store(ref e) if e.is_conflict()));

        let handler = FeedbackHandler::new(processor);
        assert_eq!(handler.handle(&inbound(feedback, true)).await, Ok(()));
    }

    #[tokio::test]
    async fn oversized_resolution_time_is_dead_lettered() {
        let (store, _broker, processor, assignment) = setup().await;
        let mut feedback = AssignmentFeedback::new(assignment.id, "dev_a", 4, true, now());
        feedback.resolution_time_minutes = Some(1_000_000_000_000);

        let err = processor.record_feedback(feedback.clone()).await.unwrap_err();
        assert!(matches!(err, TriageError::Validation(_)));

        let handler = FeedbackHandler::new(processor);
        assert!(matches!(
            handler.handle(&inbound(feedback, false)).await,
            Err(HandlerError::Permanent(_))
        ));
        assert!(store.feedback_for_assignment(assignment.id).await.unwrap().is_none());
        assert!(store.get_assignment(assignment.id).await.unwrap().unwrap().is_active());
    }

    #[test]
    fn unrepresentable_completion_time_is_a_validation_error() {
        assert!(completion_time(now(), i64::MAX).is_err());
        assert!(completion_time(DateTime::<Utc>::MAX_UTC, 1).is_err());
        assert_eq!(
            completion_time(now(), 90).unwrap(),
            now() + ChronoDuration::minutes(90)
        );
    }

    #[tokio::test]
    async fn failed_completion_is_retried_on_redelivery() {
        let (store, _broker, processor, assignment) = setup().await;
        let feedback = AssignmentFeedback::new(assignment.id, "dev_a", 5, true, now())
            .with_resolution_time(45);
        let handler = FeedbackHandler::new(processor);

        store.fail_next_completion(StoreError::Database("connection reset".into()));
        assert!(matches!(
            handler.handle(&inbound(feedback.clone(), false)).await,
            Err(HandlerError::Transient(_))
        ));
        assert!(store.feedback_for_assignment(assignment.id).await.unwrap().is_none());
        assert!(store.get_assignment(assignment.id).await.unwrap().unwrap().is_active());

        assert_eq!(handler.handle(&inbound(feedback, true)).await, Ok(()));
        let stored = store.get_assignment(assignment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AssignmentState::Completed);
        assert_eq!(stored.completed_at, Some(now() + ChronoDuration::minutes(45)));
        let status = store.get_developer_status("dev_a").await.unwrap().unwrap();
        assert_eq!(status.current_workload, 0);
    }

    #[tokio::test]
    async fn unknown_assignment_is_not_found() {
        let (_store, _broker, processor, _assignment) = setup().await;
        let feedback = AssignmentFeedback::new(Uuid::new_v4(), "dev_a", 4, true, now());
        let err = processor.record_feedback(feedback).await.unwrap_err();
        assert!(matches!(err, TriageError::Store(StoreError::NotFound { .. })));
        assert!(!err.is_transient());
    }
}
