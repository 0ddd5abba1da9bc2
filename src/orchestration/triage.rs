//! Categorizes raw bug reports and forwards them to assignment.

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use super::context::TriageContext;
use crate::classifier::TriageOutcome;
use crate::error::{Result, TriageError};
use crate::logging::log_assignment_decision;
use crate::messaging::topology::ALERT_PRIORITY;
use crate::messaging::{HandlerError, InboundMessage, MessageHandler, TriageMessage};
use crate::models::{BugReport, SystemEvent};

#[derive(Debug, Clone)]
pub struct TriageService {
    ctx: TriageContext,
}

impl TriageService {
    pub fn new(ctx: TriageContext) -> Self {
        Self { ctx }
    }

    /// Classifies `report` and publishes the result: a categorized bug for the
    /// assignment queue, or a manual-review escalation
    #[instrument(skip(self, report), fields(bug_id = %report.id))]
    pub async fn triage(&self, report: &BugReport) -> Result<TriageOutcome> {
        report.validate()?;
        let outcome = self.ctx.classifier.triage(report, self.ctx.now()).await;

        match &outcome {
            TriageOutcome::Categorized { bug, source } => {
                info!(
                    category = %bug.category,
                    severity = %bug.severity,
                    confidence = bug.confidence_score,
                    classifier = %source,
                    "Bug categorized"
                );
                if !self.ctx.publisher.publish_categorized_bug(bug).await {
                    return Err(TriageError::publish_failed("categorized bug"));
                }
            }
            TriageOutcome::NeedsManualReview { bug, reason } => {
                warn!(confidence = bug.confidence_score, reason = %reason, "Bug needs manual review");
                log_assignment_decision(bug.id(), None, None, "manual_review", Some(reason));
                let event = SystemEvent::manual_assignment_required(bug, reason, self.ctx.now());
                if !self.ctx.publisher.publish_system_event(&event, ALERT_PRIORITY).await {
                    return Err(TriageError::publish_failed("manual review escalation"));
                }
            }
        }
        Ok(outcome)
    }
}

/// Consumes `bug_report` messages
#[derive(Debug, Clone)]
pub struct TriageHandler {
    service: TriageService,
}

impl TriageHandler {
    pub fn new(service: TriageService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl MessageHandler for TriageHandler {
    async fn handle(&self, message: &InboundMessage) -> std::result::Result<(), HandlerError> {
        let TriageMessage::BugReport(report) = &message.message else {
            return Err(HandlerError::permanent(format!(
                "triage handler cannot process {}",
                message.message_type
            )));
        };
        self.service
            .triage(report)
            .await
            .map(|_| ())
            .map_err(HandlerError::from)
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
    use crate::models::BugCategory;
    use crate::store::InMemoryStore;
    use crate::tracker::RecordingTracker;
    use chrono::Utc;
    use std::sync::Arc;

    async fn service() -> (Arc<InMemoryBroker>, TriageService) {
        let broker = Arc::new(InMemoryBroker::new());
        broker.declare_topology(&Topology::default()).await.unwrap();
        let ctx = TriageContext::new(
            Arc::new(InMemoryStore::new()),
            MessagePublisher::new(broker.clone(), PublisherConfig::default()),
            Arc::new(RecordingTracker::new()),
            TriageConfig::default(),
        );
        (broker, TriageService::new(ctx))
    }

    #[tokio::test]
    async fn categorized_bug_goes_to_triaged_queue() {
        let (broker, service) = service().await;
        let report = BugReport::new(
            "github_1",
            "Slow SQL query on orders table",
            "The report query times out after the last migration added an index",
            "reporter",
            "github",
            Utc::now(),
        );

        let outcome = service.triage(&report).await.unwrap();
        assert!(!outcome.needs_manual_review());

        let deliveries = broker.receive("triaged_bugs_queue", 10).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        match decode(&deliveries[0].payload).unwrap().message {
            TriageMessage::CategorizedBug(bug) => {
                assert_eq!(bug.category, BugCategory::Database);
                assert_eq!(bug.bug_report, report);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn vague_report_is_escalated() {
        let (broker, service) = service().await;
        let report = BugReport::new(
            "github_2",
            "Question",
            "Something unrelated happened yesterday",
            "reporter",
            "github",
            Utc::now(),
        );

        let outcome = service.triage(&report).await.unwrap();
        assert!(outcome.needs_manual_review());
        assert_eq!(broker.ready_count("triaged_bugs_queue"), 0);
        let events = broker.receive("system_events_queue", 10).await.unwrap();
        assert_eq!(events[0].properties.priority, ALERT_PRIORITY);
    }

    #[tokio::test]
    async fn invalid_report_is_permanent_failure() {
        let (_broker, service) = service().await;
        let report = BugReport::new("bad id!", "", "short", "reporter", "github", Utc::now());
        let handler = TriageHandler::new(service);
        let message = InboundMessage {
            message_type: crate::messaging::MessageType::BugReport,
            timestamp: Utc::now(),
            message: TriageMessage::BugReport(report),
            failure_info: None,
            queue_name: "new_bugs_queue".into(),
            routing_key: "bug_triage.new_bugs".into(),
            delivery_tag: 1,
            redelivered: false,
        };
        assert!(matches!(
            handler.handle(&message).await,
            Err(HandlerError::Permanent(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn publish_failure_is_transient() {
        let (broker, service) = service().await;
        broker.fail_next_publishes(10);
        let report = BugReport::new(
            "github_3",
            "Slow SQL query on orders table",
            "The report query times out after the last migration added an index",
            "reporter",
            "github",
            Utc::now(),
        );
        let err = service.triage(&report).await.unwrap_err();
        assert!(err.is_transient());
    }
}
