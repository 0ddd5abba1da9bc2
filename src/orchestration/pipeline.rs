//! # Triage Pipeline
//!
//! Wires the handlers to their queues and owns the background workers:
//!
//! | Queue | Processor |
//! |-------|-----------|
//! | `new_bugs` | [`TriageHandler`] |
//! | `triaged_bugs` | [`AssignmentHandler`] |
//! | `developer_status` | [`DeveloperStatusHandler`] |
//! | `feedback` | [`FeedbackHandler`] |
//! | every `.dlq` | [`DeadLetterHandler`] |
//!
//! Assignments, notifications and system events are published for external
//! consumers and have no in-process handler.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::assignment_service::{AssignmentHandler, AssignmentService};
use super::context::TriageContext;
use super::feedback::{FeedbackHandler, FeedbackProcessor};
use super::periodic::PeriodicTask;
use super::status::{DeveloperStatusHandler, StatusRefresher};
use super::triage::{TriageHandler, TriageService};
use crate::error::Result;
use crate::logging::log_error;
use crate::messaging::{
    DeadLetterHandler, HandlerRegistry, MessageBroker, MessageType, QueueConsumer, Topology,
};

/// Queue keys that have an in-process handler
pub const HANDLED_QUEUE_KEYS: [&str; 4] = ["new_bugs", "triaged_bugs", "developer_status", "feedback"];

/// Registry with a handler for every message type the pipeline consumes
pub fn handler_registry(ctx: &TriageContext) -> HandlerRegistry {
    let registry = HandlerRegistry::new();
    registry.register(
        MessageType::BugReport,
        Arc::new(TriageHandler::new(TriageService::new(ctx.clone()))),
    );
    registry.register(
        MessageType::CategorizedBug,
        Arc::new(AssignmentHandler::new(Arc::new(AssignmentService::new(ctx.clone())))),
    );
    registry.register(
        MessageType::DeveloperStatusUpdate,
        Arc::new(DeveloperStatusHandler::new(ctx.clone())),
    );
    registry.register(
        MessageType::AssignmentFeedback,
        Arc::new(FeedbackHandler::new(FeedbackProcessor::new(ctx.clone()))),
    );
    registry
}

pub struct TriagePipeline {
    ctx: TriageContext,
    topology: Topology,
    consumers: Vec<QueueConsumer>,
    dead_letter_consumers: Vec<QueueConsumer>,
    status_task: parking_lot::Mutex<Option<PeriodicTask>>,
}

impl std::fmt::Debug for TriagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriagePipeline")
            .field("run_id", &self.ctx.run_id)
            .field("consumers", &self.consumers.len())
            .field("dead_letter_consumers", &self.dead_letter_consumers.len())
            .finish()
    }
}

impl TriagePipeline {
    pub fn new(ctx: TriageContext) -> Self {
        let topology = ctx.config.message_queue.topology();
        let broker = Arc::clone(ctx.publisher.broker());
        let consumer_config = ctx.config.message_queue.consumer_config();

        let registry = Arc::new(handler_registry(&ctx));
        let consumers = HANDLED_QUEUE_KEYS
            .iter()
            .filter_map(|key| topology.queue(key))
            .map(|queue| {
                QueueConsumer::new(
                    &queue.name,
                    Arc::clone(&broker),
                    registry.clone(),
                    consumer_config.clone(),
                )
            })
            .collect();

        let dead_letters = Arc::new(DeadLetterHandler::new(
            ctx.publisher.clone(),
            topology.clone(),
            ctx.config.dead_letter.retry_policy(),
        ));
        let dead_letter_consumers = topology
            .queues
            .iter()
            .map(|queue| {
                QueueConsumer::new(
                    &queue.dead_letter_queue,
                    Arc::clone(&broker),
                    dead_letters.clone(),
                    consumer_config.clone(),
                )
            })
            .collect();

        Self {
            ctx,
            topology,
            consumers,
            dead_letter_consumers,
            status_task: parking_lot::Mutex::new(None),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn queue_names(&self) -> Vec<&str> {
        self.consumers
            .iter()
            .chain(&self.dead_letter_consumers)
            .map(QueueConsumer::queue_name)
            .collect()
    }

    /// Declares the topology, starts every consumer and the status refresher
    pub async fn start(&self) -> Result<()> {
        self.ctx.publisher.broker().declare_topology(&self.topology).await?;
        for consumer in self.consumers.iter().chain(&self.dead_letter_consumers) {
            consumer.start();
        }

        let refresher = StatusRefresher::new(self.ctx.clone());
        let task = PeriodicTask::spawn(
            "developer_status_refresh",
            self.ctx.config.agents.developer_status_update_interval(),
            move || {
                let refresher = refresher.clone();
                async move {
                    if let Err(e) = refresher.refresh_all().await {
                        log_error("status_refresher", "refresh_all", &e.to_string(), None);
                    }
                }
            },
        );
        *self.status_task.lock() = Some(task);

        info!(
            run_id = %self.ctx.run_id,
            queues = self.consumers.len() + self.dead_letter_consumers.len(),
            "Triage pipeline started"
        );
        Ok(())
    }

    /// One batch from every queue on the calling task; returns messages settled
    pub async fn drain_once(&self) -> Result<usize> {
        let mut settled = 0;
        for consumer in self.consumers.iter().chain(&self.dead_letter_consumers) {
            settled += consumer.poll_once().await?;
        }
        Ok(settled)
    }

    /// Returns `false` if any worker missed the timeout
    pub async fn stop(&self, timeout: Duration) -> bool {
        let mut clean = true;
        let task = self.status_task.lock().take();
        if let Some(task) = task {
            clean &= task.stop(timeout).await;
        }
        for consumer in self.consumers.iter().chain(&self.dead_letter_consumers) {
            clean &= consumer.stop_with_timeout(timeout).await;
        }
        if !clean {
            warn!(run_id = %self.ctx.run_id, "Pipeline stopped with stragglers");
        }
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriageConfig;
    use crate::messaging::{InMemoryBroker, MessagePublisher, PublisherConfig};
    use crate::models::{BugReport, DeveloperProfile, DeveloperStatus};
    use crate::store::{InMemoryStore, TriageStore};
    use crate::tracker::RecordingTracker;
    use chrono::Utc;

    #[test]
    fn registry_covers_consumed_types() {
        let ctx = TriageContext::new(
            Arc::new(InMemoryStore::new()),
            MessagePublisher::new(Arc::new(InMemoryBroker::new()), PublisherConfig::default()),
            Arc::new(RecordingTracker::new()),
            TriageConfig::default(),
        );
        assert_eq!(
            handler_registry(&ctx).registered_types(),
            vec![
                MessageType::BugReport,
                MessageType::CategorizedBug,
                MessageType::AssignmentFeedback,
                MessageType::DeveloperStatusUpdate,
            ]
        );
    }

    #[tokio::test]
    async fn report_flows_through_to_assignment() {
        let store = Arc::new(InMemoryStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let tracker = Arc::new(RecordingTracker::new());
        let ctx = TriageContext::new(
            store.clone(),
            MessagePublisher::new(broker.clone(), PublisherConfig::default()),
            tracker.clone(),
            TriageConfig::default(),
        );

        store
            .save_developer(&DeveloperProfile {
                id: "dev_db".into(),
                name: "Dana".into(),
                github_username: "dana".into(),
                email: "dana@example.com".into(),
                skills: vec!["SQL".into(), "PostgreSQL".into(), "Database".into()],
                experience_level: "senior".into(),
                max_capacity: 5,
                preferred_categories: vec![],
                timezone: "UTC".into(),
                contributions: 120,
            })
            .await
            .unwrap();
        store
            .upsert_developer_status(&DeveloperStatus::available("dev_db", Utc::now()))
            .await
            .unwrap();

        let pipeline = TriagePipeline::new(ctx.clone());
        assert_eq!(pipeline.queue_names().len(), 4 + pipeline.topology().queues.len());
        broker.declare_topology(pipeline.topology()).await.unwrap();

        let report = BugReport::new(
            "github_77",
            "Slow SQL query on orders table",
            "The report query times out after the last migration added an index",
            "reporter",
            "github",
            Utc::now(),
        )
        .with_url("https://github.com/acme/shop/issues/77");
        assert!(ctx.publisher.publish_bug_report(&report).await);

        // triage output lands on a queue drained later in the same pass
        pipeline.drain_once().await.unwrap();
        pipeline.drain_once().await.unwrap();

        let assignment = store.active_assignment_for_bug("github_77").await.unwrap().unwrap();
        assert_eq!(assignment.developer_id, "dev_db");
        assert_eq!(tracker.assignments().len(), 1);
        assert_eq!(broker.ready_count("assignments_queue"), 1);
    }
}
