//! End-to-end runs over the in-memory broker and store.

mod common;

use async_trait::async_trait;
use bug_triage_core::messaging::envelope::decode;
use bug_triage_core::messaging::{
    ConsumerConfig, DeadLetterHandler, HandlerError, HandlerRegistry, InboundMessage,
    MessageHandler, MessageType, QueueConsumer, RetryPolicy, Topology, TriageMessage,
};
use bug_triage_core::models::events::PERMANENT_MESSAGE_FAILURE;
use bug_triage_core::models::{AssignmentFeedback, BugCategory};
use bug_triage_core::orchestration::{
    handler_registry, FeedbackProcessor, StatusRefresher, TriagePipeline,
};
use bug_triage_core::state_machine::AssignmentState;
use bug_triage_core::store::TriageStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::{bug_report, categorized_bug, DeveloperBuilder, Harness};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn redelivered_bug_is_assigned_once() {
    let harness = Harness::new().await;
    harness
        .add_developer(
            DeveloperBuilder::new("dev_api")
                .skills(&["API", "REST", "Backend", "Python"])
                .experience("senior")
                .build(),
            0,
        )
        .await;

    let registry = Arc::new(handler_registry(&harness.ctx));
    let consumer = QueueConsumer::new(
        "triaged_bugs_queue",
        harness.broker.clone(),
        registry,
        ConsumerConfig::default(),
    );

    let bug = categorized_bug("github_41", BugCategory::Api);
    // the same message twice, as after a lost ack
    assert!(harness.ctx.publisher.publish_categorized_bug(&bug).await);
    assert!(harness.ctx.publisher.publish_categorized_bug(&bug).await);

    assert_eq!(consumer.poll_once().await.unwrap(), 2);
    assert_eq!(consumer.stats().successful, 2);
    assert_eq!(harness.store.assignment_count(), 1);
    assert_eq!(harness.tracker.assignments().len(), 1);
    assert_eq!(harness.broker.ready_count("assignments_queue"), 1);

    let status = harness
        .store
        .get_developer_status("dev_api")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.current_workload, 1);
}

struct AlwaysRejects {
    calls: AtomicUsize,
}

#[async_trait]
impl MessageHandler for AlwaysRejects {
    async fn handle(&self, _message: &InboundMessage) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::permanent("downstream refuses this report"))
    }
}

fn advance(offset: &Mutex<ChronoDuration>, by: ChronoDuration) {
    let mut offset = offset.lock();
    *offset = *offset + by;
}

#[tokio::test]
async fn fourth_failure_is_permanent_and_alerted() {
    let harness = Harness::new().await;
    let offset = Arc::new(Mutex::new(ChronoDuration::zero()));
    let clock_offset = offset.clone();
    let clock = move || -> DateTime<Utc> { Utc::now() + *clock_offset.lock() };

    let rejecting = Arc::new(AlwaysRejects {
        calls: AtomicUsize::new(0),
    });
    let registry = Arc::new(HandlerRegistry::new());
    registry.register(MessageType::BugReport, rejecting.clone());
    let main = QueueConsumer::new(
        "new_bugs_queue",
        harness.broker.clone(),
        registry,
        ConsumerConfig::default(),
    );
    let dead_letters = QueueConsumer::new(
        "new_bugs_queue.dlq",
        harness.broker.clone(),
        Arc::new(
            DeadLetterHandler::new(
                harness.ctx.publisher.clone(),
                Topology::default(),
                RetryPolicy::default(),
            )
            .with_clock(clock),
        ),
        ConsumerConfig::default(),
    );

    let report = bug_report("github_42", "Crash on save", "Saving a draft crashes the editor");
    assert!(harness.ctx.publisher.publish_bug_report(&report).await);

    // failure 1
    main.poll_once().await.unwrap();
    assert_eq!(harness.broker.ready_count("new_bugs_queue.dlq"), 1);

    // before the first delay the message waits on the DLQ
    dead_letters.poll_once().await.unwrap();
    assert_eq!(harness.broker.ready_count("new_bugs_queue.dlq"), 1);
    assert_eq!(harness.broker.ready_count("new_bugs_queue"), 0);

    // 5, 15 and 60 minute delays; each retry fails again
    for (attempt, wait_minutes) in [(1u32, 6i64), (2, 16), (3, 61)] {
        advance(&offset, ChronoDuration::minutes(wait_minutes));
        dead_letters.poll_once().await.unwrap();
        assert_eq!(harness.broker.ready_count("new_bugs_queue"), 1, "retry {attempt}");

        let payloads = harness.broker.peek_payloads("new_bugs_queue");
        let retried = decode(&payloads[0]).unwrap();
        assert_eq!(retried.failure_info.unwrap().failure_count, attempt);

        main.poll_once().await.unwrap();
        assert_eq!(harness.broker.ready_count("new_bugs_queue.dlq"), 1);
    }

    // the fourth failure is final
    advance(&offset, ChronoDuration::hours(2));
    dead_letters.poll_once().await.unwrap();
    assert_eq!(harness.broker.ready_count("new_bugs_queue"), 0);
    assert_eq!(harness.broker.ready_count("new_bugs_queue.dlq"), 0);
    assert_eq!(rejecting.calls.load(Ordering::SeqCst), 4);

    let alerts = harness.broker.peek_payloads("system_events_queue");
    assert_eq!(alerts.len(), 1);
    match decode(&alerts[0]).unwrap().message {
        TriageMessage::SystemEvent(event) => {
            assert_eq!(event.event_type, PERMANENT_MESSAGE_FAILURE);
            assert_eq!(event.details["failure_count"], 3);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn report_to_completed_assignment() {
    let harness = Harness::new().await;
    harness
        .add_developer(
            DeveloperBuilder::new("dev_db")
                .skills(&["SQL", "PostgreSQL", "Database"])
                .experience("senior")
                .capacity(1)
                .build(),
            0,
        )
        .await;

    let pipeline = TriagePipeline::new(harness.ctx.clone());
    let report = bug_report(
        "github_43",
        "Slow SQL query on orders table",
        "The report query times out after the last migration added an index",
    );
    assert!(harness.ctx.publisher.publish_bug_report(&report).await);
    pipeline.drain_once().await.unwrap();
    pipeline.drain_once().await.unwrap();

    let assignment = harness
        .store
        .active_assignment_for_bug("github_43")
        .await
        .unwrap()
        .expect("assigned");
    assert_eq!(assignment.developer_id, "dev_db");

    // capacity 1 reached
    let refreshed = StatusRefresher::new(harness.ctx.clone()).refresh_all().await.unwrap();
    assert_eq!(refreshed.changed, 1);

    let feedback = AssignmentFeedback::new(assignment.id, "dev_db", 5, true, Utc::now())
        .with_resolution_time(45);
    assert!(harness.ctx.publisher.publish_feedback(&feedback).await);
    pipeline.drain_once().await.unwrap();

    let stored = harness.store.get_assignment(assignment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AssignmentState::Completed);
    let history = harness.store.feedback_history(None).await.unwrap();
    assert_eq!(history["dev_db"][0].bug_category, Some(BugCategory::Database));

    // a second delivery of the same feedback is acknowledged, not dead-lettered
    assert!(harness.ctx.publisher.publish_feedback(&feedback).await);
    pipeline.drain_once().await.unwrap();
    assert_eq!(harness.broker.ready_count("feedback_queue.dlq"), 0);

    let processor = FeedbackProcessor::new(harness.ctx.clone());
    assert!(processor.record_feedback(feedback).await.is_err());
}
