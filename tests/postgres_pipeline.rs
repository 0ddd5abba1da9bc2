//! Assignment flow against a real PostgreSQL store.

mod common;

use bug_triage_core::config::TriageConfig;
use bug_triage_core::database::{DatabaseConnection, MigrationRunner};
use bug_triage_core::messaging::{
    InMemoryBroker, MessageBroker, MessagePublisher, PublisherConfig, Topology,
};
use bug_triage_core::models::{BugCategory, DeveloperStatus};
use bug_triage_core::orchestration::{AssignmentService, TriageContext};
use bug_triage_core::store::{PgStore, TriageStore};
use bug_triage_core::tracker::RecordingTracker;
use chrono::Utc;
use common::{categorized_bug, DeveloperBuilder};
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
#[ignore = "requires a PostgreSQL database at DATABASE_URL"]
async fn repeated_assignment_is_idempotent_in_postgres() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let db = DatabaseConnection::connect_url(&url, 5).await.unwrap();
    MigrationRunner::new(db.pool().clone()).migrate_up().await.unwrap();
    let store = Arc::new(PgStore::new(db.pool().clone()));

    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    let dev_id = format!("dev_{suffix}");
    let developer = DeveloperBuilder::new(&dev_id)
        .skills(&["API", "REST", "Backend"])
        .experience("senior")
        .build();
    assert!(store.save_developer(&developer).await.unwrap());
    store
        .upsert_developer_status(&DeveloperStatus::available(&dev_id, Utc::now()))
        .await
        .unwrap();

    let broker = Arc::new(InMemoryBroker::new());
    broker.declare_topology(&Topology::default()).await.unwrap();
    let mut config = TriageConfig::default();
    config.assignment.enable_github_assignment = false;
    let ctx = TriageContext::new(
        store.clone(),
        MessagePublisher::new(broker, PublisherConfig::default()),
        Arc::new(RecordingTracker::new()),
        config,
    );
    let service = AssignmentService::new(ctx);

    // unique bug id per run; other developers may exist in a shared database
    let bug = categorized_bug(&format!("github_{}", u32::from_str_radix(suffix, 16).unwrap()), BugCategory::Api);
    let first = service.assign(&bug).await.unwrap();
    let second = service.assign(&bug).await.unwrap();
    assert!(first.is_assigned());
    assert!(!second.is_assigned());

    let assignment = store.active_assignment_for_bug(bug.id()).await.unwrap().unwrap();
    assert_eq!(Some(assignment.id), first.assignment().map(|a| a.id));
}
