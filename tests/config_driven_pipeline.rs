//! Configuration files change pipeline behavior end to end.

mod common;

use bug_triage_core::config::loader::LoadOptions;
use bug_triage_core::config::ConfigManager;
use bug_triage_core::messaging::envelope::decode;
use bug_triage_core::messaging::TriageMessage;
use bug_triage_core::models::BugCategory;
use bug_triage_core::orchestration::{AssignmentOutcome, AssignmentService};
use common::{categorized_bug, DeveloperBuilder, Harness};
use std::collections::HashMap;
use std::io::Write;

fn load(toml: &str) -> bug_triage_core::config::TriageConfig {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    file.write_all(toml.as_bytes()).expect("write toml");

    let vars: HashMap<String, String> =
        [("GITHUB_TOKEN".to_string(), "ghp_test".to_string())].into();
    ConfigManager::load_with(LoadOptions {
        config_path: Some(file.path().to_path_buf()),
        required: true,
        vars: Some(vars),
        environment: Some("test".into()),
    })
    .expect("valid configuration")
    .config()
    .clone()
}

#[tokio::test]
async fn disabled_side_effects_are_skipped() {
    let config = load(
        r#"
[assignment]
enable_github_assignment = false
enable_notifications = false
"#,
    );
    let harness = Harness::with_config(config).await;
    harness
        .add_developer(
            DeveloperBuilder::new("dev_fe")
                .skills(&["JavaScript", "React", "CSS", "Frontend"])
                .experience("senior")
                .build(),
            0,
        )
        .await;

    let service = AssignmentService::new(harness.ctx.clone());
    let outcome = service
        .assign(&categorized_bug("github_51", BugCategory::Frontend))
        .await
        .unwrap();

    match outcome {
        AssignmentOutcome::Assigned { side_effects, .. } => {
            assert!(side_effects.published);
            assert!(!side_effects.tracker_updated);
            assert!(!side_effects.notified);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(harness.tracker.calls().is_empty());
    assert_eq!(harness.broker.ready_count("notifications_queue"), 0);
}

#[tokio::test]
async fn strict_threshold_escalates_to_manual_review() {
    let config = load(
        r#"
[assignment]
min_confidence_threshold = 0.95
fallback_confidence_floor = 0.9
"#,
    );
    let harness = Harness::with_config(config).await;
    harness
        .add_developer(DeveloperBuilder::new("dev_junior").experience("junior").build(), 3)
        .await;

    let outcome = AssignmentService::new(harness.ctx.clone())
        .assign(&categorized_bug("github_52", BugCategory::Security))
        .await
        .unwrap();
    assert!(!outcome.is_assigned());
    assert_eq!(harness.store.assignment_count(), 0);

    let events = harness.broker.peek_payloads("system_events_queue");
    assert_eq!(events.len(), 1);
    assert!(matches!(
        decode(&events[0]).unwrap().message,
        TriageMessage::SystemEvent(ref e) if e.event_type == "manual_assignment_required"
    ));
}
