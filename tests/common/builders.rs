//! Builders for developers, bugs and a fully wired in-memory pipeline.

#![allow(dead_code)]

use bug_triage_core::config::TriageConfig;
use bug_triage_core::messaging::{
    InMemoryBroker, MessageBroker, MessagePublisher, PublisherConfig, Topology,
};
use bug_triage_core::models::{
    Availability, BugCategory, BugReport, CategorizedBug, DeveloperProfile, DeveloperStatus,
    Severity,
};
use bug_triage_core::orchestration::TriageContext;
use bug_triage_core::store::{InMemoryStore, TriageStore};
use bug_triage_core::tracker::RecordingTracker;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Builder for developer profiles with sensible defaults
pub struct DeveloperBuilder {
    profile: DeveloperProfile,
}

impl DeveloperBuilder {
    pub fn new(id: &str) -> Self {
        let login = id.replace('_', "-");
        Self {
            profile: DeveloperProfile {
                id: id.to_string(),
                name: id.to_string(),
                email: format!("{login}@example.com"),
                github_username: login,
                skills: vec!["General".to_string()],
                experience_level: "mid".to_string(),
                max_capacity: 5,
                preferred_categories: Vec::new(),
                timezone: "UTC".to_string(),
                contributions: 100,
            },
        }
    }

    pub fn skills(mut self, skills: &[&str]) -> Self {
        self.profile.skills = skills.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn experience(mut self, level: &str) -> Self {
        self.profile.experience_level = level.to_string();
        self
    }

    pub fn capacity(mut self, max_capacity: u32) -> Self {
        self.profile.max_capacity = max_capacity;
        self
    }

    pub fn contributions(mut self, contributions: u32) -> Self {
        self.profile.contributions = contributions;
        self
    }

    pub fn build(self) -> DeveloperProfile {
        self.profile
    }
}

pub fn status(
    developer_id: &str,
    workload: i32,
    availability: Availability,
    now: DateTime<Utc>,
) -> DeveloperStatus {
    let mut status = DeveloperStatus::available(developer_id, now);
    status.current_workload = workload;
    status.open_issues_count = workload;
    status.availability = availability;
    status
}

pub fn bug_report(id: &str, title: &str, description: &str) -> BugReport {
    BugReport::new(id, title, description, "reporter", "github", fixed_now())
        .with_url(format!("https://github.com/acme/shop/issues/{}", id.trim_start_matches("github_")))
}

pub fn categorized_bug(id: &str, category: BugCategory) -> CategorizedBug {
    CategorizedBug {
        bug_report: bug_report(
            id,
            "Checkout fails under load",
            "Requests to the checkout service fail intermittently during the sale",
        ),
        category,
        severity: Severity::High,
        keywords: vec![],
        confidence_score: 0.8,
        analysis_timestamp: fixed_now(),
    }
}

/// In-memory store, broker and tracker behind one context
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub broker: Arc<InMemoryBroker>,
    pub tracker: Arc<RecordingTracker>,
    pub ctx: TriageContext,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(TriageConfig::default()).await
    }

    pub async fn with_config(config: TriageConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        broker
            .declare_topology(&Topology::default())
            .await
            .expect("declare topology");
        let tracker = Arc::new(RecordingTracker::new());
        let ctx = TriageContext::new(
            store.clone(),
            MessagePublisher::new(broker.clone(), PublisherConfig::default()),
            tracker.clone(),
            config,
        );
        Self {
            store,
            broker,
            tracker,
            ctx,
        }
    }

    pub async fn add_developer(&self, profile: DeveloperProfile, workload: i32) {
        let id = profile.id.clone();
        self.store.save_developer(&profile).await.expect("save developer");
        self.store
            .upsert_developer_status(&status(&id, workload, Availability::Available, Utc::now()))
            .await
            .expect("save status");
    }
}
