//! Constructor-injected dependencies of one pipeline run.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::classifier::ClassifierChain;
use crate::config::TriageConfig;
use crate::engine::AssignmentEngine;
use crate::messaging::MessagePublisher;
use crate::store::TriageStore;
use crate::tracker::IssueTracker;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Everything the handlers share. Cloning is cheap; all members are handles.
#[derive(Clone)]
pub struct TriageContext {
    pub store: Arc<dyn TriageStore>,
    pub publisher: MessagePublisher,
    pub tracker: Arc<dyn IssueTracker>,
    pub engine: AssignmentEngine,
    pub classifier: ClassifierChain,
    pub config: Arc<TriageConfig>,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    clock: Clock,
}

impl std::fmt::Debug for TriageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriageContext")
            .field("run_id", &self.run_id)
            .field("started_at", &self.started_at)
            .field("tracker", &self.tracker.name())
            .field("engine", self.engine.config())
            .finish()
    }
}

impl TriageContext {
    /// Engine and classifier are derived from `config`
    pub fn new(
        store: Arc<dyn TriageStore>,
        publisher: MessagePublisher,
        tracker: Arc<dyn IssueTracker>,
        config: TriageConfig,
    ) -> Self {
        let engine = AssignmentEngine::new(config.assignment.engine_config());
        let classifier = ClassifierChain::rules_only(config.assignment.manual_review_floor);
        Self {
            store,
            publisher,
            tracker,
            engine,
            classifier,
            config: Arc::new(config),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_classifier(mut self, classifier: ClassifierChain) -> Self {
        self.classifier = classifier;
        self
    }

    /// Substitutes the time source; `started_at` follows it
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self.started_at = (self.clock)();
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{InMemoryBroker, PublisherConfig};
    use crate::store::InMemoryStore;
    use crate::tracker::recording::RecordingTracker;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_drives_now_and_start() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let ctx = TriageContext::new(
            Arc::new(InMemoryStore::new()),
            MessagePublisher::new(Arc::new(InMemoryBroker::new()), PublisherConfig::default()),
            Arc::new(RecordingTracker::new()),
            TriageConfig::default(),
        )
        .with_clock(move || at);

        assert_eq!(ctx.now(), at);
        assert_eq!(ctx.started_at, at);
        assert_eq!(ctx.engine.config().min_confidence_threshold, 0.5);
    }
}
