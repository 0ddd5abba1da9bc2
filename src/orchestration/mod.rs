//! # Orchestration
//!
//! The services that turn queue messages into triage work. Every service is
//! built from a [`TriageContext`] holding the store, the publisher, the issue
//! tracker, the decision engine and the configuration.
//!
//! - [`TriageService`]: classifies bug reports and forwards them
//! - [`AssignmentService`]: picks a developer, records the assignment and
//!   applies its side effects
//! - [`FeedbackProcessor`]: stores feedback and completes assignments
//! - [`PerformanceTracker`]: reports developer performance and assignment accuracy
//! - [`StatusRefresher`]: keeps developer workload in step with assignments
//! - [`RepositoryMonitor`]: polls a repository for new issues
//! - [`DeveloperDiscovery`]: builds developer profiles from contributors
//! - [`TriagePipeline`]: runs consumers for all of the above

pub mod assignment_service;
pub mod context;
pub mod discovery;
pub mod feedback;
pub mod monitor;
pub mod performance;
pub mod periodic;
pub mod pipeline;
pub mod status;
pub mod triage;

pub use assignment_service::{
    AssignmentHandler, AssignmentOutcome, AssignmentService, DecisionPath, SideEffects,
};
pub use context::{Clock, TriageContext};
pub use discovery::{DeveloperDiscovery, DiscoverySummary};
pub use feedback::{FeedbackHandler, FeedbackProcessor, FeedbackSummary};
pub use monitor::{MonitorPollStats, RepositoryMonitor, StopMarker};
pub use performance::{
    AccuracyReport, LowPerformingAreas, PerformanceMetrics, PerformanceTracker, PerformanceTrend,
};
pub use periodic::PeriodicTask;
pub use pipeline::{handler_registry, TriagePipeline};
pub use status::{DeveloperStatusHandler, StatusRefreshSummary, StatusRefresher};
pub use triage::{TriageHandler, TriageService};
