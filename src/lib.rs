#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, RabbitMQ in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Bug Triage Core
//!
//! Assignment decision engine for incoming bug reports, plus the plumbing that
//! keeps it reliable: a JSON message envelope over a topic exchange, a retrying
//! publisher, polling consumers, a dead-letter handler with backoff, a token
//! bucket rate limiter and a circuit breaker in front of the issue tracker.
//!
//! ## Module Organization
//!
//! - [`models`] - Bug reports, developers, assignments and feedback
//! - [`classifier`] - Category and severity classification
//! - [`engine`] - Candidate scoring and developer selection
//! - [`state_machine`] - Assignment lifecycle
//! - [`store`] - Persistence behind the `TriageStore` trait (memory and Postgres)
//! - [`database`] - Connection pool and schema migrations
//! - [`messaging`] - Envelope, topology, broker providers, publisher, consumer, DLQ
//! - [`resilience`] - Rate limiter, circuit breaker, guarded calls
//! - [`tracker`] - Issue tracker seam and the GitHub client
//! - [`orchestration`] - Services and handlers that run the pipeline
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging
//! - [`error`] - Crate-wide error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bug_triage_core::config::TriageConfig;
//! use bug_triage_core::messaging::{InMemoryBroker, MessagePublisher, PublisherConfig};
//! use bug_triage_core::orchestration::{TriageContext, TriagePipeline};
//! use bug_triage_core::store::InMemoryStore;
//! use bug_triage_core::tracker::RecordingTracker;
//!
//! # async fn example() -> bug_triage_core::Result<()> {
//! let ctx = TriageContext::new(
//!     Arc::new(InMemoryStore::new()),
//!     MessagePublisher::new(Arc::new(InMemoryBroker::new()), PublisherConfig::default()),
//!     Arc::new(RecordingTracker::new()),
//!     TriageConfig::default(),
//! );
//! let pipeline = TriagePipeline::new(ctx);
//! pipeline.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! cargo test -- --ignored   # Postgres and RabbitMQ tests
//! ```

pub mod classifier;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod resilience;
pub mod state_machine;
pub mod store;
pub mod tracker;

pub use config::{ConfigManager, TriageConfig};
pub use engine::{AssignmentEngine, AssignmentResult, DecisionContext};
pub use error::{Result, TriageError};
pub use models::{
    Assignment, AssignmentFeedback, BugCategory, BugReport, CategorizedBug, DeveloperProfile,
    DeveloperStatus, Severity,
};
pub use orchestration::{TriageContext, TriagePipeline};
pub use store::{InMemoryStore, TriageStore};
