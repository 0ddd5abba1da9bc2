//! # Data Model
//!
//! Serde-serializable records shared by the engine, the message envelope and the store.
//! Each record validates itself; the store and the envelope decoder both call
//! `validate()` before accepting data.

pub mod assignment;
pub mod bug;
pub mod developer;
pub mod events;
pub mod validation;

// Re-export core models for easy access
pub use assignment::{Assignment, AssignmentFeedback};
pub use bug::{BugCategory, BugReport, CategorizedBug, Severity};
pub use developer::{Availability, DeveloperProfile, DeveloperStatus, ExperienceLevel};
pub use events::{BugSummary, DeveloperSummary, NotificationPayload, SystemEvent};
pub use validation::{ValidationError, ValidationResult};
