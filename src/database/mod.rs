//! # Database
//!
//! PostgreSQL connection pooling and the versioned schema migrations the
//! relational store depends on.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use bug_triage_core::database::{DatabaseConnection, MigrationRunner};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = DatabaseConnection::connect_url("postgresql://localhost/smart_bug_triage", 5).await?;
//! let runner = MigrationRunner::new(db.pool().clone());
//! let applied = runner.migrate_up().await?;
//! println!("applied {} migrations", applied.len());
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod migrations;

pub use connection::DatabaseConnection;
pub use migrations::{all_migrations, Migration, MigrationError, MigrationRunner, MigrationStatus};
