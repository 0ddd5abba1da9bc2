//! # Schema Migrations
//!
//! Versioned up/down SQL pairs compiled into the binary. Each applied version is
//! recorded in `schema_migrations` together with a checksum of its definition:
//! the first 16 hex characters of `sha256(version + description + up_sql)`.
//! A recorded checksum that no longer matches the compiled migration is drift,
//! and `migrate_up` refuses to run until it is resolved.
//!
//! Each migration and its bookkeeping row commit in one transaction.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

const MIGRATION_TABLE: &str = "schema_migrations";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Database error during migration: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Applied migrations changed since they ran: {}", .versions.join(", "))]
    Drift { versions: Vec<String> },

    #[error("Applied migration {0} has no definition in this build")]
    UnknownVersion(String),

    #[error("Rollback target {0} is not an applied migration")]
    UnknownTarget(String),
}

/// One schema change
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: &'static str,
    pub description: &'static str,
    pub up_sql: &'static [&'static str],
    pub down_sql: &'static [&'static str],
}

impl Migration {
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.version.as_bytes());
        hasher.update(self.description.as_bytes());
        for statement in self.up_sql {
            hasher.update(statement.as_bytes());
        }
        let digest = hasher.finalize();
        digest
            .iter()
            .take(8)
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}

static MIGRATIONS: [Migration; 3] = [
    Migration {
        version: "001_initial_schema",
        description: "Create initial database schema",
        up_sql: &[
            "CREATE TABLE IF NOT EXISTS bugs (
                id VARCHAR(255) PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                reporter VARCHAR(255) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                platform VARCHAR(50) NOT NULL,
                url TEXT,
                labels JSONB NOT NULL DEFAULT '[]',
                raw_data JSONB NOT NULL DEFAULT '{}',
                category VARCHAR(50) NOT NULL,
                severity VARCHAR(20) NOT NULL,
                keywords JSONB NOT NULL DEFAULT '[]',
                confidence_score DOUBLE PRECISION NOT NULL
                    CHECK (confidence_score >= 0 AND confidence_score <= 1),
                analysis_timestamp TIMESTAMPTZ NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS developers (
                id VARCHAR(255) PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                github_username VARCHAR(255) NOT NULL,
                email VARCHAR(255) NOT NULL,
                skills JSONB NOT NULL DEFAULT '[]',
                experience_level VARCHAR(50) NOT NULL,
                max_capacity INTEGER NOT NULL CHECK (max_capacity BETWEEN 1 AND 50),
                preferred_categories JSONB NOT NULL DEFAULT '[]',
                timezone VARCHAR(50) NOT NULL DEFAULT 'UTC',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            "CREATE TABLE IF NOT EXISTS developer_status (
                developer_id VARCHAR(255) PRIMARY KEY
                    REFERENCES developers(id) ON DELETE CASCADE,
                current_workload INTEGER NOT NULL DEFAULT 0 CHECK (current_workload >= 0),
                open_issues_count INTEGER NOT NULL DEFAULT 0 CHECK (open_issues_count >= 0),
                complexity_score DOUBLE PRECISION NOT NULL DEFAULT 0,
                availability VARCHAR(20) NOT NULL DEFAULT 'available',
                calendar_free BOOLEAN NOT NULL DEFAULT TRUE,
                focus_time_active BOOLEAN NOT NULL DEFAULT FALSE,
                last_activity_timestamp TIMESTAMPTZ NOT NULL,
                last_updated TIMESTAMPTZ NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS assignments (
                id UUID PRIMARY KEY,
                bug_id VARCHAR(255) NOT NULL REFERENCES bugs(id),
                developer_id VARCHAR(255) NOT NULL REFERENCES developers(id),
                assigned_at TIMESTAMPTZ NOT NULL,
                assignment_reason TEXT NOT NULL,
                confidence_score DOUBLE PRECISION NOT NULL
                    CHECK (confidence_score >= 0 AND confidence_score <= 1),
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                completed_at TIMESTAMPTZ,
                CONSTRAINT assignments_bug_developer_key UNIQUE (bug_id, developer_id),
                CONSTRAINT assignments_completed_after_assigned
                    CHECK (completed_at IS NULL OR completed_at >= assigned_at)
            )",
            "CREATE TABLE IF NOT EXISTS assignment_feedback (
                id UUID PRIMARY KEY,
                assignment_id UUID NOT NULL UNIQUE REFERENCES assignments(id),
                developer_id VARCHAR(255) NOT NULL REFERENCES developers(id),
                rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                comments TEXT,
                resolution_time_minutes BIGINT CHECK (resolution_time_minutes >= 0),
                was_appropriate BOOLEAN NOT NULL,
                feedback_timestamp TIMESTAMPTZ NOT NULL,
                bug_category VARCHAR(50)
            )",
        ],
        down_sql: &[
            "DROP TABLE IF EXISTS assignment_feedback",
            "DROP TABLE IF EXISTS assignments",
            "DROP TABLE IF EXISTS developer_status",
            "DROP TABLE IF EXISTS developers",
            "DROP TABLE IF EXISTS bugs",
        ],
    },
    Migration {
        version: "002_add_indexes",
        description: "Add lookup indexes",
        up_sql: &[
            "CREATE INDEX IF NOT EXISTS idx_bugs_created_at ON bugs(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_bugs_category ON bugs(category)",
            "CREATE INDEX IF NOT EXISTS idx_bugs_severity ON bugs(severity)",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_developers_github_username \
             ON developers(LOWER(github_username))",
            "CREATE INDEX IF NOT EXISTS idx_developer_status_availability \
             ON developer_status(availability)",
            "CREATE INDEX IF NOT EXISTS idx_assignments_developer_id ON assignments(developer_id)",
            "CREATE INDEX IF NOT EXISTS idx_assignments_status ON assignments(status)",
            "CREATE INDEX IF NOT EXISTS idx_feedback_developer_time \
             ON assignment_feedback(developer_id, feedback_timestamp)",
        ],
        down_sql: &[
            "DROP INDEX IF EXISTS idx_feedback_developer_time",
            "DROP INDEX IF EXISTS idx_assignments_status",
            "DROP INDEX IF EXISTS idx_assignments_developer_id",
            "DROP INDEX IF EXISTS idx_developer_status_availability",
            "DROP INDEX IF EXISTS idx_developers_github_username",
            "DROP INDEX IF EXISTS idx_bugs_severity",
            "DROP INDEX IF EXISTS idx_bugs_category",
            "DROP INDEX IF EXISTS idx_bugs_created_at",
        ],
    },
    Migration {
        version: "003_developer_contributions",
        description: "Track observed contribution counts",
        up_sql: &[
            "ALTER TABLE developers ADD COLUMN IF NOT EXISTS contributions INTEGER NOT NULL DEFAULT 0",
        ],
        down_sql: &["ALTER TABLE developers DROP COLUMN IF EXISTS contributions"],
    },
];

/// Every migration in version order
pub fn all_migrations() -> &'static [Migration] {
    &MIGRATIONS
}

/// Row of `schema_migrations`
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct AppliedMigration {
    pub version: String,
    pub description: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationStatus {
    pub applied: Vec<String>,
    pub pending: Vec<String>,
    /// Applied versions whose recorded checksum differs from this build
    pub drifted: Vec<String>,
    /// Applied versions this build does not know
    pub unknown: Vec<String>,
    pub total: usize,
}

impl MigrationStatus {
    pub fn up_to_date(&self) -> bool {
        self.pending.is_empty() && self.drifted.is_empty()
    }
}

/// Compares compiled migrations with what the database has recorded
pub fn plan_status(migrations: &[Migration], applied: &[AppliedMigration]) -> MigrationStatus {
    let recorded: HashMap<&str, &AppliedMigration> =
        applied.iter().map(|a| (a.version.as_str(), a)).collect();

    let mut status = MigrationStatus {
        total: migrations.len(),
        ..MigrationStatus::default()
    };
    for migration in migrations {
        match recorded.get(migration.version) {
            Some(row) => {
                status.applied.push(migration.version.to_string());
                if row.checksum != migration.checksum() {
                    status.drifted.push(migration.version.to_string());
                }
            }
            None => status.pending.push(migration.version.to_string()),
        }
    }
    status.unknown = applied
        .iter()
        .filter(|a| !migrations.iter().any(|m| m.version == a.version))
        .map(|a| a.version.clone())
        .collect();
    status
}

/// Versions to roll back, newest first. With a target, everything applied
/// after it is rolled back and the target itself stays.
pub fn plan_rollback(
    applied: &[AppliedMigration],
    target: Option<&str>,
) -> Result<Vec<String>, MigrationError> {
    let mut versions: Vec<&str> = applied.iter().map(|a| a.version.as_str()).collect();
    versions.sort_unstable();

    if let Some(target) = target {
        if !versions.contains(&target) {
            return Err(MigrationError::UnknownTarget(target.to_string()));
        }
        versions.retain(|v| *v > target);
    }

    Ok(versions.into_iter().rev().map(str::to_string).collect())
}

#[derive(Debug, Clone)]
pub struct MigrationRunner {
    pool: PgPool,
    migrations: &'static [Migration],
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            migrations: all_migrations(),
        }
    }

    async fn ensure_table(&self) -> Result<(), MigrationError> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {MIGRATION_TABLE} (
                version VARCHAR(50) PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                checksum VARCHAR(64) NOT NULL
            )"
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn applied(&self) -> Result<Vec<AppliedMigration>, MigrationError> {
        self.ensure_table().await?;
        let rows = sqlx::query_as::<_, AppliedMigration>(&format!(
            "SELECT version, description, checksum, applied_at FROM {MIGRATION_TABLE} \
             ORDER BY version"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn status(&self) -> Result<MigrationStatus, MigrationError> {
        let applied = self.applied().await?;
        Ok(plan_status(self.migrations, &applied))
    }

    /// Applies every pending migration; returns the versions applied
    pub async fn migrate_up(&self) -> Result<Vec<String>, MigrationError> {
        let status = self.status().await?;
        if !status.drifted.is_empty() {
            return Err(MigrationError::Drift {
                versions: status.drifted,
            });
        }

        let mut applied = Vec::with_capacity(status.pending.len());
        for migration in self
            .migrations
            .iter()
            .filter(|m| status.pending.iter().any(|p| p == m.version))
        {
            info!(
                version = migration.version,
                description = migration.description,
                "Applying migration"
            );
            let mut tx = self.pool.begin().await?;
            for statement in migration.up_sql {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query(&format!(
                "INSERT INTO {MIGRATION_TABLE} (version, description, checksum) VALUES ($1, $2, $3)"
            ))
            .bind(migration.version)
            .bind(migration.description)
            .bind(migration.checksum())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            applied.push(migration.version.to_string());
        }

        if applied.is_empty() {
            info!("Schema is up to date");
        }
        Ok(applied)
    }

    /// Rolls back to `target` (exclusive), or everything when `None`
    pub async fn migrate_down(&self, target: Option<&str>) -> Result<Vec<String>, MigrationError> {
        let applied = self.applied().await?;
        let plan = plan_rollback(&applied, target)?;

        let mut rolled_back = Vec::with_capacity(plan.len());
        for version in plan {
            let migration = self
                .migrations
                .iter()
                .find(|m| m.version == version)
                .ok_or_else(|| MigrationError::UnknownVersion(version.clone()))?;

            warn!(version = migration.version, "Rolling back migration");
            let mut tx = self.pool.begin().await?;
            for statement in migration.down_sql {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query(&format!("DELETE FROM {MIGRATION_TABLE} WHERE version = $1"))
                .bind(migration.version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            rolled_back.push(version);
        }
        Ok(rolled_back)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applied(version: &str, checksum: String) -> AppliedMigration {
        AppliedMigration {
            version: version.to_string(),
            description: String::new(),
            checksum,
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn checksum_is_sixteen_hex_and_stable() {
        let first = all_migrations()[0];
        let checksum = first.checksum();
        assert_eq!(checksum.len(), 16);
        assert!(checksum.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(checksum, first.checksum());
        assert_ne!(checksum, all_migrations()[1].checksum());
    }

    #[test]
    fn checksum_covers_definition() {
        let original = all_migrations()[2];
        let edited = Migration {
            up_sql: &["ALTER TABLE developers ADD COLUMN contributions BIGINT"],
            ..original
        };
        assert_ne!(original.checksum(), edited.checksum());
    }

    #[test]
    fn versions_are_ordered_and_unique() {
        let versions: Vec<_> = all_migrations().iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn status_reports_pending_and_drift() {
        let migrations = all_migrations();
        let rows = vec![
            applied(migrations[0].version, migrations[0].checksum()),
            applied(migrations[1].version, "0000000000000000".into()),
            applied("000_legacy", "abcd".into()),
        ];

        let status = plan_status(migrations, &rows);
        assert_eq!(status.applied.len(), 2);
        assert_eq!(status.pending, vec![migrations[2].version.to_string()]);
        assert_eq!(status.drifted, vec![migrations[1].version.to_string()]);
        assert_eq!(status.unknown, vec!["000_legacy".to_string()]);
        assert_eq!(status.total, 3);
        assert!(!status.up_to_date());

        let clean: Vec<_> = migrations
            .iter()
            .map(|m| applied(m.version, m.checksum()))
            .collect();
        assert!(plan_status(migrations, &clean).up_to_date());
    }

    #[test]
    fn rollback_plan_is_newest_first_and_keeps_target() {
        let rows: Vec<_> = all_migrations()
            .iter()
            .map(|m| applied(m.version, m.checksum()))
            .collect();

        assert_eq!(
            plan_rollback(&rows, None).unwrap(),
            vec![
                "003_developer_contributions",
                "002_add_indexes",
                "001_initial_schema"
            ]
        );
        assert_eq!(
            plan_rollback(&rows, Some("001_initial_schema")).unwrap(),
            vec!["003_developer_contributions", "002_add_indexes"]
        );
        assert!(matches!(
            plan_rollback(&rows, Some("009_missing")),
            Err(MigrationError::UnknownTarget(_))
        ));
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL database at DATABASE_URL"]
    async fn migrate_up_is_idempotent() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let db = crate::database::DatabaseConnection::connect_url(&url, 2)
            .await
            .unwrap();
        let runner = MigrationRunner::new(db.pool().clone());

        runner.migrate_up().await.unwrap();
        assert!(runner.migrate_up().await.unwrap().is_empty());
        assert!(runner.status().await.unwrap().up_to_date());
    }
}
