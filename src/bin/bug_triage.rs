//! # bug-triage
//!
//! Operator CLI: repository monitoring, developer discovery, schema
//! migrations, dead-letter maintenance and performance reports. Exits 1 on
//! any failure.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use bug_triage_core::config::{ConfigManager, TriageConfig};
use bug_triage_core::database::{DatabaseConnection, MigrationRunner};
use bug_triage_core::logging::init_structured_logging;
use bug_triage_core::messaging::{
    DeadLetterHandler, MessageBroker, MessagePublisher, RabbitMqBroker,
};
use bug_triage_core::orchestration::performance::{ACCURACY_REPORT_DAYS, LOW_ACCURACY_THRESHOLD};
use bug_triage_core::orchestration::{
    DeveloperDiscovery, PerformanceTracker, RepositoryMonitor, StopMarker, TriageContext,
    TriagePipeline,
};
use bug_triage_core::store::PgStore;
use bug_triage_core::tracker::{GitHubClient, IssueTracker, RepoRef};

const STOP_CHECK_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "bug-triage")]
#[command(about = "Bug triage and assignment service")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a repository for new issues
    Monitor {
        #[command(subcommand)]
        action: MonitorAction,
    },

    /// Create developer profiles from repository contributors
    Discover {
        owner: Option<String>,
        repo: Option<String>,

        /// Scan every repository in `discovery.repositories`
        #[arg(long, conflicts_with_all = ["owner", "repo"])]
        all: bool,

        /// Report what would be saved without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Database schema migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },

    /// Dead-letter queue maintenance
    Dlq {
        #[command(subcommand)]
        action: DlqAction,
    },

    /// Performance and accuracy reports as JSON
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },
}

#[derive(Subcommand)]
enum ReportAction {
    /// Metrics for one developer
    Developer {
        developer_id: String,

        /// Defaults to `performance.lookback_days`
        #[arg(long)]
        days: Option<i64>,
    },
    /// Assignment accuracy across all developers
    Accuracy {
        #[arg(long, default_value_t = ACCURACY_REPORT_DAYS)]
        days: i64,
    },
    /// Categories and developers below an accuracy threshold
    LowPerformers {
        #[arg(long, default_value_t = LOW_ACCURACY_THRESHOLD)]
        threshold: f64,
    },
}

#[derive(Subcommand)]
enum MonitorAction {
    /// Run until Ctrl-C or `monitor stop`
    Start {
        #[arg(long)]
        repo: RepoRef,

        /// Poll interval; defaults to `agents.listener_poll_interval_seconds`
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Ask a running monitor to stop
    Stop {
        #[arg(long)]
        repo: RepoRef,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    Up,
    Down {
        /// Roll back to this version; the latest migration only when omitted
        #[arg(long)]
        target: Option<String>,
    },
    Status,
}

#[derive(Subcommand)]
enum DlqAction {
    /// Message counts for every dead-letter queue
    Stats,
    /// Drop every message in one dead-letter queue
    Purge { queue_key: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_structured_logging();

    match run(cli).await {
        Ok(()) => process::exit(0),
        Err(e) => {
            error!(error = %format!("{e:#}"), "bug-triage failed");
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    // stop needs no configuration
    if let Commands::Monitor {
        action: MonitorAction::Stop { repo },
    } = &cli.command
    {
        let marker = StopMarker::for_repo(repo);
        marker
            .write()
            .with_context(|| format!("writing stop marker {}", marker.path().display()))?;
        println!("Stop requested for {repo}");
        return Ok(());
    }

    let manager = ConfigManager::load().context("loading configuration")?;
    let config = manager.config().clone();

    match cli.command {
        Commands::Monitor {
            action: MonitorAction::Start { repo, interval_secs },
        } => monitor(config, repo, interval_secs).await,
        Commands::Monitor {
            action: MonitorAction::Stop { .. },
        } => Ok(()),
        Commands::Discover {
            owner,
            repo,
            all,
            dry_run,
        } => discover(config, owner, repo, all, dry_run).await,
        Commands::Migrate { action } => migrate(&config, action).await,
        Commands::Dlq { action } => dlq(&config, action).await,
        Commands::Report { action } => report(config, action).await,
    }
}

async fn build_context(config: TriageConfig) -> Result<TriageContext> {
    let db = DatabaseConnection::connect(&config.database)
        .await
        .context("connecting to the database")?;
    let broker = RabbitMqBroker::connect(config.message_queue.rabbitmq_settings())
        .await
        .context("connecting to the message broker")?;
    let tracker = GitHubClient::new(&config.api).context("building the GitHub client")?;

    let store = Arc::new(PgStore::new(db.pool().clone()));
    let publisher =
        MessagePublisher::new(Arc::new(broker), config.message_queue.publisher_config());
    Ok(TriageContext::new(store, publisher, Arc::new(tracker), config))
}

async fn monitor(config: TriageConfig, repo: RepoRef, interval_secs: Option<u64>) -> Result<()> {
    let interval = interval_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.agents.listener_poll_interval());
    if interval.is_zero() {
        bail!("--interval-secs must be greater than 0");
    }

    let ctx = build_context(config).await?;
    ctx.tracker
        .test_connection()
        .await
        .context("checking issue tracker access")?;

    let marker = StopMarker::for_repo(&repo);
    marker.clear().context("clearing a stale stop marker")?;

    let pipeline = TriagePipeline::new(ctx.clone());
    pipeline.start().await.context("starting the triage pipeline")?;
    let task = Arc::new(RepositoryMonitor::new(ctx, repo.clone())).spawn(interval);
    info!(repo = %repo, interval_secs = interval.as_secs(), "Monitor running");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for Ctrl-C")?;
            info!("Interrupt received");
        }
        _ = marker.wait(STOP_CHECK_INTERVAL) => {
            info!("Stop marker found");
        }
    }

    let monitor_stopped = task.stop(SHUTDOWN_TIMEOUT).await;
    let pipeline_stopped = pipeline.stop(SHUTDOWN_TIMEOUT).await;
    marker.clear().context("removing the stop marker")?;
    if !(monitor_stopped && pipeline_stopped) {
        bail!("workers did not stop within {}s", SHUTDOWN_TIMEOUT.as_secs());
    }
    println!("Monitor for {repo} stopped");
    Ok(())
}

async fn discover(
    config: TriageConfig,
    owner: Option<String>,
    repo: Option<String>,
    all: bool,
    dry_run: bool,
) -> Result<()> {
    let ctx = build_context(config).await?;
    let discovery = DeveloperDiscovery::new(ctx);

    let summary = match (all, owner, repo) {
        (true, _, _) => discovery.discover_all(dry_run).await,
        (false, Some(owner), Some(repo)) => discovery
            .discover(&RepoRef::new(owner, repo), dry_run)
            .await
            .context("discovering developers")?,
        _ => bail!("pass <owner> <repo> or --all"),
    };

    println!(
        "Discovered {}, saved {}, skipped {}{}",
        summary.discovered,
        summary.saved,
        summary.skipped,
        if dry_run { " (dry run)" } else { "" }
    );
    for (subject, reason) in &summary.errors {
        println!("  error: {subject}: {reason}");
    }
    if !summary.errors.is_empty() && summary.discovered == 0 {
        bail!("discovery failed for every entry");
    }
    Ok(())
}

async fn migrate(config: &TriageConfig, action: MigrateAction) -> Result<()> {
    let db = DatabaseConnection::connect(&config.database)
        .await
        .context("connecting to the database")?;
    let runner = MigrationRunner::new(db.pool().clone());

    match action {
        MigrateAction::Up => {
            let applied = runner.migrate_up().await?;
            if applied.is_empty() {
                println!("Schema is up to date");
            }
            for version in applied {
                println!("Applied {version}");
            }
        }
        MigrateAction::Down { target } => {
            let reverted = runner.migrate_down(target.as_deref()).await?;
            if reverted.is_empty() {
                println!("Nothing to roll back");
            }
            for version in reverted {
                println!("Rolled back {version}");
            }
        }
        MigrateAction::Status => {
            let status = runner.status().await?;
            println!("{} of {} migrations applied", status.applied.len(), status.total);
            for version in &status.pending {
                println!("  pending: {version}");
            }
            for version in &status.drifted {
                println!("  changed since applied: {version}");
            }
            for version in &status.unknown {
                println!("  unknown to this build: {version}");
            }
            if !status.drifted.is_empty() {
                bail!("applied migrations have drifted");
            }
        }
    }
    db.close().await;
    Ok(())
}

async fn dlq(config: &TriageConfig, action: DlqAction) -> Result<()> {
    let broker: Arc<dyn MessageBroker> = Arc::new(
        RabbitMqBroker::connect(config.message_queue.rabbitmq_settings())
            .await
            .context("connecting to the message broker")?,
    );
    let topology = config.message_queue.topology();
    broker.declare_topology(&topology).await?;
    let handler = DeadLetterHandler::new(
        MessagePublisher::new(broker, config.message_queue.publisher_config()),
        topology,
        config.dead_letter.retry_policy(),
    );

    match action {
        DlqAction::Stats => {
            for (queue, stats) in handler.dead_letter_stats().await {
                match stats {
                    Ok(stats) => println!("{queue}: {} ready, {} unacked", stats.message_count, stats.unacked_count),
                    Err(e) => println!("{queue}: unavailable ({e})"),
                }
            }
        }
        DlqAction::Purge { queue_key } => {
            let purged = handler
                .purge_dead_letter_queue(&queue_key)
                .await
                .with_context(|| format!("purging the dead-letter queue for {queue_key}"))?;
            println!("Purged {purged} messages");
        }
    }
    Ok(())
}

async fn report(config: TriageConfig, action: ReportAction) -> Result<()> {
    let lookback_days = config.performance.lookback_days;
    let tracker = PerformanceTracker::new(build_context(config).await?);

    let json = match action {
        ReportAction::Developer { developer_id, days } => serde_json::to_string_pretty(
            &tracker
                .developer_metrics(&developer_id, days.unwrap_or(lookback_days))
                .await
                .with_context(|| format!("calculating metrics for {developer_id}"))?,
        )?,
        ReportAction::Accuracy { days } => serde_json::to_string_pretty(
            &tracker
                .accuracy_report(days)
                .await
                .context("building the accuracy report")?,
        )?,
        ReportAction::LowPerformers { threshold } => serde_json::to_string_pretty(
            &tracker
                .low_performing_areas(threshold)
                .await
                .context("finding low performing areas")?,
        )?,
    };
    println!("{json}");
    Ok(())
}
