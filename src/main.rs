use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipcast::config::AppConfig;
use clipcast::models::{UploadStatus, VideoType};
use clipcast::scheduler::{
    DegradedScheduler, HttpPlatformListing, PublishScheduler, QuotaLedger, ScheduleStore,
};
use clipcast::storage::Database;
use clipcast::utils::{format_day, usage_bar};

#[derive(Parser)]
#[command(
    name = "clipcast",
    version,
    about = "Quota-aware publish scheduler for generated video clips",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (defaults to CLIPCAST_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule a finished video for publishing
    Schedule {
        /// Path of the video artifact
        path: String,

        /// Content type (final, short)
        #[arg(short = 't', long = "type")]
        video_type: String,

        /// Requested publish time (RFC3339)
        #[arg(long)]
        at: Option<String>,
    },

    /// Report the outcome of a publish
    Report {
        /// Path of the video artifact
        path: String,

        /// Identifier assigned by the platform
        #[arg(long)]
        external_id: Option<String>,

        /// Final status (completed, failed)
        #[arg(long)]
        status: String,

        /// Failure reason
        #[arg(long)]
        error: Option<String>,
    },

    /// Mark a scheduled video as uploading
    Start {
        /// Path of the video artifact
        path: String,
    },

    /// Cancel a schedule that has not started uploading
    Cancel {
        /// Schedule id
        id: i64,
    },

    /// Show schedules grouped by day
    Calendar {
        /// First day (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Number of days
        #[arg(long, default_value = "7")]
        days: u32,
    },

    /// Show quota usage and warnings
    Quota {
        /// Day to show (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Number of days
        #[arg(long, default_value = "1")]
        days: u32,
    },

    /// List scheduled uploads whose publish time has arrived
    Due,

    /// Degraded-mode cache operations
    Degraded {
        #[command(subcommand)]
        action: DegradedAction,
    },
}

#[derive(Subcommand)]
enum DegradedAction {
    /// Rebuild occupancy from the platform listing
    Refresh,

    /// Show the next free degraded-mode slot
    Next,

    /// Show cached occupancy
    Show {
        /// First day (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Number of days
        #[arg(long, default_value = "7")]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;

    // Initialize tracing/logging
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    tracing::debug!(config = ?cli.config, "clipcast starting");

    match cli.command {
        Commands::Schedule {
            path,
            video_type,
            at,
        } => schedule(&config, &path, &video_type, at.as_deref()).await?,

        Commands::Report {
            path,
            external_id,
            status,
            error,
        } => report(&config, &path, external_id.as_deref(), &status, error.as_deref())?,

        Commands::Start { path } => {
            let store = open_store(&config)?;
            if store.mark_uploading(&path)? {
                println!("{path}: uploading");
            } else {
                anyhow::bail!("{path} has no scheduled upload to start");
            }
        }

        Commands::Cancel { id } => {
            let store = open_store(&config)?;
            if store.cancel(id)? {
                println!("Schedule {id} cancelled");
            } else {
                anyhow::bail!("Schedule {id} not found or no longer cancellable");
            }
        }

        Commands::Calendar { from, days } => calendar(&config, from, days)?,

        Commands::Quota { date, days } => quota(&config, date, days)?,

        Commands::Due => {
            let store = open_store(&config)?;
            let due = store.due_uploads(store.now())?;
            if due.is_empty() {
                println!("Nothing due");
            }
            for upload in due {
                println!(
                    "{:>5}  {}  {:<5}  {}",
                    upload.id,
                    upload.scheduled_publish_time.format("%Y-%m-%d %H:%M"),
                    upload.video_type,
                    upload.video_path
                );
            }
        }

        Commands::Degraded { action } => degraded(&config, action).await?,
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("clipcast=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("clipcast={level},warn"))
            .context("Invalid log level")?
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn open_store(config: &AppConfig) -> Result<ScheduleStore> {
    let db = Database::open(&config.database).context("Failed to open schedule database")?;
    Ok(ScheduleStore::new(db, &config.schedule)?)
}

async fn open_degraded(config: &AppConfig) -> Result<DegradedScheduler> {
    let listing = HttpPlatformListing::new(&config.degraded)?;
    let degraded =
        DegradedScheduler::new(&config.degraded, config.schedule.offset()?, Arc::new(listing))?;
    degraded.load_cache().await;
    Ok(degraded)
}

fn parse_video_type(value: &str) -> Result<VideoType> {
    Ok(VideoType::from_id(value)?)
}

async fn schedule(config: &AppConfig, path: &str, video_type: &str, at: Option<&str>) -> Result<()> {
    let video_type = parse_video_type(video_type)?;
    let preferred = at
        .map(DateTime::<FixedOffset>::parse_from_rfc3339)
        .transpose()
        .context("--at must be an RFC3339 timestamp")?;

    // an unreachable database still gets a handle so the request can fail over
    let db = match Database::open(&config.database) {
        Ok(db) => db,
        Err(e) if e.is_store_unreachable() => {
            tracing::warn!(error = %e, "Schedule database unavailable");
            Database::new(&config.database)
        }
        Err(e) => return Err(e.into()),
    };

    let store = ScheduleStore::new(db, &config.schedule)?;
    let scheduler = PublishScheduler::new(Arc::new(store), Arc::new(open_degraded(config).await?));

    let report = scheduler.schedule(path, video_type, preferred).await;
    if !report.success {
        anyhow::bail!(report.message);
    }

    println!("{}", report.message);
    if !report.degraded {
        let ledger = scheduler.store().ledger();
        if let Some(time) = report.scheduled_time {
            for warning in ledger.warnings(time.date_naive()) {
                println!("warning: {warning}");
            }
        }
    }
    Ok(())
}

fn report(
    config: &AppConfig,
    path: &str,
    external_id: Option<&str>,
    status: &str,
    error: Option<&str>,
) -> Result<()> {
    let status: UploadStatus = status.parse()?;
    if !status.is_terminal() {
        anyhow::bail!("--status must be completed or failed");
    }

    let store = open_store(config)?;
    let updated = match (status, error) {
        (UploadStatus::Failed, Some(reason)) => store.record_failure(path, reason)?,
        _ => store.update_with_external_id(path, external_id, status)?,
    };

    if updated {
        println!("{path}: {status}");
    } else {
        println!("{path}: no matching upload to update");
    }
    Ok(())
}

fn calendar(config: &AppConfig, from: Option<NaiveDate>, days: u32) -> Result<()> {
    let store = open_store(config)?;
    let start = from.unwrap_or_else(|| store.now().date_naive());
    let calendar = store.calendar(start, days)?;

    if calendar.is_empty() {
        println!("No schedules between {start} and the following {days} day(s)");
        return Ok(());
    }

    for (date, entries) in calendar {
        println!("{}", format_day(date));
        for entry in entries {
            println!(
                "  {}  #{:<4} {:<5}  {:<9}  {}{}",
                entry.scheduled_time.format("%H:%M"),
                entry.id,
                entry.video_type,
                entry.status,
                entry.video_path,
                entry
                    .external_id
                    .map(|id| format!("  [{id}]"))
                    .unwrap_or_default()
            );
        }
    }
    Ok(())
}

fn quota(config: &AppConfig, date: Option<NaiveDate>, days: u32) -> Result<()> {
    let store = open_store(config)?;
    let ledger: &QuotaLedger = store.ledger();
    let start = date.unwrap_or_else(|| store.now().date_naive());

    for record in ledger.history(start, days.max(1))? {
        let status = ledger.check(record.date);
        println!("{}", format_day(record.date));
        for video_type in VideoType::all() {
            println!(
                "  {:<5} {} {}/{}",
                video_type,
                usage_bar(status.used(video_type), status.limit(video_type), 10),
                status.used(video_type),
                status.limit(video_type)
            );
        }
        println!(
            "  quota {} {}/{} ({:.1}%)",
            usage_bar(status.quota_used, status.quota_limit, 10),
            status.quota_used,
            status.quota_limit,
            status.quota_percentage
        );
        for warning in ledger.warnings(record.date) {
            println!("  warning: {warning}");
        }
    }
    Ok(())
}

async fn degraded(config: &AppConfig, action: DegradedAction) -> Result<()> {
    let degraded = open_degraded(config).await?;
    let offset = config.schedule.offset()?;
    let now = chrono::Utc::now().with_timezone(&offset);

    match action {
        DegradedAction::Refresh => {
            let counted = degraded.refresh(now).await?;
            println!("Refreshed degraded occupancy: {counted} upcoming publish(es)");
        }
        DegradedAction::Next => {
            println!("{}", degraded.next_slot(now).await.to_rfc3339());
        }
        DegradedAction::Show { from, days } => {
            let start = from.unwrap_or_else(|| now.date_naive());
            for offset_days in 0..i64::from(days.max(1)) {
                let date = start + chrono::Duration::days(offset_days);
                let buckets = degraded.occupancy(date).await;
                let counts = degraded
                    .buckets()
                    .iter()
                    .map(|b| format!("{}={}", b.format("%H:%M"), buckets.get(b).copied().unwrap_or(0)))
                    .collect::<Vec<_>>()
                    .join("  ");
                println!("{}  {}", format_day(date), counts);
            }
        }
    }
    Ok(())
}
