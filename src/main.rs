use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use newsdesk::config::Config;
use newsdesk::monitor::LogSink;
use newsdesk::pipeline::{
    ready_payloads, register_sources, ArticleResult, CancelFlag, Pipeline, RunOptions,
};
use newsdesk::storage::{Database, DatabaseError, SourceHealth, StoreStats};

#[derive(Parser, Debug)]
#[command(
    name = "newsdesk",
    version,
    about = "News discovery, extraction and media pipeline"
)]
struct Args {
    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = "newsdesk.toml")]
    config: PathBuf,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll every enabled source for new articles
    Discover {
        /// Poll sources even if their circuit breaker is open
        #[arg(long)]
        force: bool,
    },
    /// Extract and clean pending articles, oldest first
    Extract {
        #[arg(long, value_name = "N")]
        max_articles: Option<usize>,
    },
    /// Download pending media files
    Media,
    /// Discovery, extraction and media in sequence
    Run {
        #[arg(long, value_name = "N")]
        max_articles: Option<usize>,
        #[arg(long)]
        skip_media: bool,
        /// Poll sources even if their circuit breaker is open
        #[arg(long)]
        force: bool,
    },
    /// Extract a single pending article
    ProcessArticle { id: String },
    /// Return an article to pending, deleting its content and media
    ResetArticle { id: String },
    /// Delete articles older than the retention window
    Cleanup {
        #[arg(long, value_name = "N")]
        days: Option<u32>,
    },
    /// Counts by status
    Stats,
    /// Source registry and health
    Sources,
    /// Publish payloads for parsed articles whose media are ready
    Ready {
        #[arg(long, value_name = "N", default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: failed to load .env: {e}");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    let db_path = config
        .database_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: {}", DatabaseError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    register_sources(&db, &config.sources)
        .await
        .context("Failed to sync sources")?;

    let cancel = CancelFlag::new();
    spawn_interrupt_handler(cancel.clone());

    match args.command {
        Command::Discover { force } => {
            let pipeline = build_pipeline(&config, &db)?;
            let stats = pipeline.discovery.run(force, &cancel).await?;
            print_report(args.json, &stats, || stats.summary())?;
        }
        Command::Extract { max_articles } => {
            let pipeline = build_pipeline(&config, &db)?;
            let stats = pipeline.extraction.run(max_articles, &cancel).await?;
            print_report(args.json, &stats, || stats.summary())?;
        }
        Command::Media => {
            let pipeline = build_pipeline(&config, &db)?;
            let stats = pipeline.media.run(&cancel).await?;
            print_report(args.json, &stats, || stats.summary())?;
        }
        Command::Run {
            max_articles,
            skip_media,
            force,
        } => {
            let pipeline = build_pipeline(&config, &db)?;
            let options = RunOptions {
                force,
                max_articles,
                skip_media,
            };
            let report = pipeline.run(&options, &cancel).await?;
            print_report(args.json, &report, || {
                let mut lines = Vec::new();
                if let Some(s) = &report.discovery {
                    lines.push(format!("discovery:  {}", s.summary()));
                }
                if let Some(s) = &report.extraction {
                    lines.push(format!("extraction: {}", s.summary()));
                }
                if let Some(s) = &report.media {
                    lines.push(format!("media:      {}", s.summary()));
                }
                if report.cancelled {
                    lines.push("run cancelled".to_string());
                }
                lines.join("\n")
            })?;
        }
        Command::ProcessArticle { id } => {
            let pipeline = build_pipeline(&config, &db)?;
            let result = pipeline
                .extraction
                .process_article(&id)
                .await
                .context("Failed to record extraction result")?
                .ok_or_else(|| anyhow::anyhow!("Article not found: {id}"))?;
            print_report(args.json, &result, || match &result {
                ArticleResult::Parsed { words, media } => {
                    format!("{id}: parsed ({words} words, {media} media)")
                }
                ArticleResult::Failed { error, .. } => format!("{id}: failed ({error})"),
                ArticleResult::NotPending { status } => {
                    format!("{id}: not pending (status {})", status.as_str())
                }
            })?;
        }
        Command::ResetArticle { id } => {
            let paths = db
                .reset_article(&id)
                .await
                .context("Failed to reset article")?
                .ok_or_else(|| anyhow::anyhow!("Article not found: {id}"))?;
            let removed = remove_files(&paths).await;
            println!("{id}: reset to pending ({removed} media files removed)");
        }
        Command::Cleanup { days } => {
            let days = days.unwrap_or(config.retention.max_age_days);
            let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(days));
            let outcome = db
                .delete_older_than(cutoff.timestamp())
                .await
                .context("Retention cleanup failed")?;
            let removed = remove_files(&outcome.local_paths).await;
            print_report(args.json, &outcome, || {
                format!(
                    "Deleted {} articles and {} media rows older than {days} days ({removed} files removed)",
                    outcome.articles_deleted, outcome.media_rows_deleted
                )
            })?;
        }
        Command::Stats => {
            let report = StatsReport {
                store: db.stats().await.context("Failed to read statistics")?,
                sources: db.list_sources().await.context("Failed to list sources")?,
            };
            print_report(args.json, &report, || {
                let stats = &report.store;
                let mut out = format!(
                    "articles: {} (pending {}, parsed {}, failed {})\n\
                     media status: none {}, processing {}, ready {}\n\
                     media files: pending {}, completed {}, failed {}\n\
                     publishable: {}",
                    stats.articles_total,
                    stats.content_pending,
                    stats.content_parsed,
                    stats.content_failed,
                    stats.media_none,
                    stats.media_processing,
                    stats.media_ready,
                    stats.files_pending,
                    stats.files_completed,
                    stats.files_failed,
                    stats.publishable
                );
                for source in &report.sources {
                    out.push_str(&format!("\n{}", source_line(source)));
                }
                out
            })?;
        }
        Command::Sources => {
            let sources = db.list_sources().await.context("Failed to list sources")?;
            print_report(args.json, &sources, || {
                sources
                    .iter()
                    .map(source_line)
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
        }
        Command::Ready { limit } => {
            let payloads = ready_payloads(&db, limit)
                .await
                .context("Failed to load publishable articles")?;
            println!("{}", serde_json::to_string_pretty(&payloads)?);
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct StatsReport {
    store: StoreStats,
    sources: Vec<SourceHealth>,
}

fn source_line(s: &SourceHealth) -> String {
    format!(
        "{:<20} {:<10} {:>6} articles  errors {}{}{}",
        s.id,
        s.category,
        s.total_articles,
        s.consecutive_errors,
        if s.enabled { "" } else { "  (disabled)" },
        s.last_error
            .as_deref()
            .map(|e| format!("  last error: {e}"))
            .unwrap_or_default()
    )
}

fn build_pipeline(config: &Config, db: &Database) -> Result<Pipeline> {
    Pipeline::from_config(config, db.clone(), Arc::new(LogSink))
        .context("Failed to set up pipeline services")
}

/// First Ctrl-C lets the current unit finish; the stage then stops and its
/// partial statistics are printed.
fn spawn_interrupt_handler(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received, finishing current item...");
            cancel.cancel();
        }
    });
}

fn print_report<T: Serialize>(json: bool, value: &T, human: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", human());
    }
    Ok(())
}

async fn remove_files(paths: &[String]) -> usize {
    let mut removed = 0;
    for path in paths {
        match tokio::fs::remove_file(Path::new(path)).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path, error = %e, "Failed to remove media file"),
        }
    }
    removed
}
