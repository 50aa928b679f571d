//! The three pipeline stages and the driver that runs them in sequence.
//!
//! ```text
//! discovery ──► extraction ──► media
//!  (feeds)      (pending →      (pending files →
//!               parsed|failed)   completed|failed, sweep → ready)
//! ```
//!
//! Stages share nothing but the store. Each unit of work (a source, an
//! article, a media file) is committed on its own, and every stage checks
//! the [`CancelFlag`] between units.

mod cancel;
mod discovery;
mod extraction;
mod media;
mod publish;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

pub use cancel::CancelFlag;
pub use discovery::{DiscoveryStage, DiscoveryStats};
pub use extraction::{ArticleResult, ExtractionFailure, ExtractionStage, ExtractionStats};
pub use media::{MediaStage, MediaStats};
pub use publish::{build_payload, ready_payloads, PublishMedia, PublishPayload};

use crate::config::{Config, SourceConfig};
use crate::content::{AiCleaner, CleanError, ContentError, ReaderExtractor, RedirectResolver};
use crate::feed::FeedFetcher;
use crate::http::build_client;
use crate::media::MediaDownloader;
use crate::monitor::MonitorSink;
use crate::storage::{Database, DatabaseError, SourceRecord};

/// Stage-level failure. Unit failures are recorded on the unit and never
/// surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("Extraction service setup failed: {0}")]
    Extractor(#[from] ContentError),
    #[error("Cleaning service setup failed: {0}")]
    Cleaner(#[from] CleanError),
}

/// Upsert the configured sources into the registry table.
pub async fn register_sources(db: &Database, sources: &[SourceConfig]) -> Result<(), DatabaseError> {
    let records: Vec<SourceRecord> = sources
        .iter()
        .map(|s| SourceRecord {
            id: s.id.clone(),
            name: s.name.clone(),
            feed_url: s.feed_url.clone(),
            category: s.category.as_str().to_string(),
            enabled: s.enabled,
        })
        .collect();
    db.sync_sources(&records).await
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Ignore the discovery circuit breaker.
    pub force: bool,
    pub max_articles: Option<usize>,
    pub skip_media: bool,
}

/// Statistics of a full run. A stage that did not start is `None`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub discovery: Option<DiscoveryStats>,
    pub extraction: Option<ExtractionStats>,
    pub media: Option<MediaStats>,
    pub cancelled: bool,
}

/// All three stages wired to one store and one monitoring sink.
pub struct Pipeline {
    pub discovery: DiscoveryStage,
    pub extraction: ExtractionStage,
    pub media: MediaStage,
}

impl Pipeline {
    /// Build the production collaborators from configuration.
    pub fn from_config(
        config: &Config,
        db: Database,
        monitor: Arc<dyn MonitorSink>,
    ) -> Result<Self, PipelineError> {
        let client = build_client(&config.media.user_agent)?;

        let discovery = DiscoveryStage::new(
            db.clone(),
            Arc::new(FeedFetcher::new(client.clone(), &config.discovery)),
            monitor.clone(),
            config.sources.clone(),
            &config.discovery,
        );
        let extraction = ExtractionStage::new(
            db.clone(),
            RedirectResolver::new(client.clone(), &config.extraction),
            Arc::new(ReaderExtractor::new(client.clone(), &config.extraction)?),
            Arc::new(AiCleaner::new(client.clone(), &config.cleaning)?),
            monitor.clone(),
            &config.extraction,
            &config.cleaning,
        );
        let media = MediaStage::new(
            db,
            MediaDownloader::new(client, &config.media_dir, &config.media),
            monitor,
            &config.media,
        );

        Ok(Self {
            discovery,
            extraction,
            media,
        })
    }

    /// Discovery, then extraction, then media. A cancelled stage stops the
    /// run; the statistics gathered so far are still returned.
    pub async fn run(&self, options: &RunOptions, cancel: &CancelFlag) -> Result<RunReport, PipelineError> {
        let mut report = RunReport::default();

        let discovery = self.discovery.run(options.force, cancel).await?;
        report.cancelled = discovery.cancelled;
        report.discovery = Some(discovery);
        if report.cancelled {
            return Ok(report);
        }

        let extraction = self.extraction.run(options.max_articles, cancel).await?;
        report.cancelled = extraction.cancelled;
        report.extraction = Some(extraction);
        if report.cancelled || options.skip_media {
            return Ok(report);
        }

        let media = self.media.run(cancel).await?;
        report.cancelled = media.cancelled;
        report.media = Some(media);
        Ok(report)
    }
}
