use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use super::{CancelFlag, PipelineError};
use crate::config::{DiscoveryConfig, SourceConfig};
use crate::feed::{FeedEntry, FeedSource};
use crate::monitor::{MonitorSink, PipelineEvent, SourceOutcome, Stage};
use crate::storage::{Database, NewArticle};
use crate::util::article_id_for;

/// Aggregate counts for one discovery run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryStats {
    /// Sources whose feed was fetched (successfully or not).
    pub sources_processed: usize,
    /// Entries with a usable link across all fetched feeds.
    pub entries_discovered: usize,
    /// Entries older than the lookback window.
    pub entries_stale: usize,
    pub inserted: usize,
    pub errors: usize,
    /// Sources skipped by the circuit breaker.
    pub skipped: usize,
    /// Entries dropped for having no usable link.
    pub malformed: usize,
    pub cancelled: bool,
}

impl DiscoveryStats {
    pub fn summary(&self) -> String {
        format!(
            "{} sources, {} entries, {} new, {} errors, {} skipped",
            self.sources_processed, self.entries_discovered, self.inserted, self.errors, self.skipped
        )
    }
}

enum SourceRun {
    Checked {
        entries: usize,
        stale: usize,
        malformed: usize,
        inserted: usize,
    },
    Failed,
    Skipped,
    Cancelled,
}

/// Turns each enabled source's feed into new `pending` articles.
///
/// Sources are polled with bounded concurrency; one source's failure is
/// recorded against that source and never affects the others.
pub struct DiscoveryStage {
    db: Database,
    feeds: Arc<dyn FeedSource>,
    monitor: Arc<dyn MonitorSink>,
    sources: Vec<SourceConfig>,
    lookback: chrono::Duration,
    concurrency: usize,
    failure_threshold: u32,
}

impl DiscoveryStage {
    pub fn new(
        db: Database,
        feeds: Arc<dyn FeedSource>,
        monitor: Arc<dyn MonitorSink>,
        sources: Vec<SourceConfig>,
        config: &DiscoveryConfig,
    ) -> Self {
        Self {
            db,
            feeds,
            monitor,
            sources: sources.into_iter().filter(|s| s.enabled).collect(),
            lookback: chrono::Duration::days(i64::from(config.lookback_days)),
            concurrency: config.concurrency.max(1),
            failure_threshold: config.failure_threshold,
        }
    }

    /// Poll every enabled source once.
    ///
    /// `force` ignores the circuit breaker. Only a failure to read source
    /// health aborts the run.
    pub async fn run(&self, force: bool, cancel: &CancelFlag) -> Result<DiscoveryStats, PipelineError> {
        self.monitor.record(&PipelineEvent::StageStarted {
            stage: Stage::Discovery,
        });

        let health: HashMap<String, i64> = self
            .db
            .list_sources()
            .await?
            .into_iter()
            .map(|s| (s.id, s.consecutive_errors))
            .collect();

        let now = Utc::now();
        let runs: Vec<SourceRun> = stream::iter(self.sources.iter())
            .map(|source| {
                let errors = health.get(&source.id).copied().unwrap_or(0);
                self.poll_source(source, errors, force, now, cancel)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut stats = DiscoveryStats::default();
        for run in runs {
            match run {
                SourceRun::Checked {
                    entries,
                    stale,
                    malformed,
                    inserted,
                } => {
                    stats.sources_processed += 1;
                    stats.entries_discovered += entries;
                    stats.entries_stale += stale;
                    stats.malformed += malformed;
                    stats.inserted += inserted;
                }
                SourceRun::Failed => {
                    stats.sources_processed += 1;
                    stats.errors += 1;
                }
                SourceRun::Skipped => stats.skipped += 1,
                SourceRun::Cancelled => stats.cancelled = true,
            }
        }

        self.monitor.record(&PipelineEvent::StageFinished {
            stage: Stage::Discovery,
            summary: stats.summary(),
            cancelled: stats.cancelled,
        });
        Ok(stats)
    }

    async fn poll_source(
        &self,
        source: &SourceConfig,
        consecutive_errors: i64,
        force: bool,
        now: DateTime<Utc>,
        cancel: &CancelFlag,
    ) -> SourceRun {
        if cancel.is_cancelled() {
            return SourceRun::Cancelled;
        }

        if !force
            && self.failure_threshold > 0
            && consecutive_errors >= i64::from(self.failure_threshold)
        {
            self.monitor.record(&PipelineEvent::SourceChecked {
                source_id: source.id.clone(),
                outcome: SourceOutcome::Skipped { consecutive_errors },
            });
            return SourceRun::Skipped;
        }

        let feed = match self.feeds.fetch_feed(&source.feed_url).await {
            Ok(feed) => feed,
            Err(e) => return self.fail_source(source, &e.to_string()).await,
        };

        let entries = feed.entries.len();
        let cutoff = now - self.lookback;
        let fresh: Vec<NewArticle> = feed
            .entries
            .into_iter()
            .filter(|e| e.published.map_or(true, |p| p >= cutoff))
            .map(|e| new_article(e, now))
            .collect();
        let stale = entries - fresh.len();

        match self.db.complete_source_discovery(&source.id, &fresh).await {
            Ok(inserted) => {
                self.monitor.record(&PipelineEvent::SourceChecked {
                    source_id: source.id.clone(),
                    outcome: SourceOutcome::Checked { entries, inserted },
                });
                SourceRun::Checked {
                    entries,
                    stale,
                    malformed: feed.malformed,
                    inserted,
                }
            }
            Err(e) => self.fail_source(source, &format!("store error: {e}")).await,
        }
    }

    async fn fail_source(&self, source: &SourceConfig, error: &str) -> SourceRun {
        let consecutive_errors = match self.db.record_source_failure(&source.id, error).await {
            Ok(n) => n,
            Err(db_err) => {
                tracing::warn!(source = %source.id, error = %db_err, "Failed to record source failure");
                0
            }
        };
        if self.failure_threshold > 0 && consecutive_errors == i64::from(self.failure_threshold) {
            tracing::info!(
                source = %source.id,
                failures = consecutive_errors,
                "Source circuit breaker tripped - will be skipped until a forced run"
            );
        }
        self.monitor.record(&PipelineEvent::SourceChecked {
            source_id: source.id.clone(),
            outcome: SourceOutcome::Failed {
                error: error.to_string(),
                consecutive_errors,
            },
        });
        SourceRun::Failed
    }
}

fn new_article(entry: FeedEntry, now: DateTime<Utc>) -> NewArticle {
    NewArticle {
        article_id: article_id_for(&entry.url),
        url: entry.url,
        title: entry.title,
        description: entry.summary,
        published_at: entry.published.map(|p| p.timestamp()),
        discovered_at: now.timestamp(),
    }
}
