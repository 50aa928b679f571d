use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use super::{CancelFlag, PipelineError};
use crate::config::MediaConfig;
use crate::media::MediaDownloader;
use crate::monitor::{MediaOutcome, MonitorSink, PipelineEvent, Stage};
use crate::storage::{CompletedMedia, Database, DatabaseError, MediaCursor, MediaFile};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaStats {
    pub batches: usize,
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Articles promoted to `media_status = ready` by the final sweep.
    pub articles_ready: u64,
    /// Status writes that failed; the file stays `pending`.
    pub store_errors: usize,
    pub cancelled: bool,
}

impl MediaStats {
    pub fn summary(&self) -> String {
        format!(
            "{} files in {} batches, {} completed, {} failed, {} articles ready",
            self.processed, self.batches, self.completed, self.failed, self.articles_ready
        )
    }
}

/// Resolves `pending` media files to `completed` or `failed`.
///
/// Files are downloaded strictly one after another with a randomized pause
/// between files and a longer one between batches. Each outcome is
/// committed before the next file starts, so an interrupted run leaves
/// only untouched files `pending`.
pub struct MediaStage {
    db: Database,
    downloader: MediaDownloader,
    monitor: Arc<dyn MonitorSink>,
    batch_size: usize,
    file_delay: (Duration, Duration),
    batch_delay: (Duration, Duration),
}

impl MediaStage {
    pub fn new(
        db: Database,
        downloader: MediaDownloader,
        monitor: Arc<dyn MonitorSink>,
        config: &MediaConfig,
    ) -> Self {
        Self {
            db,
            downloader,
            monitor,
            batch_size: config.batch_size.max(1),
            file_delay: config.file_delay_range(),
            batch_delay: config.batch_delay_range(),
        }
    }

    pub async fn run(&self, cancel: &CancelFlag) -> Result<MediaStats, PipelineError> {
        self.monitor.record(&PipelineEvent::StageStarted { stage: Stage::Media });

        let mut stats = MediaStats::default();
        let mut cursor: Option<MediaCursor> = None;

        let outcome = self.drain(&mut cursor, &mut stats, cancel).await;

        // Runs after cancellation and queue errors too.
        match self.db.sweep_ready_articles().await {
            Ok(n) => stats.articles_ready = n,
            Err(e) => {
                tracing::error!(error = %e, "Ready sweep failed");
                stats.store_errors += 1;
            }
        }

        self.monitor.record(&PipelineEvent::StageFinished {
            stage: Stage::Media,
            summary: stats.summary(),
            cancelled: stats.cancelled,
        });
        outcome?;
        Ok(stats)
    }

    async fn drain(
        &self,
        cursor: &mut Option<MediaCursor>,
        stats: &mut MediaStats,
        cancel: &CancelFlag,
    ) -> Result<(), PipelineError> {
        loop {
            if stats.batches > 0 && !cancel.sleep(random_delay(self.batch_delay)).await {
                stats.cancelled = true;
                return Ok(());
            }

            let batch = self.db.pending_media_after(*cursor, self.batch_size).await?;
            if batch.is_empty() {
                return Ok(());
            }
            tracing::debug!(batch = stats.batches + 1, files = batch.len(), "Processing media batch");

            for (i, file) in batch.iter().enumerate() {
                let proceed = if i == 0 {
                    !cancel.is_cancelled()
                } else {
                    cancel.sleep(random_delay(self.file_delay)).await
                };
                if !proceed {
                    tracing::info!(remaining_in_batch = batch.len() - i, "Media stage cancelled");
                    stats.cancelled = true;
                    return Ok(());
                }

                *cursor = Some((file.created_at, file.id));
                match self.process_file(file).await {
                    Ok(Some(true)) => {
                        stats.processed += 1;
                        stats.completed += 1;
                    }
                    Ok(Some(false)) => {
                        stats.processed += 1;
                        stats.failed += 1;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(media_id = file.id, error = %e, "Failed to record media result");
                        stats.store_errors += 1;
                    }
                }
            }
            stats.batches += 1;
        }
    }

    /// Download and record one file. `Some(true)` completed, `Some(false)`
    /// failed, `None` when the file was no longer pending.
    async fn process_file(&self, file: &MediaFile) -> Result<Option<bool>, DatabaseError> {
        let attempt = self.db.begin_media_attempt(file.id).await?;
        if attempt == 0 {
            return Ok(None);
        }

        match self.downloader.download(file).await {
            Ok(downloaded) => {
                let done = CompletedMedia {
                    local_path: downloaded.path.to_string_lossy().into_owned(),
                    file_size: downloaded.bytes as i64,
                    width: downloaded.width.map(i64::from),
                    height: downloaded.height.map(i64::from),
                };
                let recorded = match self.db.complete_media(file.id, &done).await {
                    Ok(recorded) => recorded,
                    Err(e) => {
                        discard(&downloaded.path).await;
                        return Err(e);
                    }
                };
                if !recorded {
                    discard(&downloaded.path).await;
                    return Ok(None);
                }
                self.monitor.record(&PipelineEvent::MediaProcessed {
                    media_id: file.id,
                    article_id: file.article_id.clone(),
                    outcome: MediaOutcome::Completed {
                        bytes: downloaded.bytes,
                    },
                });
                Ok(Some(true))
            }
            Err(e) => {
                let error = e.to_string();
                if !self.db.fail_media(file.id, &error).await? {
                    return Ok(None);
                }
                self.monitor.record(&PipelineEvent::MediaProcessed {
                    media_id: file.id,
                    article_id: file.article_id.clone(),
                    outcome: MediaOutcome::Failed { error },
                });
                Ok(Some(false))
            }
        }
    }
}

/// Uniform random duration in `[min, max]` at millisecond resolution.
fn random_delay((min, max): (Duration, Duration)) -> Duration {
    if max <= min {
        return min;
    }
    let ms = rand::rng().random_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(ms)
}

async fn discard(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove unrecorded media file");
    }
}
