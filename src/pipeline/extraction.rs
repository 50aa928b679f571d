use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::{CancelFlag, PipelineError};
use crate::config::{CleaningConfig, ExtractionConfig};
use crate::content::{
    guess_media_type, remap_placeholders, strip_boilerplate, CleanError, CleanedContent,
    ContentCleaner, ContentError, ContentExtractor, MediaRef, RedirectError, RedirectResolver,
};
use crate::monitor::{ArticleOutcome, MonitorSink, PipelineEvent, Stage};
use crate::storage::{ContentStatus, Database, DatabaseError, NewMediaFile, ParsedContent};
use crate::util::{preview, truncate_chars, word_count};

/// Why a single article could not be parsed.
///
/// Persisted as `"<reason_code>: <message>"` in the article's `last_error`.
#[derive(Debug, Error)]
pub enum ExtractionFailure {
    #[error("{0}")]
    Redirect(#[from] RedirectError),
    #[error("{0}")]
    Extraction(#[from] ContentError),
    #[error("extraction service returned no content")]
    NoContent,
    #[error("{0}")]
    Cleaning(#[from] CleanError),
    #[error("cleaned content has {words} words, minimum is {min} words")]
    TooShort { words: usize, min: usize },
}

impl ExtractionFailure {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Redirect(_) => "redirect",
            Self::Extraction(_) => "extraction",
            Self::NoContent => "no_content",
            Self::Cleaning(_) => "cleaning",
            Self::TooShort { .. } => "too_short",
        }
    }

    pub fn last_error(&self) -> String {
        format!("{}: {}", self.reason_code(), self)
    }
}

/// Result of processing one article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ArticleResult {
    Parsed { words: usize, media: usize },
    Failed { reason: &'static str, error: String },
    /// The article had already left `pending`; nothing was done.
    NotPending { status: ContentStatus },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionStats {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    /// Per-reason failure counts.
    pub failures: HashMap<&'static str, usize>,
    /// Status writes that failed; the article stays `pending`.
    pub store_errors: usize,
    pub cancelled: bool,
}

impl ExtractionStats {
    pub fn summary(&self) -> String {
        format!(
            "{} processed, {} parsed, {} failed",
            self.processed, self.successful, self.failed
        )
    }
}

/// Moves `pending` articles to `parsed` or `failed`, strictly one at a
/// time and oldest first.
///
/// The extraction and cleaning calls are billed per request and are never
/// retried: any failure marks the article `failed` with a reason code.
pub struct ExtractionStage {
    db: Database,
    resolver: RedirectResolver,
    extractor: Arc<dyn ContentExtractor>,
    cleaner: Arc<dyn ContentCleaner>,
    monitor: Arc<dyn MonitorSink>,
    min_words: usize,
    max_input_chars: usize,
    max_media: usize,
    delay: Duration,
}

impl ExtractionStage {
    pub fn new(
        db: Database,
        resolver: RedirectResolver,
        extractor: Arc<dyn ContentExtractor>,
        cleaner: Arc<dyn ContentCleaner>,
        monitor: Arc<dyn MonitorSink>,
        extraction: &ExtractionConfig,
        cleaning: &CleaningConfig,
    ) -> Self {
        Self {
            db,
            resolver,
            extractor,
            cleaner,
            monitor,
            min_words: cleaning.min_words,
            max_input_chars: cleaning.max_input_chars,
            max_media: extraction.max_media,
            delay: Duration::from_millis(extraction.delay_between_articles_ms),
        }
    }

    /// Process pending articles in creation order, at most `max_articles`.
    pub async fn run(
        &self,
        max_articles: Option<usize>,
        cancel: &CancelFlag,
    ) -> Result<ExtractionStats, PipelineError> {
        self.monitor.record(&PipelineEvent::StageStarted {
            stage: Stage::Extraction,
        });

        let ids = self.db.pending_article_ids(max_articles).await?;
        tracing::info!(pending = ids.len(), "Starting extraction");

        let mut stats = ExtractionStats::default();
        for (i, article_id) in ids.iter().enumerate() {
            let proceed = if i == 0 {
                !cancel.is_cancelled()
            } else {
                cancel.sleep(self.delay).await
            };
            if !proceed {
                tracing::info!(remaining = ids.len() - i, "Extraction cancelled");
                stats.cancelled = true;
                break;
            }

            match self.process_article(article_id).await {
                Ok(Some(ArticleResult::Parsed { .. })) => {
                    stats.processed += 1;
                    stats.successful += 1;
                }
                Ok(Some(ArticleResult::Failed { reason, .. })) => {
                    stats.processed += 1;
                    stats.failed += 1;
                    *stats.failures.entry(reason).or_default() += 1;
                }
                Ok(Some(ArticleResult::NotPending { .. })) | Ok(None) => {}
                Err(e) => {
                    tracing::error!(article = %article_id, error = %e, "Failed to record extraction result");
                    stats.store_errors += 1;
                }
            }
        }

        self.monitor.record(&PipelineEvent::StageFinished {
            stage: Stage::Extraction,
            summary: stats.summary(),
            cancelled: stats.cancelled,
        });
        Ok(stats)
    }

    /// Process one article by id. `Ok(None)` when it does not exist.
    ///
    /// No store connection is held while the external services are called;
    /// the outcome is written in a single guarded update at the end.
    pub async fn process_article(
        &self,
        article_id: &str,
    ) -> Result<Option<ArticleResult>, DatabaseError> {
        let Some(article) = self.db.get_article(article_id).await? else {
            return Ok(None);
        };
        if article.content_status != ContentStatus::Pending {
            return Ok(Some(ArticleResult::NotPending {
                status: article.content_status,
            }));
        }

        tracing::debug!(article = %article_id, title = %preview(&article.title, 60), "Extracting");

        let resolved = match self.resolver.resolve(&article.url).await {
            Ok(url) => url,
            Err(e) => return self.record_failure(article_id, e.into(), None).await,
        };
        let resolved_url = (resolved != article.url).then(|| resolved.clone());

        let parsed = match self.extract_and_clean(&resolved).await {
            Ok(parsed) => parsed,
            Err(failure) => {
                return self
                    .record_failure(article_id, failure, resolved_url.as_deref())
                    .await
            }
        };

        let words = word_count(&parsed.content);
        let media_count = parsed.media.len();
        let content = ParsedContent {
            content: parsed.content,
            resolved_url,
            media: parsed.media,
        };

        if !self.db.mark_parsed(article_id, &content).await? {
            let status = self
                .db
                .get_article(article_id)
                .await?
                .map(|a| a.content_status)
                .unwrap_or(ContentStatus::Pending);
            return Ok(Some(ArticleResult::NotPending { status }));
        }

        self.monitor.record(&PipelineEvent::ArticleProcessed {
            article_id: article_id.to_string(),
            outcome: ArticleOutcome::Parsed {
                words,
                media: media_count,
            },
        });
        Ok(Some(ArticleResult::Parsed {
            words,
            media: media_count,
        }))
    }

    async fn extract_and_clean(&self, url: &str) -> Result<SelectedContent, ExtractionFailure> {
        let raw = self.extractor.extract(url).await?;
        if raw.markdown.trim().is_empty() {
            return Err(ExtractionFailure::NoContent);
        }

        let stripped = strip_boilerplate(&raw.markdown);
        let input = truncate_chars(&stripped, self.max_input_chars);
        if input.len() < stripped.len() {
            tracing::debug!(url = %url, max_chars = self.max_input_chars, "Truncated cleaning input");
        }

        let cleaned = self.cleaner.clean(&input, url).await?;
        let words = word_count(&cleaned.content);
        if words < self.min_words {
            return Err(ExtractionFailure::TooShort {
                words,
                min: self.min_words,
            });
        }

        Ok(select_media(cleaned, &raw.media, self.max_media))
    }

    async fn record_failure(
        &self,
        article_id: &str,
        failure: ExtractionFailure,
        resolved_url: Option<&str>,
    ) -> Result<Option<ArticleResult>, DatabaseError> {
        let reason = failure.reason_code();
        let error = failure.last_error();

        if !self.db.mark_failed(article_id, &error, resolved_url).await? {
            let status = self
                .db
                .get_article(article_id)
                .await?
                .map(|a| a.content_status)
                .unwrap_or(ContentStatus::Pending);
            return Ok(Some(ArticleResult::NotPending { status }));
        }

        self.monitor.record(&PipelineEvent::ArticleProcessed {
            article_id: article_id.to_string(),
            outcome: ArticleOutcome::Failed {
                reason,
                error: error.clone(),
            },
        });
        Ok(Some(ArticleResult::Failed { reason, error }))
    }
}

struct SelectedContent {
    content: String,
    media: Vec<NewMediaFile>,
}

/// Pick the media to persist and align the placeholders with them.
///
/// The cleaner's ordered list wins; when it returned none the extractor's
/// references are used instead. Duplicate URLs share the first
/// placeholder number, and placeholders beyond `max_media` are removed.
fn select_media(cleaned: CleanedContent, extracted: &[MediaRef], max_media: usize) -> SelectedContent {
    let from_cleaner = !cleaned.media.is_empty();
    let candidates: &[MediaRef] = if from_cleaner {
        &cleaned.media
    } else {
        extracted
    };

    let mut kept: Vec<&MediaRef> = Vec::new();
    let mut mapping: Vec<Option<usize>> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let slot = match kept.iter().position(|k| k.url == candidate.url) {
            Some(existing) => Some(existing + 1),
            None if kept.len() < max_media => {
                kept.push(candidate);
                Some(kept.len())
            }
            None => None,
        };
        mapping.push(slot);
    }

    let content = if from_cleaner {
        remap_placeholders(&cleaned.content, |n| {
            n.checked_sub(1).and_then(|i| mapping.get(i).copied().flatten())
        })
    } else {
        remap_placeholders(&cleaned.content, |_| None)
    };

    let media = kept
        .into_iter()
        .map(|m| NewMediaFile {
            url: m.url.clone(),
            media_type: guess_media_type(&m.url),
            alt_text: m.alt.clone(),
            caption: m.caption.clone(),
        })
        .collect();

    SelectedContent { content, media }
}
