//! Monitoring sink injected into every pipeline stage.
//!
//! Stages report what happened to each unit of work through a
//! [`MonitorSink`] handed to them at construction. [`LogSink`] turns events
//! into `tracing` output; [`RecordingSink`] keeps them in memory for
//! assertions.

use std::sync::Mutex;

use serde::Serialize;

/// Pipeline stage identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Discovery,
    Extraction,
    Media,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Extraction => "extraction",
            Self::Media => "media",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SourceOutcome {
    Checked { entries: usize, inserted: usize },
    Failed { error: String, consecutive_errors: i64 },
    /// Circuit breaker open.
    Skipped { consecutive_errors: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ArticleOutcome {
    Parsed { words: usize, media: usize },
    Failed { reason: &'static str, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MediaOutcome {
    Completed { bytes: u64 },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    StageStarted {
        stage: Stage,
    },
    SourceChecked {
        source_id: String,
        #[serde(flatten)]
        outcome: SourceOutcome,
    },
    ArticleProcessed {
        article_id: String,
        #[serde(flatten)]
        outcome: ArticleOutcome,
    },
    MediaProcessed {
        media_id: i64,
        article_id: String,
        #[serde(flatten)]
        outcome: MediaOutcome,
    },
    StageFinished {
        stage: Stage,
        summary: String,
        cancelled: bool,
    },
}

pub trait MonitorSink: Send + Sync {
    fn record(&self, event: &PipelineEvent);
}

/// Default sink: one structured `tracing` event per pipeline event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MonitorSink for LogSink {
    fn record(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::StageStarted { stage } => {
                tracing::info!(stage = stage.as_str(), "Stage started");
            }
            PipelineEvent::SourceChecked { source_id, outcome } => match outcome {
                SourceOutcome::Checked { entries, inserted } => {
                    tracing::info!(source = %source_id, entries, inserted, "Source checked");
                }
                SourceOutcome::Failed {
                    error,
                    consecutive_errors,
                } => {
                    tracing::warn!(source = %source_id, consecutive_errors, error = %error, "Source failed");
                }
                SourceOutcome::Skipped { consecutive_errors } => {
                    tracing::info!(source = %source_id, consecutive_errors, "Source skipped (circuit open)");
                }
            },
            PipelineEvent::ArticleProcessed {
                article_id,
                outcome,
            } => match outcome {
                ArticleOutcome::Parsed { words, media } => {
                    tracing::info!(article = %article_id, words, media, "Article parsed");
                }
                ArticleOutcome::Failed { reason, error } => {
                    tracing::warn!(article = %article_id, reason, error = %error, "Article failed");
                }
            },
            PipelineEvent::MediaProcessed {
                media_id,
                article_id,
                outcome,
            } => match outcome {
                MediaOutcome::Completed { bytes } => {
                    tracing::info!(media_id, article = %article_id, bytes, "Media completed");
                }
                MediaOutcome::Failed { error } => {
                    tracing::warn!(media_id, article = %article_id, error = %error, "Media failed");
                }
            },
            PipelineEvent::StageFinished {
                stage,
                summary,
                cancelled,
            } => {
                tracing::info!(stage = stage.as_str(), cancelled, "Stage finished: {summary}");
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl MonitorSink for RecordingSink {
    fn record(&self, event: &PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
