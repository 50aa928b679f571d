use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The database is locked by another newsdesk process. Wait for it to finish and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A status column holds a value this build does not know
    #[error("Unknown {column} value in database: {value}")]
    InvalidValue { column: &'static str, value: String },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Status Enumerations
// ============================================================================

/// Extraction state of an article. `Parsed` and `Failed` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Pending,
    Parsed,
    Failed,
}

impl ContentStatus {
    pub const ALL: [ContentStatus; 3] = [Self::Pending, Self::Parsed, Self::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Parsed => "parsed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "parsed" => Some(Self::Parsed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Aggregate media state of an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    /// Not yet extracted.
    None,
    /// At least one owned media file is still pending.
    Processing,
    /// No owned media file is pending.
    Ready,
}

impl MediaStatus {
    pub const ALL: [MediaStatus; 3] = [Self::None, Self::Processing, Self::Ready];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Processing => "processing",
            Self::Ready => "ready",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "processing" => Some(Self::Processing),
            "ready" => Some(Self::Ready),
            _ => None,
        }
    }
}

/// State of a single media file. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFileStatus {
    Pending,
    Completed,
    Failed,
}

impl MediaFileStatus {
    pub const ALL: [MediaFileStatus; 3] = [Self::Pending, Self::Completed, Self::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Coarse kind of a media file, guessed from its URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "document" => Some(Self::Document),
            _ => None,
        }
    }
}

fn decode<T>(
    column: &'static str,
    value: String,
    parse: fn(&str) -> Option<T>,
) -> Result<T, DatabaseError> {
    parse(&value).ok_or(DatabaseError::InvalidValue { column, value })
}

pub(crate) fn from_unix(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}

// ============================================================================
// Write Inputs
// ============================================================================

/// A discovered feed entry ready to be inserted as a `pending` article.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub article_id: String,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub published_at: Option<i64>,
    /// Unix seconds; drives extraction order.
    pub discovered_at: i64,
}

/// A media reference recorded when an article is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMediaFile {
    pub url: String,
    pub media_type: MediaType,
    pub alt_text: Option<String>,
    pub caption: Option<String>,
}

/// Successful extraction payload for [`Database::mark_parsed`](super::Database::mark_parsed).
#[derive(Debug, Clone)]
pub struct ParsedContent {
    pub content: String,
    pub resolved_url: Option<String>,
    pub media: Vec<NewMediaFile>,
}

/// Outcome of a validated download.
#[derive(Debug, Clone)]
pub struct CompletedMedia {
    pub local_path: String,
    pub file_size: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// Source registry entry as synced from configuration.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub id: String,
    pub name: String,
    pub feed_url: String,
    pub category: String,
    pub enabled: bool,
}

// ============================================================================
// Read Models
// ============================================================================

/// Article row as stored.
#[derive(Debug, Clone, Serialize)]
pub struct Article {
    pub article_id: String,
    pub source_id: String,
    pub url: String,
    pub resolved_url: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub content: Option<String>,
    pub content_status: ContentStatus,
    pub media_status: MediaStatus,
    pub created_at: DateTime<Utc>,
    pub parsed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Internal row type for Article queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub article_id: String,
    pub source_id: String,
    pub url: String,
    pub resolved_url: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub published_at: Option<i64>,
    pub content: Option<String>,
    pub content_status: String,
    pub media_status: String,
    pub created_at: i64,
    pub parsed_at: Option<i64>,
    pub last_error: Option<String>,
}

impl ArticleDbRow {
    pub(crate) const COLUMNS: &'static str = "article_id, source_id, url, resolved_url, title, \
        description, published_at, content, content_status, media_status, created_at, \
        parsed_at, last_error";

    pub(crate) fn into_article(self) -> Result<Article, DatabaseError> {
        Ok(Article {
            content_status: decode("content_status", self.content_status, ContentStatus::parse)?,
            media_status: decode("media_status", self.media_status, MediaStatus::parse)?,
            article_id: self.article_id,
            source_id: self.source_id,
            url: self.url,
            resolved_url: self.resolved_url,
            title: self.title,
            description: self.description,
            published_at: self.published_at.map(from_unix),
            content: self.content,
            created_at: from_unix(self.created_at),
            parsed_at: self.parsed_at.map(from_unix),
            last_error: self.last_error,
        })
    }
}

/// Media file row as stored.
#[derive(Debug, Clone, Serialize)]
pub struct MediaFile {
    pub id: i64,
    pub article_id: String,
    pub url: String,
    pub local_path: Option<String>,
    pub file_size: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub media_type: MediaType,
    pub alt_text: Option<String>,
    pub caption: Option<String>,
    pub image_order: i64,
    pub status: MediaFileStatus,
    pub download_attempts: i64,
    pub error: Option<String>,
    /// Unix seconds; part of the media work-queue cursor.
    pub created_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MediaFileDbRow {
    pub id: i64,
    pub article_id: String,
    pub url: String,
    pub local_path: Option<String>,
    pub file_size: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub media_type: String,
    pub alt_text: Option<String>,
    pub caption: Option<String>,
    pub image_order: i64,
    pub status: String,
    pub download_attempts: i64,
    pub error: Option<String>,
    pub created_at: i64,
}

impl MediaFileDbRow {
    pub(crate) const COLUMNS: &'static str = "id, article_id, url, local_path, file_size, \
        width, height, media_type, alt_text, caption, image_order, status, download_attempts, \
        error, created_at";

    pub(crate) fn into_media_file(self) -> Result<MediaFile, DatabaseError> {
        Ok(MediaFile {
            media_type: decode("media_type", self.media_type, MediaType::parse)?,
            status: decode("status", self.status, MediaFileStatus::parse)?,
            id: self.id,
            article_id: self.article_id,
            url: self.url,
            local_path: self.local_path,
            file_size: self.file_size,
            width: self.width,
            height: self.height,
            alt_text: self.alt_text,
            caption: self.caption,
            image_order: self.image_order,
            download_attempts: self.download_attempts,
            error: self.error,
            created_at: self.created_at,
        })
    }
}

/// Cursor into the media work queue: `(created_at, id)` of the last row seen.
pub type MediaCursor = (i64, i64);

/// Source health bookkeeping.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SourceHealth {
    pub id: String,
    pub name: String,
    pub feed_url: String,
    pub category: String,
    pub enabled: bool,
    pub last_checked_at: Option<i64>,
    pub consecutive_errors: i64,
    pub last_error: Option<String>,
    pub total_articles: i64,
}

/// Counts by status, as reported by `newsdesk stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub articles_total: i64,
    pub content_pending: i64,
    pub content_parsed: i64,
    pub content_failed: i64,
    pub media_none: i64,
    pub media_processing: i64,
    pub media_ready: i64,
    pub files_pending: i64,
    pub files_completed: i64,
    pub files_failed: i64,
    /// Parsed and media-ready.
    pub publishable: i64,
}

/// Result of a retention cleanup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupOutcome {
    pub articles_deleted: u64,
    pub media_rows_deleted: u64,
    /// Local files the caller should remove from disk.
    #[serde(skip)]
    pub local_paths: Vec<String>,
}
