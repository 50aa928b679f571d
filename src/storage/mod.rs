//! SQLite article store.
//!
//! Three tables: `sources` (registry plus health bookkeeping), `articles`
//! (keyed by the derived article id, unique on canonical URL) and
//! `media_files` (many-to-one to articles, cascading on delete). Status
//! transitions are guarded in SQL so `parsed`/`failed` articles and
//! `completed`/`failed` media files never move again without an explicit
//! reset.

mod articles;
mod maintenance;
mod media;
mod schema;
mod sources;
mod types;

pub use schema::Database;
pub use types::{
    Article, CleanupOutcome, CompletedMedia, ContentStatus, DatabaseError, MediaCursor,
    MediaFile, MediaFileStatus, MediaStatus, MediaType, NewArticle, NewMediaFile, ParsedContent,
    SourceHealth, SourceRecord, StoreStats,
};
