//! News discovery, extraction and media pipeline.
//!
//! Articles move through three stages backed by one SQLite store:
//! discovery inserts `pending` articles from RSS/Atom feeds, extraction
//! turns each into `parsed` (clean markdown with `[IMAGE_N]` placeholders)
//! or `failed`, and the media stage downloads and validates the referenced
//! files until the article is `ready` for publishing.

pub mod config;
pub mod content;
pub mod feed;
pub mod http;
pub mod media;
pub mod monitor;
pub mod pipeline;
pub mod storage;
pub mod util;
