//! Feed fetching and parsing.
//!
//! - [`parser`] turns RSS/Atom bytes into canonicalized [`FeedEntry`] values
//! - [`fetcher`] retrieves feed bodies over HTTP with a timeout, a size cap
//!   and exponential backoff on 429/5xx
//!
//! Discovery talks to feeds through the [`FeedSource`] trait so tests can
//! substitute canned feeds.

mod fetcher;
mod parser;

use async_trait::async_trait;

pub use fetcher::{FeedFetcher, FetchError};
pub use parser::{parse_feed, FeedEntry, ParsedFeed};

/// Something that can turn a feed address into entries.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_feed(&self, feed_url: &str) -> Result<ParsedFeed, FetchError>;
}
