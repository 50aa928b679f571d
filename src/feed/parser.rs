use chrono::{DateTime, Utc};
use feed_rs::parser;

use crate::util::{canonicalize_url, strip_control_chars};

/// A feed item reduced to what discovery needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    /// Canonicalized article URL.
    pub url: String,
    pub published: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

/// Parsed feed plus the number of entries that had to be dropped.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub entries: Vec<FeedEntry>,
    /// Entries with no usable http(s) link.
    pub malformed: usize,
}

/// Parse RSS/Atom/JSON Feed bytes into entries.
///
/// The first `alternate` link wins, then the first link of any kind.
/// Entries whose link is missing or not http(s) are counted in
/// [`ParsedFeed::malformed`] instead of failing the whole feed.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;
    let mut parsed = ParsedFeed::default();

    for entry in feed.entries {
        let link = entry
            .links
            .iter()
            .find(|l| l.rel.as_deref() == Some("alternate"))
            .or_else(|| entry.links.first())
            .map(|l| l.href.as_str());

        let Some(url) = link.and_then(canonicalize_url) else {
            parsed.malformed += 1;
            continue;
        };

        let title = entry
            .title
            .map(|t| strip_control_chars(t.content.trim()).trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        let summary = entry
            .summary
            .map(|s| s.content)
            .map(|s| strip_control_chars(s.trim()).into_owned())
            .filter(|s| !s.is_empty());

        parsed.entries.push(FeedEntry {
            title,
            url,
            published: entry.published.or(entry.updated),
            summary,
        });
    }

    Ok(parsed)
}
