//! Article content acquisition.
//!
//! Three collaborators, each behind a trait so the extraction stage can be
//! exercised with fakes:
//!
//! - [`ContentExtractor`]: fetches raw markdown and media references for a URL
//!   ([`ReaderExtractor`] talks to a reader-style extraction service)
//! - [`ContentCleaner`]: turns raw markdown into clean article text with
//!   `[IMAGE_N]` placeholders ([`AiCleaner`] calls an OpenAI-compatible API)
//! - [`RedirectResolver`]: unwraps aggregator redirect links before extraction
//!
//! Plus local helpers: [`strip_boilerplate`] and the placeholder utilities.

mod boilerplate;
mod cleaner;
mod placeholders;
mod reader;
mod redirect;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use boilerplate::strip_boilerplate;
pub use cleaner::{AiCleaner, CleanError};
pub use placeholders::{
    guess_media_type, markdown_images, placeholder_indices, remap_placeholders, strip_placeholders,
};
pub use reader::{ContentError, ReaderExtractor};
pub use redirect::{RedirectError, RedirectResolver};

/// A media reference found in article content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// Raw output of the content-extraction service.
#[derive(Debug, Clone, Default)]
pub struct RawContent {
    pub title: Option<String>,
    /// Markdown body.
    pub markdown: String,
    /// Media references in document order, absolute and de-duplicated.
    pub media: Vec<MediaRef>,
}

/// Output of the cleaning pass.
#[derive(Debug, Clone, Default)]
pub struct CleanedContent {
    /// Clean markdown with `[IMAGE_N]` placeholders (1-based).
    pub content: String,
    /// Media in placeholder order: `media[0]` is `[IMAGE_1]`.
    pub media: Vec<MediaRef>,
}

/// Content-extraction service. One call per article, never retried.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<RawContent, ContentError>;
}

/// AI cleaning service.
#[async_trait]
pub trait ContentCleaner: Send + Sync {
    async fn clean(&self, raw: &str, url: &str) -> Result<CleanedContent, CleanError>;
}
