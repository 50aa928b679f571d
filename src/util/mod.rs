//! Utility functions shared by the pipeline stages.
//!
//! - **URL validation**: SSRF checks before fetching remote articles and media
//! - **URL canonicalization**: deduplication keys and article identifiers
//! - **Text processing**: word counting, control-char stripping, truncation
//!
//! # Examples
//!
//! ```
//! use newsdesk::util::{article_id_for, canonicalize_url, word_count};
//!
//! let canonical = canonicalize_url("https://Example.com/post/?utm_source=rss").unwrap();
//! assert_eq!(canonical, "https://example.com/post");
//! assert_eq!(article_id_for(&canonical).len(), 16);
//! assert_eq!(word_count("two words"), 2);
//! ```

mod canonical;
mod text;
mod url_validator;

pub use canonical::{article_id_for, canonicalize_url};
pub(crate) use text::placeholder_regex;
pub use text::{preview, strip_control_chars, truncate_chars, word_count};
pub use url_validator::{validate_fetch_url, validate_http_url, validate_url, UrlValidationError};
