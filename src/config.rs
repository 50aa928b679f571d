//! Configuration file parser for `newsdesk.toml`.
//!
//! Every table uses `deny_unknown_fields`: a typo in a key fails at startup
//! instead of silently falling back to a default. Missing keys take the
//! defaults documented on each struct. Sources are declared as
//! `[[sources]]` entries and at least one is required.
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::util::validate_http_url;

/// Environment variable that overrides `extraction.api_key`.
pub const EXTRACTOR_KEY_ENV: &str = "NEWSDESK_EXTRACTOR_API_KEY";
/// Environment variable that overrides `cleaning.api_key`.
pub const CLEANER_KEY_ENV: &str = "NEWSDESK_CLEANER_API_KEY";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Parsed but semantically invalid (bad URL, inverted range, ...).
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Root directory for downloaded media.
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub cleaning: CleaningConfig,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    /// The source registry.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/newsdesk.db")
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("data/media")
}

/// A configured content source.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Stable identifier (`[a-z0-9_-]+`), referenced by every article.
    pub id: String,
    pub name: String,
    pub feed_url: String,
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default)]
    pub category: SourceCategory,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceCategory {
    Company,
    Research,
    News,
    Blog,
    Newsletter,
    #[default]
    Other,
}

impl SourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::Company => "company",
            SourceCategory::Research => "research",
            SourceCategory::News => "news",
            SourceCategory::Blog => "blog",
            SourceCategory::Newsletter => "newsletter",
            SourceCategory::Other => "other",
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Only entries published within this many days are inserted.
    pub lookback_days: u32,
    pub fetch_timeout_secs: u64,
    pub max_feed_bytes: usize,
    /// Retries for 429/5xx/incomplete bodies.
    pub max_retries: u32,
    /// Base of the exponential backoff between retries.
    pub retry_base_delay_ms: u64,
    /// Sources polled at once.
    pub concurrency: usize,
    /// Consecutive errors after which a source is skipped (0 = never).
    pub failure_threshold: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            lookback_days: 7,
            fetch_timeout_secs: 30,
            max_feed_bytes: 10 * 1024 * 1024,
            max_retries: 3,
            retry_base_delay_ms: 2000,
            concurrency: 4,
            failure_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractionConfig {
    /// Reader-style extraction service; the article URL is appended.
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
    pub max_content_bytes: usize,
    /// Hosts whose URLs are redirect wrappers to be followed before extraction.
    pub redirect_hosts: Vec<String>,
    pub redirect_timeout_secs: u64,
    pub delay_between_articles_ms: u64,
    /// Media references kept per article.
    pub max_media: usize,
    /// Skip the SSRF host checks on article URLs.
    pub allow_private_hosts: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://r.jina.ai".to_string(),
            api_key: None,
            timeout_secs: 120,
            max_content_bytes: 5 * 1024 * 1024,
            redirect_hosts: vec!["news.google.com".to_string()],
            redirect_timeout_secs: 10,
            delay_between_articles_ms: 1000,
            max_media: 5,
            allow_private_hosts: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleaningConfig {
    /// OpenAI-compatible API root (`/chat/completions` is appended).
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
    /// Cleaned articles shorter than this are treated as paywalled/empty.
    pub min_words: usize,
    /// Raw content is truncated to this many characters before the call.
    pub max_input_chars: usize,
    pub temperature: f32,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 120,
            min_words: 300,
            max_input_chars: 60_000,
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MediaConfig {
    pub batch_size: usize,
    pub min_file_bytes: u64,
    pub max_file_bytes: u64,
    pub min_image_width: u32,
    pub min_image_height: u32,
    pub file_delay_min_ms: u64,
    pub file_delay_max_ms: u64,
    pub batch_delay_min_ms: u64,
    pub batch_delay_max_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Skip the SSRF host checks on media URLs.
    pub allow_private_hosts: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            min_file_bytes: 2 * 1024,
            max_file_bytes: 2 * 1024 * 1024,
            min_image_width: 250,
            min_image_height: 250,
            file_delay_min_ms: 2000,
            file_delay_max_ms: 5000,
            batch_delay_min_ms: 5000,
            batch_delay_max_ms: 10_000,
            timeout_secs: 30,
            user_agent: concat!("newsdesk/", env!("CARGO_PKG_VERSION")).to_string(),
            allow_private_hosts: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    pub max_age_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { max_age_days: 30 }
    }
}

impl DiscoveryConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl MediaConfig {
    pub fn file_delay_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.file_delay_min_ms),
            Duration::from_millis(self.file_delay_max_ms),
        )
    }

    pub fn batch_delay_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.batch_delay_min_ms),
            Duration::from_millis(self.batch_delay_max_ms),
        )
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load, apply environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let meta = std::fs::metadata(path)?;
        if meta.len() > Self::MAX_FILE_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "Config file is {} bytes (max {} bytes)",
                meta.len(),
                Self::MAX_FILE_SIZE
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides();
        tracing::info!(
            path = %path.display(),
            sources = config.sources.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate TOML text without touching the environment.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(EXTRACTOR_KEY_ENV) {
            if !key.trim().is_empty() {
                self.extraction.api_key = Some(SecretString::from(key));
            }
        }
        if let Ok(key) = std::env::var(CLEANER_KEY_ENV) {
            if !key.trim().is_empty() {
                self.cleaning.api_key = Some(SecretString::from(key));
            }
        }
    }

    /// Semantic checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[sources]] entry is required".into(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.id.is_empty()
                || !source
                    .id
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
            {
                return Err(ConfigError::Invalid(format!(
                    "source id '{}' must match [a-z0-9_-]+",
                    source.id
                )));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
            if source.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "source '{}' has an empty name",
                    source.id
                )));
            }
            validate_http_url(&source.feed_url).map_err(|e| {
                ConfigError::Invalid(format!("source '{}' feed_url: {}", source.id, e))
            })?;
            if let Some(site) = &source.site_url {
                validate_http_url(site).map_err(|e| {
                    ConfigError::Invalid(format!("source '{}' site_url: {}", source.id, e))
                })?;
            }
        }

        validate_http_url(&self.extraction.base_url)
            .map_err(|e| ConfigError::Invalid(format!("extraction.base_url: {e}")))?;
        validate_http_url(&self.cleaning.endpoint)
            .map_err(|e| ConfigError::Invalid(format!("cleaning.endpoint: {e}")))?;

        let d = &self.discovery;
        if d.fetch_timeout_secs == 0 || d.concurrency == 0 || d.lookback_days == 0 {
            return Err(ConfigError::Invalid(
                "discovery.fetch_timeout_secs, concurrency and lookback_days must be > 0".into(),
            ));
        }
        if self.extraction.timeout_secs == 0 || self.cleaning.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "extraction and cleaning timeouts must be > 0".into(),
            ));
        }

        let m = &self.media;
        if m.batch_size == 0 || m.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "media.batch_size and media.timeout_secs must be > 0".into(),
            ));
        }
        if m.min_file_bytes > m.max_file_bytes {
            return Err(ConfigError::Invalid(
                "media.min_file_bytes exceeds media.max_file_bytes".into(),
            ));
        }
        if m.file_delay_min_ms > m.file_delay_max_ms || m.batch_delay_min_ms > m.batch_delay_max_ms
        {
            return Err(ConfigError::Invalid(
                "media delay ranges must have min <= max".into(),
            ));
        }

        if self.retention.max_age_days == 0 {
            return Err(ConfigError::Invalid(
                "retention.max_age_days must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Sources that discovery should poll.
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

// ============================================================================
// Tests
// ============================================================================
