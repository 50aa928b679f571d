//! Shared fixtures: fake extraction/cleaning services and stage builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use newsdesk::config::{CleaningConfig, ExtractionConfig, MediaConfig};
use newsdesk::content::{
    CleanError, CleanedContent, ContentCleaner, ContentError, ContentExtractor, MediaRef,
    RawContent, RedirectResolver,
};
use newsdesk::media::MediaDownloader;
use newsdesk::monitor::{MonitorSink, PipelineEvent, RecordingSink};
use newsdesk::pipeline::{CancelFlag, ExtractionStage, MediaStage};
use newsdesk::storage::{Database, NewArticle, SourceRecord};
use newsdesk::util::{article_id_for, canonicalize_url};

pub const SOURCE_ID: &str = "wire";

pub async fn test_db() -> Database {
    let db = Database::open(":memory:").await.unwrap();
    db.sync_sources(&[SourceRecord {
        id: SOURCE_ID.to_string(),
        name: "Wire".to_string(),
        feed_url: "https://wire.example.com/feed".to_string(),
        category: "news".to_string(),
        enabled: true,
    }])
    .await
    .unwrap();
    db
}

/// Insert a pending article discovered at `discovered_at`; returns its id.
pub async fn seed_article(db: &Database, url: &str, discovered_at: i64) -> String {
    let url = canonicalize_url(url).unwrap();
    let article_id = article_id_for(&url);
    db.complete_source_discovery(
        SOURCE_ID,
        &[NewArticle {
            article_id: article_id.clone(),
            url: url.clone(),
            title: format!("Story at {url}"),
            description: None,
            published_at: Some(discovered_at),
            discovered_at,
        }],
    )
    .await
    .unwrap();
    article_id
}

/// Extraction service stand-in. Records every URL it is asked for.
#[derive(Default)]
pub struct FakeExtractor {
    calls: Mutex<Vec<String>>,
    failures: HashMap<String, fn() -> ContentError>,
    empty: Vec<String>,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, url: &str, error: fn() -> ContentError) -> Self {
        self.failures.insert(url.to_string(), error);
        self
    }

    pub fn empty_for(mut self, url: &str) -> Self {
        self.empty.push(url.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentExtractor for FakeExtractor {
    async fn extract(&self, url: &str) -> Result<RawContent, ContentError> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(error) = self.failures.get(url) {
            return Err(error());
        }
        if self.empty.iter().any(|u| u == url) {
            return Ok(RawContent::default());
        }
        Ok(RawContent {
            title: Some("Story".to_string()),
            markdown: format!("# Story\n\nRaw body of {url}."),
            media: Vec::new(),
        })
    }
}

/// Cleaning service stand-in returning `words` words followed by one
/// placeholder per media URL.
pub struct FakeCleaner {
    words: usize,
    media: Vec<String>,
    calls: AtomicUsize,
}

impl FakeCleaner {
    pub fn with_words(words: usize) -> Self {
        Self {
            words,
            media: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_media(mut self, urls: Vec<String>) -> Self {
        self.media = urls;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentCleaner for FakeCleaner {
    async fn clean(&self, _raw: &str, _url: &str) -> Result<CleanedContent, CleanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut content = vec!["word"; self.words].join(" ");
        for n in 1..=self.media.len() {
            content.push_str(&format!("\n\n[IMAGE_{n}]"));
        }
        Ok(CleanedContent {
            content,
            media: self
                .media
                .iter()
                .map(|url| MediaRef {
                    url: url.clone(),
                    alt: None,
                    caption: None,
                })
                .collect(),
        })
    }
}

/// Cancels `flag` once `after` media files have been processed.
pub struct CancelAfterMedia {
    flag: CancelFlag,
    after: usize,
    seen: AtomicUsize,
    pub inner: RecordingSink,
}

impl CancelAfterMedia {
    pub fn new(flag: CancelFlag, after: usize) -> Self {
        Self {
            flag,
            after,
            seen: AtomicUsize::new(0),
            inner: RecordingSink::new(),
        }
    }
}

impl MonitorSink for CancelAfterMedia {
    fn record(&self, event: &PipelineEvent) {
        self.inner.record(event);
        if matches!(event, PipelineEvent::MediaProcessed { .. })
            && self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.after
        {
            self.flag.cancel();
        }
    }
}

pub fn extraction_config() -> ExtractionConfig {
    ExtractionConfig {
        delay_between_articles_ms: 0,
        allow_private_hosts: true,
        ..ExtractionConfig::default()
    }
}

pub fn extraction_stage(
    db: &Database,
    extractor: Arc<FakeExtractor>,
    cleaner: Arc<FakeCleaner>,
    monitor: Arc<dyn MonitorSink>,
) -> ExtractionStage {
    let config = extraction_config();
    ExtractionStage::new(
        db.clone(),
        RedirectResolver::new(reqwest::Client::new(), &config),
        extractor,
        cleaner,
        monitor,
        &config,
        &CleaningConfig::default(),
    )
}

pub fn media_config() -> MediaConfig {
    MediaConfig {
        min_file_bytes: 64,
        max_file_bytes: 512 * 1024,
        file_delay_min_ms: 0,
        file_delay_max_ms: 0,
        batch_delay_min_ms: 0,
        batch_delay_max_ms: 0,
        timeout_secs: 5,
        allow_private_hosts: true,
        ..MediaConfig::default()
    }
}

pub fn media_stage(db: &Database, dir: &Path, monitor: Arc<dyn MonitorSink>) -> MediaStage {
    let config = media_config();
    MediaStage::new(
        db.clone(),
        MediaDownloader::new(reqwest::Client::new(), dir, &config),
        monitor,
        &config,
    )
}

/// A PNG large enough to pass the default 250x250 minimum.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}
