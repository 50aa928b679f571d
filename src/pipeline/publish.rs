//! Payloads handed to a publishing adapter.
//!
//! Only articles with `content_status = parsed` and `media_status = ready`
//! are publishable. Placeholders whose media failed are removed from the
//! content; the rest keep their numbers so the adapter can map
//! `[IMAGE_N]` to `media[].order`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::content::strip_placeholders;
use crate::storage::{Article, Database, DatabaseError, MediaFile, MediaFileStatus, MediaType};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishPayload {
    pub article_id: String,
    pub source_id: String,
    pub title: String,
    /// Publisher URL (resolved when the discovered link was a wrapper).
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub content: String,
    pub media: Vec<PublishMedia>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishMedia {
    /// Placeholder number in `content`.
    pub order: i64,
    pub url: String,
    pub local_path: String,
    pub media_type: MediaType,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub alt_text: Option<String>,
    pub caption: Option<String>,
}

pub fn build_payload(article: Article, media: Vec<MediaFile>) -> PublishPayload {
    let completed: Vec<PublishMedia> = media
        .into_iter()
        .filter(|m| m.status == MediaFileStatus::Completed)
        .filter_map(|m| {
            Some(PublishMedia {
                order: m.image_order,
                local_path: m.local_path?,
                url: m.url,
                media_type: m.media_type,
                width: m.width,
                height: m.height,
                alt_text: m.alt_text,
                caption: m.caption,
            })
        })
        .collect();

    let content = strip_placeholders(article.content.as_deref().unwrap_or_default(), |n| {
        completed.iter().any(|m| m.order == n as i64)
    });

    PublishPayload {
        url: article.resolved_url.unwrap_or(article.url),
        article_id: article.article_id,
        source_id: article.source_id,
        title: article.title,
        published_at: article.published_at,
        content,
        media: completed,
    }
}

/// Payloads for up to `limit` publishable articles, oldest first.
pub async fn ready_payloads(db: &Database, limit: i64) -> Result<Vec<PublishPayload>, DatabaseError> {
    let articles = db.publishable_articles(limit).await?;
    let mut payloads = Vec::with_capacity(articles.len());
    for article in articles {
        let media = db.media_for_article(&article.article_id).await?;
        payloads.push(build_payload(article, media));
    }
    Ok(payloads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ContentStatus, MediaStatus};
    use pretty_assertions::assert_eq;

    fn article(content: &str) -> Article {
        Article {
            article_id: "0123456789abcdef".to_string(),
            source_id: "alpha".to_string(),
            url: "https://news.google.com/rss/articles/x".to_string(),
            resolved_url: Some("https://alpha.example.com/story".to_string()),
            title: "Story".to_string(),
            description: None,
            published_at: None,
            content: Some(content.to_string()),
            content_status: ContentStatus::Parsed,
            media_status: MediaStatus::Ready,
            created_at: Utc::now(),
            parsed_at: Some(Utc::now()),
            last_error: None,
        }
    }

    fn file(order: i64, status: MediaFileStatus) -> MediaFile {
        MediaFile {
            id: order,
            article_id: "0123456789abcdef".to_string(),
            url: format!("https://cdn.example.com/{order}.jpg"),
            local_path: (status == MediaFileStatus::Completed)
                .then(|| format!("data/media/01234567/{order}.jpg")),
            file_size: Some(4096),
            width: Some(800),
            height: Some(600),
            media_type: MediaType::Image,
            alt_text: None,
            caption: Some(format!("Caption {order}")),
            image_order: order,
            status,
            download_attempts: 1,
            error: None,
            created_at: 0,
        }
    }

    #[test]
    fn test_failed_media_placeholders_removed() {
        let payload = build_payload(
            article("Lead.\n\n[IMAGE_1]\n\nMiddle.\n\n[IMAGE_2]\n\nEnd.\n\n[IMAGE_3]"),
            vec![
                file(1, MediaFileStatus::Completed),
                file(2, MediaFileStatus::Failed),
                file(3, MediaFileStatus::Completed),
            ],
        );
        assert_eq!(
            payload.content,
            "Lead.\n\n[IMAGE_1]\n\nMiddle.\n\nEnd.\n\n[IMAGE_3]"
        );
        let orders: Vec<i64> = payload.media.iter().map(|m| m.order).collect();
        assert_eq!(orders, vec![1, 3]);
        assert_eq!(payload.url, "https://alpha.example.com/story");
    }

    #[test]
    fn test_no_media() {
        let payload = build_payload(article("Just text."), vec![]);
        assert_eq!(payload.content, "Just text.");
        assert!(payload.media.is_empty());
    }
}
