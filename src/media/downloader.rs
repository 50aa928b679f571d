use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use super::path::media_path;
use crate::config::MediaConfig;
use crate::storage::{MediaFile, MediaType};
use crate::util::validate_fetch_url;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Invalid media URL: {0}")]
    InvalidUrl(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Download timed out after {0}s")]
    Timeout(u64),
    #[error("File too large (exceeds {limit} bytes)")]
    TooLarge { limit: u64 },
    #[error("File too small ({size} bytes, minimum is {min} bytes)")]
    TooSmall { size: u64, min: u64 },
    #[error("Image too small ({width}x{height}, minimum is {min_width}x{min_height})")]
    ImageTooSmall {
        width: u32,
        height: u32,
        min_width: u32,
        min_height: u32,
    },
    #[error("Unreadable image: {0}")]
    InvalidImage(String),
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file that passed size and dimension validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub bytes: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Downloads media files to hash-derived paths and validates them.
///
/// Every failure path removes whatever was written, so a file on disk at a
/// media path always corresponds to a `completed` row.
pub struct MediaDownloader {
    client: reqwest::Client,
    media_dir: PathBuf,
    min_bytes: u64,
    max_bytes: u64,
    min_width: u32,
    min_height: u32,
    timeout: Duration,
    allow_private_hosts: bool,
}

impl MediaDownloader {
    pub fn new(client: reqwest::Client, media_dir: impl Into<PathBuf>, config: &MediaConfig) -> Self {
        Self {
            client,
            media_dir: media_dir.into(),
            min_bytes: config.min_file_bytes,
            max_bytes: config.max_file_bytes,
            min_width: config.min_image_width,
            min_height: config.min_image_height,
            timeout: Duration::from_secs(config.timeout_secs),
            allow_private_hosts: config.allow_private_hosts,
        }
    }

    pub fn target_path(&self, article_id: &str, url: &str) -> PathBuf {
        media_path(&self.media_dir, article_id, url)
    }

    pub async fn download(&self, media: &MediaFile) -> Result<DownloadedFile, MediaError> {
        let url = validate_fetch_url(&media.url, self.allow_private_hosts)
            .map_err(|e| MediaError::InvalidUrl(e.to_string()))?;
        let path = self.target_path(&media.article_id, &media.url);

        let result = self.fetch_and_validate(url, &path, media.media_type).await;
        if result.is_err() {
            remove_partial(&path).await;
        }
        result
    }

    async fn fetch_and_validate(
        &self,
        url: url::Url,
        path: &Path,
        media_type: MediaType,
    ) -> Result<DownloadedFile, MediaError> {
        let secs = self.timeout.as_secs();
        let bytes = tokio::time::timeout(self.timeout, self.fetch_to_file(url, path))
            .await
            .map_err(|_| MediaError::Timeout(secs))??;

        if bytes < self.min_bytes {
            return Err(MediaError::TooSmall {
                size: bytes,
                min: self.min_bytes,
            });
        }

        let (width, height) = if media_type == MediaType::Image {
            let (width, height) = read_dimensions(path.to_path_buf()).await?;
            if width < self.min_width || height < self.min_height {
                return Err(MediaError::ImageTooSmall {
                    width,
                    height,
                    min_width: self.min_width,
                    min_height: self.min_height,
                });
            }
            (Some(width), Some(height))
        } else {
            (None, None)
        };

        Ok(DownloadedFile {
            path: path.to_path_buf(),
            bytes,
            width,
            height,
        })
    }

    /// Stream the body to `path`, aborting once `max_bytes` is exceeded.
    async fn fetch_to_file(&self, url: url::Url, path: &Path) -> Result<u64, MediaError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::HttpStatus(status.as_u16()));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(MediaError::TooLarge {
                    limit: self.max_bytes,
                });
            }
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(path).await?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written = written.saturating_add(chunk.len() as u64);
            if written > self.max_bytes {
                return Err(MediaError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(written)
    }
}

/// Reads only the image header; the pixel data is never decoded.
async fn read_dimensions(path: PathBuf) -> Result<(u32, u32), MediaError> {
    tokio::task::spawn_blocking(move || -> Result<(u32, u32), MediaError> {
        image::ImageReader::open(&path)?
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|e| MediaError::InvalidImage(e.to_string()))
    })
    .await
    .map_err(|e| MediaError::InvalidImage(e.to_string()))?
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed rejected media file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove media file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MediaFileStatus;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
        });
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn media(url: &str, media_type: MediaType) -> MediaFile {
        MediaFile {
            id: 1,
            article_id: "0123456789abcdef".to_string(),
            url: url.to_string(),
            local_path: None,
            file_size: None,
            width: None,
            height: None,
            media_type,
            alt_text: None,
            caption: None,
            image_order: 1,
            status: MediaFileStatus::Pending,
            download_attempts: 0,
            error: None,
            created_at: 0,
        }
    }

    fn downloader(dir: &Path) -> MediaDownloader {
        let config = MediaConfig {
            min_file_bytes: 64,
            max_file_bytes: 512 * 1024,
            timeout_secs: 5,
            allow_private_hosts: true,
            ..MediaConfig::default()
        };
        MediaDownloader::new(reqwest::Client::new(), dir, &config)
    }

    async fn serve(server: &MockServer, route: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_download_valid_image() {
        let server = MockServer::start().await;
        serve(&server, "/big.png", png(300, 280)).await;
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path());

        let item = media(&format!("{}/big.png", server.uri()), MediaType::Image);
        let file = d.download(&item).await.unwrap();
        assert_eq!(file.width, Some(300));
        assert_eq!(file.height, Some(280));
        assert!(file.path.exists());
        assert_eq!(file.path, d.target_path(&item.article_id, &item.url));
        assert_eq!(std::fs::metadata(&file.path).unwrap().len(), file.bytes);
    }

    #[tokio::test]
    async fn test_small_image_rejected_and_removed() {
        let server = MockServer::start().await;
        serve(&server, "/thumb.png", png(120, 120)).await;
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path());

        let item = media(&format!("{}/thumb.png", server.uri()), MediaType::Image);
        let err = d.download(&item).await.unwrap_err();
        assert!(matches!(
            err,
            MediaError::ImageTooSmall {
                width: 120,
                height: 120,
                ..
            }
        ));
        assert!(!d.target_path(&item.article_id, &item.url).exists());
    }

    #[tokio::test]
    async fn test_oversized_file_rejected_and_removed() {
        let server = MockServer::start().await;
        serve(&server, "/huge.jpg", vec![0u8; 600 * 1024]).await;
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path());

        let item = media(&format!("{}/huge.jpg", server.uri()), MediaType::Image);
        let err = d.download(&item).await.unwrap_err();
        assert!(matches!(err, MediaError::TooLarge { .. }));
        assert!(!d.target_path(&item.article_id, &item.url).exists());
    }

    #[tokio::test]
    async fn test_tiny_file_rejected() {
        let server = MockServer::start().await;
        serve(&server, "/pixel.gif", vec![1u8; 10]).await;
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path());

        let item = media(&format!("{}/pixel.gif", server.uri()), MediaType::Image);
        let err = d.download(&item).await.unwrap_err();
        assert!(matches!(err, MediaError::TooSmall { size: 10, min: 64 }));
        assert!(!d.target_path(&item.article_id, &item.url).exists());
    }

    #[tokio::test]
    async fn test_garbage_image_rejected() {
        let server = MockServer::start().await;
        serve(&server, "/fake.jpg", b"<html>not an image</html>".repeat(10)).await;
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path());

        let item = media(&format!("{}/fake.jpg", server.uri()), MediaType::Image);
        let err = d.download(&item).await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidImage(_)));
    }

    #[tokio::test]
    async fn test_video_skips_dimension_check() {
        let server = MockServer::start().await;
        serve(&server, "/clip.mp4", vec![7u8; 4096]).await;
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path());

        let item = media(&format!("{}/clip.mp4", server.uri()), MediaType::Video);
        let file = d.download(&item).await.unwrap();
        assert_eq!(file.bytes, 4096);
        assert_eq!(file.width, None);
    }

    #[tokio::test]
    async fn test_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path());

        let item = media(&format!("{}/gone.jpg", server.uri()), MediaType::Image);
        assert!(matches!(
            d.download(&item).await,
            Err(MediaError::HttpStatus(404))
        ));
    }

    #[tokio::test]
    async fn test_private_host_rejected_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let d = MediaDownloader::new(reqwest::Client::new(), dir.path(), &MediaConfig::default());
        let item = media("http://127.0.0.1:9/a.jpg", MediaType::Image);
        assert!(matches!(
            d.download(&item).await,
            Err(MediaError::InvalidUrl(_))
        ));
    }
}
