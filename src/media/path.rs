use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use url::Url;

const DEFAULT_EXTENSION: &str = "jpg";
const URL_HASH_LEN: usize = 12;
const ARTICLE_DIR_LEN: usize = 8;

/// Deterministic local path for a media URL:
/// `<media_dir>/<article_id[..8]>/<sha256(url)[..12]>.<ext>`.
///
/// The same URL always maps to the same file, so a re-download overwrites
/// rather than duplicates.
pub fn media_path(media_dir: &Path, article_id: &str, url: &str) -> PathBuf {
    let dir = article_id.get(..ARTICLE_DIR_LEN).unwrap_or(article_id);
    let mut name = format!("{:x}", Sha256::digest(url.as_bytes()));
    name.truncate(URL_HASH_LEN);

    media_dir
        .join(dir)
        .join(format!("{name}.{}", extension_for(url)))
}

/// Lowercased extension of the URL path, or `jpg` when it has none or it
/// does not look like a file extension.
fn extension_for(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_default();
    let file = path.rsplit('/').next().unwrap_or("");

    match file.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext.to_ascii_lowercase()
        }
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_path_layout() {
        let path = media_path(
            Path::new("/data/media"),
            "0123456789abcdef",
            "https://cdn.example.com/images/Photo.PNG?w=800",
        );
        let rendered = path.to_string_lossy();
        assert!(rendered.starts_with("/data/media/01234567/"));
        assert!(rendered.ends_with(".png"));
        let file = path.file_stem().unwrap().to_string_lossy().to_string();
        assert_eq!(file.len(), 12);
        assert!(file.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_path_is_deterministic() {
        let dir = Path::new("media");
        let a = media_path(dir, "abcdef0123456789", "https://x.com/a.jpg");
        let b = media_path(dir, "abcdef0123456789", "https://x.com/a.jpg");
        let c = media_path(dir, "abcdef0123456789", "https://x.com/b.jpg");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_default_extension() {
        assert_eq!(extension_for("https://x.com/image"), "jpg");
        assert_eq!(extension_for("https://x.com/"), "jpg");
        assert_eq!(extension_for("https://x.com/.hidden"), "jpg");
        assert_eq!(extension_for("https://x.com/a.some-thing"), "jpg");
        assert_eq!(extension_for("https://x.com/clip.MP4"), "mp4");
        assert_eq!(extension_for("https://x.com/photo.webp#frag"), "webp");
    }
}
