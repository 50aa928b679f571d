use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use super::MediaRef;
use crate::storage::MediaType;
use crate::util::placeholder_regex;

fn image_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // ![alt](url "optional title"), url optionally wrapped in <>
    RE.get_or_init(|| {
        Regex::new(r#"!\[([^\]]*)\]\(\s*<?([^)\s>]+)>?(?:\s+"([^"]*)")?\s*\)"#)
            .expect("image pattern is valid")
    })
}

fn blank_run_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("blank-run pattern is valid"))
}

/// Resolve a possibly relative media URL against the article URL.
///
/// Only http(s) results are returned; `data:` URIs and other schemes are
/// dropped.
pub(crate) fn resolve_media_url(raw: &str, base: Option<&Url>) -> Option<String> {
    let raw = raw.trim();
    let resolved = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(raw).ok()?,
        Err(_) => return None,
    };
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// Markdown images `![alt](url)` in document order, resolved against
/// `article_url` and de-duplicated by URL. The image title, when present,
/// becomes the caption.
pub fn markdown_images(markdown: &str, article_url: &str) -> Vec<MediaRef> {
    let base = Url::parse(article_url).ok();
    let mut seen = HashSet::new();
    let mut refs = Vec::new();

    for caps in image_regex().captures_iter(markdown) {
        let Some(url) = resolve_media_url(&caps[2], base.as_ref()) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }
        let alt = caps[1].trim();
        refs.push(MediaRef {
            url,
            alt: (!alt.is_empty()).then(|| alt.to_string()),
            caption: caps
                .get(3)
                .map(|m| m.as_str().trim().to_string())
                .filter(|c| !c.is_empty()),
        });
    }

    refs
}

/// Coarse media kind from the URL path extension; unknown means image.
pub fn guess_media_type(url: &str) -> MediaType {
    let path = Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");

    match ext {
        "mp4" | "webm" | "mov" | "m4v" | "mkv" => MediaType::Video,
        "mp3" | "wav" | "ogg" | "m4a" | "flac" => MediaType::Audio,
        "pdf" | "doc" | "docx" | "ppt" | "pptx" | "xls" | "xlsx" => MediaType::Document,
        _ => MediaType::Image,
    }
}

/// Placeholder numbers in order of appearance.
pub fn placeholder_indices(content: &str) -> Vec<usize> {
    placeholder_regex()
        .captures_iter(content)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// Remove every `[IMAGE_N]` for which `keep(N)` is false, then collapse the
/// blank lines left behind.
pub fn strip_placeholders(content: &str, keep: impl Fn(usize) -> bool) -> String {
    remap_placeholders(content, |n| keep(n).then_some(n))
}

/// Rewrite `[IMAGE_N]` to `[IMAGE_M]` where `map(N)` is `Some(M)`; drop it
/// where `None`.
pub fn remap_placeholders(content: &str, map: impl Fn(usize) -> Option<usize>) -> String {
    let stripped = placeholder_regex().replace_all(content, |caps: &regex::Captures<'_>| {
        match caps[1].parse::<usize>().ok().and_then(&map) {
            Some(n) => format!("[IMAGE_{n}]"),
            None => String::new(),
        }
    });
    let trimmed: Vec<&str> = stripped.lines().map(str::trim_end).collect();
    blank_run_regex()
        .replace_all(&trimmed.join("\n"), "\n\n")
        .trim()
        .to_string()
}
