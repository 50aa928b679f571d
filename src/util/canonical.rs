use sha2::{Digest, Sha256};
use url::Url;

/// Query parameters that only carry campaign tracking and never change the
/// article a URL points to.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "ref_src"];

/// Length of the hex article identifier.
const ARTICLE_ID_LEN: usize = 16;

/// Canonicalizes an article URL for deduplication.
///
/// - scheme and host are lowercased (done by the `url` parser)
/// - default ports and the fragment are dropped
/// - `utm_*` and other tracking parameters are removed
/// - a single trailing slash is stripped from non-root paths
///
/// Returns `None` when the input is not an absolute http(s) URL.
pub fn canonicalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let key = k.to_ascii_lowercase();
            !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(&path[..path.len() - 1]);
    }

    Some(url.to_string())
}

/// Stable article identifier: the first 16 hex characters of the SHA-256 of
/// the canonical URL.
pub fn article_id_for(canonical_url: &str) -> String {
    let hash = Sha256::digest(canonical_url.as_bytes());
    let mut hex = format!("{:x}", hash);
    hex.truncate(ARTICLE_ID_LEN);
    hex
}
