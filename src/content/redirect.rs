use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::ExtractionConfig;
use crate::util::validate_fetch_url;

#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Redirect resolution timed out after {0}s")]
    Timeout(u64),
    #[error("Redirect resolution failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Redirect target returned HTTP {0}")]
    HttpStatus(u16),
}

/// Turns aggregator links into the publisher URL before extraction.
///
/// `google.com/url?url=...` (or `q=`) wrappers are unwrapped without a
/// request. Links on a configured redirect host are followed over HTTP and
/// the final URL after redirects is used.
pub struct RedirectResolver {
    client: reqwest::Client,
    hosts: Vec<String>,
    timeout: Duration,
    allow_private_hosts: bool,
}

impl RedirectResolver {
    pub fn new(client: reqwest::Client, config: &ExtractionConfig) -> Self {
        Self {
            client,
            hosts: config
                .redirect_hosts
                .iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            timeout: Duration::from_secs(config.redirect_timeout_secs),
            allow_private_hosts: config.allow_private_hosts,
        }
    }

    /// Returns `url` unchanged when it is not a known wrapper.
    pub async fn resolve(&self, url: &str) -> Result<String, RedirectError> {
        let parsed = Url::parse(url).map_err(|e| RedirectError::InvalidUrl(e.to_string()))?;

        if let Some(target) = unwrap_google_url(&parsed) {
            tracing::debug!(from = %url, to = %target, "Unwrapped redirect link");
            return Ok(target);
        }

        if !self.is_redirect_host(&parsed) {
            return Ok(url.to_string());
        }

        let target = validate_fetch_url(url, self.allow_private_hosts)
            .map_err(|e| RedirectError::InvalidUrl(e.to_string()))?;
        let secs = self.timeout.as_secs();
        let response = tokio::time::timeout(self.timeout, self.client.get(target).send())
            .await
            .map_err(|_| RedirectError::Timeout(secs))??;

        let status = response.status();
        if !status.is_success() {
            return Err(RedirectError::HttpStatus(status.as_u16()));
        }

        let final_url = response.url().clone();
        // The landing page may itself be a wrapper.
        let resolved = unwrap_google_url(&final_url).unwrap_or_else(|| final_url.to_string());
        tracing::debug!(from = %url, to = %resolved, "Followed redirect link");
        Ok(resolved)
    }

    fn is_redirect_host(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.hosts
            .iter()
            .any(|h| host == *h || host.ends_with(&format!(".{h}")))
    }
}

/// Target of a `https://www.google.com/url?url=...` style wrapper.
fn unwrap_google_url(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    if !(host == "google.com" || host.ends_with(".google.com")) || url.path() != "/url" {
        return None;
    }

    let mut q = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "url" => return http_target(&value),
            "q" if q.is_none() => q = http_target(&value),
            _ => {}
        }
    }
    q
}

fn http_target(value: &str) -> Option<String> {
    Url::parse(value)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .map(String::from)
}
