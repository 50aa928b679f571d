use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::placeholders::{remap_placeholders, resolve_media_url};
use super::{CleanedContent, ContentCleaner, MediaRef};
use crate::config::CleaningConfig;
use crate::http::{read_limited_bytes, BodyError};

/// Completion bodies are small; anything larger is not a cleaned article.
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

const SYSTEM_PROMPT: &str = "You clean news articles extracted from web pages. \
Return a JSON object with two keys: \"content\" and \"media\".\n\
- \"content\": the article body as markdown. Remove navigation, cookie banners, \
share buttons, comment sections, newsletter prompts, related-article lists and \
other page chrome. Keep headings, paragraphs, lists, quotes and inline anchor \
links exactly as written. Do not summarize or rewrite the text.\n\
- Replace every image that belongs to the article with a placeholder line \
[IMAGE_1], [IMAGE_2], ... numbered in order of appearance. Drop logos, avatars, \
icons, tracking pixels and advertising images.\n\
- \"media\": an array in placeholder order, one object per placeholder with keys \
\"url\", \"alt\" and \"caption\" (null when absent).\n\
Return only the JSON object.";

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("Cleaning request timed out after {0}s")]
    Timeout(u64),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Authentication rejected by cleaning service (HTTP {0})")]
    Auth(u16),
    #[error("Cleaning service rate limit or quota exceeded (HTTP {0})")]
    RateLimited(u16),
    #[error("Cleaning service error: HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Malformed cleaning response: {0}")]
    Malformed(String),
    #[error("Cleaning service returned no content")]
    Empty,
    #[error("Insecure endpoint: HTTPS required (except localhost for testing)")]
    InsecureEndpoint,
}

impl From<BodyError> for CleanError {
    fn from(err: BodyError) -> Self {
        match err {
            BodyError::Network(e) => CleanError::Network(e),
            BodyError::TooLarge(limit) => CleanError::ResponseTooLarge(limit),
            BodyError::Incomplete { expected, received } => CleanError::Malformed(format!(
                "truncated body ({received} of {expected} bytes)"
            )),
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// The JSON object the model is asked to produce.
#[derive(Debug, Deserialize)]
struct CleanedPayload {
    #[serde(default)]
    content: String,
    #[serde(default)]
    media: Vec<MediaRef>,
}

/// Cleaning pass backed by an OpenAI-compatible chat completion API.
pub struct AiCleaner {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    temperature: f32,
    timeout: Duration,
}

impl AiCleaner {
    pub fn new(client: reqwest::Client, config: &CleaningConfig) -> Result<Self, CleanError> {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        if !endpoint.starts_with("https://")
            && !endpoint.starts_with("http://127.0.0.1")
            && !endpoint.starts_with("http://localhost")
        {
            tracing::error!(endpoint = %endpoint, "Rejecting non-HTTPS cleaning endpoint");
            return Err(CleanError::InsecureEndpoint);
        }

        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    async fn complete(&self, user_message: &str) -> Result<String, CleanError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: user_message,
                },
            ],
            temperature: self.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(match status {
                401 | 403 => CleanError::Auth(status),
                402 | 429 => CleanError::RateLimited(status),
                _ => {
                    let bytes = read_limited_bytes(response, MAX_RESPONSE_BYTES)
                        .await
                        .unwrap_or_default();
                    let message = serde_json::from_slice::<ApiErrorBody>(&bytes)
                        .map(|b| b.error.message)
                        .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).trim().to_string());
                    CleanError::HttpStatus { status, message }
                }
            });
        }

        let bytes = read_limited_bytes(response, MAX_RESPONSE_BYTES).await?;
        let completion: CompletionResponse =
            serde_json::from_slice(&bytes).map_err(|e| CleanError::Malformed(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(CleanError::Empty)
    }
}

#[async_trait]
impl ContentCleaner for AiCleaner {
    async fn clean(&self, raw: &str, url: &str) -> Result<CleanedContent, CleanError> {
        let user_message = format!("Article URL: {url}\n\n{raw}");

        let secs = self.timeout.as_secs();
        let reply = tokio::time::timeout(self.timeout, self.complete(&user_message))
            .await
            .map_err(|_| CleanError::Timeout(secs))??;

        let cleaned = parse_cleaned_payload(&reply, url)?;
        tracing::debug!(
            url = %url,
            chars = cleaned.content.len(),
            media = cleaned.media.len(),
            model = %self.model,
            "Cleaned article content"
        );
        Ok(cleaned)
    }
}

/// Parse the model's JSON reply, resolving media URLs against the article
/// URL. Media that cannot be resolved are dropped together with their
/// placeholders and the remaining placeholders renumbered.
fn parse_cleaned_payload(reply: &str, article_url: &str) -> Result<CleanedContent, CleanError> {
    let payload: CleanedPayload = serde_json::from_str(strip_code_fence(reply))
        .map_err(|e| CleanError::Malformed(e.to_string()))?;

    if payload.content.trim().is_empty() {
        return Err(CleanError::Empty);
    }

    let base = Url::parse(article_url).ok();
    let mut mapping = Vec::with_capacity(payload.media.len());
    let mut media = Vec::with_capacity(payload.media.len());
    for item in payload.media {
        match resolve_media_url(&item.url, base.as_ref()) {
            Some(url) => {
                media.push(MediaRef { url, ..item });
                mapping.push(Some(media.len()));
            }
            None => mapping.push(None),
        }
    }

    let content = remap_placeholders(&payload.content, |n| {
        n.checked_sub(1).and_then(|i| mapping.get(i).copied().flatten())
    });

    Ok(CleanedContent { content, media })
}

/// Some models wrap JSON in a markdown code fence despite the response format.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
