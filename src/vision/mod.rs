//! Cloud Vision `DOCUMENT_TEXT_DETECTION` over the REST `images:annotate`
//! endpoint. The response body is stored as-is and read back by
//! [`crate::annotation`].

mod retry;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use std::future::Future;
use std::pin::Pin;

use retry::{Backoff, is_retryable, retry_after};

pub const ANNOTATE_URL: &str = "https://vision.googleapis.com/v1/images:annotate";
pub const DEFAULT_API_KEY_ENV: &str = "GOOGLE_VISION_API_KEY";

pub type DetectFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// Full-text OCR of one encoded image, answering annotation JSON.
pub trait TextDetector: Send + Sync {
    fn detect<'a>(&'a self, image: &'a [u8], language_hints: &'a [String]) -> DetectFuture<'a>;
}

#[derive(Debug, Clone)]
pub struct VisionClient {
    key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl VisionClient {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            endpoint: ANNOTATE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Reads the API key from the named environment variable.
    pub fn from_env(var: &str) -> Result<Self> {
        let key = std::env::var(var)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("Vision API key not set; export {}", var))?;
        Ok(Self::new(key))
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Returns the raw `{"responses": [...]}` JSON for one image.
    pub async fn document_text_detection(
        &self,
        image: &[u8],
        language_hints: &[String],
    ) -> Result<String> {
        let body = request_body(image, language_hints);
        let mut backoff = Backoff::new();
        while backoff.next_attempt() {
            let response = self
                .client
                .post(&self.endpoint)
                .header("x-goog-api-key", self.key.as_str())
                .json(&body)
                .send()
                .await
                .with_context(|| format!("failed to reach {}", self.endpoint))?;

            let status = response.status();
            let wait_hint = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            if status.is_success() {
                if let Some(message) = response_error(&text) {
                    return Err(anyhow!("Vision annotation failed: {}", message));
                }
                return Ok(text);
            }
            if is_retryable(status, &text) && backoff.can_retry() {
                backoff.wait("Vision", wait_hint).await;
                continue;
            }
            return Err(anyhow!(
                "Vision API error ({}): {}",
                status,
                api_error(&text).unwrap_or(text)
            ));
        }
        Err(anyhow!(
            "Vision API still rate limited after {} attempts",
            backoff.attempt()
        ))
    }
}

impl TextDetector for VisionClient {
    fn detect<'a>(&'a self, image: &'a [u8], language_hints: &'a [String]) -> DetectFuture<'a> {
        Box::pin(self.document_text_detection(image, language_hints))
    }
}

pub(crate) fn request_body(image: &[u8], language_hints: &[String]) -> Value {
    json!({
        "requests": [{
            "image": { "content": BASE64.encode(image) },
            "features": [{ "type": "DOCUMENT_TEXT_DETECTION" }],
            "imageContext": { "languageHints": language_hints }
        }]
    })
}

/// Per-image failures come back with a 200 and an `error` inside the response.
fn response_error(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value
        .get("responses")?
        .get(0)?
        .get("error")?
        .get("message")?
        .as_str()
        .map(|message| message.to_string())
}

fn api_error(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(|message| message.to_string())
}
