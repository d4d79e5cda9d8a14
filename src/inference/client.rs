//! Ollama chat client.
//!
//! One non-streaming `POST {base_url}/api/chat` per model turn. Anything
//! other than a 2xx reply is a hard failure carrying the status and body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::errors::InferenceError;
use super::types::{ChatRequest, ChatResponse};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── ChatBackend ─────────────────────────────────────────────────────────────

/// The model backend as the agent loop sees it.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, InferenceError>;
}

// ─── OllamaClient ────────────────────────────────────────────────────────────

/// HTTP client for a local Ollama server.
pub struct OllamaClient {
    http: HttpClient,
    base_url: String,
    /// Whole-request timeout; `None` waits as long as the model needs.
    timeout: Option<Duration>,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, InferenceError> {
        let mut builder = HttpClient::builder().connect_timeout(CONNECT_TIMEOUT);
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        if is_loopback(base_url) {
            builder = builder.no_proxy();
        }
        let http = builder.build().map_err(|e| InferenceError::ClientBuild {
            reason: e.to_string(),
        })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

/// Local endpoints are reached directly, never through a configured proxy.
fn is_loopback(base_url: &str) -> bool {
    reqwest::Url::parse(base_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .is_some_and(|h| matches!(h.as_str(), "localhost" | "127.0.0.1" | "[::1]" | "::1"))
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, InferenceError> {
        let url = self.chat_url();

        tracing::debug!(
            url = %url,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending chat request"
        );

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout {
                        duration_secs: self.timeout.map_or(0, |t| t.as_secs()),
                    }
                } else {
                    InferenceError::ConnectionFailed {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body, "chat request rejected");
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| InferenceError::DecodeError {
                reason: format!("failed to read body: {e}"),
            })?;

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| InferenceError::DecodeError {
                reason: e.to_string(),
            })?;

        let parsed = parsed.normalized();
        tracing::debug!(
            done = parsed.done,
            tool_calls = parsed.message.tool_calls.len(),
            "chat response received"
        );
        Ok(parsed)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
