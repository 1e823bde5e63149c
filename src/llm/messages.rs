//! Anthropic Messages API driver.
//!
//! This module implements the [`LlmDriver`] trait for the Messages API
//! (`/v1/messages`). One pooled [`reqwest::Client`] is built at startup and
//! reused for every call until [`LlmDriver::shutdown`].

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace};

use crate::session::Message;

use super::{ChatOptions, Completion, LlmDriver, LlmError, LlmSettings, Usage};

/// Reply text used when the provider returns no content blocks.
pub const NO_RESPONSE_PLACEHOLDER: &str = "No response from the model";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Most bytes read from a non-success response body.
const MAX_ERROR_BODY_BYTES: usize = 16 * 1024;
/// Longest provider error message passed on to callers.
const MAX_ERROR_MESSAGE_CHARS: usize = 300;

/// Driver for the Anthropic Messages API.
pub struct MessagesDriver {
    http: RwLock<Option<reqwest::Client>>,
    settings: LlmSettings,
}

impl std::fmt::Debug for MessagesDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagesDriver")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl MessagesDriver {
    /// Create a driver and its connection pool.
    ///
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialized.
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(settings.timeout))
            .timeout(settings.timeout)
            .build()
            .map_err(|e| LlmError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http: RwLock::new(Some(http)),
            settings,
        })
    }

    /// The settings this driver was built with.
    #[must_use]
    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    fn client(&self) -> Result<reqwest::Client, LlmError> {
        self.http
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(LlmError::ShutDown)
    }

    fn classify(&self, err: &reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout(self.settings.timeout)
        } else {
            LlmError::Transport(err.to_string())
        }
    }
}

#[async_trait::async_trait]
impl LlmDriver for MessagesDriver {
    async fn send(
        &self,
        history: &[Message],
        user_text: &str,
        options: &ChatOptions,
    ) -> Result<Completion, LlmError> {
        let http = self.client()?;
        let body = build_request(history, user_text, options);

        info!(
            model = %options.model,
            max_tokens = options.max_tokens,
            history_len = history.len(),
            "Sending message to upstream provider"
        );
        trace!(content = %user_text, "Upstream user message");

        let response = http
            .post(&self.settings.api_url)
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", &self.settings.api_version)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let err = self.classify(&e);
                error!(error = %e, "Upstream request failed");
                err
            })?;

        let status = response.status();
        info!(status = %status, "Upstream provider responded");

        if !status.is_success() {
            let raw = read_error_body(response).await;
            error!(status = %status, body = %raw, "Upstream provider error response");
            return Err(upstream_error(status.as_u16(), &raw));
        }

        let raw = response.bytes().await.map_err(|e| self.classify(&e))?;

        let parsed: MessagesResponse = serde_json::from_slice(&raw).map_err(|e| {
            error!(error = %e, "Failed to decode upstream response");
            LlmError::InvalidResponse(e.to_string())
        })?;

        if let Some(usage) = parsed.usage {
            debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Upstream token usage"
            );
        }

        Ok(parsed.into_completion())
    }

    async fn shutdown(&self) {
        let released = self
            .http
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if released.is_some() {
            info!("Upstream HTTP client released");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl MessagesResponse {
    fn into_completion(self) -> Completion {
        let text = self
            .content
            .into_iter()
            .next()
            .and_then(|block| block.text)
            .unwrap_or_else(|| NO_RESPONSE_PLACEHOLDER.to_string());
        Completion {
            text,
            usage: self.usage,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Build the request body: history in order, then the new user turn.
fn build_request<'a>(
    history: &'a [Message],
    user_text: &'a str,
    options: &'a ChatOptions,
) -> MessagesRequest<'a> {
    let messages = history
        .iter()
        .map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        })
        .chain(std::iter::once(WireMessage {
            role: "user",
            content: user_text,
        }))
        .collect();

    MessagesRequest {
        model: &options.model,
        max_tokens: options.max_tokens,
        messages,
        temperature: options.temperature,
    }
}

/// Read at most [`MAX_ERROR_BODY_BYTES`] of an error response.
async fn read_error_body(mut response: reqwest::Response) -> String {
    let mut body = Vec::new();
    while body.len() < MAX_ERROR_BODY_BYTES {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            Ok(None) | Err(_) => break,
        }
    }
    body.truncate(MAX_ERROR_BODY_BYTES);
    String::from_utf8_lossy(&body).into_owned()
}

/// Map a non-success response body to [`LlmError::Upstream`].
///
/// Structured bodies yield the provider's message, anything else the raw
/// text. Either way the message is cut to [`MAX_ERROR_MESSAGE_CHARS`].
fn upstream_error(status: u16, body: &str) -> LlmError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map_or_else(|_| body.trim().to_string(), |envelope| envelope.error.message);
    LlmError::Upstream {
        status,
        message: truncate_chars(message, MAX_ERROR_MESSAGE_CHARS),
    }
}

fn truncate_chars(mut text: String, max: usize) -> String {
    if let Some((cut, _)) = text.char_indices().nth(max) {
        text.truncate(cut);
        text.push_str("...");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> ChatOptions {
        ChatOptions {
            model: "claude-test".to_string(),
            max_tokens: 512,
            temperature: 0.5,
        }
    }

    #[test]
    fn request_appends_user_text_after_history() {
        let history = vec![Message::user("M1", 1), Message::assistant("R1", 1)];
        let opts = options();
        let body = serde_json::to_value(build_request(&history, "M2", &opts)).unwrap();

        assert_eq!(
            body,
            json!({
                "model": "claude-test",
                "max_tokens": 512,
                "messages": [
                    {"role": "user", "content": "M1"},
                    {"role": "assistant", "content": "R1"},
                    {"role": "user", "content": "M2"}
                ],
                "temperature": 0.5
            })
        );
    }

    #[test]
    fn structured_error_body_yields_provider_message() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        match upstream_error(529, body) {
            LlmError::Upstream { status, message } => {
                assert_eq!(status, 529);
                assert_eq!(message, "Overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unstructured_error_body_is_kept_raw() {
        match upstream_error(502, "<html>bad gateway</html>") {
            LlmError::Upstream { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "<html>bad gateway</html>");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn long_error_bodies_are_cut() {
        let body = "é".repeat(MAX_ERROR_MESSAGE_CHARS * 10);
        match upstream_error(502, &body) {
            LlmError::Upstream { message, .. } => {
                assert_eq!(message.chars().count(), MAX_ERROR_MESSAGE_CHARS + 3);
                assert!(message.ends_with("..."));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let short = truncate_chars("short".to_string(), MAX_ERROR_MESSAGE_CHARS);
        assert_eq!(short, "short");
    }

    #[test]
    fn first_content_block_wins() {
        let parsed: MessagesResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "text", "text": "second"}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 3}
        }))
        .unwrap();

        let completion = parsed.into_completion();
        assert_eq!(completion.text, "first");
        assert_eq!(
            completion.usage,
            Some(Usage {
                input_tokens: 12,
                output_tokens: 3
            })
        );
    }

    #[test]
    fn empty_content_yields_placeholder() {
        let parsed: MessagesResponse = serde_json::from_value(json!({"content": []})).unwrap();
        let completion = parsed.into_completion();
        assert_eq!(completion.text, NO_RESPONSE_PLACEHOLDER);
        assert_eq!(completion.usage, None);
    }

    #[tokio::test]
    async fn shutdown_releases_the_client() {
        let driver = MessagesDriver::new(LlmSettings::new("key")).unwrap();
        assert!(driver.client().is_ok());

        driver.shutdown().await;
        let err = driver.send(&[], "hi", &options()).await.unwrap_err();
        assert!(matches!(err, LlmError::ShutDown));
    }
}
