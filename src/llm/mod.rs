//! LLM driver trait and the upstream provider client.
//!
//! The relay talks to exactly one upstream API. [`LlmDriver`] is the seam
//! between chat orchestration and the network: production code uses
//! [`MessagesDriver`], tests plug in scripted drivers.
//!
//! Failures are never folded into reply text. Every call returns either a
//! [`Completion`] or a tagged [`LlmError`], so callers can decide what ends
//! up in session history.
//!
//! # Example
//!
//! ```rust,ignore
//! use chat_relay::llm::{LlmDriver, LlmSettings, MessagesDriver};
//!
//! let settings = LlmSettings::new("sk-ant-...");
//! let driver = MessagesDriver::new(settings.clone())?;
//! let completion = driver.send(&[], "Hello!", &settings.default_options()).await?;
//! println!("{}", completion.text);
//! ```

pub mod format;
pub mod messages;

pub use format::ResponseFormat;
pub use messages::MessagesDriver;

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::session::Message;

/// Default endpoint of the Anthropic Messages API.
pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
/// Default value of the `anthropic-version` header.
pub const DEFAULT_API_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Upper bound on one upstream call, matching the browser client's timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upstream connection and model settings.
#[derive(Clone)]
pub struct LlmSettings {
    /// Full URL of the messages endpoint.
    pub api_url: String,
    /// API key sent in the `x-api-key` header.
    pub api_key: String,
    /// Protocol version sent in the `anthropic-version` header.
    pub api_version: String,
    /// Default model identifier.
    pub model: String,
    /// Default completion token limit.
    pub max_tokens: u32,
    /// Default sampling temperature.
    pub temperature: f32,
    /// Bound on a single upstream request, connect included.
    pub timeout: Duration,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("api_version", &self.api_version)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LlmSettings {
    /// Settings with every default except the API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: api_key.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Per-call options derived from the configured defaults.
    #[must_use]
    pub fn default_options(&self) -> ChatOptions {
        ChatOptions {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

/// Per-call generation options.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

/// A successful upstream reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Assistant text.
    pub text: String,
    /// Token counters, when the provider reported them.
    pub usage: Option<Usage>,
}

/// Why an upstream call produced no assistant text.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider answered with a non-success status.
    #[error("upstream provider returned {status}: {message}")]
    Upstream {
        /// HTTP status code.
        status: u16,
        /// Provider error message, or the raw body if it was unstructured.
        message: String,
    },

    /// The request never completed (DNS, connect, TLS, reset, ...).
    #[error("upstream request failed: {0}")]
    Transport(String),

    /// The request exceeded the configured bound.
    #[error("upstream request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// A success status with a body we could not decode.
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    /// [`LlmDriver::shutdown`] already released the client.
    #[error("LLM client has been shut down")]
    ShutDown,
}

/// Trait for upstream LLM clients.
#[async_trait::async_trait]
pub trait LlmDriver: Send + Sync {
    /// Send `user_text` after `history` and wait for the assistant reply.
    ///
    /// # Errors
    ///
    /// Returns a tagged [`LlmError`] for provider, transport and timeout
    /// failures. No error is ever reported as reply text.
    async fn send(
        &self,
        history: &[Message],
        user_text: &str,
        options: &ChatOptions,
    ) -> Result<Completion, LlmError>;

    /// Release pooled connections. Later calls fail with [`LlmError::ShutDown`].
    async fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_the_api_key() {
        let settings = LlmSettings::new("sk-ant-secret");
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("sk-ant-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn default_options_follow_settings() {
        let mut settings = LlmSettings::new("key");
        settings.model = "claude-3-haiku".to_string();
        settings.max_tokens = 256;
        settings.temperature = 0.2;

        assert_eq!(
            settings.default_options(),
            ChatOptions {
                model: "claude-3-haiku".to_string(),
                max_tokens: 256,
                temperature: 0.2,
            }
        );
    }

    #[test]
    fn timeout_error_mentions_seconds() {
        let err = LlmError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "upstream request timed out after 30s");
    }
}
