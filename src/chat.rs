//! Chat turn orchestration.
//!
//! [`ChatService`] ties the session store to the upstream driver:
//!
//! 1. validate the request (before touching any state)
//! 2. resolve or create the session
//! 3. take the session's turn lock and snapshot its history
//! 4. call the upstream model
//! 5. append user message and assistant reply, in that order
//!
//! Upstream failures leave history untouched, and a session created for a
//! turn that failed is discarded again.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::llm::{ChatOptions, LlmDriver, LlmError, LlmSettings, ResponseFormat, Usage};
use crate::session::SessionStore;

/// Message returned for a blank chat message.
pub const EMPTY_MESSAGE: &str = "Message cannot be empty";

/// One inbound chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatTurn {
    /// User text; must not be blank.
    pub message: String,
    /// Session to continue; a new one is created when absent or unknown.
    pub session_id: Option<String>,
    /// Requested reply format.
    pub format: ResponseFormat,
    /// Model override.
    pub model: Option<String>,
    /// Temperature override, `0.0..=1.0`.
    pub temperature: Option<f32>,
}

/// Outcome of a successful turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    /// Assistant text.
    pub response: String,
    /// Session the turn was recorded on.
    pub session_id: String,
    /// History length after the turn.
    pub message_count: usize,
    /// Token usage, if the provider reported it.
    pub usage: Option<Usage>,
}

/// Why a chat turn failed.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The message was empty or whitespace only.
    #[error("Message cannot be empty")]
    EmptyMessage,

    /// A temperature override outside `0.0..=1.0`.
    #[error("Temperature must be between 0 and 1, got {0}")]
    InvalidTemperature(f32),

    /// The upstream call failed; nothing was appended to the session.
    #[error("{source}")]
    Upstream {
        /// Session the turn ran on. Sessions created for this turn no
        /// longer exist.
        session_id: String,
        #[source]
        source: LlmError,
    },
}

/// Orchestrates chat turns over a [`SessionStore`] and an [`LlmDriver`].
pub struct ChatService {
    sessions: SessionStore,
    driver: Arc<dyn LlmDriver>,
    defaults: ChatOptions,
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("sessions", &self.sessions.len())
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl ChatService {
    #[must_use]
    pub fn new(sessions: SessionStore, driver: Arc<dyn LlmDriver>, defaults: ChatOptions) -> Self {
        Self {
            sessions,
            driver,
            defaults,
        }
    }

    /// Build a service whose defaults come from `settings`.
    #[must_use]
    pub fn from_settings(
        sessions: SessionStore,
        driver: Arc<dyn LlmDriver>,
        settings: &LlmSettings,
    ) -> Self {
        Self::new(sessions, driver, settings.default_options())
    }

    /// The store this service records turns in.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Run one chat turn.
    pub async fn send(&self, turn: ChatTurn) -> Result<ChatReply, ChatError> {
        if turn.message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let options = self.options_for(&turn)?;

        let (session_id, session) = self.sessions.get_or_create(turn.session_id.as_deref());
        // Unknown ids are never adopted, so a differing id means a new session.
        let created = turn.session_id.as_deref() != Some(session_id.as_str());

        let _turn = session.begin_turn().await;
        let history = session.messages();
        debug!(
            session_id = %session_id,
            history_len = history.len(),
            format = ?turn.format,
            "Dispatching chat turn"
        );

        let upstream_text = turn.format.decorate(&turn.message);
        let completion = match self.driver.send(&history, &upstream_text, &options).await {
            Ok(completion) => completion,
            Err(source) => {
                warn!(session_id = %session_id, error = %source, "Chat turn failed upstream");
                if created {
                    self.sessions.delete(&session_id);
                }
                return Err(ChatError::Upstream { session_id, source });
            }
        };

        let message_count = session.append_turn(turn.message, completion.text.clone());
        info!(
            session_id = %session_id,
            message_count,
            "Chat turn recorded"
        );

        Ok(ChatReply {
            response: completion.text,
            session_id,
            message_count,
            usage: completion.usage,
        })
    }

    /// Release the upstream client.
    pub async fn shutdown(&self) {
        self.driver.shutdown().await;
    }

    fn options_for(&self, turn: &ChatTurn) -> Result<ChatOptions, ChatError> {
        let mut options = self.defaults.clone();

        if let Some(model) = turn.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            options.model = model.to_string();
        }
        if let Some(temperature) = turn.temperature {
            if !(0.0..=1.0).contains(&temperature) {
                return Err(ChatError::InvalidTemperature(temperature));
            }
            options.temperature = temperature;
        }
        Ok(options)
    }
}
