//! HTTP-facing error type.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::chat::ChatError;
use crate::llm::LlmError;

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Errors surfaced by HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    /// The request was malformed or failed validation.
    #[error("{0}")]
    BadRequest(String),

    /// The request body exceeded the size limit.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// The addressed resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The upstream provider rejected the call or could not be reached.
    #[error("{0}")]
    BadGateway(String),

    /// The upstream provider, or the whole request, took too long.
    #[error("{0}")]
    Timeout(String),

    /// Anything else. Details are logged, never returned.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge("Request body too large".to_string())
        } else {
            Self::BadRequest(rejection.body_text())
        }
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::EmptyMessage | ChatError::InvalidTemperature(_) => {
                Self::BadRequest(err.to_string())
            }
            ChatError::Upstream { source, .. } => source.into(),
        }
    }
}

impl From<LlmError> for AppError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Upstream { status, message } => {
                Self::BadGateway(format!("Upstream provider error ({status}): {message}"))
            }
            LlmError::Transport(_) | LlmError::InvalidResponse(_) => {
                Self::BadGateway("Upstream provider unavailable".to_string())
            }
            LlmError::Timeout(_) => Self::Timeout("Upstream provider timed out".to_string()),
            LlmError::ShutDown => Self::Internal(anyhow::Error::new(LlmError::ShutDown)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match &self {
            Self::Internal(e) => {
                tracing::error!(error = ?e, "Internal error while handling request");
                "Internal server error".to_string()
            }
            other => {
                if status.is_server_error() {
                    tracing::warn!(status = %status, error = %other, "Request failed");
                }
                other.to_string()
            }
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn validation_errors_are_client_errors() {
        let err = AppError::from(ChatError::EmptyMessage);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Message cannot be empty");
    }

    #[test]
    fn upstream_errors_keep_provider_message() {
        let err = AppError::from(LlmError::Upstream {
            status: 429,
            message: "rate limited".to_string(),
        });
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            err.to_string(),
            "Upstream provider error (429): rate limited"
        );
    }

    #[test]
    fn transport_details_are_not_exposed() {
        let err = AppError::from(LlmError::Transport("dns error: 10.0.0.7".to_string()));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(!err.to_string().contains("10.0.0.7"));
    }

    #[test]
    fn timeouts_map_to_gateway_timeout() {
        let err = AppError::from(ChatError::Upstream {
            session_id: "s".to_string(),
            source: LlmError::Timeout(Duration::from_secs(30)),
        });
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn internal_errors_are_opaque() {
        let response = AppError::Internal(anyhow::anyhow!("db password is hunter2")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(!body.contains("hunter2"));
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&body).unwrap(),
            serde_json::json!({"error": "Internal server error"})
        );
    }
}
