//! Error types for the backend client

use thiserror::Error;

/// Errors that can occur when talking to the library backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The request could not be built (bad base URL, unserializable body)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// HTTP request failed before a response arrived
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// The request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,

    /// The backend answered with a non-success status
    #[error("API error (status {status}): {}", .message.as_deref().unwrap_or("no message"))]
    Status {
        /// HTTP status code
        status: u16,
        /// Message extracted from the response body, if any
        message: Option<String>,
    },

    /// Response body could not be decoded
    #[error("Response parsing failed: {0}")]
    ResponseParseFailed(String),
}

impl ClientError {
    /// The human-readable message supplied by the backend, if it sent one.
    #[must_use]
    pub fn backend_message(&self) -> Option<&str> {
        match self {
            Self::Status {
                message: Some(message),
                ..
            } => Some(message.as_str()),
            _ => None,
        }
    }

    /// HTTP status, for errors that carry one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_builder() {
            Self::InvalidRequest(error.to_string())
        } else if error.is_decode() {
            Self::ResponseParseFailed(error.to_string())
        } else {
            Self::RequestFailed(error.to_string())
        }
    }
}

/// Longest plain-text body accepted as a message, in characters.
const MAX_TEXT_MESSAGE: usize = 200;

/// Pull a readable message out of an error response body.
///
/// The backend answers either with JSON carrying a `message` field or with a
/// plain-text body such as `Error: Libro no encontrado`. Markup (a proxy's
/// HTML error page) and long or multi-line text are not messages.
pub(crate) fn extract_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(map)) => map
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(ToString::to_string),
        Ok(serde_json::Value::String(text)) => Some(text).filter(|t| !t.is_empty()),
        Ok(_) => None,
        Err(_) => plain_text_message(trimmed),
    }
}

fn plain_text_message(text: &str) -> Option<String> {
    if text.starts_with('<') || text.contains('\n') || text.chars().count() > MAX_TEXT_MESSAGE {
        return None;
    }
    Some(text.to_string())
}
