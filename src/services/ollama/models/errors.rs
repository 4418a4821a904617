use thiserror::Error;

use crate::{signing::SigningError, tools::ToolError};

/// Errors returned by the Ollama clients.
///
/// Construction-time failures (`Validation`, `Tool`, `SigningUnavailable`,
/// `Config`) are raised before any network I/O. Transport failures are
/// classified by status class and raised once; nothing is retried.
#[derive(Debug, Error)]
pub enum OllamaError {
    /// Local input or a decoded payload failed type/required-field checks.
    #[error("validation error: {0}")]
    Validation(String),

    /// Tool schema derivation, lookup or argument checking failed.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The request had to be signed but no usable key was available.
    #[error("signing unavailable: {0}")]
    SigningUnavailable(#[from] SigningError),

    /// The service rejected the request (4xx).
    #[error("request rejected ({status}): {message}")]
    ClientRequest { status: u16, message: String },

    /// The service failed (5xx), or reported an error inside a stream.
    #[error("service error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Service { status: Option<u16>, message: String },

    /// Connecting, sending, or reading failed at the network level, timeouts included.
    #[error("connection error: {0}")]
    Connection(String),

    /// A streamed record could not be decoded.
    #[error("malformed stream: {0}")]
    MalformedStream(String),

    /// The client configuration is invalid.
    #[error("config error: {0}")]
    Config(String),
}

impl OllamaError {
    /// HTTP status code carried by the error, when the service sent one.
    pub fn status(&self) -> Option<u16> {
        match self {
            OllamaError::ClientRequest { status, .. } => Some(*status),
            OllamaError::Service { status, .. } => *status,
            _ => None,
        }
    }

    /// Builds the error for a non-2xx response from its status and raw body.
    ///
    /// The body is expected to be `{"error": "..."}`; anything else is kept verbatim.
    pub(crate) fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_owned))
            .unwrap_or_else(|| body.trim().to_owned());

        if (400..500).contains(&status) {
            OllamaError::ClientRequest { status, message }
        } else {
            OllamaError::Service {
                status: Some(status),
                message,
            }
        }
    }
}

impl From<reqwest::Error> for OllamaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return OllamaError::Connection(format!("request timed out: {err}"));
        }
        OllamaError::Connection(err.to_string())
    }
}
