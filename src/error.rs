//! Error types shared by every remote operation.

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Network failure, timeout, rate limit or server-side error. Safe to retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The service rejected the request.
    #[error("{method} failed with {status}: {error}: {message}")]
    Api {
        method: String,
        status: StatusCode,
        error: String,
        message: String,
    },

    #[error("cannot decode response from {method}: {source}")]
    Decode {
        method: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid post url {url:?}: {reason}")]
    InvalidPostUrl { url: String, reason: String },

    #[error("{0}")]
    ListTarget(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled while retrying: {0}")]
    Cancelled(Box<Error>),

    #[error("interrupted before {0} finished")]
    Interrupted(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the failure belongs to the retryable class.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// The access token ran out; a refreshed session can replay the call.
    pub fn is_expired_token(&self) -> bool {
        matches!(self, Error::Api { error, .. } if error == "ExpiredToken")
    }

    /// Classifies a non-success HTTP status. 429 and 5xx are transient.
    pub fn from_status(method: &str, status: StatusCode, error: String, message: String) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Error::Transient(format!("{method} returned {status}: {error}: {message}"))
        } else {
            Error::Api {
                method: method.to_string(),
                status,
                error,
                message,
            }
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        // statuses and bodies are classified by the caller, so anything left is transport
        if err.is_builder() {
            Error::Config(err.to_string())
        } else {
            Error::Transient(err.to_string())
        }
    }
}
