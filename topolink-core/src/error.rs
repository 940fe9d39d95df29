use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures raised by a [`Transport`](crate::transport::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Non-2xx answer; `message` comes from the body when it has one.
    #[error("Request failed with status {status}: {message}")]
    Http {
        /// Status code.
        status: u16,
        /// Server supplied message.
        message: String,
    },

    /// No answer within the given time.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection level failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The request URL could not be built.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// The message worth showing to a user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            TransportError::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(Duration::ZERO)
        } else if err.is_builder() {
            TransportError::InvalidUrl(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Errors surfaced by the controller.
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Nothing was sent: no transport is attached.
    #[error("No transport attached to the controller")]
    TransportUnavailable,

    /// The version handshake was rejected.
    #[error("Handshake failed: {0}")]
    HandshakeFailure(String),

    /// Downloading a static asset failed.
    #[error("Failed to fetch {url}: {reason}")]
    FetchFailure {
        /// Asset URL.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// A forwarded request failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Reading or writing the cache directory failed.
    #[error("Cache I/O error at {path}: {source}")]
    CacheIo {
        /// Entry or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unreadable settings.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result alias for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;
