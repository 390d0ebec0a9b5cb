//! Error handling for the jsonbridge crate
//!
//! Two layers of errors exist:
//!
//! - [`QueryError`] - failures inside a single query's pipeline. These are
//!   captured into that query's slot of the [`ResultSet`](crate::models::ResultSet)
//!   and never abort sibling queries.
//! - [`Error`] - failures that affect a whole batch, such as an unknown
//!   datasource instance or an invalid batch envelope.
//!
//! # Usage
//!
//! ```rust,ignore
//! use jsonbridge::error::{QueryError, ErrorCategory};
//!
//! fn report(err: &QueryError) {
//!     if err.is_retryable() {
//!         println!("transient: {err}");
//!     } else if err.category() == ErrorCategory::Input {
//!         eprintln!("bad query: {err}");
//!     }
//! }
//! ```

use thiserror::Error;

/// Classification of query errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The query itself was malformed
    Input,
    /// Network-level failures (DNS, connect, timeout)
    Network,
    /// Upstream was reachable but answered with a non-200 status
    Upstream,
    /// Upstream body could not be decoded
    Decode,
    /// The caller aborted the batch
    Cancelled,
    /// Anything else
    Other,
}

impl ErrorCategory {
    /// Stable label used for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Network => "network",
            Self::Upstream => "upstream",
            Self::Decode => "decode",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }
}

/// Errors that can occur while running one query through
/// translate, call and decode
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The query payload could not be parsed or serialized
    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    /// Connection, DNS or timeout failure talking to the upstream
    #[error("Transport error: {message}")]
    Transport { message: String, timeout: bool },

    /// Upstream answered with something other than 200
    #[error("Invalid status code. status: {status} {message}")]
    UpstreamStatus { status: u16, message: String },

    /// Upstream body is not valid JSON or has an unexpected shape
    #[error("Decoding error: {0}")]
    Decode(String),

    /// The batch was cancelled while this query was in flight
    #[error("Query cancelled")]
    Cancelled,

    /// The task running this query panicked or was aborted
    #[error("Query task failed: {0}")]
    TaskFailed(String),
}

impl QueryError {
    /// Create a malformed query error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedQuery(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            timeout: false,
        }
    }

    /// Check if a later attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::UpstreamStatus { status, .. } => *status == 429 || *status >= 500,
            Self::MalformedQuery(_) | Self::Decode(_) | Self::Cancelled => false,
            Self::TaskFailed(_) => false,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedQuery(_) => ErrorCategory::Input,
            Self::Transport { .. } => ErrorCategory::Network,
            Self::UpstreamStatus { .. } => ErrorCategory::Upstream,
            Self::Decode(_) => ErrorCategory::Decode,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::TaskFailed(_) => ErrorCategory::Other,
        }
    }
}

impl From<reqwest::Error> for QueryError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            timeout: err.is_timeout(),
            message: err.to_string(),
        }
    }
}

/// Batch-level errors
///
/// Only problems outside any individual query end up here. A batch whose
/// queries all fail still succeeds at this level.
#[derive(Error, Debug)]
pub enum Error {
    /// The datasource instance referenced by the request is unknown
    #[error("Datasource instance not found: {0}")]
    InstanceNotFound(i64),

    /// The datasource settings could not be turned into a usable instance
    #[error("Invalid datasource instance: {0}")]
    InvalidInstance(String),

    /// The batch envelope is unreadable or violates the unique ref id requirement
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// HTTP client construction errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Create an invalid batch error
    pub fn invalid_batch(msg: impl Into<String>) -> Self {
        Self::InvalidBatch(msg.into())
    }

    /// Whether the error was caused by the caller's request
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InstanceNotFound(_) | Self::InvalidBatch(_))
    }
}

/// Result type alias using the batch-level Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        assert_eq!(
            QueryError::malformed("bad json").category(),
            ErrorCategory::Input
        );
        assert_eq!(
            QueryError::transport("connection refused").category(),
            ErrorCategory::Network
        );
        assert_eq!(QueryError::Cancelled.category(), ErrorCategory::Cancelled);
        assert_eq!(ErrorCategory::Decode.as_str(), "decode");
    }

    #[test]
    fn test_is_retryable() {
        let server = QueryError::UpstreamStatus {
            status: 503,
            message: "Service Unavailable".to_string(),
        };
        assert!(server.is_retryable());

        let not_found = QueryError::UpstreamStatus {
            status: 404,
            message: "Not Found".to_string(),
        };
        assert!(!not_found.is_retryable());

        assert!(QueryError::transport("reset").is_retryable());
        assert!(!QueryError::decode("not an array").is_retryable());
        assert!(!QueryError::Cancelled.is_retryable());
    }

    #[test]
    fn test_upstream_status_message() {
        let err = QueryError::UpstreamStatus {
            status: 500,
            message: "Internal Server Error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid status code. status: 500 Internal Server Error"
        );
    }

    #[test]
    fn test_client_error_classification() {
        assert!(Error::InstanceNotFound(7).is_client_error());
        assert!(Error::invalid_batch("duplicate ref id").is_client_error());
        assert!(!Error::InvalidInstance("ftp://x".to_string()).is_client_error());
    }
}
