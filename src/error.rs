//! Error types for fic2kindle
//!
//! This module provides the crate-wide error type. It deliberately preserves
//! the raw shape of a failure (HTTP status, structured relay payload,
//! transport error) so that [`crate::classify`] can derive retry decisions
//! and user-facing messages from it without losing information.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for fic2kindle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fic2kindle
///
/// Variants keep enough context for classification: status codes stay
/// numeric, relay payloads stay structured, and retry exhaustion wraps the
/// last underlying cause instead of swallowing it.
#[derive(Debug, Error)]
pub enum Error {
    /// The supplied URL does not look like an archive work URL
    #[error("invalid work URL: {0}")]
    InvalidUrl(String),

    /// The supplied recipient is not a plausible email address
    #[error("invalid recipient address: {0}")]
    InvalidRecipient(String),

    /// The work page was fetched but its markup could not be parsed
    #[error("could not read the work page: {0}")]
    Parse(String),

    /// The requested file exceeds the mail provider's attachment ceiling
    #[error("file is {size} bytes, over the {limit} byte attachment limit")]
    FileTooLarge {
        /// Size of the file in bytes (declared or actually transferred)
        size: u64,
        /// The attachment ceiling in bytes
        limit: u64,
    },

    /// An HTTP response with a non-success status and no structured body
    #[error("HTTP {status}: {message}")]
    Http {
        /// The HTTP status code
        status: u16,
        /// Status text or a short body excerpt
        message: String,
        /// Parsed `Retry-After` header in seconds, when the server sent one
        retry_after_secs: Option<u64>,
    },

    /// A structured error payload returned by the edge relay
    #[error("relay reported {kind}: {message}")]
    Relay {
        /// The relay's declared error type (e.g. "rate_limit_error")
        kind: String,
        /// The relay's error text
        message: String,
        /// Server-dictated cooldown in seconds, when present
        retry_after_secs: Option<u64>,
    },

    /// Transport-level failure from the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A request exceeded its allotted time
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Authentication is broken and must be redone, waiting will not help
    #[error("authentication required: {0}")]
    Auth(String),

    /// The mail collaborator rejected the send
    #[error("mail send failed (status {status}): {message}")]
    Mail {
        /// HTTP-like status from the mail provider
        status: u16,
        /// Provider error text
        message: String,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// All retry attempts were consumed without success
    #[error("failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Total attempts made, counting the initial try
        attempts: u32,
        /// Message of the last underlying failure
        last_error: String,
    },

    /// The request queue was torn down before the operation settled
    #[error("request queue dropped the operation before it completed")]
    QueueClosed,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The HTTP status associated with this error, if it carries one.
    ///
    /// Transport errors surface the status of the response they wrap when
    /// reqwest recorded one (e.g. `error_for_status` failures).
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } | Error::Mail { status, .. } => Some(*status),
            Error::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Server-dictated cooldown, if this failure carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Http {
                retry_after_secs: Some(secs),
                ..
            }
            | Error::Relay {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_extracted_from_http_variant() {
        let err = Error::Http {
            status: 503,
            message: "Service Unavailable".into(),
            retry_after_secs: None,
        };
        assert_eq!(err.http_status(), Some(503));
    }

    #[test]
    fn http_status_extracted_from_mail_variant() {
        let err = Error::Mail {
            status: 413,
            message: "payload too large".into(),
        };
        assert_eq!(err.http_status(), Some(413));
    }

    #[test]
    fn http_status_absent_for_non_http_errors() {
        assert_eq!(Error::InvalidUrl("nope".into()).http_status(), None);
        assert_eq!(Error::Timeout(Duration::from_secs(30)).http_status(), None);
    }

    #[test]
    fn retry_after_taken_from_relay_payload() {
        let err = Error::Relay {
            kind: "rate_limit_error".into(),
            message: "slow down".into(),
            retry_after_secs: Some(30),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn retry_after_taken_from_http_header() {
        let err = Error::Http {
            status: 429,
            message: "Too Many Requests".into(),
            retry_after_secs: Some(60),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn retry_after_absent_when_not_dictated() {
        let err = Error::Http {
            status: 429,
            message: "Too Many Requests".into(),
            retry_after_secs: None,
        };
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn retries_exhausted_names_attempts_and_cause() {
        let err = Error::RetriesExhausted {
            attempts: 3,
            last_error: "HTTP 502: Bad Gateway".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("502"));
    }
}
