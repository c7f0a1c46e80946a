//! Error classification
//!
//! Maps a raised [`Error`] to a [`ClassifiedError`]: a taxonomy kind, a
//! plain-language message suitable for end users, a retry decision, and an
//! optional server-dictated cooldown. [`classify`] is a pure, total function;
//! it never panics and unknown shapes fall into a retryable `unknown` kind,
//! since most unclassified failures in practice are transient network blips.
//!
//! Retryability here is a business judgment, not plain HTTP semantics: a 429
//! is retryable but carries a mandated wait, while a 401 is never retryable
//! because the token itself is broken, not the network.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cooldown mentioned to the user when a rate limiter gives no
/// explicit `Retry-After`. Surfaced in the message only, never used to
/// compute an actual wait.
const ASSUMED_RATE_LIMIT_WAIT_SECS: u64 = 60;

/// Taxonomy of failure kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport-level failure (DNS, connect, reset)
    Network,
    /// Cross-origin request was blocked
    Cors,
    /// The upstream rate limiter pushed back
    RateLimit,
    /// A request ran out of time
    Timeout,
    /// Upstream returned a 5xx
    ServerError,
    /// Upstream is down for maintenance or overloaded
    ServiceUnavailable,
    /// Credentials are invalid or expired; re-authentication required
    AuthError,
    /// The payload exceeds the attachment ceiling
    FileTooLarge,
    /// The requested work does not exist
    NotFound,
    /// The request itself was malformed
    BadRequest,
    /// The supplied URL is not an archive work URL
    InvalidUrl,
    /// The work page markup could not be parsed
    ParseError,
    /// Anything that did not match a known shape
    Unknown,
}

impl ErrorKind {
    fn from_declared(declared: &str) -> Self {
        match declared {
            "rate_limit_error" => ErrorKind::RateLimit,
            "timeout_error" => ErrorKind::Timeout,
            "server_error" => ErrorKind::ServerError,
            "service_unavailable" => ErrorKind::ServiceUnavailable,
            "auth_error" => ErrorKind::AuthError,
            "not_found" => ErrorKind::NotFound,
            "bad_request" => ErrorKind::BadRequest,
            _ => ErrorKind::Unknown,
        }
    }
}

/// The outcome of classifying a raw failure
///
/// Derived transiently from an [`Error`]; never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifiedError {
    /// Taxonomy kind
    pub kind: ErrorKind,
    /// Plain-language explanation, safe to show to end users
    pub user_message: String,
    /// Whether the retry executor may attempt the operation again
    pub is_retryable: bool,
    /// Server-dictated cooldown before the next attempt, if any
    pub retry_after: Option<Duration>,
}

impl ClassifiedError {
    fn retryable(kind: ErrorKind, user_message: impl Into<String>) -> Self {
        Self {
            kind,
            user_message: user_message.into(),
            is_retryable: true,
            retry_after: None,
        }
    }

    fn terminal(kind: ErrorKind, user_message: impl Into<String>) -> Self {
        Self {
            kind,
            user_message: user_message.into(),
            is_retryable: false,
            retry_after: None,
        }
    }
}

/// Classify a raised failure into a retry decision and user-facing message.
///
/// Rules are checked in order; the first match wins:
///
/// 1. Structured relay payload with a declared error type
/// 2. Transport/fetch failure patterns
/// 3. Cross-origin patterns
/// 4. HTTP 429 or rate-limit/quota/throttle text
/// 5. HTTP 503 or maintenance text
/// 6. Any other 5xx
/// 7. HTTP 401 or authentication text
/// 8. HTTP 413 or size-limit text
/// 9. HTTP 404
/// 10. HTTP 400 or bad-request text
/// 11. Everything else: retryable `unknown`
///
/// The 503 check runs before the generic 5xx range so that a longer-wait
/// maintenance message reaches the user instead of a generic one.
pub fn classify(error: &Error) -> ClassifiedError {
    // Rule 1: a structured relay payload is the most precise signal we have.
    if let Error::Relay {
        kind,
        message,
        retry_after_secs,
    } = error
    {
        let declared = ErrorKind::from_declared(kind);
        let is_retryable = matches!(declared, ErrorKind::RateLimit | ErrorKind::Timeout);
        return ClassifiedError {
            kind: declared,
            user_message: message.clone(),
            is_retryable,
            retry_after: retry_after_secs.map(Duration::from_secs),
        };
    }

    // Errors raised locally carry their own meaning; no pattern matching
    // needed for these.
    match error {
        Error::InvalidUrl(_) => {
            return ClassifiedError::terminal(
                ErrorKind::InvalidUrl,
                "That doesn't look like an archive work URL. Paste the full link to the \
                 work, e.g. https://archiveofourown.org/works/12345678.",
            );
        }
        Error::InvalidRecipient(_) => {
            return ClassifiedError::terminal(
                ErrorKind::BadRequest,
                "That doesn't look like a valid email address. Check the Kindle address \
                 and try again.",
            );
        }
        Error::Parse(_) => {
            return ClassifiedError::terminal(
                ErrorKind::ParseError,
                "The work page loaded but couldn't be read. The archive may have changed \
                 its layout, or the work may be restricted to logged-in users.",
            );
        }
        Error::FileTooLarge { size, limit } => {
            return ClassifiedError::terminal(
                ErrorKind::FileTooLarge,
                format!(
                    "This file is {} and the mail provider only accepts attachments up \
                     to {}. Try a smaller format such as MOBI or EPUB.",
                    human_size(*size),
                    human_size(*limit)
                ),
            );
        }
        Error::Auth(_) => {
            return ClassifiedError::terminal(
                ErrorKind::AuthError,
                "Your sign-in has expired. Please sign in again and retry.",
            );
        }
        Error::Timeout(_) => {
            return ClassifiedError::retryable(
                ErrorKind::Timeout,
                "The request took too long. The archive may be slow right now.",
            );
        }
        _ => {}
    }

    let status = error.http_status();
    let message = error.to_string();
    let lowered = message.to_lowercase();

    // Rule 2: transport failures.
    if matches!(error, Error::Network(_))
        || contains_any(
            &lowered,
            &[
                "failed to fetch",
                "network",
                "connection refused",
                "connection reset",
                "dns",
            ],
        )
    {
        return ClassifiedError::retryable(
            ErrorKind::Network,
            "Couldn't reach the archive. Check your connection and try again.",
        );
    }

    // Rule 3: cross-origin blocks.
    if contains_any(&lowered, &["cors", "cross-origin", "cross origin"]) {
        return ClassifiedError::retryable(
            ErrorKind::Cors,
            "The browser blocked the request. Trying again usually helps.",
        );
    }

    // Rule 4: rate limiting.
    if status == Some(429)
        || contains_any(
            &lowered,
            &["rate limit", "too many requests", "quota", "throttl"],
        )
    {
        let retry_after = error.retry_after();
        let wait_secs = retry_after
            .map(|d| d.as_secs())
            .unwrap_or(ASSUMED_RATE_LIMIT_WAIT_SECS);
        return ClassifiedError {
            kind: ErrorKind::RateLimit,
            user_message: format!(
                "The archive is limiting requests. Waiting about {wait_secs} seconds \
                 before trying again."
            ),
            is_retryable: true,
            retry_after,
        };
    }

    // Rule 5: maintenance / unavailable, before the generic 5xx range.
    if status == Some(503)
        || contains_any(&lowered, &["maintenance", "temporarily unavailable"])
    {
        return ClassifiedError::retryable(
            ErrorKind::ServiceUnavailable,
            "The archive is down for maintenance. Give it a few minutes and try again.",
        );
    }

    // Rule 6: other server errors. Name the upstream site when the error
    // text points at it, so the user knows it is not this tool that broke.
    if matches!(status, Some(s) if (500..600).contains(&s)) {
        let user_message = if contains_any(&lowered, &["archiveofourown", "ao3", "archive"]) {
            "The archive is having trouble right now. This usually clears up quickly."
        } else {
            "The server hit an error. Trying again in a moment usually works."
        };
        return ClassifiedError::retryable(ErrorKind::ServerError, user_message);
    }

    // Rule 7: broken credentials; no amount of waiting fixes these.
    if status == Some(401)
        || contains_any(&lowered, &["unauthorized", "authentication", "sign in"])
    {
        return ClassifiedError::terminal(
            ErrorKind::AuthError,
            "Your sign-in has expired. Please sign in again and retry.",
        );
    }

    // Rule 8: size limits reported by the far side.
    if status == Some(413) || contains_any(&lowered, &["too large", "exceeds", "payload"]) {
        return ClassifiedError::terminal(
            ErrorKind::FileTooLarge,
            "The file is too large to email. Try a smaller format such as MOBI or EPUB.",
        );
    }

    // Rule 9.
    if status == Some(404) {
        return ClassifiedError::terminal(
            ErrorKind::NotFound,
            "That work couldn't be found. It may have been deleted or made private.",
        );
    }

    // Rule 10.
    if status == Some(400) || contains_any(&lowered, &["bad request", "invalid"]) {
        return ClassifiedError::terminal(
            ErrorKind::BadRequest,
            "The request was rejected. Double-check the URL and try again.",
        );
    }

    // Rule 11: optimistic fallback.
    ClassifiedError::retryable(
        ErrorKind::Unknown,
        "Something went wrong. Trying again usually helps.",
    )
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Render a byte count the way a person would say it.
fn human_size(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} bytes")
    }
}
