//! Retry logic with exponential backoff
//!
//! Runs an async operation up to `max_retries + 1` times, backing off
//! exponentially with jitter between attempts. Two rules override the backoff
//! math:
//!
//! - Obviously terminal failures (auth, not-found, malformed input) are
//!   rethrown immediately via a cheap local pattern check, without consuming
//!   remaining attempts or paying for full classification.
//! - A server-dictated `Retry-After` is respected exactly. No jitter and no
//!   backoff multiplication are applied on top of an explicit cooldown, so
//!   the remote rate limiter's instructions are never exceeded.
//!
//! When attempts run out, the returned error reports the total attempt count
//! and wraps the last underlying cause.

use crate::classify::classify;
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Execute an async operation with exponential backoff retry logic.
///
/// `label` names the operation in log output. Attempt 0 is the first try,
/// not a retry; `config.max_retries = 2` means up to three attempts total.
///
/// # Example
///
/// ```no_run
/// use fic2kindle::config::RetryConfig;
/// use fic2kindle::retry::execute_with_retry;
/// use fic2kindle::error::Error;
///
/// # async fn example() -> Result<(), Error> {
/// let config = RetryConfig::page_fetch();
/// let page = execute_with_retry(&config, "fetch work page", || async {
///     Ok::<String, Error>("<html>...</html>".to_string())
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn execute_with_retry<F, Fut, T>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let total_attempts = config.max_retries + 1;
    let mut delay = config.base_delay;

    for attempt in 0..total_attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(label, attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if is_terminal(&e) => {
                // Fast local check; skips classification for errors no
                // amount of retrying will fix.
                tracing::error!(label, error = %e, "operation failed with terminal error");
                return Err(e);
            }
            Err(e) => {
                let remaining = total_attempts - attempt - 1;
                if remaining == 0 {
                    tracing::error!(
                        label,
                        error = %e,
                        attempts = total_attempts,
                        "operation failed after all retry attempts exhausted"
                    );
                    return Err(Error::RetriesExhausted {
                        attempts: total_attempts,
                        last_error: e.to_string(),
                    });
                }

                let classified = classify(&e);
                if !classified.is_retryable {
                    tracing::error!(
                        label,
                        error = %e,
                        kind = ?classified.kind,
                        "operation failed with non-retryable error"
                    );
                    return Err(e);
                }

                let wait = match classified.retry_after {
                    // The remote party stated its cooldown; honor it exactly.
                    Some(dictated) => dictated,
                    None if config.jitter => apply_jitter(delay),
                    None => delay,
                };

                tracing::warn!(
                    label,
                    error = %e,
                    kind = ?classified.kind,
                    attempt = attempt + 1,
                    remaining,
                    delay_ms = wait.as_millis() as u64,
                    "operation failed, retrying"
                );

                tokio::time::sleep(wait).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
        }
    }

    // The loop always returns from its final iteration.
    Err(Error::RetriesExhausted {
        attempts: total_attempts,
        last_error: "retry loop exited without an attempt".to_string(),
    })
}

/// Cheap check for failures that are never worth a second attempt.
///
/// Intentionally independent of the full classifier: this runs on every
/// failure, so it only looks at the error shape, the status code, and a
/// handful of message patterns.
fn is_terminal(error: &Error) -> bool {
    match error {
        Error::InvalidUrl(_)
        | Error::InvalidRecipient(_)
        | Error::Parse(_)
        | Error::FileTooLarge { .. }
        | Error::Auth(_) => return true,
        _ => {}
    }

    if let Some(status) = error.http_status() {
        if matches!(status, 400 | 401 | 403 | 404 | 413 | 414) {
            return true;
        }
    }

    // Relay payloads carry their own retryability; leave them to the
    // classifier rather than string-matching their text.
    if matches!(error, Error::Relay { .. }) {
        return false;
    }

    let lowered = error.to_string().to_lowercase();
    ["unauthorized", "forbidden", "not found", "malformed", "bad request"]
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

/// Scale a delay by a uniform random factor in [0.5, 1.0].
///
/// Halves-to-full jitter rather than 0-to-full: a near-zero wait would
/// defeat the point of backing off at all.
fn apply_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let factor: f64 = rng.gen_range(0.5..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
