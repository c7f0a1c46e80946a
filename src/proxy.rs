//! Edge relay
//!
//! Browsers cannot fetch the archive directly because of cross-origin
//! restrictions, so requests go through this relay: `GET /?url=<target>`.
//! The relay validates the target, fetches it with its own small server-side
//! retry budget, and either streams the upstream body through unbuffered
//! (binary downloads never sit in relay memory) or normalizes the failure
//! into a structured JSON error the client-side classifier understands.
//!
//! Upstream 429s pass through with their status and cooldown intact; every
//! other upstream failure is normalized to 502. The relay's retry constants
//! are deliberately smaller than the client's so that both layers retrying
//! stays within a tolerable end-to-end bound.

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::retry::execute_with_retry;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Upstream response headers forwarded to the client verbatim.
const PASSTHROUGH_HEADERS: [&str; 4] =
    ["content-type", "content-length", "etag", "last-modified"];

/// Relay configuration
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Domain targets must belong to; anything else is rejected with 400
    pub archive_host: String,
    /// Time allowance per upstream attempt
    pub upstream_timeout: Duration,
    /// Server-side retry budget, smaller than the client's
    pub retry: RetryConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            archive_host: "archiveofourown.org".to_string(),
            upstream_timeout: Duration::from_secs(20),
            retry: RetryConfig {
                max_retries: 1,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(4),
                backoff_multiplier: 2.0,
                jitter: true,
            },
        }
    }
}

/// Shared state behind the relay handler
#[derive(Clone)]
pub struct ProxyState {
    client: reqwest::Client,
    config: ProxyConfig,
}

impl ProxyState {
    /// Build relay state with its own HTTP client.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("fic2kindle-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }
}

#[derive(Debug, Deserialize)]
struct RelayParams {
    url: Option<String>,
}

/// JSON body for every relay-generated error
#[derive(Debug, Serialize)]
struct RelayErrorBody {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    error: String,
    status: u16,
    #[serde(rename = "statusText")]
    status_text: String,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

/// Build the relay router.
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/", get(relay))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the relay on the given address until the task is dropped.
pub async fn serve(addr: std::net::SocketAddr, state: ProxyState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Other(format!("relay failed to bind {addr}: {e}")))?;
    tracing::info!(%addr, "relay listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| Error::Other(format!("relay server error: {e}")))
}

async fn relay(State(state): State<ProxyState>, Query(params): Query<RelayParams>) -> Response {
    let Some(target) = params.url else {
        return bad_request("missing url parameter");
    };
    if !target_is_allowed(&target, &state.config.archive_host) {
        return bad_request("target is not an archive URL");
    }

    tracing::debug!(%target, "relaying upstream fetch");
    match fetch_upstream(&state, &target).await {
        Ok(upstream) if upstream.status().as_u16() == 429 => rate_limited(upstream),
        Ok(upstream) => stream_through(upstream),
        Err(e) => upstream_failure(&target, e),
    }
}

fn target_is_allowed(target: &str, archive_host: &str) -> bool {
    let Ok(parsed) = url::Url::parse(target) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    match parsed.host_str() {
        Some(host) => {
            host == archive_host
                || host
                    .strip_suffix(archive_host)
                    .is_some_and(|rest| rest.ends_with('.'))
        }
        None => false,
    }
}

/// Fetch the target with the relay's own retry budget.
///
/// A 429 is returned as a success here so it reaches the client untouched;
/// retrying it server-side would double-dip against the upstream cooldown.
async fn fetch_upstream(state: &ProxyState, target: &str) -> Result<reqwest::Response> {
    let allowance = state.config.upstream_timeout;
    execute_with_retry(&state.config.retry, "relay upstream fetch", || async {
        let response = tokio::time::timeout(allowance, state.client.get(target).send())
            .await
            .map_err(|_| Error::Timeout(allowance))??;
        let status = response.status();
        if status.is_success() || status.as_u16() == 429 {
            return Ok(response);
        }
        Err(Error::Http {
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or("upstream error").to_string(),
            retry_after_secs: retry_after_header(&response),
        })
    })
    .await
}

fn retry_after_header(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

/// Forward a successful upstream response, streaming the body through.
fn stream_through(upstream: reqwest::Response) -> Response {
    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status);
    for name in PASSTHROUGH_HEADERS {
        if let Some(value) = upstream.headers().get(name) {
            if let Ok(value) = value.to_str() {
                builder = builder.header(name, value);
            }
        }
    }
    match builder.body(Body::from_stream(upstream.bytes_stream())) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "failed to assemble relay response");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

/// Preserve an upstream 429 as-is, with a structured body the client-side
/// classifier recognizes.
fn rate_limited(upstream: reqwest::Response) -> Response {
    let retry_after = retry_after_header(&upstream);
    let body = RelayErrorBody {
        kind: Some("rate_limit_error".to_string()),
        error: "The archive is rate limiting requests".to_string(),
        status: 429,
        status_text: "Too Many Requests".to_string(),
        retry_after,
    };
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    if let Some(secs) = retry_after {
        if let Ok(value) = secs.to_string().parse() {
            response.headers_mut().insert("retry-after", value);
        }
    }
    response
}

/// Normalize any other upstream failure to 502.
fn upstream_failure(target: &str, error: Error) -> Response {
    tracing::warn!(%target, error = %error, "upstream fetch failed");
    let kind = match &error {
        Error::Timeout(_) => Some("timeout_error".to_string()),
        _ => Some("server_error".to_string()),
    };
    let body = RelayErrorBody {
        kind,
        error: error.to_string(),
        status: 502,
        status_text: "Bad Gateway".to_string(),
        retry_after: None,
    };
    (StatusCode::BAD_GATEWAY, Json(body)).into_response()
}

fn bad_request(message: &str) -> Response {
    let body = RelayErrorBody {
        kind: Some("bad_request".to_string()),
        error: message.to_string(),
        status: 400,
        status_text: "Bad Request".to_string(),
        retry_after: None,
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}
