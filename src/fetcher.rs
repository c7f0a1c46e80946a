//! Archive content fetching
//!
//! [`ContentFetcher`] owns the two archive-bound operations: fetching a work
//! page for metadata and downloading an ebook file. Every request goes
//! through the session [`RequestQueue`] (global spacing) and
//! [`crate::retry::execute_with_retry`] (per-call backoff); no unqueued
//! network call leaves this module.
//!
//! Downloads enforce the attachment ceiling twice: once against the declared
//! `Content-Length` before pulling the body, and once against the actually
//! received byte count, which defends against a missing or dishonest header.

use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::queue::RequestQueue;
use crate::retry::execute_with_retry;
use crate::scrape::parse_work_page;
use crate::types::{DownloadFormat, FileArtifact, WorkMetadata, MAX_ATTACHMENT_BYTES};
use bytes::Bytes;
use futures::StreamExt;
use regex::Regex;
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Work URL path shape: `/works/<digits>` with an optional chapter suffix.
/// Identifiers over ten digits are rejected as malformed.
const WORK_PATH_PATTERN: &str = r"^/works/(\d{1,10})(?:/chapters/\d+)?/?$";

/// Fetches archive pages and files through the relay, queued and retried.
pub struct ContentFetcher {
    client: reqwest::Client,
    queue: RequestQueue,
    config: FetchConfig,
    work_path_re: Regex,
}

impl ContentFetcher {
    /// Create a fetcher sharing the given session queue.
    pub fn new(config: FetchConfig, queue: RequestQueue) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("fic2kindle/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let work_path_re = Regex::new(WORK_PATH_PATTERN)
            .map_err(|e| Error::Other(format!("work URL pattern failed to compile: {e}")))?;
        Ok(Self {
            client,
            queue,
            config,
            work_path_re,
        })
    }

    /// Validate a pasted URL and extract the numeric work identifier.
    pub fn parse_work_url(&self, raw: &str) -> Result<String> {
        let parsed =
            Url::parse(raw.trim()).map_err(|_| Error::InvalidUrl(raw.trim().to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl(raw.to_string()));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::InvalidUrl(raw.to_string()))?;
        if !self.is_archive_host(host) {
            return Err(Error::InvalidUrl(raw.to_string()));
        }
        let captures = self
            .work_path_re
            .captures(parsed.path())
            .ok_or_else(|| Error::InvalidUrl(raw.to_string()))?;
        Ok(captures[1].to_string())
    }

    /// Fetch the work page and parse it into metadata.
    ///
    /// The work identifier always comes from the URL, so this succeeds even
    /// when the markup has nothing recognizable in it.
    pub async fn fetch_metadata(&self, url: &str) -> Result<WorkMetadata> {
        let work_id = self.parse_work_url(url)?;
        let proxied = self.proxy_url(&self.work_page_url(&work_id));
        tracing::info!(work_id, "fetching work page");

        let client = self.client.clone();
        let retry = self.config.page_retry.clone();
        let allowance = self.config.page_timeout;
        let html = self
            .queue
            .enqueue("fetch work page", move || async move {
                execute_with_retry(&retry, "fetch work page", || {
                    fetch_text(&client, &proxied, allowance)
                })
                .await
            })
            .await?;

        let scraped = parse_work_page(&html)?;
        tracing::info!(work_id, title = %scraped.title, "parsed work metadata");

        let download_urls = [
            DownloadFormat::Mobi,
            DownloadFormat::Epub,
            DownloadFormat::Azw3,
            DownloadFormat::Pdf,
        ]
        .into_iter()
        .map(|format| (format, self.download_url(&work_id, format)))
        .collect::<HashMap<_, _>>();

        Ok(WorkMetadata {
            work_id,
            title: scraped.title,
            authors: scraped.authors,
            summary: scraped.summary,
            words: scraped.words,
            chapters: scraped.chapters,
            original_url: url.to_string(),
            download_urls,
        })
    }

    /// Download the work in the given format, enforcing the attachment
    /// ceiling before and after the transfer.
    pub async fn download_format(
        &self,
        work_id: &str,
        format: DownloadFormat,
    ) -> Result<FileArtifact> {
        let proxied = self.proxy_url(&self.download_url(work_id, format));
        tracing::info!(work_id, %format, "downloading ebook file");

        let client = self.client.clone();
        let retry = self.config.download_retry.clone();
        let allowance = self.config.download_timeout;
        let bytes = self
            .queue
            .enqueue("download ebook file", move || async move {
                execute_with_retry(&retry, "download ebook file", || {
                    fetch_capped(&client, &proxied, allowance)
                })
                .await
            })
            .await?;

        let size = bytes.len() as u64;
        tracing::info!(work_id, %format, size, "download complete");
        Ok(FileArtifact {
            bytes,
            size,
            format,
            mime_type: format.mime_type().to_string(),
            filename: format!("work_{work_id}.{}", format.extension()),
        })
    }

    /// Number of operations waiting in the session queue.
    pub async fn queued(&self) -> usize {
        self.queue.depth().await
    }

    fn is_archive_host(&self, host: &str) -> bool {
        let archive = self.config.archive_host.as_str();
        host == archive || host.strip_suffix(archive).is_some_and(|rest| rest.ends_with('.'))
    }

    fn work_page_url(&self, work_id: &str) -> String {
        format!("https://{}/works/{work_id}", self.config.archive_host)
    }

    fn download_url(&self, work_id: &str, format: DownloadFormat) -> String {
        format!(
            "https://{}/downloads/{work_id}/{work_id}.{}",
            self.config.archive_host,
            format.extension()
        )
    }

    fn proxy_url(&self, target: &str) -> String {
        format!(
            "{}?url={}",
            self.config.proxy_base,
            urlencoding::encode(target)
        )
    }
}

/// One page-fetch attempt: request, status check, body as text.
async fn fetch_text(client: &reqwest::Client, url: &str, allowance: Duration) -> Result<String> {
    let attempt = async {
        let response = client.get(url).send().await?;
        let response = check_status(response).await?;
        Ok(response.text().await?)
    };
    tokio::time::timeout(allowance, attempt)
        .await
        .map_err(|_| Error::Timeout(allowance))?
}

/// One download attempt: request, status check, declared-length pre-cap,
/// then a streamed read that re-checks the cap as bytes arrive.
async fn fetch_capped(client: &reqwest::Client, url: &str, allowance: Duration) -> Result<Bytes> {
    let attempt = async {
        let response = client.get(url).send().await?;
        let response = check_status(response).await?;

        if let Some(declared) = response.content_length() {
            if declared > MAX_ATTACHMENT_BYTES {
                return Err(Error::FileTooLarge {
                    size: declared,
                    limit: MAX_ATTACHMENT_BYTES,
                });
            }
        }

        let mut buffer: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let next_len = buffer.len() as u64 + chunk.len() as u64;
            if next_len > MAX_ATTACHMENT_BYTES {
                return Err(Error::FileTooLarge {
                    size: next_len,
                    limit: MAX_ATTACHMENT_BYTES,
                });
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(buffer))
    };
    tokio::time::timeout(allowance, attempt)
        .await
        .map_err(|_| Error::Timeout(allowance))?
}

/// Relay error payloads: `{type?, error, status?, statusText?, retryAfter?}`.
#[derive(Debug, Deserialize)]
struct RelayErrorBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    error: String,
    status: Option<u16>,
    #[serde(rename = "retryAfter")]
    retry_after: Option<u64>,
}

/// Turn a non-success response into the most structured error available.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let header_retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();

    if let Ok(payload) = serde_json::from_str::<RelayErrorBody>(&body) {
        let retry_after_secs = payload.retry_after.or(header_retry_after);
        if let Some(kind) = payload.kind {
            return Err(Error::Relay {
                kind,
                message: payload.error,
                retry_after_secs,
            });
        }
        return Err(Error::Http {
            status: payload.status.unwrap_or(status.as_u16()),
            message: payload.error,
            retry_after_secs,
        });
    }

    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        // Keep a short excerpt; full bodies belong in traces, not errors.
        body.chars().take(200).collect()
    };
    Err(Error::Http {
        status: status.as_u16(),
        message,
        retry_after_secs: header_retry_after,
    })
}
