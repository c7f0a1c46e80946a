//! fic2kindle — deliver archive works to a Kindle by mail.
//!
//! The crate takes a pasted archive work URL, scrapes the work page for
//! metadata, downloads the ebook in the requested format, and mails it to a
//! Kindle address through the Gmail API. The interesting part is not the
//! scraping but the network discipline around it: the archive rate limits
//! aggressively, so every outbound request flows through a single-flight
//! [`queue::RequestQueue`] with minimum spacing, wrapped in
//! [`retry::execute_with_retry`] backoff, with failures classified by
//! [`classify::classify`] into retryable and terminal outcomes with
//! user-presentable messages.
//!
//! Browser-origin deployments pair the client side with the [`proxy`] relay,
//! which fronts the archive and normalizes upstream failures into structured
//! JSON errors the classifier understands.
//!
//! # Quick start
//!
//! ```no_run
//! use fic2kindle::{Config, SendOrchestrator, SendRequest, DownloadFormat};
//! use fic2kindle::mailer::TokenProvider;
//! use std::sync::Arc;
//!
//! # async fn run(tokens: Arc<dyn TokenProvider>) -> fic2kindle::Result<()> {
//! let orchestrator = SendOrchestrator::new(Config::default(), tokens)?;
//! let outcome = orchestrator
//!     .send(&SendRequest {
//!         url: "https://archiveofourown.org/works/12345".to_string(),
//!         kindle_email: "reader@kindle.com".to_string(),
//!         format: DownloadFormat::Epub,
//!     })
//!     .await?;
//! println!("sent {} ({} bytes)", outcome.title, outcome.attachment_bytes);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Error classification into user-facing, retry-aware categories
pub mod classify;
/// Configuration types and serde helpers
pub mod config;
/// Crate-wide error type
pub mod error;
/// Queued, retried archive fetching and downloading
pub mod fetcher;
/// Mail composition and the Gmail send implementation
pub mod mailer;
/// The end-to-end send pipeline
pub mod orchestrator;
/// The CORS relay fronting the archive
pub mod proxy;
/// Single-flight FIFO request queue with minimum spacing
pub mod queue;
/// Retry with exponential backoff and jitter
pub mod retry;
/// Work page scraping
pub mod scrape;
/// Core value types
pub mod types;

pub use classify::{classify, ClassifiedError, ErrorKind};
pub use config::{Config, FetchConfig, QueueConfig, RetryConfig};
pub use error::{Error, Result};
pub use fetcher::ContentFetcher;
pub use orchestrator::SendOrchestrator;
pub use queue::RequestQueue;
pub use types::{
    DownloadFormat, FileArtifact, SendOutcome, SendRequest, WorkMetadata, MAX_ATTACHMENT_BYTES,
};
