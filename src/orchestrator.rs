//! End-to-end send pipeline
//!
//! [`SendOrchestrator`] strings the stages together: validate the pasted URL
//! and recipient, fetch and parse the work page, download the ebook in the
//! requested format, compose the message, and hand it to the mailer. The
//! mail send goes through the same session queue as the archive requests, so
//! a burst of sends still leaves the wire one operation at a time.
//!
//! The orchestrator holds its collaborators behind seams ([`Mailer`],
//! [`TokenProvider`]) so tests can drive the pipeline without touching Gmail.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetcher::ContentFetcher;
use crate::mailer::{Attachment, GmailMailer, Mailer, OutgoingMessage, TokenProvider};
use crate::queue::RequestQueue;
use crate::types::{attachment_filename, SendOutcome, SendRequest, WorkMetadata};
use std::sync::Arc;

/// Drives a send from pasted URL to provider receipt.
pub struct SendOrchestrator {
    fetcher: ContentFetcher,
    mailer: Arc<dyn Mailer>,
    queue: RequestQueue,
}

impl SendOrchestrator {
    /// Build the full production pipeline: a fresh session queue, a fetcher
    /// sharing it, and a Gmail mailer using the given token provider.
    pub fn new(config: Config, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let queue = RequestQueue::new(config.queue);
        let fetcher = ContentFetcher::new(config.fetch, queue.clone())?;
        let mailer = Arc::new(GmailMailer::new(tokens, config.mail_retry));
        Ok(Self {
            fetcher,
            mailer,
            queue,
        })
    }

    /// Assemble an orchestrator from pre-built collaborators. Used by tests
    /// and by embedders that bring their own mail provider.
    pub fn with_parts(fetcher: ContentFetcher, mailer: Arc<dyn Mailer>, queue: RequestQueue) -> Self {
        Self {
            fetcher,
            mailer,
            queue,
        }
    }

    /// Fetch and parse work metadata without sending anything.
    ///
    /// Backs the "look up this URL first" flow where the user confirms the
    /// title before committing to a send.
    pub async fn preview(&self, url: &str) -> Result<WorkMetadata> {
        self.fetcher.fetch_metadata(url).await
    }

    /// Run the whole pipeline for one request.
    pub async fn send(&self, request: &SendRequest) -> Result<SendOutcome> {
        // Both inputs are validated before any network traffic happens.
        let work_id = self.fetcher.parse_work_url(&request.url)?;
        validate_recipient(&request.kindle_email)?;
        tracing::info!(work_id, format = %request.format, "send pipeline starting");

        let metadata = self.fetcher.fetch_metadata(&request.url).await?;
        let artifact = self
            .fetcher
            .download_format(&metadata.work_id, request.format)
            .await?;

        let filename = attachment_filename(&metadata.title, request.format);
        let message = OutgoingMessage {
            to: request.kindle_email.clone(),
            subject: compose_subject(&metadata.title),
            html_body: compose_body(&metadata),
            attachment: Attachment::from_artifact(&artifact, filename),
        };

        let mailer = Arc::clone(&self.mailer);
        let receipt = self
            .queue
            .enqueue("send mail", move || async move { mailer.send(&message).await })
            .await?;

        tracing::info!(
            work_id,
            message_id = %receipt.message_id,
            attachment_bytes = artifact.size,
            "send pipeline complete"
        );
        Ok(SendOutcome {
            message_id: receipt.message_id,
            title: metadata.title,
            recipient: request.kindle_email.clone(),
            attachment_bytes: artifact.size,
        })
    }

    /// Number of operations waiting in the session queue, for "N requests
    /// queued" feedback.
    pub async fn queued(&self) -> usize {
        self.queue.depth().await
    }
}

/// Minimal shape check on the recipient address. Deliverability is the
/// provider's verdict; this only catches obvious paste mistakes early.
fn validate_recipient(address: &str) -> Result<()> {
    let address = address.trim();
    let valid = address.split('@').collect::<Vec<_>>().len() == 2
        && !address.starts_with('@')
        && !address.ends_with('@')
        && address.split('@').nth(1).is_some_and(|d| d.contains('.'))
        && !address.contains(char::is_whitespace);
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidRecipient(address.to_string()))
    }
}

/// The "Convert" subject opts in to the Kindle conversion pipeline, which is
/// a no-op for formats the device already reads natively.
fn compose_subject(title: &str) -> String {
    format!("Convert {title}")
}

fn compose_body(metadata: &WorkMetadata) -> String {
    let mut body = String::new();
    body.push_str(&format!(
        "<p><strong>{}</strong> by {}</p>",
        metadata.title,
        metadata.byline()
    ));
    if let Some(summary) = &metadata.summary {
        body.push_str(&format!("<blockquote>{summary}</blockquote>"));
    }
    let mut stats = Vec::new();
    if let Some(words) = metadata.words {
        stats.push(format!("{words} words"));
    }
    if let Some(chapters) = &metadata.chapters {
        stats.push(format!("chapters: {chapters}"));
    }
    if !stats.is_empty() {
        body.push_str(&format!("<p>{}</p>", stats.join(", ")));
    }
    body.push_str(&format!(
        "<p><a href=\"{}\">Read on the archive</a></p>",
        metadata.original_url
    ));
    body
}
