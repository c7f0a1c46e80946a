//! Mail sending
//!
//! The orchestrator only knows two seams: [`TokenProvider`], which supplies a
//! valid bearer token on demand and is told when authentication is broken,
//! and [`Mailer`], which accepts a composed message and reports success or an
//! HTTP-like failure. Both are injected as trait objects; nothing in this
//! crate reaches for ambient state.
//!
//! [`GmailMailer`] is the concrete implementation: it builds the multipart
//! MIME message, base64url-encodes it the way the Gmail API expects, and
//! POSTs it under retry. A 401 invalidates the token so the caller is forced
//! back through sign-in instead of failing silently on every send.

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::retry::execute_with_retry;
use crate::types::{FileArtifact, MAX_ATTACHMENT_BYTES};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use std::sync::Arc;

/// Default Gmail send endpoint.
pub const GMAIL_SEND_ENDPOINT: &str =
    "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";

/// Supplies bearer tokens for the mail provider.
///
/// The OAuth dance itself lives outside this crate; the core only needs a
/// token on demand and a way to signal that re-authentication is required.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A currently valid bearer token.
    async fn bearer_token(&self) -> Result<String>;

    /// Mark the session's auth state as broken. Called on 401 so the user
    /// goes through sign-in again rather than retrying a dead token.
    fn invalidate(&self);
}

/// A file attached to an outgoing message.
#[derive(Clone, Debug)]
pub struct Attachment {
    /// Attachment filename as shown to the recipient
    pub filename: String,
    /// MIME type of the payload
    pub mime_type: String,
    /// Payload, already base64-encoded (standard alphabet)
    pub content_base64: String,
}

impl Attachment {
    /// Encode a downloaded artifact as an attachment under the given name.
    pub fn from_artifact(artifact: &FileArtifact, filename: String) -> Self {
        Self {
            filename,
            mime_type: artifact.mime_type.clone(),
            content_base64: STANDARD.encode(&artifact.bytes),
        }
    }
}

/// A composed message ready for the mail provider.
#[derive(Clone, Debug)]
pub struct OutgoingMessage {
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// HTML body
    pub html_body: String,
    /// The ebook attachment
    pub attachment: Attachment,
}

/// Provider acknowledgment of an accepted send.
#[derive(Clone, Debug)]
pub struct SendReceipt {
    /// Provider-assigned message identifier
    pub message_id: String,
}

/// Sends composed messages. Injected into the orchestrator.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver the message, returning the provider's receipt.
    async fn send(&self, message: &OutgoingMessage) -> Result<SendReceipt>;
}

/// Gmail API implementation of [`Mailer`]
pub struct GmailMailer {
    client: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryConfig,
}

impl GmailMailer {
    /// Create a mailer against the real Gmail endpoint.
    pub fn new(tokens: Arc<dyn TokenProvider>, retry: RetryConfig) -> Self {
        Self::with_endpoint(tokens, retry, GMAIL_SEND_ENDPOINT.to_string())
    }

    /// Create a mailer against a custom endpoint. Used by tests.
    pub fn with_endpoint(
        tokens: Arc<dyn TokenProvider>,
        retry: RetryConfig,
        endpoint: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            tokens,
            retry,
        }
    }

    async fn attempt(&self, message: &OutgoingMessage) -> Result<SendReceipt> {
        let token = self.tokens.bearer_token().await?;
        let raw = URL_SAFE_NO_PAD.encode(build_mime(message));

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&serde_json::json!({ "raw": raw }))
            .send()
            .await?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            let body: serde_json::Value = response.json().await?;
            let message_id = body
                .get("id")
                .and_then(|id| id.as_str())
                .unwrap_or_default()
                .to_string();
            return Ok(SendReceipt { message_id });
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            401 => {
                self.tokens.invalidate();
                Err(Error::Auth(
                    "the mail provider rejected the access token".to_string(),
                ))
            }
            413 => Err(Error::FileTooLarge {
                // Base64 inflates the payload; report the encoded size the
                // provider actually measured against its limit.
                size: message.attachment.content_base64.len() as u64,
                limit: MAX_ATTACHMENT_BYTES,
            }),
            _ => Err(Error::Mail {
                status,
                message: body.chars().take(200).collect(),
            }),
        }
    }
}

#[async_trait]
impl Mailer for GmailMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<SendReceipt> {
        tracing::info!(to = %message.to, subject = %message.subject, "sending mail");
        let receipt =
            execute_with_retry(&self.retry, "send mail", || self.attempt(message)).await?;
        tracing::info!(message_id = %receipt.message_id, "mail accepted by provider");
        Ok(receipt)
    }
}

/// Assemble the RFC 2822 multipart message.
fn build_mime(message: &OutgoingMessage) -> String {
    let boundary = "fic2kindle_boundary_7af31c";
    let mut mime = String::new();
    mime.push_str(&format!("To: {}\r\n", message.to));
    mime.push_str(&format!("Subject: {}\r\n", message.subject));
    mime.push_str("MIME-Version: 1.0\r\n");
    mime.push_str(&format!(
        "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
    ));

    mime.push_str(&format!("--{boundary}\r\n"));
    mime.push_str("Content-Type: text/html; charset=\"UTF-8\"\r\n\r\n");
    mime.push_str(&message.html_body);
    mime.push_str("\r\n\r\n");

    mime.push_str(&format!("--{boundary}\r\n"));
    mime.push_str(&format!(
        "Content-Type: {}; name=\"{}\"\r\n",
        message.attachment.mime_type, message.attachment.filename
    ));
    mime.push_str("Content-Transfer-Encoding: base64\r\n");
    mime.push_str(&format!(
        "Content-Disposition: attachment; filename=\"{}\"\r\n\r\n",
        message.attachment.filename
    ));
    for line in wrap_base64(&message.attachment.content_base64) {
        mime.push_str(line);
        mime.push_str("\r\n");
    }
    mime.push_str(&format!("\r\n--{boundary}--\r\n"));
    mime
}

/// Split base64 content into RFC-compliant 76-character lines.
fn wrap_base64(content: &str) -> impl Iterator<Item = &str> {
    content
        .as_bytes()
        .chunks(76)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DownloadFormat;
    use bytes::Bytes;

    fn sample_message() -> OutgoingMessage {
        OutgoingMessage {
            to: "reader@kindle.com".into(),
            subject: "Convert The Longest Night".into(),
            html_body: "<p>Enjoy!</p>".into(),
            attachment: Attachment {
                filename: "The Longest Night.epub".into(),
                mime_type: "application/epub+zip".into(),
                content_base64: STANDARD.encode(vec![0u8; 200]),
            },
        }
    }

    #[test]
    fn mime_message_has_headers_and_both_parts() {
        let mime = build_mime(&sample_message());
        assert!(mime.starts_with("To: reader@kindle.com\r\n"));
        assert!(mime.contains("Subject: Convert The Longest Night\r\n"));
        assert!(mime.contains("Content-Type: multipart/mixed"));
        assert!(mime.contains("Content-Type: text/html"));
        assert!(mime.contains("Content-Transfer-Encoding: base64"));
        assert!(mime.contains("Content-Disposition: attachment; filename=\"The Longest Night.epub\""));
        // Opening boundary twice plus the closing marker.
        assert_eq!(mime.matches("--fic2kindle_boundary_7af31c").count(), 3);
        assert!(mime.trim_end().ends_with("--fic2kindle_boundary_7af31c--"));
    }

    #[test]
    fn base64_lines_wrap_at_76_characters() {
        let mime = build_mime(&sample_message());
        let in_attachment = mime
            .split("Content-Disposition")
            .nth(1)
            .unwrap();
        for line in in_attachment.lines().filter(|l| l.len() > 10 && !l.starts_with("--")) {
            assert!(line.len() <= 76, "line exceeds 76 chars: {line}");
        }
    }

    #[test]
    fn attachment_from_artifact_encodes_payload() {
        let artifact = FileArtifact {
            bytes: Bytes::from_static(b"ebook bytes"),
            size: 11,
            format: DownloadFormat::Epub,
            mime_type: "application/epub+zip".into(),
            filename: "work_1.epub".into(),
        };
        let attachment = Attachment::from_artifact(&artifact, "Nice Title.epub".into());
        assert_eq!(attachment.filename, "Nice Title.epub");
        assert_eq!(attachment.mime_type, "application/epub+zip");
        assert_eq!(
            STANDARD.decode(&attachment.content_base64).unwrap(),
            b"ebook bytes"
        );
    }
}
