//! End-to-end send pipeline with a mock relay and a capturing mailer.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fic2kindle::config::{FetchConfig, QueueConfig, RetryConfig};
use fic2kindle::mailer::{GmailMailer, Mailer, OutgoingMessage, SendReceipt, TokenProvider};
use fic2kindle::orchestrator::SendOrchestrator;
use fic2kindle::{ContentFetcher, DownloadFormat, Error, RequestQueue, Result, SendRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WORK_PAGE: &str = r#"
    <html><body>
        <h2 class="title heading">A Long Expected Party</h2>
        <h3 class="byline heading"><a rel="author" href="/users/alpha">alpha</a></h3>
        <div class="summary module"><blockquote class="userstuff">Fireworks.</blockquote></div>
        <dl class="stats"><dd class="words">9,000</dd><dd class="chapters">1/1</dd></dl>
    </body></html>
"#;

const EBOOK_BYTES: &[u8] = b"pretend this is an epub";

struct CapturingMailer {
    sent: Mutex<Vec<OutgoingMessage>>,
}

#[async_trait]
impl Mailer for CapturingMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<SendReceipt> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(SendReceipt {
            message_id: "msg-001".to_string(),
        })
    }
}

struct StaticTokens {
    invalidated: AtomicBool,
}

#[async_trait]
impl TokenProvider for StaticTokens {
    async fn bearer_token(&self) -> Result<String> {
        Ok("test-token".to_string())
    }

    fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 1,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

fn pipeline_against(relay: &MockServer, mailer: Arc<dyn Mailer>) -> SendOrchestrator {
    let queue = RequestQueue::new(QueueConfig {
        min_interval: Duration::from_millis(1),
        inter_item_pause: Duration::from_millis(1),
    });
    let config = FetchConfig {
        archive_host: "archiveofourown.org".into(),
        proxy_base: format!("{}/", relay.uri()),
        page_timeout: Duration::from_secs(5),
        download_timeout: Duration::from_secs(5),
        page_retry: fast_retry(),
        download_retry: fast_retry(),
    };
    let fetcher = ContentFetcher::new(config, queue.clone()).unwrap();
    SendOrchestrator::with_parts(fetcher, mailer, queue)
}

async fn mount_work(relay: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("url", "https://archiveofourown.org/works/42"))
        .respond_with(ResponseTemplate::new(200).set_body_string(WORK_PAGE))
        .mount(relay)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param(
            "url",
            "https://archiveofourown.org/downloads/42/42.epub",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(EBOOK_BYTES))
        .mount(relay)
        .await;
}

#[tokio::test]
async fn full_send_delivers_the_downloaded_ebook() {
    let relay = MockServer::start().await;
    mount_work(&relay).await;
    let mailer = Arc::new(CapturingMailer {
        sent: Mutex::new(Vec::new()),
    });
    let orchestrator = pipeline_against(&relay, mailer.clone());

    let outcome = orchestrator
        .send(&SendRequest {
            url: "https://archiveofourown.org/works/42".into(),
            kindle_email: "reader@kindle.com".into(),
            format: DownloadFormat::Epub,
        })
        .await
        .unwrap();

    assert_eq!(outcome.message_id, "msg-001");
    assert_eq!(outcome.title, "A Long Expected Party");
    assert_eq!(outcome.recipient, "reader@kindle.com");
    assert_eq!(outcome.attachment_bytes, EBOOK_BYTES.len() as u64);

    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let message = &sent[0];
    assert_eq!(message.to, "reader@kindle.com");
    assert_eq!(message.subject, "Convert A Long Expected Party");
    assert_eq!(message.attachment.filename, "A Long Expected Party.epub");
    assert_eq!(message.attachment.mime_type, "application/epub+zip");
    assert_eq!(
        STANDARD.decode(&message.attachment.content_base64).unwrap(),
        EBOOK_BYTES
    );
    assert!(message.html_body.contains("A Long Expected Party"));
    assert!(message.html_body.contains("Fireworks."));
}

#[tokio::test]
async fn invalid_inputs_fail_before_any_network_traffic() {
    let relay = MockServer::start().await;
    // No mocks mounted: any request would 404 loudly.
    let mailer = Arc::new(CapturingMailer {
        sent: Mutex::new(Vec::new()),
    });
    let orchestrator = pipeline_against(&relay, mailer.clone());

    let bad_url = orchestrator
        .send(&SendRequest {
            url: "https://example.com/works/42".into(),
            kindle_email: "reader@kindle.com".into(),
            format: DownloadFormat::Mobi,
        })
        .await
        .unwrap_err();
    assert!(matches!(bad_url, Error::InvalidUrl(_)));

    let bad_recipient = orchestrator
        .send(&SendRequest {
            url: "https://archiveofourown.org/works/42".into(),
            kindle_email: "not-an-address".into(),
            format: DownloadFormat::Mobi,
        })
        .await
        .unwrap_err();
    assert!(matches!(bad_recipient, Error::InvalidRecipient(_)));

    assert!(mailer.sent.lock().unwrap().is_empty());
    assert_eq!(relay.received_requests().await.unwrap().len(), 0);
}

#[tokio::test]
async fn preview_returns_metadata_without_sending() {
    let relay = MockServer::start().await;
    mount_work(&relay).await;
    let mailer = Arc::new(CapturingMailer {
        sent: Mutex::new(Vec::new()),
    });
    let orchestrator = pipeline_against(&relay, mailer.clone());

    let metadata = orchestrator
        .preview("https://archiveofourown.org/works/42")
        .await
        .unwrap();
    assert_eq!(metadata.title, "A Long Expected Party");
    assert!(mailer.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn gmail_mailer_invalidates_the_token_on_unauthorized() {
    let gmail = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&gmail)
        .await;

    let tokens = Arc::new(StaticTokens {
        invalidated: AtomicBool::new(false),
    });
    let mailer = GmailMailer::with_endpoint(
        tokens.clone(),
        RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        format!("{}/send", gmail.uri()),
    );

    let message = OutgoingMessage {
        to: "reader@kindle.com".into(),
        subject: "Convert x".into(),
        html_body: "<p>x</p>".into(),
        attachment: fic2kindle::mailer::Attachment {
            filename: "x.mobi".into(),
            mime_type: "application/x-mobipocket-ebook".into(),
            content_base64: STANDARD.encode(b"x"),
        },
    };

    let err = mailer.send(&message).await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)), "got {err:?}");
    assert!(
        tokens.invalidated.load(Ordering::SeqCst),
        "401 must invalidate the session token"
    );
}

#[tokio::test]
async fn gmail_mailer_returns_the_provider_message_id() {
    let gmail = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "abc123" })),
        )
        .expect(1)
        .mount(&gmail)
        .await;

    let tokens = Arc::new(StaticTokens {
        invalidated: AtomicBool::new(false),
    });
    let mailer = GmailMailer::with_endpoint(tokens, fast_retry(), format!("{}/send", gmail.uri()));

    let message = OutgoingMessage {
        to: "reader@kindle.com".into(),
        subject: "Convert x".into(),
        html_body: "<p>x</p>".into(),
        attachment: fic2kindle::mailer::Attachment {
            filename: "x.mobi".into(),
            mime_type: "application/x-mobipocket-ebook".into(),
            content_base64: STANDARD.encode(b"x"),
        },
    };

    let receipt = mailer.send(&message).await.unwrap();
    assert_eq!(receipt.message_id, "abc123");
}
