//! Core value types for fic2kindle

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hard attachment ceiling imposed by the mail provider: 25 MiB.
///
/// This is an external constraint, not a tunable.
pub const MAX_ATTACHMENT_BYTES: u64 = 25 * 1024 * 1024;

/// Ebook formats the archive offers for download
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadFormat {
    /// Kindle's legacy native format (default)
    #[default]
    Mobi,
    /// Open ebook format; also accepted by Send to Kindle
    Epub,
    /// Kindle's newer native format
    Azw3,
    /// Fixed-layout fallback
    Pdf,
}

impl DownloadFormat {
    /// File extension used in archive download URLs.
    pub fn extension(&self) -> &'static str {
        match self {
            DownloadFormat::Mobi => "mobi",
            DownloadFormat::Epub => "epub",
            DownloadFormat::Azw3 => "azw3",
            DownloadFormat::Pdf => "pdf",
        }
    }

    /// MIME type for the mail attachment.
    pub fn mime_type(&self) -> &'static str {
        match self {
            DownloadFormat::Mobi => "application/x-mobipocket-ebook",
            DownloadFormat::Epub => "application/epub+zip",
            DownloadFormat::Azw3 => "application/vnd.amazon.ebook",
            DownloadFormat::Pdf => "application/pdf",
        }
    }

    /// Parse a user-supplied format name. Unrecognized names silently fall
    /// back to mobi, the format every Kindle accepts.
    pub fn parse_or_default(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "epub" => DownloadFormat::Epub,
            "azw3" => DownloadFormat::Azw3,
            "pdf" => DownloadFormat::Pdf,
            _ => DownloadFormat::Mobi,
        }
    }
}

impl std::fmt::Display for DownloadFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Metadata scraped from an archive work page
///
/// Immutable once constructed; one instance per fetch call. The work id
/// always comes from the URL, never from the markup, so a metadata fetch
/// succeeds even against markup missing every recognizable element.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkMetadata {
    /// Numeric work identifier, as captured from the URL
    pub work_id: String,
    /// Work title ("Unknown Title" when the page lacks one)
    pub title: String,
    /// Authors in page order ("Unknown Author" when the page lacks any)
    pub authors: Vec<String>,
    /// Work summary, when present
    pub summary: Option<String>,
    /// Word count, best effort
    pub words: Option<u64>,
    /// Chapter counter as displayed (e.g. "3/10"), best effort
    pub chapters: Option<String>,
    /// The URL the user supplied
    pub original_url: String,
    /// Download URLs per format, derived from the work id
    pub download_urls: HashMap<DownloadFormat, String>,
}

impl WorkMetadata {
    /// Authors joined for display, e.g. "A & B".
    pub fn byline(&self) -> String {
        self.authors.join(" & ")
    }
}

/// A downloaded ebook file plus the metadata the mail layer needs
///
/// Only constructed after both size checks (declared and transferred length)
/// passed; holding a `FileArtifact` means it is safe to attach.
#[derive(Clone, Debug)]
pub struct FileArtifact {
    /// The file payload
    pub bytes: Bytes,
    /// Actual transferred length in bytes
    pub size: u64,
    /// The format that was requested and downloaded
    pub format: DownloadFormat,
    /// MIME type for the attachment part
    pub mime_type: String,
    /// Generated attachment filename
    pub filename: String,
}

/// What a caller asks the orchestrator to do
#[derive(Clone, Debug, Deserialize)]
pub struct SendRequest {
    /// Archive work URL as pasted by the user
    pub url: String,
    /// The Kindle address to deliver to
    pub kindle_email: String,
    /// Requested ebook format
    pub format: DownloadFormat,
}

/// Outcome of a completed send
#[derive(Clone, Debug, Serialize)]
pub struct SendOutcome {
    /// Provider message identifier for the accepted send
    pub message_id: String,
    /// Title of the work that was sent
    pub title: String,
    /// Recipient address
    pub recipient: String,
    /// Size of the attachment in bytes
    pub attachment_bytes: u64,
}

/// Derive a safe attachment filename from a work title.
///
/// Strips characters that mail clients or the Kindle pipeline mangle and
/// collapses whitespace to single spaces.
pub fn attachment_filename(title: &str, format: DownloadFormat) -> String {
    let mut cleaned = String::with_capacity(title.len());
    for c in title.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | ' ' | '-' | '_' | '.' => cleaned.push(c),
            _ => {}
        }
    }
    let stem: String = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let stem = if stem.is_empty() { "story" } else { &stem };
    format!("{}.{}", stem, format.extension())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_format_falls_back_to_mobi() {
        assert_eq!(DownloadFormat::parse_or_default("docx"), DownloadFormat::Mobi);
        assert_eq!(DownloadFormat::parse_or_default(""), DownloadFormat::Mobi);
        assert_eq!(DownloadFormat::parse_or_default("EPUB"), DownloadFormat::Epub);
        assert_eq!(DownloadFormat::parse_or_default(" azw3 "), DownloadFormat::Azw3);
    }

    #[test]
    fn format_serde_uses_snake_case_names() {
        assert_eq!(serde_json::to_string(&DownloadFormat::Azw3).unwrap(), "\"azw3\"");
        let parsed: DownloadFormat = serde_json::from_str("\"epub\"").unwrap();
        assert_eq!(parsed, DownloadFormat::Epub);
    }

    #[test]
    fn attachment_filename_strips_unsafe_characters() {
        assert_eq!(
            attachment_filename("Time: A \"Love\" Story?!", DownloadFormat::Epub),
            "Time A Love Story.epub"
        );
    }

    #[test]
    fn attachment_filename_collapses_whitespace() {
        assert_eq!(
            attachment_filename("  spaced   out  ", DownloadFormat::Mobi),
            "spaced out.mobi"
        );
    }

    #[test]
    fn attachment_filename_for_empty_title_uses_placeholder_stem() {
        assert_eq!(attachment_filename("???", DownloadFormat::Pdf), "story.pdf");
    }

    #[test]
    fn byline_joins_multiple_authors() {
        let metadata = WorkMetadata {
            work_id: "1".into(),
            title: "t".into(),
            authors: vec!["alpha".into(), "beta".into()],
            summary: None,
            words: None,
            chapters: None,
            original_url: "u".into(),
            download_urls: HashMap::new(),
        };
        assert_eq!(metadata.byline(), "alpha & beta");
    }

    #[test]
    fn attachment_ceiling_is_twenty_five_mib() {
        assert_eq!(MAX_ATTACHMENT_BYTES, 26_214_400);
    }
}
