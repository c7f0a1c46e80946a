//! Work page scraping
//!
//! A pure, stateless transform from archive page markup to the fields of
//! [`crate::types::WorkMetadata`]. Parsing degrades gracefully: a missing
//! title or author substitutes placeholder text instead of failing the whole
//! fetch, and the numeric counts are best effort. The work identifier is
//! never taken from markup; the caller extracts it from the URL.

use crate::error::{Error, Result};
use scraper::{Html, Selector};

/// Placeholder used when the page carries no recognizable title.
pub const UNKNOWN_TITLE: &str = "Unknown Title";
/// Placeholder used when the page carries no recognizable author.
pub const UNKNOWN_AUTHOR: &str = "Unknown Author";

/// Fields scraped from a work page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScrapedWork {
    /// Work title, or [`UNKNOWN_TITLE`]
    pub title: String,
    /// Authors in page order, or a single [`UNKNOWN_AUTHOR`]
    pub authors: Vec<String>,
    /// Work summary, when present
    pub summary: Option<String>,
    /// Word count, when present and numeric
    pub words: Option<u64>,
    /// Chapter counter as displayed (e.g. "3/10"), when present
    pub chapters: Option<String>,
}

/// Parse a work page into its metadata fields.
///
/// Only a completely empty document is an error; everything else succeeds
/// with placeholders for whatever is missing.
pub fn parse_work_page(html: &str) -> Result<ScrapedWork> {
    if html.trim().is_empty() {
        return Err(Error::Parse("the work page was empty".to_string()));
    }

    let doc = Html::parse_document(html);

    let title = select_text(&doc, "h2.title")
        .or_else(|| select_text(&doc, "h2.heading"))
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string());

    let mut authors = select_all_text(&doc, "a[rel=\"author\"]");
    if authors.is_empty() {
        authors = select_all_text(&doc, "h3.byline a");
    }
    if authors.is_empty() {
        authors.push(UNKNOWN_AUTHOR.to_string());
    }

    let summary = select_text(&doc, "div.summary blockquote")
        .or_else(|| select_text(&doc, ".summary .userstuff"));

    let words = select_text(&doc, "dd.words").and_then(|text| parse_count(&text));
    let chapters = select_text(&doc, "dd.chapters");

    Ok(ScrapedWork {
        title,
        authors,
        summary,
        words,
        chapters,
    })
}

fn select_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let text: String = doc.select(&sel).next()?.text().collect();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(collapse_whitespace(trimmed))
    }
}

fn select_all_text(doc: &Html, selector: &str) -> Vec<String> {
    let Ok(sel) = Selector::parse(selector) else {
        return Vec::new();
    };
    doc.select(&sel)
        .map(|node| collapse_whitespace(node.text().collect::<String>().trim()))
        .filter(|text| !text.is_empty())
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a displayed count like "12,345" into a number.
fn parse_count(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}
