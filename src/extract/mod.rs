//! URL → cleaned [`Document`] across heterogeneous formats.
//!
//! A [`Fetcher`] produces raw bytes + content type; format dispatch picks
//! the HTML, PDF or generic text path; the cleanup pass enforces the
//! document invariants (no control characters, capped blank runs, explicit
//! truncation marker, accurate word count).

pub mod clean;
pub mod html;
pub mod pdf;

use crate::core::types::{Document, DocumentType};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ExtractError(pub String);

/// Raw fetch result, before any format handling.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// One HTTP GET. Kept as a seam so the pipeline tests can script responses
/// without a network.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedPage, ExtractError>;
}

/// reqwest-backed fetcher with browser-like headers.
pub struct HttpFetcher {
    client: reqwest::Client,
}

const MAX_BODY_BYTES: usize = 10_000_000;

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedPage, ExtractError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .header(
                "User-Agent",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
            )
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "fr-FR,fr;q=0.9,en;q=0.8")
            .send()
            .await
            .map_err(|e| ExtractError(format!("request failed: {e}")))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(ExtractError(format!("HTTP {status} for {url}")));
        }

        if let Some(len) = response.content_length() {
            if len as usize > MAX_BODY_BYTES {
                return Err(ExtractError(format!("content too large: {len} bytes")));
            }
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
            .unwrap_or_default();

        let body = response
            .bytes()
            .await
            .map_err(|e| ExtractError(format!("body read failed: {e}")))?;
        if body.len() > MAX_BODY_BYTES {
            return Err(ExtractError(format!(
                "content too large: {} bytes",
                body.len()
            )));
        }

        Ok(FetchedPage {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Format dispatch + document assembly
// ─────────────────────────────────────────────────────────────────────────────

pub struct DocumentExtractor {
    fetcher: Arc<dyn Fetcher>,
    timeout: Duration,
    max_content_length: usize,
}

impl DocumentExtractor {
    pub fn new(fetcher: Arc<dyn Fetcher>, timeout: Duration, max_content_length: usize) -> Self {
        Self {
            fetcher,
            timeout,
            max_content_length,
        }
    }

    /// Fetch one URL and build a cleaned document. Errors cover the whole
    /// attempt: network, HTTP status, decoding, empty content.
    pub async fn extract(&self, url: &str) -> Result<Document, ExtractError> {
        let page = self.fetcher.fetch(url, self.timeout).await?;
        let content_type = effective_content_type(&page.content_type, url);
        debug!("extracting {} as {}", url, content_type);

        let (title, raw_text, author, published_date, doc_type) =
            if content_type.starts_with("application/pdf") {
                let text = pdf::extract_text(page.body).await.map_err(ExtractError)?;
                (
                    "Document PDF".to_string(),
                    text,
                    None,
                    None,
                    DocumentType::AcademicPaper,
                )
            } else if content_type.starts_with("text/html") || content_type.contains("html") {
                let html = String::from_utf8_lossy(&page.body).into_owned();
                let parsed = html::extract(&html);
                (
                    parsed.title,
                    parsed.text,
                    parsed.author,
                    parsed.published_date,
                    DocumentType::Article,
                )
            } else {
                let text = String::from_utf8_lossy(&page.body).into_owned();
                (
                    format!("Document depuis {}", crate::search::host_of(url)),
                    text,
                    None,
                    None,
                    DocumentType::Other,
                )
            };

        let cleaned = clean::clean_text(&raw_text);
        if cleaned.is_empty() {
            return Err(ExtractError(format!("no content extracted from {url}")));
        }
        let (content, _truncated) = clean::enforce_max_length(cleaned, self.max_content_length);
        let word_count = clean::count_words(&content);
        let language = detect_language(&content);

        Ok(Document {
            title,
            url: url.to_string(),
            content,
            doc_type,
            author,
            published_date,
            word_count,
            language,
        })
    }
}

/// Server content type, or a guess from the path extension when the server
/// stayed silent.
fn effective_content_type(header_value: &str, url: &str) -> String {
    if !header_value.is_empty() {
        return header_value.to_string();
    }
    let path = url::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_default();
    if path.ends_with(".pdf") {
        "application/pdf".to_string()
    } else if path.ends_with(".txt") {
        "text/plain".to_string()
    } else {
        "text/html".to_string()
    }
}

/// ISO 639-1 code of the detected language, `fr` when detection is absent
/// or unreliable.
fn detect_language(content: &str) -> String {
    let sample: String = content.chars().take(2_000).collect();
    match whatlang::detect(&sample) {
        Some(info) if info.is_reliable() => match info.lang() {
            whatlang::Lang::Fra => "fr",
            whatlang::Lang::Eng => "en",
            whatlang::Lang::Spa => "es",
            whatlang::Lang::Deu => "de",
            whatlang::Lang::Ita => "it",
            whatlang::Lang::Por => "pt",
            whatlang::Lang::Nld => "nl",
            _ => "fr",
        },
        _ => "fr",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_falls_back_to_extension() {
        assert_eq!(
            effective_content_type("", "https://example.com/papier.pdf"),
            "application/pdf"
        );
        assert_eq!(
            effective_content_type("", "https://example.com/page"),
            "text/html"
        );
        assert_eq!(
            effective_content_type("application/pdf", "https://example.com/x"),
            "application/pdf"
        );
    }

    #[test]
    fn language_detection_defaults_to_french() {
        assert_eq!(detect_language("xq zk pf"), "fr");
        assert_eq!(
            detect_language(
                "The quick brown fox jumps over the lazy dog and keeps running through \
                 the quiet English countryside toward the village."
            ),
            "en"
        );
    }
}
