//! Content extraction stage: URLs → validated, cleaned documents.
//!
//! URL validation, bounded-parallel fetching with retry/backoff, the
//! content filters, and the diagnostic quality score + aggregate stats.

use crate::core::types::{
    ContentFilters, Document, ExtractionInput, ExtractionResult, ExtractionStats,
};
use crate::error::{PipelineError, Result};
use crate::extract::{DocumentExtractor, Fetcher};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const MAX_URLS: usize = 50;
const MIN_WORD_COUNT: usize = 20;

pub struct ExtractorStage {
    fetcher: Arc<dyn Fetcher>,
    timeout: Duration,
    max_retries: usize,
    max_concurrent: usize,
    document_cache: Option<moka::future::Cache<String, Document>>,
    outbound_limit: Option<Arc<tokio::sync::Semaphore>>,
}

impl ExtractorStage {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        timeout: Duration,
        max_retries: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            fetcher,
            timeout,
            max_retries,
            max_concurrent: max_concurrent.max(1),
            document_cache: None,
            outbound_limit: None,
        }
    }

    /// Reuse already-fetched documents across runs.
    pub fn with_document_cache(mut self, cache: moka::future::Cache<String, Document>) -> Self {
        self.document_cache = Some(cache);
        self
    }

    /// Share the process-wide outbound fetch cap.
    pub fn with_outbound_limit(mut self, limit: Arc<tokio::sync::Semaphore>) -> Self {
        self.outbound_limit = Some(limit);
        self
    }

    pub async fn run(&self, input: ExtractionInput) -> Result<ExtractionResult> {
        let start = Instant::now();

        if input.urls.is_empty() {
            return Err(PipelineError::Validation(
                "no URLs provided for extraction".to_string(),
            ));
        }
        if input.urls.len() > MAX_URLS {
            return Err(PipelineError::Validation(format!(
                "too many URLs ({}), maximum {MAX_URLS}",
                input.urls.len()
            )));
        }

        let valid_urls = filter_valid_urls(&input.urls);
        if valid_urls.is_empty() {
            return Err(PipelineError::Extraction(
                "no valid URL after validation".to_string(),
            ));
        }
        info!(
            "extraction start: {}/{} valid URLs",
            valid_urls.len(),
            input.urls.len()
        );

        let extractor = Arc::new(DocumentExtractor::new(
            Arc::clone(&self.fetcher),
            self.timeout,
            input.content_filters.max_content_length,
        ));

        let documents: Vec<Document> = stream::iter(valid_urls.clone())
            .map(|url| {
                let extractor = Arc::clone(&extractor);
                async move { self.extract_with_retry(&extractor, &url).await }
            })
            .buffer_unordered(self.max_concurrent)
            .filter_map(|outcome| async move { outcome })
            .collect()
            .await;

        let documents = apply_filters(documents, &input.content_filters);

        let successful: HashSet<&str> = documents.iter().map(|d| d.url.as_str()).collect();
        let failed_urls: Vec<String> = valid_urls
            .iter()
            .filter(|u| !successful.contains(u.as_str()))
            .cloned()
            .collect();

        let result = ExtractionResult {
            total_urls: valid_urls.len(),
            successful_extractions: documents.len(),
            failed_extractions: valid_urls.len() - documents.len(),
            extraction_stats: compute_stats(&documents),
            documents,
            failed_urls,
            execution_time: start.elapsed().as_secs_f64(),
        };

        info!(
            "extraction done: {}/{} in {:.2}s",
            result.successful_extractions, result.total_urls, result.execution_time
        );
        Ok(result)
    }

    /// Up to `max_retries + 1` attempts with `2^attempt` second backoff;
    /// each attempt is bounded by the stage timeout. Per-URL failures do
    /// not fail the stage.
    async fn extract_with_retry(
        &self,
        extractor: &DocumentExtractor,
        url: &str,
    ) -> Option<Document> {
        if let Some(cache) = &self.document_cache {
            if let Some(document) = cache.get(url).await {
                debug!("document cache hit for {}", url);
                return Some(document);
            }
        }
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                debug!("retry {}/{} for {}", attempt + 1, self.max_retries + 1, url);
            }
            let _permit = match &self.outbound_limit {
                Some(limit) => limit.acquire().await.ok(),
                None => None,
            };
            match tokio::time::timeout(self.timeout, extractor.extract(url)).await {
                Ok(Ok(document)) => {
                    if let Some(cache) = &self.document_cache {
                        cache.insert(url.to_string(), document.clone()).await;
                    }
                    return Some(document);
                }
                Ok(Err(e)) => warn!("extraction attempt failed for {}: {}", url, e),
                Err(_) => warn!("extraction attempt timed out for {}", url),
            }
        }
        None
    }
}

/// Keep only well-formed http/https URLs with a host; everything else is
/// logged and silently dropped.
fn filter_valid_urls(urls: &[String]) -> Vec<String> {
    let mut valid = Vec::with_capacity(urls.len());
    for raw in urls {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        match url::Url::parse(trimmed) {
            Ok(parsed)
                if matches!(parsed.scheme(), "http" | "https")
                    && parsed.host_str().is_some_and(|h| !h.is_empty()) =>
            {
                valid.push(trimmed.to_string());
            }
            _ => warn!("invalid URL ignored: {}", trimmed),
        }
    }
    valid
}

/// Length, word-count, language and required-keyword filters. Truncation
/// already happened during extraction; this pass only rejects.
fn apply_filters(documents: Vec<Document>, filters: &ContentFilters) -> Vec<Document> {
    let total = documents.len();
    let kept: Vec<Document> = documents
        .into_iter()
        .filter(|doc| {
            if doc.content.len() < filters.min_content_length {
                debug!("rejecting {} (content below minimum length)", doc.url);
                return false;
            }
            if doc.word_count < MIN_WORD_COUNT {
                debug!("rejecting {} (word count below {})", doc.url, MIN_WORD_COUNT);
                return false;
            }
            if let Some(language) = &filters.language {
                if &doc.language != language {
                    debug!("rejecting {} (language {})", doc.url, doc.language);
                    return false;
                }
            }
            if !filters.required_keywords.is_empty() {
                let content_lower = doc.content.to_lowercase();
                let any = filters
                    .required_keywords
                    .iter()
                    .any(|kw| content_lower.contains(&kw.to_lowercase()));
                if !any {
                    debug!("rejecting {} (required keywords absent)", doc.url);
                    return false;
                }
            }
            if let Some(min_quality) = filters.min_quality_score {
                let quality = quality_score(doc);
                if quality < min_quality {
                    debug!("rejecting {} (quality {:.2})", doc.url, quality);
                    return false;
                }
            }
            true
        })
        .collect();

    info!("filters kept {}/{} documents", kept.len(), total);
    kept
}

/// Diagnostic quality score in [0, 1]: length, structured title, metadata
/// presence, structural markers, and a repetition penalty.
pub fn quality_score(doc: &Document) -> f64 {
    let mut score: f64 = 0.0;

    if doc.word_count >= 100 {
        score += 0.3;
    } else if doc.word_count >= 50 {
        score += 0.1;
    }

    if doc.title.chars().count() > 10 {
        score += 0.2;
    }
    if doc.author.is_some() {
        score += 0.1;
    }
    if doc.published_date.is_some() {
        score += 0.1;
    }

    let content_lower = doc.content.to_lowercase();
    if ["introduction", "conclusion", "sommaire"]
        .iter()
        .any(|marker| content_lower.contains(marker))
    {
        score += 0.2;
    }

    let lines: Vec<&str> = doc.content.lines().collect();
    if !lines.is_empty() {
        let unique: HashSet<&str> = lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()).collect();
        if (unique.len() as f64) < (lines.len() as f64) / 2.0 {
            score -= 0.2;
        }
    }

    score.clamp(0.0, 1.0)
}

fn compute_stats(documents: &[Document]) -> ExtractionStats {
    if documents.is_empty() {
        return ExtractionStats::default();
    }

    let total_words: usize = documents.iter().map(|d| d.word_count).sum();
    let mut stats = ExtractionStats {
        total_words,
        average_words_per_doc: total_words / documents.len(),
        ..ExtractionStats::default()
    };

    for doc in documents {
        *stats
            .doc_types
            .entry(doc.doc_type.as_str().to_string())
            .or_insert(0) += 1;
        *stats.languages.entry(doc.language.clone()).or_insert(0) += 1;
        if doc.author.is_some() {
            stats.has_authors += 1;
        }
        if doc.published_date.is_some() {
            stats.has_dates += 1;
        }
    }

    stats.average_quality = documents.iter().map(quality_score).sum::<f64>() / documents.len() as f64;
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DocumentType;
    use chrono::Utc;

    fn doc(content: &str) -> Document {
        Document {
            title: "Un titre raisonnable".to_string(),
            url: "https://example.com/doc".to_string(),
            content: content.to_string(),
            doc_type: DocumentType::Article,
            author: None,
            published_date: None,
            word_count: content.split_whitespace().count(),
            language: "fr".to_string(),
        }
    }

    #[test]
    fn url_validation_accepts_http_only() {
        let urls = vec![
            "https://example.com/a".to_string(),
            "ftp://example.com/b".to_string(),
            "pas une url".to_string(),
            " http://example.org/c ".to_string(),
            String::new(),
        ];
        let valid = filter_valid_urls(&urls);
        assert_eq!(
            valid,
            vec![
                "https://example.com/a".to_string(),
                "http://example.org/c".to_string()
            ]
        );
    }

    #[test]
    fn filters_reject_short_documents() {
        let filters = ContentFilters::default();
        let short = doc("trop court");
        assert!(apply_filters(vec![short], &filters).is_empty());
    }

    #[test]
    fn filters_require_keyword_when_given() {
        let mut filters = ContentFilters {
            min_content_length: 10,
            ..ContentFilters::default()
        };
        filters.required_keywords = vec!["solaire".to_string()];

        let matching = doc(&"énergie Solaire et réseaux électriques intelligents ".repeat(10));
        let other = doc(&"un texte qui parle entièrement de gastronomie régionale ".repeat(10));
        let kept = apply_filters(vec![matching, other], &filters);
        assert_eq!(kept.len(), 1);
        assert!(kept[0].content.to_lowercase().contains("solaire"));
    }

    #[test]
    fn quality_score_rewards_structure_and_metadata() {
        let mut rich = doc(&format!(
            "Introduction générale. {} Conclusion finale.",
            "Un texte développé avec des mots nombreux. ".repeat(30)
        ));
        rich.author = Some("A. Martin".to_string());
        rich.published_date = Some(Utc::now());

        let poor = doc("court");

        let rich_score = quality_score(&rich);
        let poor_score = quality_score(&poor);
        assert!(rich_score > poor_score);
        assert!((0.0..=1.0).contains(&rich_score));
    }

    #[test]
    fn repetitive_content_is_penalized() {
        let repeated = "la même ligne exactement\n".repeat(20);
        let varied: String = (0..20)
            .map(|i| format!("ligne numéro {i} avec un contenu distinct\n"))
            .collect();
        let score_repeated = quality_score(&doc(&repeated));
        let score_varied = quality_score(&doc(&varied));
        assert!(score_varied > score_repeated);
    }

    #[test]
    fn stats_cover_types_languages_and_metadata() {
        let mut a = doc(&"mots ".repeat(120));
        a.author = Some("X".to_string());
        let mut b = doc(&"words ".repeat(80));
        b.language = "en".to_string();
        b.doc_type = DocumentType::News;

        let stats = compute_stats(&[a, b]);
        assert_eq!(stats.has_authors, 1);
        assert_eq!(stats.doc_types.get("article"), Some(&1));
        assert_eq!(stats.doc_types.get("news"), Some(&1));
        assert_eq!(stats.languages.get("en"), Some(&1));
        assert!(stats.total_words > 0);
    }
}
