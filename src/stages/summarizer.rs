//! Summarizer stage: documents → per-document summaries plus
//! cross-document analysis.
//!
//! Standard documents fan out up to three concurrent LLM calls; oversized
//! documents go through the chunker, one call per chunk, then a synthesis
//! call. All LLM output parsing is labeled-section + bullet scanning with
//! explicit fallbacks — never a hard failure.

use crate::chunking::{self, ChunkStrategy};
use crate::core::types::{
    Document, DocumentSummary, KeyPoint, Sentiment, SummarizationOutput, SummaryOptions,
};
use crate::error::{PipelineError, Result};
use crate::llm::{LlmParams, LlmService};
use crate::prompts;
use chrono::Utc;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{info, warn};

const MAX_DOCUMENTS: usize = 20;
/// Default credibility when the LLM response carries no usable score.
const DEFAULT_CREDIBILITY: f64 = 0.5;

pub struct SummarizerStage {
    llm: Arc<LlmService>,
    max_concurrent: usize,
}

impl SummarizerStage {
    pub fn new(llm: Arc<LlmService>, max_concurrent: usize) -> Self {
        Self {
            llm,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub async fn run(
        &self,
        documents: &[Document],
        options: &SummaryOptions,
    ) -> Result<SummarizationOutput> {
        let start = Instant::now();

        if documents.is_empty() {
            return Err(PipelineError::Validation(
                "no document provided for summarization".to_string(),
            ));
        }
        if documents.len() > MAX_DOCUMENTS {
            return Err(PipelineError::Validation(format!(
                "too many documents ({}), maximum {MAX_DOCUMENTS}",
                documents.len()
            )));
        }
        let valid: Vec<&Document> = documents
            .iter()
            .filter(|d| !d.content.trim().is_empty())
            .collect();
        if valid.is_empty() {
            return Err(PipelineError::Validation(
                "no document with non-empty content".to_string(),
            ));
        }

        info!("summarization start: {} documents", valid.len());

        // Bounded fan-out; `buffered` keeps summaries aligned with input
        // order. A document-level failure becomes an error summary.
        let summaries: Vec<DocumentSummary> = stream::iter(valid.iter().copied())
            .map(|doc| -> std::pin::Pin<Box<dyn std::future::Future<Output = DocumentSummary> + Send + '_>> {
                Box::pin(async move {
                    let doc_start = Instant::now();
                    let mut summary = match self.summarize_document(doc, options).await {
                        Ok(summary) => summary,
                        Err(e) => {
                            warn!("summary failed for '{}': {}", doc.title, e);
                            error_summary(doc, &e.to_string())
                        }
                    };
                    summary.document_id = document_id(doc);
                    summary.processing_time = doc_start.elapsed().as_secs_f64();
                    summary.processed_at = Utc::now();
                    summary
                })
            })
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let (common_themes, consensus_points, conflicting_views) =
            self.global_analysis(&summaries).await;

        let scores: Vec<f64> = summaries
            .iter()
            .filter_map(|s| s.credibility_score)
            .collect();
        let average_credibility = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        };

        let output = SummarizationOutput {
            total_documents: documents.len(),
            total_processing_time: start.elapsed().as_secs_f64(),
            average_credibility,
            common_themes,
            consensus_points,
            conflicting_views,
            summaries,
        };

        info!(
            "summarization done: {} summaries in {:.2}s",
            output.summaries.len(),
            output.total_processing_time
        );
        Ok(output)
    }

    async fn summarize_document(
        &self,
        doc: &Document,
        options: &SummaryOptions,
    ) -> Result<DocumentSummary> {
        if options.chunk_large_docs && doc.content.len() > options.chunk_threshold {
            self.summarize_large(doc, options).await
        } else {
            self.summarize_standard(doc, options).await
        }
    }

    // ─── Standard path ───────────────────────────────────────────────────

    async fn summarize_standard(
        &self,
        doc: &Document,
        options: &SummaryOptions,
    ) -> Result<DocumentSummary> {
        let author = doc.author.as_deref().unwrap_or("Non spécifié");
        let params = LlmParams::default();

        let exec_prompt = prompts::executive_summary(&doc.title, author, &doc.url, &doc.content);
        let exec_fut = self
            .llm
            .completion(&exec_prompt, Some(prompts::SYSTEM_SUMMARIZER), &params);
        let detail_fut = async {
            if options.detailed_analysis {
                Some(
                    self.llm
                        .completion(
                            &prompts::detailed_analysis(&doc.title, author, &doc.url, &doc.content),
                            Some(prompts::SYSTEM_SUMMARIZER),
                            &params,
                        )
                        .await,
                )
            } else {
                None
            }
        };
        let sentiment_fut = async {
            if options.include_sentiment {
                Some(
                    self.llm
                        .completion(
                            &prompts::sentiment_analysis(&doc.title, &doc.content),
                            Some(prompts::SYSTEM_SUMMARIZER),
                            &params,
                        )
                        .await,
                )
            } else {
                None
            }
        };

        let (exec_result, detail_result, sentiment_result) =
            tokio::join!(exec_fut, detail_fut, sentiment_fut);

        // Without an executive summary there is no summary at all.
        let executive_summary = exec_result?;

        let (detailed_summary, key_points) = match detail_result {
            Some(Ok(content)) => {
                let points = parse_key_points(&content, options.max_key_points);
                (content, points)
            }
            Some(Err(e)) => {
                warn!("detailed analysis failed for '{}': {}", doc.title, e);
                (String::new(), Vec::new())
            }
            None => (String::new(), Vec::new()),
        };

        let (sentiment, credibility_score) = match sentiment_result {
            Some(Ok(content)) => {
                let (sentiment, credibility) = parse_sentiment(&content);
                (Some(sentiment), Some(credibility))
            }
            Some(Err(e)) => {
                warn!("sentiment analysis failed for '{}': {}", doc.title, e);
                (None, None)
            }
            None => (None, None),
        };

        Ok(DocumentSummary {
            document_id: String::new(),
            title: doc.title.clone(),
            url: doc.url.clone(),
            executive_summary,
            detailed_summary,
            key_points,
            sentiment,
            credibility_score,
            processed_at: Utc::now(),
            processing_time: 0.0,
        })
    }

    // ─── Large-document path ─────────────────────────────────────────────

    async fn summarize_large(
        &self,
        doc: &Document,
        options: &SummaryOptions,
    ) -> Result<DocumentSummary> {
        let chunks = chunking::chunk_text(&doc.content, ChunkStrategy::by_name("default"));
        info!("'{}' chunked into {} parts", doc.title, chunks.len());

        let params = LlmParams::default();
        let chunk_futures = chunks.iter().map(|chunk| {
            let params = params.clone();
            async move {
                match self
                    .llm
                    .completion(
                        &prompts::chunk_summary(
                            &doc.title,
                            chunk.chunk_id,
                            chunk.total_chunks,
                            &chunk.content,
                        ),
                        Some(prompts::SYSTEM_SUMMARIZER),
                        &params,
                    )
                    .await
                {
                    Ok(summary) => summary,
                    Err(e) => {
                        warn!("chunk {} summary failed: {}", chunk.chunk_id, e);
                        format!("Erreur résumé chunk {}", chunk.chunk_id)
                    }
                }
            }
        });
        let chunk_summaries: Vec<String> = join_all(chunk_futures).await;

        let combined = chunk_summaries
            .iter()
            .enumerate()
            .map(|(i, s)| format!("Partie {}: {}", i + 1, s))
            .collect::<Vec<_>>()
            .join("\n\n");

        match self
            .llm
            .completion(
                &prompts::chunk_synthesis(&doc.title, &doc.url, &combined),
                Some(prompts::SYSTEM_SUMMARIZER),
                &params,
            )
            .await
        {
            Ok(synthesis) => match parse_synthesis(&synthesis, options.max_key_points) {
                Some(parsed) => Ok(DocumentSummary {
                    document_id: String::new(),
                    title: doc.title.clone(),
                    url: doc.url.clone(),
                    executive_summary: parsed.executive,
                    detailed_summary: parsed.detailed,
                    key_points: parsed.key_points,
                    sentiment: Some(parsed.sentiment),
                    credibility_score: Some(parsed.credibility),
                    processed_at: Utc::now(),
                    processing_time: 0.0,
                }),
                None => {
                    warn!("synthesis parse failed for '{}', using chunk concat", doc.title);
                    Ok(basic_summary_from_chunks(doc, &chunk_summaries))
                }
            },
            Err(e) => {
                warn!("synthesis call failed for '{}': {}", doc.title, e);
                Ok(basic_summary_from_chunks(doc, &chunk_summaries))
            }
        }
    }

    // ─── Cross-document analysis ─────────────────────────────────────────

    /// One LLM call over all detailed summaries; empty lists on failure or
    /// when fewer than two summaries exist.
    async fn global_analysis(
        &self,
        summaries: &[DocumentSummary],
    ) -> (Vec<String>, Vec<String>, Vec<String>) {
        if summaries.len() < 2 {
            return (Vec::new(), Vec::new(), Vec::new());
        }

        let all_summaries = summaries
            .iter()
            .map(|s| format!("Document: {}\nRésumé: {}", s.title, s.detailed_summary))
            .collect::<Vec<_>>()
            .join("\n\n");

        match self
            .llm
            .completion(
                &prompts::global_analysis(&all_summaries),
                Some(prompts::SYSTEM_ANALYST),
                &LlmParams::default(),
            )
            .await
        {
            Ok(response) => parse_global_analysis(&response),
            Err(e) => {
                warn!("global analysis failed: {}", e);
                (Vec::new(), Vec::new(), Vec::new())
            }
        }
    }
}

/// Deterministic id from url + title.
pub fn document_id(doc: &Document) -> String {
    let digest = md5::compute(format!("{}{}", doc.url, doc.title).as_bytes());
    format!("doc_{}", &format!("{digest:x}")[..8])
}

fn error_summary(doc: &Document, error: &str) -> DocumentSummary {
    DocumentSummary {
        document_id: document_id(doc),
        title: doc.title.clone(),
        url: doc.url.clone(),
        executive_summary: format!("Erreur lors du résumé: {error}"),
        detailed_summary: format!(
            "Le résumé de ce document n'a pas pu être généré: {error}"
        ),
        key_points: Vec::new(),
        sentiment: None,
        credibility_score: None,
        processed_at: Utc::now(),
        processing_time: 0.0,
    }
}

fn basic_summary_from_chunks(doc: &Document, chunk_summaries: &[String]) -> DocumentSummary {
    let combined = chunk_summaries.join(" ");
    let executive = if combined.chars().count() > 200 {
        format!("{}...", combined.chars().take(200).collect::<String>())
    } else {
        combined.clone()
    };
    DocumentSummary {
        document_id: String::new(),
        title: doc.title.clone(),
        url: doc.url.clone(),
        executive_summary: executive,
        detailed_summary: combined,
        key_points: Vec::new(),
        sentiment: Some(Sentiment::Neutral),
        credibility_score: Some(DEFAULT_CREDIBILITY),
        processed_at: Utc::now(),
        processing_time: 0.0,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsers
// ─────────────────────────────────────────────────────────────────────────────

fn bullet_text(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("• "))
        .map(str::trim)
}

/// Bullet lines become key points with default importance 0.8.
pub fn parse_key_points(content: &str, max_key_points: usize) -> Vec<KeyPoint> {
    content
        .lines()
        .filter_map(bullet_text)
        .filter(|text| text.chars().count() > 10)
        .take(max_key_points)
        .map(|text| {
            let title = if text.chars().count() > 50 {
                format!("{}...", text.chars().take(50).collect::<String>())
            } else {
                text.to_string()
            };
            KeyPoint {
                title,
                content: text.to_string(),
                importance: 0.8,
                category: Some("general".to_string()),
            }
        })
        .collect()
}

fn credibility_regexes() -> &'static [Regex; 3] {
    static RES: OnceLock<[Regex; 3]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"cr[ée]dibilit[ée]\s*:?\s*(\d+(?:[.,]\d+)?)").unwrap(),
            Regex::new(r"(\d+(?:[.,]\d+)?)\s*/\s*10").unwrap(),
            Regex::new(r"(\d+(?:[.,]\d+)?)\s*%").unwrap(),
        ]
    })
}

/// Recover a credibility score from free text. The alternatives are tried
/// in a fixed order and the first match wins; each normalizes on its own
/// terms. Absent any match, 0.5.
pub fn parse_credibility(content_lower: &str) -> f64 {
    let regexes = credibility_regexes();
    let parse_number = |m: &str| m.replace(',', ".").parse::<f64>().ok();

    if let Some(caps) = regexes[0].captures(content_lower) {
        if let Some(value) = caps.get(1).and_then(|m| parse_number(m.as_str())) {
            let normalized = if value > 10.0 {
                value / 100.0
            } else if value > 1.0 {
                value / 10.0
            } else {
                value
            };
            return normalized.clamp(0.0, 1.0);
        }
    }
    if let Some(caps) = regexes[1].captures(content_lower) {
        if let Some(value) = caps.get(1).and_then(|m| parse_number(m.as_str())) {
            return (value / 10.0).clamp(0.0, 1.0);
        }
    }
    if let Some(caps) = regexes[2].captures(content_lower) {
        if let Some(value) = caps.get(1).and_then(|m| parse_number(m.as_str())) {
            return (value / 100.0).clamp(0.0, 1.0);
        }
    }
    DEFAULT_CREDIBILITY
}

/// Keyword classification plus credibility recovery.
pub fn parse_sentiment(content: &str) -> (Sentiment, f64) {
    let lower = content.to_lowercase();
    let sentiment = if lower.contains("positif") || lower.contains("positive") {
        Sentiment::Positive
    } else if lower.contains("négatif") || lower.contains("negative") {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    };
    (sentiment, parse_credibility(&lower))
}

struct ParsedSynthesis {
    executive: String,
    detailed: String,
    key_points: Vec<KeyPoint>,
    sentiment: Sentiment,
    credibility: f64,
}

#[derive(PartialEq, Clone, Copy)]
enum SynthesisSection {
    None,
    Executive,
    Detailed,
    KeyPoints,
    Sentiment,
}

/// Parse the four labeled sections of a chunk-synthesis response. `None`
/// when no section label was recognized (the caller then falls back to the
/// raw chunk summaries).
fn parse_synthesis(content: &str, max_key_points: usize) -> Option<ParsedSynthesis> {
    let mut section = SynthesisSection::None;
    let mut executive = String::new();
    let mut detailed = String::new();
    let mut points_block = String::new();
    let mut sentiment_block = String::new();
    let mut any_label = false;

    for line in content.lines() {
        let lower = line.to_lowercase();
        let label = if lower.contains("résumé exécutif") || lower.contains("executive") {
            Some(SynthesisSection::Executive)
        } else if lower.contains("résumé détaillé") || lower.contains("detailed") {
            Some(SynthesisSection::Detailed)
        } else if lower.contains("points clés") || lower.contains("key points") {
            Some(SynthesisSection::KeyPoints)
        } else if lower.contains("sentiment") || lower.contains("crédibilité") {
            Some(SynthesisSection::Sentiment)
        } else {
            None
        };

        if let Some(new_section) = label {
            any_label = true;
            section = new_section;
            // Keep any content following the label on the same line.
            if let Some((_, rest)) = line.split_once(':') {
                append_line(&mut executive, &mut detailed, &mut points_block, &mut sentiment_block, section, rest);
            }
            continue;
        }
        append_line(&mut executive, &mut detailed, &mut points_block, &mut sentiment_block, section, line);
    }

    if !any_label {
        return None;
    }

    let (sentiment, credibility) = parse_sentiment(&sentiment_block);
    Some(ParsedSynthesis {
        executive: executive.trim().to_string(),
        detailed: detailed.trim().to_string(),
        key_points: parse_key_points(&points_block, max_key_points),
        sentiment,
        credibility,
    })
}

fn append_line(
    executive: &mut String,
    detailed: &mut String,
    points: &mut String,
    sentiment: &mut String,
    section: SynthesisSection,
    line: &str,
) {
    let target = match section {
        SynthesisSection::Executive => executive,
        SynthesisSection::Detailed => detailed,
        SynthesisSection::KeyPoints => points,
        SynthesisSection::Sentiment => sentiment,
        SynthesisSection::None => return,
    };
    if !line.trim().is_empty() {
        target.push_str(line.trim());
        target.push('\n');
    }
}

/// Section-parse the cross-document analysis by keyword detection, then
/// bullet extraction.
pub fn parse_global_analysis(content: &str) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut themes = Vec::new();
    let mut consensus = Vec::new();
    let mut conflicts = Vec::new();
    let mut current: Option<usize> = None;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lower = trimmed.to_lowercase();

        if let Some(text) = bullet_text(trimmed) {
            if text.chars().count() > 5 {
                match current {
                    Some(0) => themes.push(text.to_string()),
                    Some(1) => consensus.push(text.to_string()),
                    Some(2) => conflicts.push(text.to_string()),
                    _ => {}
                }
            }
        } else if lower.contains("thème") || lower.contains("theme") {
            current = Some(0);
        } else if lower.contains("consensus") {
            current = Some(1);
        } else if lower.contains("conflict") || lower.contains("contradictoire") {
            current = Some(2);
        }
    }

    (themes, consensus, conflicts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_points_come_from_bullets_only() {
        let content = "Préambule sans puce.\n\
                       - Premier point clé substantiel\n\
                       • Second point clé substantiel\n\
                       - court\n\
                       Du texte final.";
        let points = parse_key_points(content, 5);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].importance, 0.8);
        assert!(points[0].title.starts_with("Premier point"));
    }

    #[test]
    fn key_points_honor_cap() {
        let content = (0..10)
            .map(|i| format!("- Point numéro {i} avec assez de texte"))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(parse_key_points(&content, 3).len(), 3);
    }

    #[test]
    fn long_key_point_titles_are_truncated() {
        let text = "x".repeat(80);
        let points = parse_key_points(&format!("- {text}"), 5);
        assert!(points[0].title.ends_with("..."));
        assert_eq!(points[0].content, text);
    }

    #[test]
    fn sentiment_keyword_classification() {
        assert_eq!(parse_sentiment("SENTIMENT: Positif - ton optimiste").0, Sentiment::Positive);
        assert_eq!(parse_sentiment("globalement négatif").0, Sentiment::Negative);
        assert_eq!(parse_sentiment("ton factuel").0, Sentiment::Neutral);
    }

    #[test]
    fn credibility_labeled_form_wins() {
        // The labeled form matches first even when a percent also appears.
        let score = parse_credibility("crédibilité: 8 — couverture 40%");
        assert!((score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn credibility_out_of_ten() {
        assert!((parse_credibility("je donne 7/10 à cette source") - 0.7).abs() < 1e-9);
    }

    #[test]
    fn credibility_percentage_and_default() {
        assert!((parse_credibility("fiable à 85%") - 0.85).abs() < 1e-9);
        assert!((parse_credibility("aucun score ici") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn synthesis_parse_roundtrip() {
        let response = "RÉSUMÉ EXÉCUTIF: Une vue d'ensemble en deux phrases.\n\
                        RÉSUMÉ DÉTAILLÉ:\nUn paragraphe complet d'analyse.\n\
                        POINTS CLÉS:\n- Premier point clé du document\n- Second point clé du document\n\
                        SENTIMENT: Positif CRÉDIBILITÉ: 8/10";
        let parsed = parse_synthesis(response, 5).unwrap();
        assert!(parsed.executive.contains("vue d'ensemble"));
        assert!(parsed.detailed.contains("paragraphe complet"));
        assert_eq!(parsed.key_points.len(), 2);
        assert_eq!(parsed.sentiment, Sentiment::Positive);
        assert!((parsed.credibility - 0.8).abs() < 1e-9);
    }

    #[test]
    fn synthesis_parse_rejects_unlabeled_text() {
        assert!(parse_synthesis("juste du texte brut sans aucune étiquette", 5).is_none());
    }

    #[test]
    fn global_analysis_sections_split_by_keywords() {
        let response = "## Thèmes communs\n\
                        - la transition énergétique\n\
                        - le coût des infrastructures\n\
                        ## Points de consensus\n\
                        - le solaire progresse partout\n\
                        ## Points conflictuels\n\
                        - désaccord sur le nucléaire";
        let (themes, consensus, conflicts) = parse_global_analysis(response);
        assert_eq!(themes.len(), 2);
        assert_eq!(consensus, vec!["le solaire progresse partout"]);
        assert_eq!(conflicts, vec!["désaccord sur le nucléaire"]);
    }

    #[test]
    fn global_analysis_handles_unstructured_response() {
        let (themes, consensus, conflicts) = parse_global_analysis("réponse sans structure");
        assert!(themes.is_empty() && consensus.is_empty() && conflicts.is_empty());
    }
}
