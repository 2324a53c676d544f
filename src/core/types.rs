use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────────────────────────────────────
// Research stage types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    #[default]
    Basic,
    Advanced,
}

/// Input to a pipeline run. Immutable once constructed; `topic` and
/// `keywords` together form the memoization fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchQuery {
    pub topic: String,
    pub keywords: Vec<String>,
    pub max_results: usize,
    #[serde(default)]
    pub search_depth: SearchDepth,
}

impl ResearchQuery {
    /// Validates and normalizes the query: topic must hold at least three
    /// characters, `max_results` lies in 1..=20, keywords are deduplicated
    /// case-insensitively against the topic and each other.
    pub fn new(
        topic: impl Into<String>,
        keywords: Vec<String>,
        max_results: usize,
        search_depth: SearchDepth,
    ) -> Result<Self, PipelineError> {
        let topic = topic.into().trim().to_string();
        if topic.chars().count() < 3 {
            return Err(PipelineError::Validation(
                "topic must contain at least 3 characters".to_string(),
            ));
        }
        if !(1..=20).contains(&max_results) {
            return Err(PipelineError::Validation(format!(
                "max_results must lie in 1..=20, got {max_results}"
            )));
        }

        let topic_lower = topic.to_lowercase();
        let mut seen: Vec<String> = Vec::new();
        let mut deduped = Vec::new();
        for kw in keywords {
            let kw = kw.trim().to_string();
            if kw.is_empty() {
                continue;
            }
            let lower = kw.to_lowercase();
            if topic_lower.contains(&lower) || seen.contains(&lower) {
                continue;
            }
            seen.push(lower);
            deduped.push(kw);
        }

        Ok(Self {
            topic,
            keywords: deduped,
            max_results,
            search_depth,
        })
    }
}

/// One candidate source as normalized from a search provider.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default)]
    pub published_date: Option<DateTime<Utc>>,
    /// Host the result came from, when the provider reports one.
    #[serde(default)]
    pub source: String,
    /// Relevance in [0, 1]; provider score at parse time, recomputed by the
    /// researcher's ranking pass.
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutput {
    pub query: ResearchQuery,
    pub results: Vec<SearchResult>,
    pub total_found: usize,
    pub search_time: f64,
    pub search_engine: String,
    pub timestamp: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction stage types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    #[default]
    Article,
    BlogPost,
    AcademicPaper,
    News,
    Report,
    Other,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::BlogPost => "blog_post",
            Self::AcademicPaper => "academic_paper",
            Self::News => "news",
            Self::Report => "report",
            Self::Other => "other",
        }
    }
}

/// A fetched and cleaned source document.
///
/// Invariants upheld by the extractor: `word_count` equals the whitespace
/// token count of `content`, the content carries no control characters and
/// no run of more than two consecutive newlines, and content longer than the
/// configured maximum is truncated with an explicit marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default)]
    pub doc_type: DocumentType,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub published_date: Option<DateTime<Utc>>,
    pub word_count: usize,
    /// ISO language code; `fr` when detection is inconclusive.
    pub language: String,
}

/// Filters applied to extracted documents before they leave the stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentFilters {
    pub min_content_length: usize,
    pub max_content_length: usize,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub required_keywords: Vec<String>,
    /// Quality gate; `None` keeps the quality score diagnostic-only.
    #[serde(default)]
    pub min_quality_score: Option<f64>,
}

impl Default for ContentFilters {
    fn default() -> Self {
        Self {
            min_content_length: 200,
            max_content_length: 50_000,
            language: None,
            required_keywords: Vec::new(),
            min_quality_score: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionInput {
    pub urls: Vec<String>,
    #[serde(default)]
    pub content_filters: ContentFilters,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractionStats {
    pub total_words: usize,
    pub average_words_per_doc: usize,
    pub doc_types: HashMap<String, usize>,
    pub languages: HashMap<String, usize>,
    pub has_authors: usize,
    pub has_dates: usize,
    /// Mean of the per-document quality scores (diagnostic).
    pub average_quality: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub documents: Vec<Document>,
    pub total_urls: usize,
    pub successful_extractions: usize,
    pub failed_extractions: usize,
    pub failed_urls: Vec<String>,
    pub execution_time: f64,
    pub extraction_stats: ExtractionStats,
}

// ─────────────────────────────────────────────────────────────────────────────
// Summarization stage types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPoint {
    pub title: String,
    pub content: String,
    /// Importance in [0, 1].
    pub importance: f64,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    /// Deterministic id derived from url + title.
    pub document_id: String,
    pub title: String,
    pub url: String,
    pub executive_summary: String,
    pub detailed_summary: String,
    pub key_points: Vec<KeyPoint>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub credibility_score: Option<f64>,
    pub processed_at: DateTime<Utc>,
    pub processing_time: f64,
}

/// Tunables for the summarizer; the defaults match the full pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryOptions {
    pub include_sentiment: bool,
    pub detailed_analysis: bool,
    pub max_key_points: usize,
    pub chunk_large_docs: bool,
    /// Documents longer than this many characters take the chunked path.
    pub chunk_threshold: usize,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            include_sentiment: true,
            detailed_analysis: true,
            max_key_points: 5,
            chunk_large_docs: true,
            chunk_threshold: 6_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizationOutput {
    pub summaries: Vec<DocumentSummary>,
    pub total_documents: usize,
    pub total_processing_time: f64,
    #[serde(default)]
    pub average_credibility: Option<f64>,
    #[serde(default)]
    pub common_themes: Vec<String>,
    #[serde(default)]
    pub consensus_points: Vec<String>,
    #[serde(default)]
    pub conflicting_views: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Synthesis stage types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Executive,
    #[default]
    Detailed,
    Academic,
    Business,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Markdown,
    Html,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutiveSummary {
    pub key_findings: Vec<String>,
    pub main_insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub summary_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    pub title: String,
    pub content: String,
    pub order: usize,
    #[serde(default)]
    pub subsections: Vec<ReportSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReference {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub publication_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub credibility_score: Option<f64>,
    pub citation_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Methodology {
    pub research_approach: String,
    pub sources_count: usize,
    pub analysis_methods: Vec<String>,
    pub limitations: Vec<String>,
    pub data_quality_assessment: String,
}

/// Terminal artifact of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub report_id: String,
    pub title: String,
    pub topic: String,
    pub report_type: ReportType,
    pub report_format: ReportFormat,
    pub executive_summary: ExecutiveSummary,
    pub introduction: String,
    pub main_sections: Vec<ReportSection>,
    pub conclusion: String,
    pub key_themes: Vec<String>,
    pub consensus_points: Vec<String>,
    pub conflicting_viewpoints: Vec<String>,
    pub emerging_trends: Vec<String>,
    pub methodology: Methodology,
    pub sources: Vec<SourceReference>,
    pub confidence_score: f64,
    pub completeness_score: f64,
    pub word_count: usize,
    pub generated_at: DateTime<Utc>,
    /// Rendered report keyed by format name: markdown, text, html.
    pub formatted_outputs: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSynthesisInput {
    pub summarization_output: SummarizationOutput,
    pub original_topic: String,
    #[serde(default)]
    pub report_type: ReportType,
    #[serde(default)]
    pub report_format: ReportFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSynthesisOutput {
    pub final_report: FinalReport,
    pub synthesis_metadata: serde_json::Value,
    pub processing_stats: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_rejects_short_topic() {
        assert!(ResearchQuery::new("ia", vec![], 3, SearchDepth::Basic).is_err());
    }

    #[test]
    fn query_rejects_out_of_range_max_results() {
        assert!(ResearchQuery::new("climate policy", vec![], 0, SearchDepth::Basic).is_err());
        assert!(ResearchQuery::new("climate policy", vec![], 21, SearchDepth::Basic).is_err());
    }

    #[test]
    fn query_dedupes_keywords_against_topic() {
        let q = ResearchQuery::new(
            "Impact de l'IA sur l'emploi",
            vec![
                "emploi".to_string(),
                "automatisation".to_string(),
                "Automatisation".to_string(),
            ],
            5,
            SearchDepth::Basic,
        )
        .unwrap();
        assert_eq!(q.keywords, vec!["automatisation"]);
    }
}
