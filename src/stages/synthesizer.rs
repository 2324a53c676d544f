//! Global synthesizer stage: summaries → fully populated [`FinalReport`].
//!
//! Two parallel LLM calls build the main sections, one more builds the
//! executive summary; methodology, source references, quality scores and
//! the three renderings are deterministic.

use crate::core::types::{
    DocumentSummary, ExecutiveSummary, FinalReport, GlobalSynthesisInput, GlobalSynthesisOutput,
    Methodology, ReportSection, SourceReference,
};
use crate::error::{PipelineError, Result};
use crate::llm::{LlmParams, LlmService};
use crate::prompts;
use crate::report;
use chrono::{Local, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{info, warn};

pub struct SynthesizerStage {
    llm: Arc<LlmService>,
}

impl SynthesizerStage {
    pub fn new(llm: Arc<LlmService>) -> Self {
        Self { llm }
    }

    pub async fn run(&self, input: &GlobalSynthesisInput) -> Result<GlobalSynthesisOutput> {
        let start = Instant::now();
        let summaries = &input.summarization_output.summaries;

        if summaries.is_empty() {
            return Err(PipelineError::Validation(
                "no summary available for synthesis".to_string(),
            ));
        }
        if input.original_topic.trim().chars().count() < 3 {
            return Err(PipelineError::Validation(
                "original topic missing or too short".to_string(),
            ));
        }

        info!(
            "synthesis start: '{}' over {} summaries",
            input.original_topic,
            summaries.len()
        );

        let document_summaries = prompts::compile_document_summaries(summaries);
        let sections = self.generate_sections(input, &document_summaries).await?;
        let executive_summary = self
            .generate_executive_summary(input, &document_summaries)
            .await;

        let methodology = build_methodology(input);
        let sources = build_source_references(summaries);
        let scores = assess_quality(summaries, &sections);

        let report = assemble_report(
            input,
            executive_summary,
            sections,
            methodology,
            sources,
            &scores,
        );

        let processing_time = start.elapsed().as_secs_f64();
        info!(
            "synthesis done: {} words, {} sections in {:.2}s",
            report.word_count,
            report.main_sections.len(),
            processing_time
        );

        Ok(GlobalSynthesisOutput {
            synthesis_metadata: serde_json::json!({
                "synthesis_approach": "comprehensive",
                "quality_checks_passed": scores.confidence > 0.6,
            }),
            processing_stats: serde_json::json!({
                "input_summaries": summaries.len(),
                "synthesis_time": processing_time,
                "final_report_words": report.word_count,
                "sections_generated": report.main_sections.len(),
            }),
            final_report: report,
        })
    }

    /// Main synthesis and thematic analysis run in parallel. The main call
    /// is load-bearing and propagates failure; the thematic section is
    /// skipped on error.
    async fn generate_sections(
        &self,
        input: &GlobalSynthesisInput,
        document_summaries: &str,
    ) -> Result<Vec<ReportSection>> {
        let out = &input.summarization_output;
        let params = LlmParams::default().with_max_tokens(3_000);

        let main_prompt = prompts::final_synthesis(
            &input.original_topic,
            document_summaries,
            &out.common_themes,
            &out.consensus_points,
            &out.conflicting_views,
        );
        let main_fut = self
            .llm
            .completion(&main_prompt, Some(prompts::SYSTEM_SYNTHESIZER), &params);
        let thematic_prompt = prompts::thematic_analysis(&input.original_topic, document_summaries);
        let thematic_fut = self
            .llm
            .completion(&thematic_prompt, Some(prompts::SYSTEM_SYNTHESIZER), &params);

        let (main_result, thematic_result) = tokio::join!(main_fut, thematic_fut);

        let mut sections = parse_main_synthesis(&main_result?);
        match thematic_result {
            Ok(content) => sections.push(ReportSection {
                title: "Analyse Thématique Détaillée".to_string(),
                content,
                order: sections.len() + 1,
                subsections: Vec::new(),
            }),
            Err(e) => warn!("thematic analysis skipped: {}", e),
        }
        Ok(sections)
    }

    async fn generate_executive_summary(
        &self,
        input: &GlobalSynthesisInput,
        document_summaries: &str,
    ) -> ExecutiveSummary {
        let out = &input.summarization_output;
        let analysis_data = format!(
            "{document_summaries}\n\nThèmes: {}\nConsensus: {}\nConflits: {}\nCrédibilité moyenne: {}",
            out.common_themes.join(", "),
            out.consensus_points.join(", "),
            out.conflicting_views.join(", "),
            out.average_credibility
                .map(|c| format!("{c:.2}"))
                .unwrap_or_else(|| "n/a".to_string()),
        );

        match self
            .llm
            .completion(
                &prompts::report_executive_summary(&input.original_topic, &analysis_data),
                Some(prompts::SYSTEM_SYNTHESIZER),
                &LlmParams::default().with_max_tokens(1_500),
            )
            .await
        {
            Ok(response) => parse_executive_summary(&response),
            Err(e) => {
                warn!("executive summary failed ({}), using fallback", e);
                fallback_executive_summary(input)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsers
// ─────────────────────────────────────────────────────────────────────────────

fn section_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^##\s+(.+)$").unwrap())
}

/// Split the main synthesis on `## ` headings into ordered sections; a
/// heading-free response becomes a single "Analyse Générale" section.
pub fn parse_main_synthesis(content: &str) -> Vec<ReportSection> {
    let re = section_heading_re();
    let mut sections = Vec::new();

    let headings: Vec<(usize, usize, String)> = re
        .captures_iter(content)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let title = caps.get(1)?.as_str().trim().to_string();
            Some((whole.start(), whole.end(), title))
        })
        .collect();

    for (i, (_, body_start, title)) in headings.iter().enumerate() {
        let body_end = headings
            .get(i + 1)
            .map(|(next_start, _, _)| *next_start)
            .unwrap_or(content.len());
        let body = content[*body_start..body_end].trim().to_string();
        sections.push(ReportSection {
            title: title.clone(),
            content: body,
            order: i + 1,
            subsections: Vec::new(),
        });
    }

    if sections.is_empty() {
        sections.push(ReportSection {
            title: "Analyse Générale".to_string(),
            content: content.trim().to_string(),
            order: 1,
            subsections: Vec::new(),
        });
    }
    sections
}

fn bullet_text(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("• "))
        .map(str::trim)
}

/// Scan for section-marker keywords, then collect bullet lines. If no
/// finding was recognized, the first three sentences become the findings.
pub fn parse_executive_summary(content: &str) -> ExecutiveSummary {
    let mut key_findings = Vec::new();
    let mut main_insights = Vec::new();
    let mut recommendations = Vec::new();
    let mut current: Option<usize> = None;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lower = trimmed.to_lowercase();

        if let Some(text) = bullet_text(trimmed) {
            if text.chars().count() > 10 {
                match current {
                    Some(0) => key_findings.push(text.to_string()),
                    Some(1) => main_insights.push(text.to_string()),
                    Some(2) => recommendations.push(text.to_string()),
                    _ => {}
                }
            }
        } else if lower.contains("conclusion") || lower.contains("finding") {
            current = Some(0);
        } else if lower.contains("insight") || lower.contains("découverte") {
            current = Some(1);
        } else if lower.contains("recommandation") || lower.contains("recommendation") {
            current = Some(2);
        }
    }

    if key_findings.is_empty() {
        key_findings = content
            .split('.')
            .take(3)
            .map(str::trim)
            .filter(|s| s.chars().count() > 20)
            .map(|s| format!("{s}."))
            .collect();
    }

    key_findings.truncate(5);
    main_insights.truncate(5);
    recommendations.truncate(5);

    let summary_text = if content.chars().count() > 500 {
        format!("{}...", content.chars().take(500).collect::<String>())
    } else {
        content.to_string()
    };

    ExecutiveSummary {
        key_findings,
        main_insights,
        recommendations,
        summary_text,
    }
}

fn fallback_executive_summary(input: &GlobalSynthesisInput) -> ExecutiveSummary {
    let out = &input.summarization_output;
    let count = out.summaries.len();
    ExecutiveSummary {
        key_findings: vec![
            format!("Analyse basée sur {count} sources documentaires"),
            format!(
                "Score de crédibilité moyen: {:.2}/1.0",
                out.average_credibility.unwrap_or(0.5)
            ),
            "Synthèse générée automatiquement".to_string(),
        ],
        main_insights: vec![
            "Analyse transversale des différentes perspectives sur le sujet".to_string(),
            "Identification des thèmes récurrents et des consensus".to_string(),
        ],
        recommendations: vec![
            "Vérification humaine recommandée pour les décisions importantes".to_string(),
            "Complément par des sources supplémentaires si nécessaire".to_string(),
        ],
        summary_text: format!(
            "Cette analyse du sujet '{}' synthétise {count} sources documentaires \
             pour fournir une vue d'ensemble complète.",
            input.original_topic
        ),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Deterministic assembly
// ─────────────────────────────────────────────────────────────────────────────

fn build_methodology(input: &GlobalSynthesisInput) -> Methodology {
    let out = &input.summarization_output;
    let count = out.summaries.len();
    let avg = out.average_credibility.unwrap_or(0.5);

    Methodology {
        research_approach: "Recherche web automatisée avec synthèse par IA".to_string(),
        sources_count: count,
        analysis_methods: vec![
            "Extraction automatique de contenu web".to_string(),
            "Analyse et résumé par intelligence artificielle".to_string(),
            "Synthèse thématique transversale".to_string(),
            "Évaluation de crédibilité des sources".to_string(),
        ],
        limitations: vec![
            "Analyse limitée aux sources web accessibles publiquement".to_string(),
            "Évaluation de crédibilité basée sur des critères automatisés".to_string(),
            "Synthèse générée par IA - vérification humaine recommandée".to_string(),
        ],
        data_quality_assessment: format!(
            "Qualité des données évaluée sur {count} sources analysées. \
             Score de crédibilité moyen: {avg:.2}/1.0."
        ),
    }
}

fn build_source_references(summaries: &[DocumentSummary]) -> Vec<SourceReference> {
    summaries
        .iter()
        .map(|summary| SourceReference {
            title: summary.title.clone(),
            url: summary.url.clone(),
            author: None,
            publication_date: None,
            credibility_score: summary.credibility_score,
            citation_count: 1,
        })
        .collect()
}

pub struct QualityScores {
    pub completeness: f64,
    pub reliability: f64,
    pub coherence: f64,
    pub confidence: f64,
}

/// `completeness = min(n/5, 1)`, `reliability = mean(credibility) | 0.5`,
/// `coherence = min(sections/3, 1)`, confidence weighted 0.4/0.4/0.2.
pub fn assess_quality(summaries: &[DocumentSummary], sections: &[ReportSection]) -> QualityScores {
    let completeness = (summaries.len() as f64 / 5.0).min(1.0);

    let credibility: Vec<f64> = summaries
        .iter()
        .filter_map(|s| s.credibility_score)
        .collect();
    let reliability = if credibility.is_empty() {
        0.5
    } else {
        credibility.iter().sum::<f64>() / credibility.len() as f64
    };

    let coherence = (sections.len() as f64 / 3.0).min(1.0);
    let confidence = completeness * 0.4 + reliability * 0.4 + coherence * 0.2;

    QualityScores {
        completeness,
        reliability,
        coherence,
        confidence,
    }
}

/// `rpt_<YYYYMMDD_HHMM>_<md5(topic)[:8]>`, local time at construction.
pub fn report_id(topic: &str) -> String {
    let digest = format!("{:x}", md5::compute(topic.as_bytes()));
    format!("rpt_{}_{}", Local::now().format("%Y%m%d_%H%M"), &digest[..8])
}

fn assemble_report(
    input: &GlobalSynthesisInput,
    executive_summary: ExecutiveSummary,
    sections: Vec<ReportSection>,
    methodology: Methodology,
    sources: Vec<SourceReference>,
    scores: &QualityScores,
) -> FinalReport {
    let out = &input.summarization_output;
    let topic = &input.original_topic;

    let introduction = format!(
        "Ce rapport présente une analyse complète du sujet \"{topic}\" basée sur \
         l'analyse de {count} sources documentaires. L'analyse a été réalisée par un \
         système automatisé combinant extraction de contenu, résumé par IA et \
         synthèse thématique transversale.",
        count = sources.len()
    );
    let conclusion = format!(
        "Cette analyse de \"{topic}\" révèle des enseignements importants basés sur \
         {count} sources analysées, avec un score de confiance global de {confidence:.2}/1.0. \
         Pour des décisions importantes, il est recommandé de compléter cette analyse \
         par une vérification humaine et des sources supplémentaires si nécessaire.",
        count = sources.len(),
        confidence = scores.confidence
    );

    let word_count = report::report_word_count(
        &introduction,
        &conclusion,
        &executive_summary.summary_text,
        &sections,
    );

    let mut final_report = FinalReport {
        report_id: report_id(topic),
        title: format!("Analyse de Recherche: {topic}"),
        topic: topic.clone(),
        report_type: input.report_type,
        report_format: input.report_format,
        executive_summary,
        introduction,
        main_sections: sections,
        conclusion,
        key_themes: out.common_themes.iter().take(10).cloned().collect(),
        consensus_points: out.consensus_points.iter().take(10).cloned().collect(),
        conflicting_viewpoints: out.conflicting_views.iter().take(10).cloned().collect(),
        emerging_trends: Vec::new(),
        methodology,
        sources,
        confidence_score: scores.confidence,
        completeness_score: scores.completeness,
        word_count,
        generated_at: Utc::now(),
        formatted_outputs: HashMap::new(),
    };

    final_report.formatted_outputs = HashMap::from([
        ("markdown".to_string(), report::render_markdown(&final_report)),
        ("text".to_string(), report::render_text(&final_report)),
        ("html".to_string(), report::render_html(&final_report)),
    ]);
    final_report
}
