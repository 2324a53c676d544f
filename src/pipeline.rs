//! Pipeline orchestrator: cache lookup, the four stages in sequence,
//! deduplication against memory, persistence, and the failure surface.
//!
//! Stages run sequentially within one invocation; concurrent invocations
//! contend only on the memory subsystem. The whole run is bounded by the
//! configured deadline.

use crate::core::types::{
    ContentFilters, Document, ExtractionInput, FinalReport, GlobalSynthesisInput, ReportFormat,
    ReportType, ResearchQuery, SearchDepth, SummaryOptions,
};
use crate::core::AppState;
use crate::error::{PipelineError, Result};
use crate::memory::{content_fingerprint, MemorySource, NewItem};
use crate::report;
use crate::stages::{ExtractorStage, Researcher, SummarizerStage, SynthesizerStage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Run the full research pipeline for a topic and return the markdown
/// report. Any failure is recorded in the conversation log before it is
/// surfaced; callers never receive a partial report.
pub async fn run_research_pipeline(
    state: &AppState,
    topic: &str,
    max_results: usize,
    use_cache: bool,
) -> Result<String> {
    let max_results = max_results.min(state.settings.max_sources.max(1));
    let query = ResearchQuery::new(topic, Vec::new(), max_results, SearchDepth::Basic)?;
    let deadline = Duration::from_secs(state.settings.pipeline_deadline_secs);

    let outcome = match tokio::time::timeout(deadline, execute(state, &query, use_cache)).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout(format!(
            "pipeline overran its {}s deadline",
            deadline.as_secs()
        ))),
    };

    match outcome {
        Ok(markdown) => Ok(markdown),
        Err(e) => {
            let logged = state
                .memory
                .add_conversation(
                    topic,
                    &format!("Échec du pipeline: {e}"),
                    serde_json::json!({"error": true}),
                )
                .await;
            if let Err(log_err) = logged {
                warn!("could not record pipeline failure: {}", log_err);
            }
            Err(e)
        }
    }
}

async fn execute(state: &AppState, query: &ResearchQuery, use_cache: bool) -> Result<String> {
    let topic = &query.topic;

    // 1. Memoized result.
    if use_cache && state.settings.enable_caching {
        if let Some(report) = state.memory.cache_get(topic, None).await {
            info!("cache hit for '{}', skipping pipeline", topic);
            return Ok(markdown_of(&report));
        }
    }

    // 2. Context gathering (informational only).
    match state.memory.get_relevant_context(topic, 3, None).await {
        Ok(context) if !context.is_empty() => {
            info!("memory context available ({} chars)", context.len());
        }
        Ok(_) => {}
        Err(e) => warn!("context gathering failed: {}", e),
    }
    let related = state.memory.related_topics(topic, 0.5).await;
    if !related.is_empty() {
        info!("related past topics: {:?}", related);
    }

    // 3. Researcher.
    let researcher = Researcher::new(Arc::clone(&state.llm), Arc::clone(&state.search));
    let research_output = researcher.run(query).await?;
    state
        .memory
        .remember_topic_keywords(topic, &research_output.query.keywords)
        .await?;
    maybe_dump(state, "research_output", &research_output).await;

    // 4. Extractor + dedup against memory.
    let urls: Vec<String> = research_output.results.iter().map(|r| r.url.clone()).collect();
    let extractor = ExtractorStage::new(
        Arc::clone(&state.fetcher),
        Duration::from_secs(state.settings.extract_timeout_secs),
        state.settings.extract_max_retries,
        state.settings.max_concurrent_extractions,
    )
    .with_document_cache(state.document_cache.clone())
    .with_outbound_limit(Arc::clone(&state.outbound_limit));

    let extraction = extractor
        .run(ExtractionInput {
            urls,
            content_filters: ContentFilters {
                required_keywords: research_output.query.keywords.clone(),
                ..ContentFilters::default()
            },
        })
        .await?;
    maybe_dump(state, "extraction_result", &extraction).await;

    if extraction.documents.is_empty() {
        return Err(PipelineError::Extraction(
            "every fetch failed or was filtered out".to_string(),
        ));
    }

    let documents = dedup_documents(state, extraction.documents.clone()).await;
    if documents.is_empty() {
        return Err(PipelineError::Extraction(
            "no document remains after deduplication".to_string(),
        ));
    }

    // 5. Summarizer.
    let summarizer = SummarizerStage::new(
        Arc::clone(&state.llm),
        state.settings.max_concurrent_summaries,
    );
    let summarization = summarizer.run(&documents, &SummaryOptions::default()).await?;
    maybe_dump(state, "summarization_output", &summarization).await;
    let summaries = summarization.summaries.clone();

    // 6. Synthesizer.
    let synthesizer = SynthesizerStage::new(Arc::clone(&state.llm));
    let synthesis = synthesizer
        .run(&GlobalSynthesisInput {
            summarization_output: summarization,
            original_topic: topic.clone(),
            report_type: ReportType::Detailed,
            report_format: ReportFormat::Markdown,
        })
        .await?;
    maybe_dump(state, "synthesis_output", &synthesis).await;
    let report = synthesis.final_report;

    // 7. Persist documents, summaries, the synthesis record, the cached
    // report and the conversation entry.
    persist_run(state, topic, &documents, &summaries, &report).await?;

    // 8. Markdown rendering.
    Ok(markdown_of(&report))
}

/// Drop documents whose content fingerprint is already known to memory or
/// repeats within this batch.
async fn dedup_documents(state: &AppState, documents: Vec<Document>) -> Vec<Document> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept = Vec::with_capacity(documents.len());
    for doc in documents {
        let fingerprint = content_fingerprint(&doc.content);
        if seen.contains(&fingerprint) || state.memory.is_duplicate(&doc.content).await {
            info!("dropping duplicate document: {}", doc.url);
            continue;
        }
        seen.insert(fingerprint);
        kept.push(doc);
    }
    kept
}

async fn persist_run(
    state: &AppState,
    topic: &str,
    documents: &[Document],
    summaries: &[crate::core::types::DocumentSummary],
    report: &FinalReport,
) -> Result<()> {
    let memory = &state.memory;

    let doc_items: Vec<NewItem> = documents
        .iter()
        .map(|doc| NewItem {
            content: doc.content.clone(),
            title: doc.title.clone(),
            url: doc.url.clone(),
        })
        .collect();
    memory
        .add_items(doc_items, MemorySource::Research, true)
        .await?;

    let summary_items: Vec<NewItem> = summaries
        .iter()
        .map(|summary| NewItem {
            content: if summary.detailed_summary.trim().is_empty() {
                summary.executive_summary.clone()
            } else {
                summary.detailed_summary.clone()
            },
            title: summary.title.clone(),
            url: summary.url.clone(),
        })
        .collect();
    memory
        .add_items(summary_items, MemorySource::Summary, true)
        .await?;

    memory
        .add_items(
            vec![NewItem {
                content: format!(
                    "Synthèse: {topic}\n\n{}",
                    report.executive_summary.summary_text
                ),
                title: format!("Synthèse: {topic}"),
                url: String::new(),
            }],
            MemorySource::Synthesis,
            true,
        )
        .await?;

    memory.cache_put(topic, report).await?;
    memory
        .add_conversation(
            topic,
            &report.executive_summary.summary_text,
            serde_json::json!({
                "report_id": report.report_id,
                "sources": report.sources.len(),
                "confidence_score": report.confidence_score,
            }),
        )
        .await?;
    Ok(())
}

/// The cached rendering when present, a fresh one otherwise.
pub fn markdown_of(report: &FinalReport) -> String {
    report
        .formatted_outputs
        .get("markdown")
        .cloned()
        .unwrap_or_else(|| report::render_markdown(report))
}

// ─────────────────────────────────────────────────────────────────────────────
// Stage JSON dumps
// ─────────────────────────────────────────────────────────────────────────────

async fn maybe_dump<T: Serialize>(state: &AppState, kind: &str, value: &T) {
    if !state.settings.dump_stages {
        return;
    }
    match dump_stage(kind, value, &state.settings.reports_dir).await {
        Ok(path) => info!("stage dump written: {}", path.display()),
        Err(e) => warn!("stage dump failed for {}: {}", kind, e),
    }
}

/// Write one stage artifact as `<kind>_<timestamp>.json` under `dir`.
pub async fn dump_stage<T: Serialize>(
    kind: &str,
    value: &T,
    dir: &Path,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| PipelineError::Memory(format!("reports dir create failed: {e}")))?;
    let filename = format!(
        "{kind}_{}.json",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    let path = dir.join(filename);
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| PipelineError::Memory(format!("dump serialize failed: {e}")))?;
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| PipelineError::Memory(format!("dump write failed: {e}")))?;
    Ok(path)
}

/// Read a previously dumped stage artifact back.
pub async fn load_stage<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::Memory(format!("dump read failed: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| PipelineError::Memory(format!("dump parse failed: {e}")))
}
