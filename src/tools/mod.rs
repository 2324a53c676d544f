//! The four operations exposed to the hosting agent.
//!
//! Each returns a plain string: a markdown report, a formatted retrieval
//! list, a history listing, or a confirmation message. Failures surface as
//! one-line strings prefixed by the error kind (the `Display` of
//! [`crate::error::PipelineError`]).

use crate::core::AppState;
use crate::error::Result;
use crate::pipeline;
use tracing::info;

/// Full pipeline with memoization. `max_results` is clamped to [2, 10].
pub async fn research_complete_pipeline_with_memory(
    state: &AppState,
    topic: &str,
    max_results: usize,
    use_cache: bool,
) -> Result<String> {
    let max_results = max_results.clamp(2, 10);
    info!(
        "tool research_complete_pipeline_with_memory: '{}' (max_results {}, cache {})",
        topic, max_results, use_cache
    );
    pipeline::run_research_pipeline(state, topic, max_results, use_cache).await
}

/// Semantic retrieval over everything the memory has collected.
pub async fn search_in_memory(state: &AppState, query: &str, top_k: usize) -> Result<String> {
    let results = state.memory.semantic_search(query, top_k, None).await?;
    if results.is_empty() {
        return Ok(format!("Aucun résultat en mémoire pour « {query} »."));
    }

    let excerpt_len = state.settings.max_summary_length.max(100);
    let mut out = format!("Résultats en mémoire pour « {query} »:\n\n");
    for (i, (item, score)) in results.iter().enumerate() {
        let excerpt: String = item.content.chars().take(excerpt_len).collect();
        out.push_str(&format!(
            "{}. [{}] {} (similarité {:.2})\n   {}\n",
            i + 1,
            item.source.as_str(),
            item.title,
            score,
            excerpt.replace('\n', " "),
        ));
        if !item.url.is_empty() {
            out.push_str(&format!("   {}\n", item.url));
        }
        out.push('\n');
    }
    Ok(out)
}

/// The last `n_last` conversation entries, newest first.
pub async fn get_research_history(state: &AppState, n_last: usize) -> Result<String> {
    let entries = state.memory.recent_conversations(n_last).await;
    if entries.is_empty() {
        return Ok("Aucune recherche dans l'historique.".to_string());
    }

    let mut out = format!("Dernières recherches ({}):\n\n", entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let reply: String = entry.assistant.chars().take(200).collect();
        out.push_str(&format!(
            "{}. [{}] {}\n   → {}\n\n",
            i + 1,
            entry.timestamp.format("%d/%m/%Y %H:%M"),
            entry.user,
            reply.replace('\n', " "),
        ));
    }
    Ok(out)
}

/// Clear the conversation log and the result cache. The vector corpus is
/// preserved. A no-op without `confirm`.
pub async fn clear_memory(state: &AppState, confirm: bool) -> Result<String> {
    if !confirm {
        return Ok(
            "Confirmation requise: rappeler clear_memory avec confirm=true pour effacer \
             l'historique et le cache."
                .to_string(),
        );
    }
    state.memory.clear_conversations_and_cache().await?;
    info!("memory cleared (conversation log + cache)");
    Ok("Historique et cache effacés. Le corpus vectoriel est conservé.".to_string())
}
