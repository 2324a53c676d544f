//! Memory subsystem: embedding-indexed corpus with exact-duplicate
//! detection, topic→report memoization with TTL, a bounded conversation
//! log and a topic→keywords map.
//!
//! The vector index and the embedder are injected so the pipeline tests
//! run against the in-memory backend; production wires LanceDB + Model2Vec.
//! Everything except the vector data lives in one sidecar JSON file that
//! survives restarts.

pub mod embedding;
pub mod vector;

use crate::core::config::Settings;
use crate::core::types::FinalReport;
use crate::error::PipelineError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub use embedding::{Embedder, HashEmbedder, Model2VecEmbedder};
pub use vector::{LanceIndex, MemIndex, MemorySource, StoredItem, VectorIndex};

/// Reports older than this are treated as absent by `cache_get`.
pub const DEFAULT_CACHE_TTL_HOURS: f64 = 24.0;
/// Conversation entries kept in the FIFO log.
const MAX_CONVERSATIONS: usize = 100;
/// Log length at which `compress` fires on insert.
const COMPRESSION_THRESHOLD: usize = 50;
/// `compress` drops cache entries older than this many days.
const COMPRESSION_CACHE_AGE_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub assistant: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedReport {
    report: FinalReport,
    timestamp: DateTime<Utc>,
}

/// Everything persisted outside the vector index.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryState {
    content_hashes: HashSet<String>,
    research_cache: HashMap<String, CachedReport>,
    conversations: VecDeque<ConversationEntry>,
    topic_keywords: HashMap<String, Vec<String>>,
}

/// Result of `add_items`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AddReport {
    pub added: usize,
    pub skipped: usize,
    pub total: usize,
}

/// An item offered for storage; id and hash are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub content: String,
    pub title: String,
    pub url: String,
}

pub struct ResearchMemory {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    state: Mutex<MemoryState>,
    state_path: PathBuf,
}

/// MD5 fingerprint of cleaned content, the exact-duplicate key.
pub fn content_fingerprint(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}

impl ResearchMemory {
    /// Wire the memory from settings: Model2Vec + LanceDB when available,
    /// hash embedder + in-memory index otherwise.
    pub async fn open(settings: &Settings) -> Result<Self, PipelineError> {
        let model_id = settings.embedding_model.clone();
        let embedder: Arc<dyn Embedder> = match tokio::task::spawn_blocking(move || {
            Model2VecEmbedder::load(&model_id)
        })
        .await
        {
            Ok(Ok(model)) => Arc::new(model),
            Ok(Err(e)) => {
                warn!("embedding model unavailable ({}), using hash fallback", e);
                Arc::new(HashEmbedder::default())
            }
            Err(e) => {
                warn!("embedding init task failed ({}), using hash fallback", e);
                Arc::new(HashEmbedder::default())
            }
        };

        let index: Arc<dyn VectorIndex> = if settings.enable_vector_store {
            let uri = settings.memory_dir.join("lancedb");
            match LanceIndex::open(&uri.to_string_lossy(), embedder.dimensions()).await {
                Ok(index) => Arc::new(index),
                Err(e) => {
                    warn!("vector store unavailable ({}), using in-memory index", e);
                    Arc::new(MemIndex::new())
                }
            }
        } else {
            Arc::new(MemIndex::new())
        };

        Self::with_backends(embedder, index, settings.memory_dir.clone()).await
    }

    /// Assemble from explicit backends (tests use this with `MemIndex` and
    /// `HashEmbedder`).
    pub async fn with_backends(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        memory_dir: PathBuf,
    ) -> Result<Self, PipelineError> {
        tokio::fs::create_dir_all(&memory_dir)
            .await
            .map_err(|e| PipelineError::Memory(format!("memory dir create failed: {e}")))?;
        let state_path = memory_dir.join("state.json");
        let state = match tokio::fs::read(&state_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("memory state unreadable ({}), starting fresh", e);
                MemoryState::default()
            }),
            Err(_) => MemoryState::default(),
        };

        info!(
            "memory ready: {} known fingerprints, {} cached reports, {} conversations",
            state.content_hashes.len(),
            state.research_cache.len(),
            state.conversations.len()
        );

        Ok(Self {
            embedder,
            index,
            state: Mutex::new(state),
            state_path,
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let embedder = Arc::clone(&self.embedder);
        let text = text.to_string();
        tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| PipelineError::Memory(format!("embedding task failed: {e}")))
    }

    async fn save_state(&self, state: &MemoryState) -> Result<(), PipelineError> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| PipelineError::Memory(format!("state serialize failed: {e}")))?;
        let tmp = self.state_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| PipelineError::Memory(format!("state write failed: {e}")))?;
        tokio::fs::rename(&tmp, &self.state_path)
            .await
            .map_err(|e| PipelineError::Memory(format!("state rename failed: {e}")))
    }

    fn cache_key(topic: &str) -> String {
        topic.trim().to_lowercase()
    }

    // ─── Corpus operations ───────────────────────────────────────────────

    /// Store items with optional exact-duplicate skipping. Atomic with
    /// respect to the fingerprint set: the hash is recorded under the same
    /// lock that inspects it.
    pub async fn add_items(
        &self,
        items: Vec<NewItem>,
        source: MemorySource,
        check_duplicates: bool,
    ) -> Result<AddReport, PipelineError> {
        let total = items.len();
        let mut report = AddReport {
            total,
            ..AddReport::default()
        };

        for item in items {
            let hash = content_fingerprint(&item.content);
            {
                let mut state = self.state.lock().await;
                if check_duplicates && state.content_hashes.contains(&hash) {
                    report.skipped += 1;
                    continue;
                }
                state.content_hashes.insert(hash.clone());
            }

            let outcome = async {
                let embedding = self.embed(&item.content).await?;
                let now = Utc::now();
                let word_count = item.content.split_whitespace().count();
                let stored = StoredItem {
                    id: format!("{}_{}_{}", source.as_str(), &hash[..8], now.timestamp()),
                    content: item.content,
                    title: item.title,
                    url: item.url,
                    source,
                    timestamp: now,
                    content_hash: hash.clone(),
                    word_count,
                };
                self.index.insert(stored, embedding).await
            }
            .await;

            match outcome {
                Ok(()) => report.added += 1,
                Err(e) => {
                    // Keep the fingerprint set consistent with the index.
                    self.state.lock().await.content_hashes.remove(&hash);
                    return Err(e);
                }
            }
        }

        {
            let state = self.state.lock().await;
            self.save_state(&state).await?;
        }

        info!(
            "memory add ({}): {} added, {} skipped of {}",
            source.as_str(),
            report.added,
            report.skipped,
            report.total
        );
        Ok(report)
    }

    /// Pure fingerprint lookup.
    pub async fn is_duplicate(&self, content: &str) -> bool {
        let hash = content_fingerprint(content);
        self.state.lock().await.content_hashes.contains(&hash)
    }

    /// Cosine top-k over the corpus, optionally filtered by source.
    pub async fn semantic_search(
        &self,
        query: &str,
        k: usize,
        source_filter: Option<MemorySource>,
    ) -> Result<Vec<(StoredItem, f32)>, PipelineError> {
        let embedding = self.embed(query).await?;
        self.index.search(&embedding, k, source_filter).await
    }

    /// Top-k results formatted for injection into an LLM prompt.
    pub async fn get_relevant_context(
        &self,
        query: &str,
        k: usize,
        source_filter: Option<MemorySource>,
    ) -> Result<String, PipelineError> {
        let results = self.semantic_search(query, k, source_filter).await?;
        if results.is_empty() {
            return Ok(String::new());
        }

        let blocks: Vec<String> = results
            .iter()
            .map(|(item, score)| {
                let excerpt: String = item.content.chars().take(400).collect();
                format!(
                    "[{}] {} (score: {:.2})\n{}",
                    item.source.as_str(),
                    item.title,
                    score,
                    excerpt
                )
            })
            .collect();
        Ok(blocks.join("\n\n"))
    }

    // ─── Result cache ────────────────────────────────────────────────────

    pub async fn cache_put(&self, topic: &str, report: &FinalReport) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        state.research_cache.insert(
            Self::cache_key(topic),
            CachedReport {
                report: report.clone(),
                timestamp: Utc::now(),
            },
        );
        self.save_state(&state).await
    }

    /// Fresh cache entry for the topic, or `None`. Entries older than
    /// `max_age_hours` (default 24) are treated as absent.
    pub async fn cache_get(&self, topic: &str, max_age_hours: Option<f64>) -> Option<FinalReport> {
        let max_age = max_age_hours.unwrap_or(DEFAULT_CACHE_TTL_HOURS);
        let state = self.state.lock().await;
        let entry = state.research_cache.get(&Self::cache_key(topic))?;
        let age_hours = (Utc::now() - entry.timestamp).num_milliseconds() as f64 / 3_600_000.0;
        // Strict comparison: a zero max_age always misses.
        if age_hours < max_age {
            Some(entry.report.clone())
        } else {
            None
        }
    }

    /// Cached topics whose string-similarity ratio against `topic` meets
    /// the threshold, most similar first.
    pub async fn related_topics(&self, topic: &str, threshold: f64) -> Vec<String> {
        let key = Self::cache_key(topic);
        let state = self.state.lock().await;
        let mut scored: Vec<(String, f64)> = state
            .research_cache
            .keys()
            .filter(|k| **k != key)
            .map(|k| (k.clone(), strsim::normalized_levenshtein(&key, k)))
            .filter(|(_, ratio)| *ratio >= threshold)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(k, _)| k).collect()
    }

    // ─── Conversation log ────────────────────────────────────────────────

    /// Append an exchange to the bounded FIFO; triggers `compress` once the
    /// log reaches the compression threshold.
    pub async fn add_conversation(
        &self,
        user: &str,
        assistant: &str,
        metadata: serde_json::Value,
    ) -> Result<(), PipelineError> {
        let should_compress = {
            let mut state = self.state.lock().await;
            state.conversations.push_back(ConversationEntry {
                timestamp: Utc::now(),
                user: user.to_string(),
                assistant: assistant.to_string(),
                metadata,
            });
            while state.conversations.len() > MAX_CONVERSATIONS {
                state.conversations.pop_front();
            }
            let should = state.conversations.len() >= COMPRESSION_THRESHOLD;
            self.save_state(&state).await?;
            should
        };
        if should_compress {
            self.compress().await?;
        }
        Ok(())
    }

    pub async fn recent_conversations(&self, n: usize) -> Vec<ConversationEntry> {
        let state = self.state.lock().await;
        state
            .conversations
            .iter()
            .rev()
            .take(n)
            .cloned()
            .collect()
    }

    // ─── Topic keywords ──────────────────────────────────────────────────

    pub async fn remember_topic_keywords(
        &self,
        topic: &str,
        keywords: &[String],
    ) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        state
            .topic_keywords
            .insert(Self::cache_key(topic), keywords.to_vec());
        self.save_state(&state).await
    }

    pub async fn topic_keywords(&self, topic: &str) -> Option<Vec<String>> {
        let state = self.state.lock().await;
        state.topic_keywords.get(&Self::cache_key(topic)).cloned()
    }

    // ─── Maintenance ─────────────────────────────────────────────────────

    /// Remove corpus items older than `days`, together with their
    /// fingerprints. Returns the number of removed items.
    pub async fn clear_old_items(&self, days: i64) -> Result<usize, PipelineError> {
        let cutoff = Utc::now() - Duration::days(days);
        let removed_hashes = self.index.remove_older_than(cutoff).await?;
        let removed = removed_hashes.len();
        if removed > 0 {
            let mut state = self.state.lock().await;
            for hash in removed_hashes {
                state.content_hashes.remove(&hash);
            }
            self.save_state(&state).await?;
            info!("cleared {} memory items older than {} days", removed, days);
        }
        Ok(removed)
    }

    /// Drop cache entries older than seven days.
    pub async fn compress(&self) -> Result<(), PipelineError> {
        let cutoff = Utc::now() - Duration::days(COMPRESSION_CACHE_AGE_DAYS);
        let mut state = self.state.lock().await;
        let before = state.research_cache.len();
        state.research_cache.retain(|_, v| v.timestamp >= cutoff);
        let dropped = before - state.research_cache.len();
        if dropped > 0 {
            info!("memory compression dropped {} stale cache entries", dropped);
        }
        self.save_state(&state).await
    }

    /// Forget conversations and cached reports; the vector corpus is
    /// preserved.
    pub async fn clear_conversations_and_cache(&self) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        state.conversations.clear();
        state.research_cache.clear();
        state.topic_keywords.clear();
        self.save_state(&state).await
    }

    pub async fn corpus_size(&self) -> Result<usize, PipelineError> {
        self.index.count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        ExecutiveSummary, FinalReport, Methodology, ReportFormat, ReportType,
    };

    async fn test_memory(dir: &std::path::Path) -> ResearchMemory {
        ResearchMemory::with_backends(
            Arc::new(HashEmbedder::default()),
            Arc::new(MemIndex::new()),
            dir.to_path_buf(),
        )
        .await
        .unwrap()
    }

    fn dummy_report(topic: &str) -> FinalReport {
        FinalReport {
            report_id: "rpt_test".to_string(),
            title: format!("Analyse: {topic}"),
            topic: topic.to_string(),
            report_type: ReportType::Detailed,
            report_format: ReportFormat::Markdown,
            executive_summary: ExecutiveSummary::default(),
            introduction: String::new(),
            main_sections: Vec::new(),
            conclusion: String::new(),
            key_themes: Vec::new(),
            consensus_points: Vec::new(),
            conflicting_viewpoints: Vec::new(),
            emerging_trends: Vec::new(),
            methodology: Methodology {
                research_approach: String::new(),
                sources_count: 0,
                analysis_methods: Vec::new(),
                limitations: Vec::new(),
                data_quality_assessment: String::new(),
            },
            sources: Vec::new(),
            confidence_score: 0.5,
            completeness_score: 0.5,
            word_count: 0,
            generated_at: Utc::now(),
            formatted_outputs: HashMap::from([(
                "markdown".to_string(),
                format!("# {topic}"),
            )]),
        }
    }

    #[tokio::test]
    async fn dedup_law_holds() {
        let dir = tempfile::tempdir().unwrap();
        let memory = test_memory(dir.path()).await;

        let item = NewItem {
            content: "Un contenu substantiel sur les énergies renouvelables.".to_string(),
            title: "Énergies".to_string(),
            url: "https://example.com/a".to_string(),
        };

        let first = memory
            .add_items(vec![item.clone()], MemorySource::Research, true)
            .await
            .unwrap();
        assert_eq!(first.added, 1);
        assert!(memory.is_duplicate(&item.content).await);

        let second = memory
            .add_items(vec![item], MemorySource::Research, true)
            .await
            .unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.skipped, 1);
    }

    #[tokio::test]
    async fn cache_law_holds() {
        let dir = tempfile::tempdir().unwrap();
        let memory = test_memory(dir.path()).await;
        let report = dummy_report("politique climatique");

        memory.cache_put("politique climatique", &report).await.unwrap();

        let hit = memory
            .cache_get("politique climatique", Some(f64::INFINITY))
            .await;
        assert!(hit.is_some());
        assert_eq!(hit.unwrap().report_id, report.report_id);

        let expired = memory.cache_get("politique climatique", Some(0.0)).await;
        assert!(expired.is_none());
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let memory = test_memory(dir.path()).await;
            memory
                .cache_put("sujet persistant", &dummy_report("sujet persistant"))
                .await
                .unwrap();
            memory
                .add_conversation("question", "réponse", serde_json::json!({}))
                .await
                .unwrap();
        }
        let memory = test_memory(dir.path()).await;
        assert!(memory
            .cache_get("sujet persistant", Some(f64::INFINITY))
            .await
            .is_some());
        assert_eq!(memory.recent_conversations(5).await.len(), 1);
    }

    #[tokio::test]
    async fn related_topics_sorted_by_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let memory = test_memory(dir.path()).await;
        memory
            .cache_put("politique climatique", &dummy_report("politique climatique"))
            .await
            .unwrap();
        memory
            .cache_put("politique climatique europe", &dummy_report("x"))
            .await
            .unwrap();
        memory
            .cache_put("recette de cuisine", &dummy_report("y"))
            .await
            .unwrap();

        let related = memory.related_topics("politique climatique", 0.5).await;
        assert_eq!(related, vec!["politique climatique europe".to_string()]);
    }

    #[tokio::test]
    async fn clear_preserves_vector_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let memory = test_memory(dir.path()).await;
        memory
            .add_items(
                vec![NewItem {
                    content: "contenu".repeat(10),
                    title: "t".to_string(),
                    url: "https://example.com".to_string(),
                }],
                MemorySource::Research,
                true,
            )
            .await
            .unwrap();
        memory
            .cache_put("sujet", &dummy_report("sujet"))
            .await
            .unwrap();

        memory.clear_conversations_and_cache().await.unwrap();
        assert!(memory.cache_get("sujet", Some(f64::INFINITY)).await.is_none());
        assert_eq!(memory.corpus_size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn clear_old_items_forgets_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let memory = test_memory(dir.path()).await;
        let content = "un contenu qui vieillira".to_string();
        memory
            .add_items(
                vec![NewItem {
                    content: content.clone(),
                    title: "t".to_string(),
                    url: "https://example.com".to_string(),
                }],
                MemorySource::Summary,
                true,
            )
            .await
            .unwrap();

        // Nothing is older than one day yet.
        assert_eq!(memory.clear_old_items(1).await.unwrap(), 0);
        assert!(memory.is_duplicate(&content).await);

        // A negative horizon puts the cutoff in the future, evicting all.
        assert_eq!(memory.clear_old_items(-1).await.unwrap(), 1);
        assert!(!memory.is_duplicate(&content).await);
    }
}
