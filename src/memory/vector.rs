//! Vector index backends for the research memory.
//!
//! [`LanceIndex`] persists items + embeddings in a LanceDB table (cosine
//! `nearest_to` queries, SQL-ish filters). [`MemIndex`] is a volatile
//! brute-force index with the same contract, used in tests and as the
//! fallback when the on-disk store cannot be opened.

use crate::error::PipelineError;
use crate::memory::embedding::cosine_similarity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use arrow_array::{
    types::Float32Type, Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch,
    RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    Research,
    Summary,
    Synthesis,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Summary => "summary",
            Self::Synthesis => "synthesis",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "research" => Some(Self::Research),
            "summary" => Some(Self::Summary),
            "synthesis" => Some(Self::Synthesis),
            _ => None,
        }
    }
}

/// One persisted memory record. The backing index also stores the
/// embedding column; it is not read back on search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredItem {
    pub id: String,
    pub content: String,
    pub title: String,
    pub url: String,
    pub source: MemorySource,
    pub timestamp: DateTime<Utc>,
    pub content_hash: String,
    pub word_count: usize,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn insert(&self, item: StoredItem, embedding: Vec<f32>) -> Result<(), PipelineError>;

    /// Top-k by descending cosine similarity, optionally restricted to one
    /// source.
    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        source_filter: Option<MemorySource>,
    ) -> Result<Vec<(StoredItem, f32)>, PipelineError>;

    /// Remove items strictly older than `cutoff`; returns the content
    /// hashes of the removed items so the dedup set can forget them.
    async fn remove_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, PipelineError>;

    async fn count(&self) -> Result<usize, PipelineError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory index
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemIndex {
    items: RwLock<Vec<(StoredItem, Vec<f32>)>>,
}

impl MemIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemIndex {
    async fn insert(&self, item: StoredItem, embedding: Vec<f32>) -> Result<(), PipelineError> {
        self.items.write().await.push((item, embedding));
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        source_filter: Option<MemorySource>,
    ) -> Result<Vec<(StoredItem, f32)>, PipelineError> {
        let items = self.items.read().await;
        let mut scored: Vec<(StoredItem, f32)> = items
            .iter()
            .filter(|(item, _)| source_filter.is_none_or(|s| item.source == s))
            .map(|(item, vector)| (item.clone(), cosine_similarity(embedding, vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn remove_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, PipelineError> {
        let mut items = self.items.write().await;
        let mut removed = Vec::new();
        items.retain(|(item, _)| {
            if item.timestamp < cutoff {
                removed.push(item.content_hash.clone());
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn count(&self) -> Result<usize, PipelineError> {
        Ok(self.items.read().await.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LanceDB index
// ─────────────────────────────────────────────────────────────────────────────

pub struct LanceIndex {
    table: Table,
    embedding_dim: usize,
}

const TABLE_NAME: &str = "research_memory";

impl LanceIndex {
    /// Open (or create) the memory table under `uri`.
    pub async fn open(uri: &str, embedding_dim: usize) -> Result<Self, PipelineError> {
        let db = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| PipelineError::Memory(format!("lancedb connect failed: {e}")))?;

        let schema = Arc::new(Self::schema(embedding_dim)?);
        let table = match db.open_table(TABLE_NAME).execute().await {
            Ok(table) => table,
            Err(lancedb::Error::TableNotFound { .. }) => db
                .create_empty_table(TABLE_NAME, schema)
                .execute()
                .await
                .map_err(|e| PipelineError::Memory(format!("table create failed: {e}")))?,
            Err(e) => {
                return Err(PipelineError::Memory(format!("table open failed: {e}")));
            }
        };

        // Index creation is best-effort; flat search still works without it.
        if let Err(e) = table
            .create_index(&["vector"], lancedb::index::Index::Auto)
            .execute()
            .await
        {
            tracing::debug!("lancedb create_index skipped: {}", e);
        }

        Ok(Self {
            table,
            embedding_dim,
        })
    }

    fn schema(embedding_dim: usize) -> Result<Schema, PipelineError> {
        let vector_len: i32 = embedding_dim
            .try_into()
            .map_err(|_| PipelineError::Memory("embedding dimension too large".to_string()))?;
        Ok(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("url", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("timestamp_ms", DataType::Int64, false),
            Field::new("content_hash", DataType::Utf8, false),
            Field::new("word_count", DataType::Int64, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    vector_len,
                ),
                true,
            ),
        ]))
    }

    fn item_to_batch(
        &self,
        item: &StoredItem,
        embedding: &[f32],
    ) -> Result<RecordBatch, PipelineError> {
        let schema = Arc::new(Self::schema(self.embedding_dim)?);
        let vector_len: i32 = self
            .embedding_dim
            .try_into()
            .map_err(|_| PipelineError::Memory("embedding dimension too large".to_string()))?;

        let vector = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            std::iter::once(Some(embedding.iter().map(|v| Some(*v)).collect::<Vec<_>>())),
            vector_len,
        );

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![item.id.clone()])),
                Arc::new(StringArray::from(vec![item.content.clone()])),
                Arc::new(StringArray::from(vec![item.title.clone()])),
                Arc::new(StringArray::from(vec![item.url.clone()])),
                Arc::new(StringArray::from(vec![item.source.as_str().to_string()])),
                Arc::new(Int64Array::from(vec![item.timestamp.timestamp_millis()])),
                Arc::new(StringArray::from(vec![item.content_hash.clone()])),
                Arc::new(Int64Array::from(vec![item.word_count as i64])),
                Arc::new(vector),
            ],
        )
        .map_err(|e| PipelineError::Memory(format!("record batch build failed: {e}")))
    }

    fn batch_to_items(
        batch: &RecordBatch,
        with_distance: bool,
    ) -> Result<Vec<(StoredItem, f32)>, PipelineError> {
        fn string_col<'a>(
            batch: &'a RecordBatch,
            name: &str,
        ) -> Result<&'a StringArray, PipelineError> {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| PipelineError::Memory(format!("missing column: {name}")))
        }
        fn int_col<'a>(
            batch: &'a RecordBatch,
            name: &str,
        ) -> Result<&'a Int64Array, PipelineError> {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .ok_or_else(|| PipelineError::Memory(format!("missing column: {name}")))
        }

        let ids = string_col(batch, "id")?;
        let contents = string_col(batch, "content")?;
        let titles = string_col(batch, "title")?;
        let urls = string_col(batch, "url")?;
        let sources = string_col(batch, "source")?;
        let timestamps = int_col(batch, "timestamp_ms")?;
        let hashes = string_col(batch, "content_hash")?;
        let word_counts = int_col(batch, "word_count")?;
        let distances: Option<&Float32Array> = if with_distance {
            batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        } else {
            None
        };

        let mut out = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let source = MemorySource::parse(sources.value(row)).unwrap_or(MemorySource::Research);
            let timestamp = DateTime::<Utc>::from_timestamp_millis(timestamps.value(row))
                .unwrap_or_else(Utc::now);
            let score = distances
                .map(|d| {
                    let dist = d.value(row);
                    if dist.is_nan() {
                        0.0
                    } else {
                        // Cosine distance → similarity-like score.
                        (1.0 - dist).clamp(0.0, 1.0)
                    }
                })
                .unwrap_or(0.0);

            out.push((
                StoredItem {
                    id: ids.value(row).to_string(),
                    content: contents.value(row).to_string(),
                    title: titles.value(row).to_string(),
                    url: urls.value(row).to_string(),
                    source,
                    timestamp,
                    content_hash: hashes.value(row).to_string(),
                    word_count: word_counts.value(row).max(0) as usize,
                },
                score,
            ));
        }
        Ok(out)
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
    async fn insert(&self, item: StoredItem, embedding: Vec<f32>) -> Result<(), PipelineError> {
        let batch = self.item_to_batch(&item, &embedding)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema);
        self.table
            .add(batches)
            .execute()
            .await
            .map_err(|e| PipelineError::Memory(format!("lancedb insert failed: {e}")))?;
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        source_filter: Option<MemorySource>,
    ) -> Result<Vec<(StoredItem, f32)>, PipelineError> {
        let mut query = self
            .table
            .query()
            .nearest_to(embedding)
            .map_err(|e| PipelineError::Memory(format!("vector query failed: {e}")))?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(k);

        if let Some(source) = source_filter {
            query = query.only_if(format!("source = '{}'", source.as_str()));
        }

        let stream = query
            .execute()
            .await
            .map_err(|e| PipelineError::Memory(format!("lancedb search failed: {e}")))?;
        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| PipelineError::Memory(format!("lancedb read failed: {e}")))?;

        let mut out = Vec::new();
        for batch in &batches {
            out.extend(Self::batch_to_items(batch, true)?);
        }
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        out.truncate(k);
        Ok(out)
    }

    async fn remove_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, PipelineError> {
        let predicate = format!("timestamp_ms < {}", cutoff.timestamp_millis());

        // Collect the doomed hashes first so the caller can forget them.
        let stream = self
            .table
            .query()
            .only_if(predicate.clone())
            .execute()
            .await
            .map_err(|e| PipelineError::Memory(format!("lancedb scan failed: {e}")))?;
        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| PipelineError::Memory(format!("lancedb read failed: {e}")))?;
        let mut hashes = Vec::new();
        for batch in &batches {
            for (item, _) in Self::batch_to_items(batch, false)? {
                hashes.push(item.content_hash);
            }
        }

        self.table
            .delete(&predicate)
            .await
            .map_err(|e| PipelineError::Memory(format!("lancedb delete failed: {e}")))?;
        Ok(hashes)
    }

    async fn count(&self) -> Result<usize, PipelineError> {
        self.table
            .count_rows(None)
            .await
            .map_err(|e| PipelineError::Memory(format!("lancedb count failed: {e}")))
    }
}
