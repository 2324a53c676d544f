//! Embedding generation for the research memory.
//!
//! The primary embedder wraps a Model2Vec static model; loading happens
//! once on a blocking thread and the dimension is probed at startup. When
//! the model cannot be fetched (offline hosts, tests) the deterministic
//! hash embedder keeps the memory functional — lexical overlap instead of
//! semantics, same cosine-space contract.

use anyhow::{Context, Result};
use model2vec_rs::model::StaticModel;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::info;

pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Cosine similarity between two vectors; 0.0 on mismatched or zero-length
/// input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Model2Vec embedder
// ─────────────────────────────────────────────────────────────────────────────

pub struct Model2VecEmbedder {
    model: StaticModel,
    dimensions: usize,
}

impl Model2VecEmbedder {
    /// Load the model and probe its output dimension. Call from
    /// `spawn_blocking`; model download and inference are CPU/IO bound.
    pub fn load(model_id: &str) -> Result<Self> {
        info!("loading embedding model: {}", model_id);
        let model = StaticModel::from_pretrained(model_id, None, None, None)
            .with_context(|| format!("failed to load embedding model '{model_id}'"))?;
        let probe = model.encode_single("dimension probe");
        Ok(Self {
            dimensions: probe.len(),
            model,
        })
    }
}

impl Embedder for Model2VecEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        self.model.encode_single(text)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Deterministic hash embedder (fallback / tests)
// ─────────────────────────────────────────────────────────────────────────────

pub const HASH_EMBEDDER_DIMENSIONS: usize = 256;

/// Word- and trigram-hashed pseudo-embeddings, unit-normalized so cosine
/// similarity behaves. Deterministic across runs.
pub struct HashEmbedder {
    dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(HASH_EMBEDDER_DIMENSIONS)
    }
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_str(s: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];

        let normalized: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect();

        for word in normalized.split_whitespace() {
            let hash = Self::hash_str(word);
            let idx = (hash as usize) % self.dimensions;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            let magnitude = 1.0 + ((hash >> 16) & 0xFF) as f32 / 255.0;
            embedding[idx] += sign * magnitude;
        }

        let chars: Vec<char> = normalized.chars().collect();
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            let hash = Self::hash_str(&trigram);
            let idx = (hash as usize) % self.dimensions;
            let sign = if (hash >> 32) & 1 == 0 { 0.5 } else { -0.5 };
            embedding[idx] += sign;
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut embedding {
                *value /= magnitude;
            }
        }
        embedding
    }
}
