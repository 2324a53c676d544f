//! Structure-aware text chunking for oversized LLM inputs.
//!
//! Paragraph-greedy splitting with sentence-preferring overlap between
//! consecutive chunks, fixed named strategies, and a post-pass that merges
//! undersized chunks into their successor.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextChunk {
    pub content: String,
    pub start_index: usize,
    pub end_index: usize,
    /// 1-based position within the chunk sequence.
    pub chunk_id: usize,
    pub total_chunks: usize,
    pub word_count: usize,
    pub has_heading: bool,
    pub heading_text: Option<String>,
}

/// Named sizing strategy: `(max_chunk, overlap, min_chunk)` in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkStrategy {
    pub name: &'static str,
    pub max_chunk: usize,
    pub overlap: usize,
    pub min_chunk: usize,
}

pub const STRATEGIES: &[ChunkStrategy] = &[
    ChunkStrategy {
        name: "default",
        max_chunk: 4_000,
        overlap: 200,
        min_chunk: 500,
    },
    ChunkStrategy {
        name: "small",
        max_chunk: 2_000,
        overlap: 100,
        min_chunk: 500,
    },
    ChunkStrategy {
        name: "large",
        max_chunk: 20_000,
        overlap: 300,
        min_chunk: 500,
    },
    ChunkStrategy {
        name: "precise",
        max_chunk: 3_000,
        overlap: 150,
        min_chunk: 800,
    },
];

impl ChunkStrategy {
    /// Look a strategy up by name; unknown names fall back to `default`.
    pub fn by_name(name: &str) -> Self {
        STRATEGIES
            .iter()
            .find(|s| s.name == name)
            .copied()
            .unwrap_or_else(|| {
                warn!("unknown chunk strategy '{}', using default", name);
                STRATEGIES[0]
            })
    }

    /// Pick a strategy from the input size: short texts chunk small, very
    /// long texts chunk large, dense texts chunk precise.
    pub fn auto_select(content: &str) -> Self {
        let length = content.len();
        let word_count = content.split_whitespace().count();
        let name = if length < 5_000 {
            "small"
        } else if length > 20_000 {
            "large"
        } else if word_count > 3_000 {
            "precise"
        } else {
            "default"
        };
        Self::by_name(name)
    }
}

fn heading_patterns() -> &'static [Regex; 4] {
    static RES: OnceLock<[Regex; 4]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"^#{1,6}\s+.+$").unwrap(),
            Regex::new(r"^\d+\.\s+.+$").unwrap(),
            Regex::new(r"^[A-Z\s]{5,}$").unwrap(),
            Regex::new(r"^\w+:$").unwrap(),
        ]
    })
}

fn detect_heading(paragraph: &str) -> Option<String> {
    let first_line = paragraph.trim().lines().next()?.trim();
    if first_line.is_empty() {
        return None;
    }
    heading_patterns()
        .iter()
        .any(|re| re.is_match(first_line))
        .then(|| first_line.to_string())
}

/// Collapse space/tab runs and cap blank-line runs at one, preserving the
/// paragraph boundaries the splitter relies on.
fn normalize(text: &str) -> String {
    static SPACES: OnceLock<Regex> = OnceLock::new();
    static BLANKS: OnceLock<Regex> = OnceLock::new();
    let spaces = SPACES.get_or_init(|| Regex::new(r"[ \t]+").unwrap());
    let blanks = BLANKS.get_or_init(|| Regex::new(r"\n\s*\n\s*\n+").unwrap());

    let collapsed = spaces.replace_all(text, " ");
    blanks.replace_all(&collapsed, "\n\n").trim().to_string()
}

/// Step a byte index back to the nearest char boundary.
fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Trailing slice of `chunk` reused as the next chunk's prefix: whole
/// trailing sentences when the tail contains any, trailing words otherwise.
fn overlap_tail(chunk: &str, overlap: usize) -> String {
    if chunk.len() <= overlap {
        return String::new();
    }

    let tail_start = floor_char_boundary(chunk, chunk.len() - overlap);
    let tail = &chunk[tail_start..];

    // Whole sentences inside the tail window take priority: drop the
    // partial sentence the window starts in, keep the rest.
    if let Some(pos) = tail.find(['.', '!', '?']) {
        let after = floor_char_boundary(tail, pos + 1);
        let sentences = tail[after..].trim_start();
        if !sentences.is_empty() {
            return format!("{sentences} ");
        }
        // The whole tail is one sentence; fall through to words.
    }

    let mut words: Vec<&str> = Vec::new();
    let mut budget = 0usize;
    for word in tail.split_whitespace().rev() {
        if budget + word.len() > overlap {
            break;
        }
        budget += word.len() + 1;
        words.push(word);
    }
    words.reverse();
    if words.is_empty() {
        String::new()
    } else {
        format!("{} ", words.join(" "))
    }
}

/// Chunk `text` with the given strategy. Chunks cover the input in order;
/// consecutive chunks share at most `overlap` characters borrowed from the
/// previous tail; every chunk except possibly the last respects
/// `min_chunk ≤ len ≤ max_chunk`.
pub fn chunk_text(text: &str, strategy: ChunkStrategy) -> Vec<TextChunk> {
    let text = normalize(text);
    if text.is_empty() {
        return Vec::new();
    }

    if text.len() <= strategy.max_chunk {
        let heading = detect_heading(&text);
        return vec![TextChunk {
            word_count: text.split_whitespace().count(),
            start_index: 0,
            end_index: text.len(),
            chunk_id: 1,
            total_chunks: 1,
            has_heading: heading.is_some(),
            heading_text: heading,
            content: text,
        }];
    }

    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut current = String::new();
    let mut current_start = 0usize;
    let mut position = 0usize;

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if !current.is_empty() && current.len() + paragraph.len() > strategy.max_chunk {
            let overlap = overlap_tail(&current, strategy.overlap);
            chunks.push(make_chunk(
                current.trim().to_string(),
                current_start,
                position,
                chunks.len() + 1,
            ));
            current_start = position.saturating_sub(overlap.len());
            current = format!("{overlap}{paragraph}");
        } else if current.is_empty() {
            current_start = position;
            current = paragraph.to_string();
        } else {
            current.push_str("\n\n");
            current.push_str(paragraph);
        }

        position += paragraph.len() + 2;
    }

    if !current.trim().is_empty() {
        chunks.push(make_chunk(
            current.trim().to_string(),
            current_start,
            text.len(),
            chunks.len() + 1,
        ));
    }

    let chunks = merge_small_chunks(chunks, strategy);
    debug!(
        "chunked {} chars into {} chunks (strategy {})",
        text.len(),
        chunks.len(),
        strategy.name
    );
    chunks
}

fn make_chunk(content: String, start: usize, end: usize, chunk_id: usize) -> TextChunk {
    let heading = detect_heading(&content);
    TextChunk {
        word_count: content.split_whitespace().count(),
        start_index: start,
        end_index: end,
        chunk_id,
        total_chunks: 0, // fixed by the merge pass
        has_heading: heading.is_some(),
        heading_text: heading,
        content,
    }
}

/// Merge chunks under `min_chunk` into their successor when the pair still
/// fits `max_chunk`, then renumber.
fn merge_small_chunks(chunks: Vec<TextChunk>, strategy: ChunkStrategy) -> Vec<TextChunk> {
    let mut merged: Vec<TextChunk> = Vec::with_capacity(chunks.len());
    let mut iter = chunks.into_iter().peekable();

    while let Some(chunk) = iter.next() {
        let can_merge = chunk.content.len() < strategy.min_chunk
            && iter
                .peek()
                .is_some_and(|next| chunk.content.len() + next.content.len() <= strategy.max_chunk);

        match iter.next_if(|_| can_merge) {
            Some(next) => {
                let content = format!("{}\n\n{}", chunk.content, next.content);
                merged.push(TextChunk {
                    word_count: content.split_whitespace().count(),
                    start_index: chunk.start_index,
                    end_index: next.end_index,
                    chunk_id: merged.len() + 1,
                    total_chunks: 0,
                    has_heading: chunk.has_heading || next.has_heading,
                    heading_text: chunk.heading_text.or(next.heading_text),
                    content,
                });
            }
            None => {
                let mut chunk = chunk;
                chunk.chunk_id = merged.len() + 1;
                merged.push(chunk);
            }
        }
    }

    let total = merged.len();
    for chunk in &mut merged {
        chunk.total_chunks = total;
    }
    merged
}

/// Aggregate statistics over a chunk list (diagnostic).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChunkingStats {
    pub total_chunks: usize,
    pub total_characters: usize,
    pub total_words: usize,
    pub average_chunk_size: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub chunks_with_headings: usize,
}

pub fn chunking_stats(chunks: &[TextChunk]) -> ChunkingStats {
    if chunks.is_empty() {
        return ChunkingStats::default();
    }
    let sizes: Vec<usize> = chunks.iter().map(|c| c.content.len()).collect();
    ChunkingStats {
        total_chunks: chunks.len(),
        total_characters: sizes.iter().sum(),
        total_words: chunks.iter().map(|c| c.word_count).sum(),
        average_chunk_size: sizes.iter().sum::<usize>() / chunks.len(),
        min_chunk_size: *sizes.iter().min().unwrap_or(&0),
        max_chunk_size: *sizes.iter().max().unwrap_or(&0),
        chunks_with_headings: chunks.iter().filter(|c| c.has_heading).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text(paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|i| {
                format!(
                    "Paragraphe {i}. Cette section présente un contenu substantiel qui \
                     occupe plusieurs phrases. Les phrases se suivent et donnent du corps \
                     au paragraphe pour que le découpage ait matière à travailler."
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = chunk_text("Un petit texte.", ChunkStrategy::by_name("default"));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, 1);
        assert_eq!(chunks[0].total_chunks, 1);
    }

    #[test]
    fn long_text_respects_max_chunk() {
        let text = sample_text(60);
        let strategy = ChunkStrategy::by_name("default");
        let chunks = chunk_text(&text, strategy);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.content.len() <= strategy.max_chunk + strategy.overlap);
        }
    }

    #[test]
    fn chunk_ids_are_sequential_and_totals_consistent() {
        let chunks = chunk_text(&sample_text(60), ChunkStrategy::by_name("small"));
        let total = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_id, i + 1);
            assert_eq!(chunk.total_chunks, total);
        }
    }

    #[test]
    fn min_chunk_holds_except_for_last() {
        let strategy = ChunkStrategy::by_name("default");
        let chunks = chunk_text(&sample_text(60), strategy);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.content.len() >= strategy.min_chunk);
        }
    }

    #[test]
    fn chunks_cover_every_paragraph_in_order() {
        let text = normalize(&sample_text(40));
        let chunks = chunk_text(&text, ChunkStrategy::by_name("small"));

        let mut chunk_cursor = 0usize;
        for paragraph in text.split("\n\n") {
            let holder = chunks
                .iter()
                .position(|c| c.content.contains(paragraph))
                .expect("paragraph lost by the chunker");
            assert!(holder >= chunk_cursor, "paragraph order not preserved");
            chunk_cursor = holder;
        }
    }

    #[test]
    fn detects_markdown_and_numbered_headings() {
        let text = format!("## Introduction\n\nCorps du texte. {}", sample_text(30));
        let chunks = chunk_text(&text, ChunkStrategy::by_name("small"));
        assert!(chunks[0].has_heading);
        assert_eq!(chunks[0].heading_text.as_deref(), Some("## Introduction"));

        assert!(detect_heading("1. Premier point").is_some());
        assert!(detect_heading("SOMMAIRE GLOBAL").is_some());
        assert!(detect_heading("contexte:").is_some());
        assert!(detect_heading("Une phrase ordinaire du texte.").is_none());
    }

    #[test]
    fn auto_select_matches_size_bands() {
        assert_eq!(ChunkStrategy::auto_select("court").name, "small");
        let long = "mot ".repeat(6_000);
        assert_eq!(ChunkStrategy::auto_select(&long).name, "large");
        let medium = "phrase un peu longue ".repeat(400);
        assert_eq!(ChunkStrategy::auto_select(&medium).name, "default");
    }

    #[test]
    fn consecutive_chunks_overlap_at_most_overlap_chars() {
        let strategy = ChunkStrategy::by_name("small");
        let chunks = chunk_text(&sample_text(60), strategy);
        for pair in chunks.windows(2) {
            // The borrowed prefix of the next chunk must come from the
            // previous chunk's tail and stay within the overlap budget.
            let prev = &pair[0].content;
            let next = &pair[1].content;
            let prefix_end = next.find("Paragraphe").unwrap_or(0);
            let prefix = next[..prefix_end].trim();
            if !prefix.is_empty() {
                assert!(prefix.len() <= strategy.overlap + 1);
                assert!(prev.contains(prefix));
            }
        }
    }
}
