use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use common::{error::AppError, utils::config::ChunkingStrategyKind};
use regex::Regex;

/// A half-open `(start, end)` span in character (code point) offsets. The
/// embedding return path reconstructs chunk identity from these, so they must
/// round-trip exactly.
pub type Span = (usize, usize);

#[allow(clippy::expect_used)]
fn sentence_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+\s+").expect("sentence boundary pattern is valid"))
}

/// Number of characters (code points) in `text`.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Slice `text` by character offsets. Returns `None` when the span falls
/// outside the text.
pub fn slice_chars(text: &str, start: usize, end: usize) -> Option<&str> {
    if start > end {
        return None;
    }

    let mut byte_start = None;
    let mut byte_end = None;
    for (char_idx, (byte_idx, _)) in text.char_indices().enumerate() {
        if char_idx == start {
            byte_start = Some(byte_idx);
        }
        if char_idx == end {
            byte_end = Some(byte_idx);
            break;
        }
    }

    let count = char_len(text);
    if start == count {
        byte_start = Some(text.len());
    }
    if end == count {
        byte_end = Some(text.len());
    }

    match (byte_start, byte_end) {
        (Some(s), Some(e)) => text.get(s..e),
        _ => None,
    }
}

/// Convert a byte offset (known to lie on a char boundary) into a char offset.
fn byte_to_char(text: &str, byte_offset: usize) -> usize {
    text[..byte_offset].chars().count()
}

/// Windows of exactly `max_chars` characters, except the tail.
fn fixed_spans(char_count: usize, max_chars: usize) -> Vec<Span> {
    if char_count == 0 || max_chars < 1 {
        return Vec::new();
    }

    let mut spans = Vec::new();
    let mut start = 0;
    while start < char_count {
        let end = usize::min(start + max_chars, char_count);
        spans.push((start, end));
        start = end;
    }

    spans
}

/// Greedy sentence packing: sentences are appended to the current chunk while
/// it stays within `max_chars`; a single oversized sentence is emitted whole.
/// Text without any boundary comes back as one span.
fn sentence_spans(text: &str, max_chars: usize) -> Vec<Span> {
    let char_count = char_len(text);
    if char_count == 0 || max_chars < 1 {
        return Vec::new();
    }

    let mut sentences: Vec<Span> = Vec::new();
    let mut last_end = 0;
    for boundary in sentence_boundary().find_iter(text) {
        let sentence_end = byte_to_char(text, boundary.end());
        if last_end < sentence_end {
            sentences.push((last_end, sentence_end));
        }
        last_end = sentence_end;
    }
    if last_end < char_count {
        sentences.push((last_end, char_count));
    }

    if sentences.is_empty() {
        return vec![(0, char_count)];
    }

    let mut chunks: Vec<Span> = Vec::new();
    let mut chunk_start = 0;
    let mut last_sentence_end = 0;

    for &(_, sent_end) in &sentences {
        let current_len = sent_end - chunk_start;
        if current_len > max_chars && last_sentence_end > chunk_start {
            chunks.push((chunk_start, last_sentence_end));
            chunk_start = last_sentence_end;
        }
        last_sentence_end = sent_end;
    }

    if chunk_start < char_count {
        chunks.push((chunk_start, char_count));
    }

    if chunks.is_empty() {
        vec![(0, char_count)]
    } else {
        chunks
    }
}

/// Clamp, drop and order spans coming back from a pluggable splitter so the
/// chunk contract holds regardless of what the splitter produced.
fn validate_spans(mut spans: Vec<Span>, char_count: usize) -> Vec<Span> {
    spans.sort_by_key(|&(start, _)| start);

    let mut validated: Vec<Span> = Vec::new();
    let mut previous_end = 0;
    for (start, end) in spans {
        let end = usize::min(end, char_count);
        if start >= end || start < previous_end {
            continue;
        }
        validated.push((start, end));
        previous_end = end;
    }

    validated
}

/// Topic-boundary segmentation. Implementations may call an embedding model;
/// whatever they return is validated before use.
#[async_trait]
pub trait SemanticSplitter: Send + Sync {
    async fn split(&self, text: &str) -> Result<Vec<Span>, AppError>;
}

/// Default semantic splitter: paragraph boundaries on blank lines.
pub struct ParagraphSplitter;

#[async_trait]
impl SemanticSplitter for ParagraphSplitter {
    async fn split(&self, text: &str) -> Result<Vec<Span>, AppError> {
        #[allow(clippy::expect_used)]
        fn separator() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new(r"\n[ \t]*\n").expect("paragraph separator is valid"))
        }

        let char_count = char_len(text);
        let mut spans = Vec::new();
        let mut last_end = 0;
        for gap in separator().find_iter(text) {
            let start = byte_to_char(text, gap.start());
            if last_end < start {
                spans.push((last_end, start));
            }
            last_end = byte_to_char(text, gap.end());
        }
        if last_end < char_count {
            spans.push((last_end, char_count));
        }

        if spans.is_empty() && char_count > 0 {
            spans.push((0, char_count));
        }

        Ok(spans)
    }
}

/// Splits content into ordered, non-overlapping character spans. Chunking is
/// deterministic: the same text, mode and parameters always produce the same
/// spans.
#[derive(Clone)]
pub struct Chunker {
    strategy: ChunkingStrategyKind,
    max_chars: usize,
    semantic: Arc<dyn SemanticSplitter>,
}

impl Chunker {
    pub fn new(strategy: ChunkingStrategyKind, max_chars: usize) -> Self {
        Self {
            strategy,
            max_chars,
            semantic: Arc::new(ParagraphSplitter),
        }
    }

    pub fn with_semantic_splitter(mut self, splitter: Arc<dyn SemanticSplitter>) -> Self {
        self.semantic = splitter;
        self
    }

    pub async fn chunk(&self, text: &str) -> Result<Vec<Span>, AppError> {
        let char_count = char_len(text);
        if char_count == 0 {
            return Ok(Vec::new());
        }

        match self.strategy {
            ChunkingStrategyKind::Fixed => Ok(fixed_spans(char_count, self.max_chars)),
            ChunkingStrategyKind::Sentence => Ok(sentence_spans(text, self.max_chars)),
            ChunkingStrategyKind::Semantic => {
                let spans = self.semantic.split(text).await?;
                Ok(validate_spans(spans, char_count))
            }
        }
    }
}
