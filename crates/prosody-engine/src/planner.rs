//! Chunk planning: splits an utterance into prosodic chunks.
//!
//! The first chunk is kept tiny so the backend can return audio quickly; later
//! chunks close on natural boundaries, or on a forced `Breath` once the running
//! syllable count would exceed the budget.

use crate::boundary::{classify, classify_after, trailing_punctuation, BoundaryType};
use crate::error::ProsodyError;
use crate::syllable::estimate_syllables;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// One synthesis unit. Immutable once planned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProsodicChunk {
    index: usize,
    text: String,
    word_count: usize,
    boundary_before: BoundaryType,
    boundary_after: BoundaryType,
    is_first: bool,
    is_final: bool,
    position_ratio: f32,
    estimated_syllable_count: u32,
}

impl ProsodicChunk {
    /// Zero-based position in the plan
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn word_count(&self) -> usize {
        self.word_count
    }

    pub fn boundary_before(&self) -> BoundaryType {
        self.boundary_before
    }

    pub fn boundary_after(&self) -> BoundaryType {
        self.boundary_after
    }

    pub fn is_first(&self) -> bool {
        self.is_first
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Where the chunk starts within the utterance, for intonation shaping
    pub fn position_ratio(&self) -> f32 {
        self.position_ratio
    }

    pub fn estimated_syllable_count(&self) -> u32 {
        self.estimated_syllable_count
    }

    /// Expected spoken length at the given speaking pace. Empty chunks have no duration.
    pub fn estimated_duration(&self, ms_per_syllable: u32) -> Duration {
        if self.text.is_empty() {
            return Duration::ZERO;
        }
        Duration::from_millis(u64::from(self.estimated_syllable_count) * u64::from(ms_per_syllable))
    }

    /// Returned for empty or whitespace-only input.
    fn empty() -> Self {
        Self {
            index: 0,
            text: String::new(),
            word_count: 0,
            boundary_before: BoundaryType::None,
            boundary_after: BoundaryType::None,
            is_first: true,
            is_final: true,
            position_ratio: 0.0,
            estimated_syllable_count: 0,
        }
    }
}

/// Planner knobs. Values below 1 are treated as 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Words in the ultra-low-latency first chunk (default: 2)
    pub first_chunk_word_count: usize,
    /// Syllable budget between boundaries before a forced breath (default: 10)
    pub max_syllables_before_breath: u32,
    /// Words required before a Clause/Phrase boundary closes a chunk (default: 2)
    pub min_words_per_chunk: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            first_chunk_word_count: 2,
            max_syllables_before_breath: 10,
            min_words_per_chunk: 2,
        }
    }
}

impl PlannerConfig {
    fn clamped(self) -> Self {
        Self {
            first_chunk_word_count: self.first_chunk_word_count.max(1),
            max_syllables_before_breath: self.max_syllables_before_breath.max(1),
            min_words_per_chunk: self.min_words_per_chunk.max(1),
        }
    }
}

/// Word range `[start, end)` and the boundary that closed it.
#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
    after: BoundaryType,
}

/// Splits utterances into chunk sequences.
#[derive(Debug, Clone, Default)]
pub struct ChunkPlanner {
    config: PlannerConfig,
}

impl ChunkPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            config: config.clamped(),
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan `utterance`. Never fails: empty input yields one empty final chunk.
    pub fn plan(&self, utterance: &str) -> Vec<ProsodicChunk> {
        let words: Vec<&str> = utterance.split_whitespace().collect();
        if words.is_empty() {
            let err = ProsodyError::Planning("utterance contains no words".to_string());
            debug!("{}; planning a single empty chunk", err);
            return vec![ProsodicChunk::empty()];
        }

        let syllables: Vec<u32> = words.iter().map(|w| estimate_syllables(w)).collect();
        let spans = self.spans(&words, &syllables);
        let total = words.len();
        let last = spans.len() - 1;

        let mut chunks = Vec::with_capacity(spans.len());
        let mut before = BoundaryType::None;
        for (index, span) in spans.iter().enumerate() {
            let is_final = index == last;
            let position_ratio = if is_final && index > 0 {
                1.0
            } else {
                span.start as f32 / total as f32
            };
            chunks.push(ProsodicChunk {
                index,
                text: words[span.start..span.end].join(" "),
                word_count: span.end - span.start,
                boundary_before: before,
                boundary_after: span.after,
                is_first: index == 0,
                is_final,
                position_ratio,
                estimated_syllable_count: syllables[span.start..span.end].iter().sum(),
            });
            before = span.after;
        }

        debug!(
            words = total,
            chunks = chunks.len(),
            "planned utterance"
        );
        chunks
    }

    fn spans(&self, words: &[&str], syllables: &[u32]) -> Vec<Span> {
        let total = words.len();
        let cfg = self.config;

        // The first chunk bypasses every rule below.
        let first_end = cfg.first_chunk_word_count.min(total);
        let mut spans = vec![Span {
            start: 0,
            end: first_end,
            after: boundary_after(words, first_end),
        }];

        let mut start = first_end;
        let mut running = 0u32;
        for i in first_end..total.saturating_sub(1) {
            running += syllables[i];
            let natural = classify_after(words[i], words[i + 1]);
            let in_chunk = i + 1 - start;

            let close = match natural {
                BoundaryType::Sentence => Some(natural),
                BoundaryType::Clause | BoundaryType::Phrase
                    if in_chunk >= cfg.min_words_per_chunk =>
                {
                    Some(natural)
                }
                BoundaryType::None
                    if running >= cfg.max_syllables_before_breath
                        || running + syllables[i + 1] > cfg.max_syllables_before_breath =>
                {
                    Some(BoundaryType::Breath)
                }
                _ => None,
            };

            if natural.is_natural() || close.is_some() {
                running = 0;
            }
            if let Some(after) = close {
                spans.push(Span {
                    start,
                    end: i + 1,
                    after,
                });
                start = i + 1;
            }
        }

        if start < total {
            spans.push(Span {
                start,
                end: total,
                after: boundary_after(words, total),
            });
        }
        spans
    }
}

/// Boundary following the word at `end - 1`; terminal when `end` is the word count.
fn boundary_after(words: &[&str], end: usize) -> BoundaryType {
    let prev = words[end - 1];
    match words.get(end) {
        Some(next) => classify_after(prev, next),
        None => classify(prev, "", trailing_punctuation(prev)),
    }
}

/// Plan with the default configuration.
pub fn plan(utterance: &str) -> Vec<ProsodicChunk> {
    ChunkPlanner::default().plan(utterance)
}

/// Plan with explicit knobs.
pub fn plan_with(
    utterance: &str,
    first_chunk_word_count: usize,
    max_syllables_before_breath: u32,
    min_words_per_chunk: usize,
) -> Vec<ProsodicChunk> {
    ChunkPlanner::new(PlannerConfig {
        first_chunk_word_count,
        max_syllables_before_breath,
        min_words_per_chunk,
    })
    .plan(utterance)
}
