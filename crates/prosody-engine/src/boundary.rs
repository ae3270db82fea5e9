//! Boundary classification between adjacent words.
//!
//! Priority is fixed: terminal punctuation beats a phrase starter, which beats
//! clause punctuation. `Breath` is never produced here; the planner injects it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Strength of the break between two chunks. Ordered weakest to strongest so
/// that `Sentence > Clause > Phrase > Breath > None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryType {
    None,
    Breath,
    Phrase,
    Clause,
    Sentence,
}

impl BoundaryType {
    pub const ALL: [BoundaryType; 5] = [
        BoundaryType::Sentence,
        BoundaryType::Clause,
        BoundaryType::Phrase,
        BoundaryType::Breath,
        BoundaryType::None,
    ];

    /// Sentence, Clause and Phrase come from the text; Breath and None do not.
    pub fn is_natural(self) -> bool {
        matches!(
            self,
            BoundaryType::Sentence | BoundaryType::Clause | BoundaryType::Phrase
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BoundaryType::Sentence => "sentence",
            BoundaryType::Clause => "clause",
            BoundaryType::Phrase => "phrase",
            BoundaryType::Breath => "breath",
            BoundaryType::None => "none",
        }
    }
}

impl std::fmt::Display for BoundaryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pause and breath probability applied at a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundaryProsody {
    /// Silence inserted after the chunk, in milliseconds
    pub pause_ms: u32,
    /// Probability in [0, 1] of mixing a breath sound into the junction
    pub breath_probability: f32,
}

impl BoundaryProsody {
    pub const fn new(pause_ms: u32, breath_probability: f32) -> Self {
        Self {
            pause_ms,
            breath_probability,
        }
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(u64::from(self.pause_ms))
    }
}

/// Boundary → (pause, breath probability) table. Overridable per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PauseConfig {
    pub sentence: BoundaryProsody,
    pub clause: BoundaryProsody,
    pub phrase: BoundaryProsody,
    pub breath: BoundaryProsody,
    pub none: BoundaryProsody,
}

impl Default for PauseConfig {
    fn default() -> Self {
        Self {
            sentence: BoundaryProsody::new(350, 0.35),
            clause: BoundaryProsody::new(180, 0.15),
            phrase: BoundaryProsody::new(100, 0.0),
            breath: BoundaryProsody::new(130, 0.90),
            none: BoundaryProsody::new(0, 0.0),
        }
    }
}

impl PauseConfig {
    pub fn get(&self, boundary: BoundaryType) -> BoundaryProsody {
        match boundary {
            BoundaryType::Sentence => self.sentence,
            BoundaryType::Clause => self.clause,
            BoundaryType::Phrase => self.phrase,
            BoundaryType::Breath => self.breath,
            BoundaryType::None => self.none,
        }
    }

    /// Replace one row of the table.
    pub fn with(mut self, boundary: BoundaryType, prosody: BoundaryProsody) -> Self {
        let slot = match boundary {
            BoundaryType::Sentence => &mut self.sentence,
            BoundaryType::Clause => &mut self.clause,
            BoundaryType::Phrase => &mut self.phrase,
            BoundaryType::Breath => &mut self.breath,
            BoundaryType::None => &mut self.none,
        };
        *slot = prosody;
        self
    }

    /// Probabilities outside [0, 1] are clamped, NaN becomes 0.
    pub fn sanitized(mut self) -> Self {
        for slot in [
            &mut self.sentence,
            &mut self.clause,
            &mut self.phrase,
            &mut self.breath,
            &mut self.none,
        ] {
            slot.breath_probability = if slot.breath_probability.is_nan() {
                0.0
            } else {
                slot.breath_probability.clamp(0.0, 1.0)
            };
        }
        self
    }
}

const SENTENCE_MARKS: &[char] = &['.', '!', '?'];
const CLAUSE_MARKS: &[char] = &[',', ';', ':', '-', '—'];
const CLOSERS: &[char] = &['"', '\'', ')', ']', '}', '»', '”', '’'];

/// Words that open a new phrase when they follow another word.
pub const PHRASE_STARTERS: &[&str] = &[
    // conjunctions
    "and", "but", "or", "so", "yet", "nor",
    // subordinators
    "because", "although", "though", "while", "when", "if", "then", "unless", "until", "whereas",
    // transitions
    "however", "therefore", "thus", "hence", "consequently",
    // sequencers
    "first", "second", "third", "finally", "next", "lastly",
    // connectors
    "meanwhile", "furthermore", "moreover", "instead", "otherwise",
    // mid-utterance question words
    "what", "where", "why", "how",
];

/// Lowercased word with surrounding punctuation removed.
pub fn normalize_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

pub fn is_phrase_starter(word: &str) -> bool {
    let normalized = normalize_word(word);
    PHRASE_STARTERS.contains(&normalized.as_str())
}

/// The boundary punctuation mark ending `word`, looking past closing quotes
/// and brackets. Returns `None` if the word does not end in one.
pub fn trailing_punctuation(word: &str) -> Option<char> {
    let last = word.trim_end_matches(CLOSERS).chars().next_back()?;
    if SENTENCE_MARKS.contains(&last) || CLAUSE_MARKS.contains(&last) {
        Some(last)
    } else {
        None
    }
}

/// Classify the break between `prev_word` and `next_word`.
///
/// `next_word` may be empty at the end of an utterance.
pub fn classify(
    _prev_word: &str,
    next_word: &str,
    punctuation_after_prev: Option<char>,
) -> BoundaryType {
    if matches!(punctuation_after_prev, Some(p) if SENTENCE_MARKS.contains(&p)) {
        return BoundaryType::Sentence;
    }
    if is_phrase_starter(next_word) {
        return BoundaryType::Phrase;
    }
    if matches!(punctuation_after_prev, Some(p) if CLAUSE_MARKS.contains(&p)) {
        return BoundaryType::Clause;
    }
    BoundaryType::None
}

/// `classify` with the punctuation taken from `prev_word` itself.
pub fn classify_after(prev_word: &str, next_word: &str) -> BoundaryType {
    classify(prev_word, next_word, trailing_punctuation(prev_word))
}
