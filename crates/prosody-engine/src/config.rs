//! Engine and per-utterance configuration.
//!
//! `ProsodicConfig` is the per-call option set accepted by the HTTP surface.
//! `EngineConfig` holds process-wide settings loaded once at startup.

use crate::boundary::PauseConfig;
use crate::error::{ProsodyError, ProsodyResult};
use crate::planner::PlannerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_true() -> bool {
    true
}

fn default_first_chunk_words() -> usize {
    2
}

fn default_max_syllables_before_breath() -> u32 {
    10
}

fn default_min_words_per_chunk() -> usize {
    2
}

/// Per-utterance prosody options.
///
/// | Field | Default | Effect |
/// |-------|---------|--------|
/// | first_chunk_words | 2 | size of the ultra-low-latency first chunk |
/// | max_syllables_before_breath | 10 | upper bound on syllables between forced breaks |
/// | min_words_per_chunk | 2 | words needed before a Clause/Phrase boundary is honored |
/// | enable_breath_sounds | true | false disables breath mixing, silence is kept |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProsodicConfig {
    #[serde(default = "default_first_chunk_words")]
    pub first_chunk_words: usize,
    #[serde(default = "default_max_syllables_before_breath")]
    pub max_syllables_before_breath: u32,
    #[serde(default = "default_min_words_per_chunk")]
    pub min_words_per_chunk: usize,
    #[serde(default = "default_true")]
    pub enable_breath_sounds: bool,
    /// Overrides the engine's pause table for this utterance only.
    #[serde(default)]
    pub pauses: Option<PauseConfig>,
}

impl Default for ProsodicConfig {
    fn default() -> Self {
        Self {
            first_chunk_words: default_first_chunk_words(),
            max_syllables_before_breath: default_max_syllables_before_breath(),
            min_words_per_chunk: default_min_words_per_chunk(),
            enable_breath_sounds: true,
            pauses: None,
        }
    }
}

impl ProsodicConfig {
    pub fn planner(&self) -> PlannerConfig {
        PlannerConfig {
            first_chunk_word_count: self.first_chunk_words,
            max_syllables_before_breath: self.max_syllables_before_breath,
            min_words_per_chunk: self.min_words_per_chunk,
        }
    }

    pub fn validate(&self) -> ProsodyResult<()> {
        if self.first_chunk_words == 0 {
            return Err(ProsodyError::Config("first_chunk_words must be at least 1".into()));
        }
        if self.max_syllables_before_breath == 0 {
            return Err(ProsodyError::Config(
                "max_syllables_before_breath must be at least 1".into(),
            ));
        }
        if self.min_words_per_chunk == 0 {
            return Err(ProsodyError::Config("min_words_per_chunk must be at least 1".into()));
        }
        Ok(())
    }
}

/// Process-wide engine settings.
///
/// Loaded by [`EngineConfig::load`]: built-in defaults, then the TOML file at
/// `PROSODY_CONFIG` (default `config/prosody`), then `PROSODY__*` env vars
/// (e.g. `PROSODY__REQUEST_TIMEOUT_MS=800`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz; backends must return audio at this rate
    pub sample_rate: u32,
    /// Backend requests allowed in flight ahead of the chunk being stitched
    pub lookahead_depth: usize,
    /// Deadline for a single backend request
    pub request_timeout_ms: u64,
    /// Speaking pace used to size substituted silence
    pub ms_per_syllable: u32,
    /// Crossfade length at `None` boundaries
    pub crossfade_ms: u32,
    /// Concurrent backend requests across all utterances
    pub max_concurrent_requests: usize,
    /// Default pause table
    pub pauses: PauseConfig,
    /// Optional mono WAV used as the breath sound; synthesized when unset
    pub breath_asset: Option<PathBuf>,
    /// Gain applied to the breath sound before mixing
    pub breath_gain: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            lookahead_depth: 1,
            request_timeout_ms: 2_000,
            ms_per_syllable: 220,
            crossfade_ms: 20,
            max_concurrent_requests: 16,
            pauses: PauseConfig::default(),
            breath_asset: None,
            breath_gain: 0.6,
        }
    }
}

impl EngineConfig {
    /// Load from file and environment. Precedence: env > file > defaults.
    pub fn load() -> ProsodyResult<Self> {
        let path = std::env::var("PROSODY_CONFIG").unwrap_or_else(|_| "config/prosody".to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> ProsodyResult<Self> {
        let defaults = config::Config::try_from(&EngineConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);
        builder = builder.add_source(config::File::from(path).required(false));
        let built = builder
            .add_source(config::Environment::with_prefix("PROSODY").separator("__"))
            .build()?;

        let cfg: EngineConfig = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> ProsodyResult<()> {
        if self.sample_rate == 0 {
            return Err(ProsodyError::Config("sample_rate must be > 0".into()));
        }
        if self.lookahead_depth == 0 {
            return Err(ProsodyError::Config("lookahead_depth must be at least 1".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ProsodyError::Config("request_timeout_ms must be > 0".into()));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ProsodyError::Config("max_concurrent_requests must be at least 1".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
