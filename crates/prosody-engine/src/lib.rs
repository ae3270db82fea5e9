//! # Prosody Engine - Prosodic Chunking and Stitching
//!
//! Sits between a text stream and a TTS backend. Text is split into small,
//! linguistically natural chunks; chunks are synthesized with bounded
//! look-ahead; the audio is stitched back together with pauses, breaths and
//! crossfades so the first audio arrives fast and the result still sounds
//! like one continuous utterance.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        ProsodicEngine                            │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌──────────────────┐   │
//! │  │ ChunkPlanner │→ │PipelineScheduler │→ │  AudioStitcher   │→ audio
//! │  │ (syllables + │  │ (look-ahead,     │  │ (pauses, breath, │   │
//! │  │  boundaries) │  │  timeouts)       │  │  crossfade)      │   │
//! │  └──────────────┘  └────────┬─────────┘  └────────┬─────────┘   │
//! │                             ↓                     ↓             │
//! │                    ┌──────────────┐      ┌──────────────────┐   │
//! │                    │ BackendPool  │      │ AttributionSink  │   │
//! │                    │ (TtsBackend) │      │ (fire-and-forget)│   │
//! │                    └──────────────┘      └──────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod attribution;
pub mod audio;
pub mod backend;
pub mod boundary;
pub mod config;
pub mod engine;
pub mod error;
pub mod planner;
pub mod scheduler;
pub mod stitcher;
pub mod syllable;

pub use attribution::{
    AttributionEvent, AttributionSink, ChannelSink, FanoutSink, NoopSink, TracingSink, WebhookSink,
};
pub use audio::AudioBuffer;
pub use backend::{BackendPool, OpenAiCompatibleTts, SilentTts, TtsBackend, VoiceParams};
pub use boundary::{BoundaryProsody, BoundaryType, PauseConfig};
pub use config::{EngineConfig, ProsodicConfig};
pub use engine::{
    ProsodicEngine, UtteranceHandle, UtteranceOutcome, UtteranceParts, UtteranceReport,
};
pub use error::{ProsodyError, ProsodyResult};
pub use planner::{plan, plan_with, ChunkPlanner, PlannerConfig, ProsodicChunk};
pub use scheduler::{PipelineScheduler, SchedulerConfig, SchedulerOutcome, SynthesizedChunk};
pub use stitcher::{AudioStitcher, StitchReport, StitcherConfig};
pub use syllable::{estimate_syllables, estimate_text_syllables};
