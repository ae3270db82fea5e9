//! Engine facade: plan → schedule → stitch for one utterance at a time.
//!
//! A [`ProsodicEngine`] is cheap to clone and shares its backend pool with
//! every clone, so many utterances can run against one backend concurrently.

use crate::attribution::AttributionSink;
use crate::audio::{duration_of, synthesize_breath, AudioBuffer};
use crate::backend::{BackendPool, TtsBackend, VoiceParams};
use crate::config::{EngineConfig, ProsodicConfig};
use crate::error::{ProsodyError, ProsodyResult};
use crate::planner::{ChunkPlanner, ProsodicChunk};
use crate::scheduler::{PipelineScheduler, SchedulerConfig, SchedulerOutcome};
use crate::stitcher::{AudioStitcher, StitcherConfig};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Length of the synthesized breath when no asset file is configured.
const DEFAULT_BREATH_MS: u64 = 220;
/// Fixed seed so the synthesized breath sounds the same across restarts.
const BREATH_SEED: u64 = 0x6272_6561_7468;
/// Stitched segments buffered ahead of the consumer; the stitcher relies on one.
const OUTPUT_BUFFER: usize = 1;

/// How an utterance ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UtteranceOutcome {
    Completed,
    Cancelled,
    /// A backend error cut the utterance short; audio emitted before it stands.
    Partial { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct UtteranceReport {
    pub utterance_id: String,
    pub outcome: UtteranceOutcome,
    pub chunks_planned: usize,
    pub chunks_emitted: usize,
    pub degraded_chunks: usize,
    pub breaths_inserted: usize,
    pub audio_duration: Duration,
    /// From `speak` to the first stitched samples
    pub time_to_first_audio: Option<Duration>,
}

impl UtteranceReport {
    pub fn is_partial(&self) -> bool {
        matches!(self.outcome, UtteranceOutcome::Partial { .. })
    }
}

/// Utterance id, audio receiver, cancel token and report task.
pub type UtteranceParts = (
    String,
    mpsc::Receiver<AudioBuffer>,
    CancellationToken,
    JoinHandle<UtteranceReport>,
);

/// A running utterance. Audio arrives in order on [`UtteranceHandle::recv`];
/// dropping the handle cancels the utterance.
pub struct UtteranceHandle {
    utterance_id: String,
    audio_rx: mpsc::Receiver<AudioBuffer>,
    cancel: CancellationToken,
    task: JoinHandle<UtteranceReport>,
}

impl UtteranceHandle {
    pub fn utterance_id(&self) -> &str {
        &self.utterance_id
    }

    /// Next stitched segment, or `None` once the utterance has ended or been
    /// cancelled. A segment still queued at cancel time is discarded.
    pub async fn recv(&mut self) -> Option<AudioBuffer> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            segment = self.audio_rx.recv() => segment,
        }
    }

    pub fn try_recv(&mut self) -> Option<AudioBuffer> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.audio_rx.try_recv().ok()
    }

    /// Token that cancels this utterance; clone it to cancel from elsewhere.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the utterance. Audio already received is not retracted; audio not
    /// yet received is dropped along with its attribution.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Split into the audio receiver and a future resolving to the report.
    /// Dropping the receiver cancels the utterance. After a cancel the raw
    /// receiver may still hold one unattributed segment.
    pub fn into_parts(self) -> UtteranceParts {
        (self.utterance_id, self.audio_rx, self.cancel, self.task)
    }

    /// Audio as a stream, for bodies and sinks that take one. The report is
    /// logged by the engine and otherwise dropped.
    pub fn into_stream(self) -> ReceiverStream<AudioBuffer> {
        ReceiverStream::new(self.audio_rx)
    }

    /// Drain the remaining audio into one buffer and wait for the report.
    pub async fn collect(mut self, sample_rate: u32) -> (AudioBuffer, UtteranceReport) {
        let mut out = AudioBuffer::empty(sample_rate);
        while let Some(segment) = self.recv().await {
            out.samples.extend_from_slice(&segment.samples);
        }
        let report = join_report(&self.utterance_id, self.task).await;
        (out, report)
    }

    /// Discard the remaining audio and wait for the report.
    pub async fn finish(mut self) -> UtteranceReport {
        while self.recv().await.is_some() {}
        join_report(&self.utterance_id, self.task).await
    }
}

async fn join_report(utterance_id: &str, task: JoinHandle<UtteranceReport>) -> UtteranceReport {
    match task.await {
        Ok(report) => report,
        Err(e) => {
            error!(utterance_id, "utterance task failed: {}", e);
            UtteranceReport {
                utterance_id: utterance_id.to_string(),
                outcome: UtteranceOutcome::Partial {
                    reason: e.to_string(),
                },
                chunks_planned: 0,
                chunks_emitted: 0,
                degraded_chunks: 0,
                breaths_inserted: 0,
                audio_duration: Duration::ZERO,
                time_to_first_audio: None,
            }
        }
    }
}

#[derive(Clone)]
pub struct ProsodicEngine {
    config: Arc<EngineConfig>,
    pool: BackendPool,
    sink: Arc<dyn AttributionSink>,
    breath: Arc<AudioBuffer>,
}

impl ProsodicEngine {
    /// Build an engine with its own backend pool sized by `max_concurrent_requests`.
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn TtsBackend>,
        sink: Arc<dyn AttributionSink>,
    ) -> ProsodyResult<Self> {
        let pool = BackendPool::new(backend, config.max_concurrent_requests);
        Self::with_pool(config, pool, sink)
    }

    /// Build an engine over an existing (possibly shared) pool.
    pub fn with_pool(
        config: EngineConfig,
        pool: BackendPool,
        sink: Arc<dyn AttributionSink>,
    ) -> ProsodyResult<Self> {
        config.validate()?;
        let breath = load_breath(&config)?;
        info!(
            backend = pool.backend_name(),
            sample_rate = config.sample_rate,
            lookahead = config.lookahead_depth,
            "prosodic engine ready"
        );
        Ok(Self {
            config: Arc::new(config),
            pool,
            sink,
            breath: Arc::new(breath),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &BackendPool {
        &self.pool
    }

    /// Plan without synthesizing.
    pub fn plan(&self, text: &str, options: &ProsodicConfig) -> Vec<ProsodicChunk> {
        ChunkPlanner::new(options.planner()).plan(text)
    }

    /// Start speaking `text`. Breath draws come from an entropy-seeded RNG.
    pub fn speak(
        &self,
        text: &str,
        voice: VoiceParams,
        options: &ProsodicConfig,
    ) -> ProsodyResult<UtteranceHandle> {
        self.speak_with_rng(text, voice, options, Box::new(ChaCha20Rng::from_entropy()))
    }

    /// Start speaking `text` with breath draws taken from `rng`.
    pub fn speak_with_rng(
        &self,
        text: &str,
        voice: VoiceParams,
        options: &ProsodicConfig,
        rng: Box<dyn RngCore + Send>,
    ) -> ProsodyResult<UtteranceHandle> {
        options.validate()?;
        let started = Instant::now();
        let utterance_id = Uuid::new_v4().to_string();
        let chunks = self.plan(text, options);
        let chunks_planned = chunks.len();

        info!(
            utterance_id = %utterance_id,
            voice = %voice.voice_id,
            chunks = chunks_planned,
            "utterance started"
        );

        let cfg = &self.config;
        let scheduler = PipelineScheduler::new(
            self.pool.clone(),
            SchedulerConfig {
                lookahead_depth: cfg.lookahead_depth,
                request_timeout: cfg.request_timeout(),
                ms_per_syllable: cfg.ms_per_syllable,
                sample_rate: cfg.sample_rate,
            },
        );
        let stitcher = AudioStitcher::new(
            StitcherConfig {
                sample_rate: cfg.sample_rate,
                crossfade: Duration::from_millis(u64::from(cfg.crossfade_ms)),
                pauses: options.pauses.clone().unwrap_or_else(|| cfg.pauses.clone()).sanitized(),
                enable_breath_sounds: options.enable_breath_sounds,
                breath_gain: cfg.breath_gain,
            },
            Arc::clone(&self.breath),
            rng,
            Arc::clone(&self.sink),
            utterance_id.clone(),
            voice.voice_id.clone(),
        );

        let cancel = CancellationToken::new();
        let (audio_tx, audio_rx) = mpsc::channel(OUTPUT_BUFFER);
        let sample_rate = cfg.sample_rate;
        let id = utterance_id.clone();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let (chunk_rx, scheduled) = scheduler.spawn(id.clone(), chunks, voice, token.clone());
            let stitched = stitcher.run(chunk_rx, audio_tx, token.clone()).await;
            let scheduled = scheduled.await.unwrap_or_else(|e| SchedulerOutcome::Aborted {
                chunk: stitched.chunks_emitted,
                error: ProsodyError::Backend(e.to_string()),
            });

            let outcome = if token.is_cancelled() || stitched.cancelled {
                UtteranceOutcome::Cancelled
            } else {
                match scheduled {
                    SchedulerOutcome::Aborted { chunk, error } => UtteranceOutcome::Partial {
                        reason: format!("chunk {}: {}", chunk, error),
                    },
                    SchedulerOutcome::Cancelled => UtteranceOutcome::Cancelled,
                    SchedulerOutcome::Completed => UtteranceOutcome::Completed,
                }
            };

            let report = UtteranceReport {
                utterance_id: id,
                outcome,
                chunks_planned,
                chunks_emitted: stitched.chunks_emitted,
                degraded_chunks: stitched.degraded_chunks,
                breaths_inserted: stitched.breaths_inserted,
                audio_duration: duration_of(stitched.samples_emitted, sample_rate),
                time_to_first_audio: stitched.first_audio_at.map(|t| t.duration_since(started)),
            };

            match &report.outcome {
                UtteranceOutcome::Partial { reason } => warn!(
                    utterance_id = %report.utterance_id,
                    emitted = report.chunks_emitted,
                    "utterance ended early: {}",
                    reason
                ),
                _ => info!(
                    utterance_id = %report.utterance_id,
                    outcome = ?report.outcome,
                    emitted = report.chunks_emitted,
                    degraded = report.degraded_chunks,
                    ttfa_ms = report.time_to_first_audio.map(|d| d.as_millis() as u64),
                    "utterance finished"
                ),
            }
            report
        });

        Ok(UtteranceHandle {
            utterance_id,
            audio_rx,
            cancel,
            task,
        })
    }

    /// Speak and collect the whole utterance into one buffer.
    pub async fn synthesize(
        &self,
        text: &str,
        voice: VoiceParams,
        options: &ProsodicConfig,
    ) -> ProsodyResult<(AudioBuffer, UtteranceReport)> {
        let handle = self.speak(text, voice, options)?;
        Ok(handle.collect(self.config.sample_rate).await)
    }
}

impl std::fmt::Debug for ProsodicEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProsodicEngine")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish()
    }
}

fn load_breath(config: &EngineConfig) -> ProsodyResult<AudioBuffer> {
    match &config.breath_asset {
        Some(path) => {
            let breath = AudioBuffer::from_wav_file(path)?;
            if breath.sample_rate != config.sample_rate {
                return Err(ProsodyError::Audio(format!(
                    "breath asset {} is {} Hz, engine runs at {} Hz",
                    path.display(),
                    breath.sample_rate,
                    config.sample_rate
                )));
            }
            info!("loaded breath asset {} ({:?})", path.display(), breath.duration());
            Ok(breath)
        }
        None => {
            let mut rng = ChaCha20Rng::seed_from_u64(BREATH_SEED);
            Ok(synthesize_breath(
                config.sample_rate,
                Duration::from_millis(DEFAULT_BREATH_MS),
                &mut rng,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::{ChannelSink, NoopSink};
    use crate::backend::SilentTts;
    use std::path::PathBuf;

    fn engine() -> ProsodicEngine {
        let config = EngineConfig {
            sample_rate: 8_000,
            ..Default::default()
        };
        ProsodicEngine::new(config, Arc::new(SilentTts::new(8_000)), Arc::new(NoopSink)).unwrap()
    }

    #[tokio::test]
    async fn synthesize_reports_every_chunk() {
        let (audio, report) = engine()
            .synthesize(
                "Hello, world! This is a test of the prosodic parser.",
                VoiceParams::default(),
                &ProsodicConfig::default(),
            )
            .await
            .unwrap();
        assert_eq!(report.outcome, UtteranceOutcome::Completed);
        assert_eq!(report.chunks_planned, 3);
        assert_eq!(report.chunks_emitted, 3);
        assert_eq!(report.degraded_chunks, 0);
        assert!(report.time_to_first_audio.is_some());
        assert_eq!(audio.duration(), report.audio_duration);
    }

    #[tokio::test]
    async fn attribution_carries_utterance_and_voice() {
        let (sink, mut events) = ChannelSink::new();
        let engine = ProsodicEngine::new(
            EngineConfig {
                sample_rate: 8_000,
                ..Default::default()
            },
            Arc::new(SilentTts::new(8_000)),
            Arc::new(sink),
        )
        .unwrap();
        let handle = engine
            .speak("Good morning, everyone.", VoiceParams::new("nova"), &ProsodicConfig::default())
            .unwrap();
        let id = handle.utterance_id().to_string();
        let report = handle.finish().await;

        let mut count = 0;
        while let Ok(ev) = events.try_recv() {
            assert_eq!(ev.utterance_id, id);
            assert_eq!(ev.voice_id, "nova");
            count += 1;
        }
        assert_eq!(count, report.chunks_emitted);
    }

    #[tokio::test]
    async fn invalid_options_are_rejected() {
        let options = ProsodicConfig {
            first_chunk_words: 0,
            ..Default::default()
        };
        let err = engine().speak("hi", VoiceParams::default(), &options).err();
        assert!(matches!(err, Some(ProsodyError::Config(_))));
    }

    #[tokio::test]
    async fn empty_text_completes_without_audio() {
        let (audio, report) = engine()
            .synthesize("   ", VoiceParams::default(), &ProsodicConfig::default())
            .await
            .unwrap();
        assert!(audio.is_empty());
        assert_eq!(report.outcome, UtteranceOutcome::Completed);
        assert_eq!(report.chunks_emitted, 1);
        assert!(report.time_to_first_audio.is_none());
    }

    #[test]
    fn missing_breath_asset_fails_construction() {
        let config = EngineConfig {
            breath_asset: Some(PathBuf::from("no/such/breath.wav")),
            ..Default::default()
        };
        let result =
            ProsodicEngine::new(config, Arc::new(SilentTts::new(24_000)), Arc::new(NoopSink));
        assert!(result.is_err());
    }

    #[test]
    fn default_breath_is_stable() {
        let a = load_breath(&EngineConfig::default()).unwrap();
        let b = load_breath(&EngineConfig::default()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.duration(), Duration::from_millis(DEFAULT_BREATH_MS));
    }
}
