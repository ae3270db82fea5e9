//! Pipeline scheduler: drives planned chunks through the backend in order.
//!
//! Requests run as their own tasks so that chunk *k+1* keeps synthesizing while
//! chunk *k* waits for the stitcher. At most `lookahead_depth` requests are in
//! flight; results that finish early stay in their task until their turn.

use crate::audio::AudioBuffer;
use crate::backend::{BackendPool, VoiceParams};
use crate::error::ProsodyError;
use crate::planner::ProsodicChunk;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A chunk together with its audio, ready for stitching.
#[derive(Debug, Clone)]
pub struct SynthesizedChunk {
    pub chunk: ProsodicChunk,
    pub audio: AudioBuffer,
    /// Audio is substituted silence after a backend timeout
    pub degraded: bool,
}

/// How the scheduler finished.
#[derive(Debug)]
pub enum SchedulerOutcome {
    /// Every chunk was handed to the stitcher
    Completed,
    /// Cancelled, or the stitcher went away
    Cancelled,
    /// A backend error ended the utterance at `chunk`
    Aborted { chunk: usize, error: ProsodyError },
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Requests in flight ahead of the chunk being stitched (default: 1)
    pub lookahead_depth: usize,
    /// Deadline per backend request
    pub request_timeout: Duration,
    /// Pace used to size substituted silence
    pub ms_per_syllable: u32,
    /// Every returned buffer must use this rate
    pub sample_rate: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lookahead_depth: 1,
            request_timeout: Duration::from_millis(2_000),
            ms_per_syllable: 220,
            sample_rate: 24_000,
        }
    }
}

type ChunkResult = Result<SynthesizedChunk, ProsodyError>;

/// Aborts the request task when dropped, so cancelling the scheduler stops
/// requests for chunks that will never be played.
struct InFlight {
    index: usize,
    handle: JoinHandle<ChunkResult>,
}

impl Future for InFlight {
    type Output = Result<ChunkResult, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Clone)]
pub struct PipelineScheduler {
    pool: BackendPool,
    config: SchedulerConfig,
}

impl PipelineScheduler {
    pub fn new(pool: BackendPool, config: SchedulerConfig) -> Self {
        Self { pool, config }
    }

    /// Start scheduling on a new task. Completed chunks arrive in plan order on
    /// the returned receiver; the handle resolves once the scheduler stops.
    pub fn spawn(
        &self,
        utterance_id: impl Into<String>,
        chunks: Vec<ProsodicChunk>,
        voice: VoiceParams,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<SynthesizedChunk>, JoinHandle<SchedulerOutcome>) {
        let (tx, rx) = mpsc::channel(1);
        let scheduler = self.clone();
        let utterance_id = utterance_id.into();
        let handle = tokio::spawn(async move {
            scheduler.run(&utterance_id, chunks, voice, tx, cancel).await
        });
        (rx, handle)
    }

    /// Drive `chunks` through the backend, sending results to `tx` in order.
    pub async fn run(
        &self,
        utterance_id: &str,
        chunks: Vec<ProsodicChunk>,
        voice: VoiceParams,
        tx: mpsc::Sender<SynthesizedChunk>,
        cancel: CancellationToken,
    ) -> SchedulerOutcome {
        let depth = self.config.lookahead_depth.max(1);
        let voice = Arc::new(voice);
        let total = chunks.len();
        let mut pending = chunks.into_iter();
        let mut window: VecDeque<InFlight> = VecDeque::with_capacity(depth);

        info!(utterance_id, chunks = total, depth, "scheduling utterance");

        // Chunk 0 (and any further look-ahead) goes out immediately.
        self.fill(&mut window, &mut pending, depth, &voice);

        while let Some(front) = window.pop_front() {
            let index = front.index;
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(utterance_id, chunk = index, "cancelled while waiting on backend");
                    return SchedulerOutcome::Cancelled;
                }
                joined = front => joined,
            };

            let item = match joined {
                Ok(Ok(item)) => item,
                Ok(Err(error)) => {
                    error!(
                        utterance_id,
                        chunk = index,
                        "backend failed, aborting utterance: {}", error
                    );
                    return SchedulerOutcome::Aborted { chunk: index, error };
                }
                Err(join_err) => {
                    error!(utterance_id, chunk = index, "backend task failed: {}", join_err);
                    return SchedulerOutcome::Aborted {
                        chunk: index,
                        error: ProsodyError::Backend(join_err.to_string()),
                    };
                }
            };

            // Chunk k is ready: submit k+depth before handing k over.
            self.fill(&mut window, &mut pending, depth, &voice);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return SchedulerOutcome::Cancelled,
                sent = tx.send(item) => {
                    if sent.is_err() {
                        debug!(utterance_id, chunk = index, "stitcher dropped, stopping");
                        return SchedulerOutcome::Cancelled;
                    }
                }
            }
        }

        debug!(utterance_id, "all chunks scheduled");
        SchedulerOutcome::Completed
    }

    fn fill(
        &self,
        window: &mut VecDeque<InFlight>,
        pending: &mut impl Iterator<Item = ProsodicChunk>,
        depth: usize,
        voice: &Arc<VoiceParams>,
    ) {
        while window.len() < depth {
            let Some(chunk) = pending.next() else {
                return;
            };
            let index = chunk.index();
            let pool = self.pool.clone();
            let config = self.config.clone();
            let voice = Arc::clone(voice);
            let handle =
                tokio::spawn(async move { synthesize_chunk(&pool, &config, chunk, &voice).await });
            window.push_back(InFlight { index, handle });
        }
    }
}

async fn synthesize_chunk(
    pool: &BackendPool,
    config: &SchedulerConfig,
    chunk: ProsodicChunk,
    voice: &VoiceParams,
) -> ChunkResult {
    if chunk.text().is_empty() {
        return Ok(SynthesizedChunk {
            chunk,
            audio: AudioBuffer::empty(config.sample_rate),
            degraded: false,
        });
    }

    match pool
        .synthesize_within(chunk.index(), chunk.text(), voice, config.request_timeout)
        .await
    {
        Ok(audio) => {
            if !audio.is_empty() && audio.sample_rate != config.sample_rate {
                return Err(ProsodyError::Audio(format!(
                    "backend returned {} Hz audio, expected {} Hz",
                    audio.sample_rate, config.sample_rate
                )));
            }
            Ok(SynthesizedChunk {
                chunk,
                audio,
                degraded: false,
            })
        }
        Err(timeout @ ProsodyError::BackendTimeout { .. }) => {
            let fill = chunk.estimated_duration(config.ms_per_syllable);
            warn!("{}; substituting {:?} of silence", timeout, fill);
            Ok(SynthesizedChunk {
                chunk,
                audio: AudioBuffer::silence(fill, config.sample_rate),
                degraded: true,
            })
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SilentTts, TtsBackend};
    use crate::error::ProsodyResult;
    use crate::planner::plan;
    use async_trait::async_trait;

    struct FailOn {
        text: &'static str,
    }

    #[async_trait]
    impl TtsBackend for FailOn {
        async fn synthesize(&self, text: &str, _voice: &VoiceParams) -> ProsodyResult<AudioBuffer> {
            if text == self.text {
                return Err(ProsodyError::Backend("malformed voice parameters".into()));
            }
            Ok(AudioBuffer::new(vec![0.1; 10], 8_000))
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            sample_rate: 8_000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn delivers_every_chunk_in_order() {
        let pool = BackendPool::new(Arc::new(SilentTts::new(8_000)), 4);
        let scheduler = PipelineScheduler::new(pool, config());
        let chunks = plan("Hello, world! This is fine. And that is fine too.");
        let expected = chunks.len();
        let (mut rx, handle) =
            scheduler.spawn("u", chunks, VoiceParams::default(), CancellationToken::new());

        let mut seen = Vec::new();
        while let Some(item) = rx.recv().await {
            assert!(!item.degraded);
            seen.push(item.chunk.index());
        }
        assert_eq!(seen, (0..expected).collect::<Vec<_>>());
        assert!(matches!(handle.await.unwrap(), SchedulerOutcome::Completed));
    }

    #[tokio::test]
    async fn backend_error_aborts_after_earlier_chunks() {
        let pool = BackendPool::new(Arc::new(FailOn { text: "Yes." }), 4);
        let scheduler = PipelineScheduler::new(pool, config());
        let chunks = plan("Well hello. Yes. Fine.");
        let (mut rx, handle) =
            scheduler.spawn("u", chunks, VoiceParams::default(), CancellationToken::new());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.chunk.text(), "Well hello.");
        assert!(rx.recv().await.is_none());
        match handle.await.unwrap() {
            SchedulerOutcome::Aborted { chunk, error } => {
                assert_eq!(chunk, 1);
                assert!(error.is_fatal());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn wrong_sample_rate_is_fatal() {
        let pool = BackendPool::new(Arc::new(SilentTts::new(16_000)), 1);
        let scheduler = PipelineScheduler::new(pool, config());
        let (mut rx, handle) = scheduler.spawn(
            "u",
            plan("Hello there"),
            VoiceParams::default(),
            CancellationToken::new(),
        );
        assert!(rx.recv().await.is_none());
        assert!(matches!(
            handle.await.unwrap(),
            SchedulerOutcome::Aborted { error: ProsodyError::Audio(_), .. }
        ));
    }

    #[tokio::test]
    async fn empty_chunk_skips_the_backend() {
        let pool = BackendPool::new(Arc::new(FailOn { text: "" }), 1);
        let scheduler = PipelineScheduler::new(pool, config());
        let (mut rx, handle) =
            scheduler.spawn("u", plan("   "), VoiceParams::default(), CancellationToken::new());
        let item = rx.recv().await.unwrap();
        assert!(item.audio.is_empty());
        assert!(matches!(handle.await.unwrap(), SchedulerOutcome::Completed));
    }
}
