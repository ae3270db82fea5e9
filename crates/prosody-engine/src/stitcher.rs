//! Audio stitcher: turns the ordered chunk stream into one continuous signal.
//!
//! At each junction the chunk's `boundary_after` decides what happens: natural
//! and forced boundaries get their pause plus a chance of a breath, `None` gets
//! a short crossfade. The tail of a `None` chunk is held back until the next
//! chunk arrives so the two can overlap.

use crate::attribution::{AttributionEvent, AttributionSink};
use crate::audio::{crossfade_into, mix_into, samples_for, AudioBuffer};
use crate::boundary::{BoundaryType, PauseConfig};
use crate::scheduler::SynthesizedChunk;
use chrono::Utc;
use rand::{Rng, RngCore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct StitcherConfig {
    pub sample_rate: u32,
    pub crossfade: Duration,
    pub pauses: PauseConfig,
    pub enable_breath_sounds: bool,
    pub breath_gain: f32,
}

impl Default for StitcherConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            crossfade: Duration::from_millis(20),
            pauses: PauseConfig::default(),
            enable_breath_sounds: true,
            breath_gain: 0.6,
        }
    }
}

/// What the stitcher did for one utterance.
#[derive(Debug, Clone, Default)]
pub struct StitchReport {
    pub chunks_emitted: usize,
    pub degraded_chunks: usize,
    pub breaths_inserted: usize,
    pub samples_emitted: usize,
    /// When the first non-empty audio left the stitcher
    pub first_audio_at: Option<Instant>,
    pub cancelled: bool,
}

pub struct AudioStitcher {
    config: StitcherConfig,
    breath: Arc<AudioBuffer>,
    rng: Box<dyn RngCore + Send>,
    sink: Arc<dyn AttributionSink>,
    utterance_id: String,
    voice_id: String,
    held_tail: Vec<f32>,
    report: StitchReport,
}

impl AudioStitcher {
    pub fn new(
        config: StitcherConfig,
        breath: Arc<AudioBuffer>,
        rng: Box<dyn RngCore + Send>,
        sink: Arc<dyn AttributionSink>,
        utterance_id: impl Into<String>,
        voice_id: impl Into<String>,
    ) -> Self {
        Self {
            config,
            breath,
            rng,
            sink,
            utterance_id: utterance_id.into(),
            voice_id: voice_id.into(),
            held_tail: Vec::new(),
            report: StitchReport::default(),
        }
    }

    /// Consume chunks until the scheduler closes the channel or `cancel` fires.
    ///
    /// `out` must be a capacity-1 channel: a segment counts as played once the
    /// consumer has taken it and the slot is free again. Attribution for a chunk
    /// is emitted only then, so nothing is attributed for audio a cancel
    /// discards. A dropped output receiver cancels the whole utterance.
    pub async fn run(
        mut self,
        mut chunks: mpsc::Receiver<SynthesizedChunk>,
        out: mpsc::Sender<AudioBuffer>,
        cancel: CancellationToken,
    ) -> StitchReport {
        debug_assert_eq!(out.max_capacity(), 1, "stitcher output must hold one segment");
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.abandon(),
                _ = out.closed() => {
                    // Nobody is listening any more: stop the scheduler as well.
                    cancel.cancel();
                    return self.abandon();
                }
                next = chunks.recv() => next,
            };
            let Some(item) = next else {
                break;
            };

            let event = AttributionEvent {
                utterance_id: self.utterance_id.clone(),
                chunk_position: item.chunk.index(),
                boundary_type: item.chunk.boundary_after(),
                voice_id: self.voice_id.clone(),
                degraded: item.degraded,
                audio_ms: item.audio.duration().as_millis() as u64,
                timestamp: Utc::now(),
            };
            let segment = self.stitch(item);

            if !self.deliver(&out, segment, &cancel).await {
                return self.abandon();
            }

            self.report.chunks_emitted += 1;
            if event.degraded {
                self.report.degraded_chunks += 1;
            }
            self.sink.emit(AttributionEvent {
                timestamp: Utc::now(),
                ..event
            });
        }

        // Scheduler finished or aborted: whatever is held back belongs to an
        // emitted chunk, so it goes out too.
        let tail = std::mem::take(&mut self.held_tail);
        if !self.deliver(&out, tail, &cancel).await {
            return self.abandon();
        }
        self.report
    }

    /// Append `item` to the signal and return the samples ready to emit now.
    pub fn stitch(&mut self, item: SynthesizedChunk) -> Vec<f32> {
        let chunk = item.chunk;
        let mut samples = item.audio.samples;

        if !self.held_tail.is_empty() {
            let tail = std::mem::take(&mut self.held_tail);
            let n = tail.len().min(samples.len());
            let (lead, overlap) = tail.split_at(tail.len() - n);
            crossfade_into(overlap, &mut samples[..n]);
            let mut joined = Vec::with_capacity(lead.len() + samples.len());
            joined.extend_from_slice(lead);
            joined.extend_from_slice(&samples);
            samples = joined;
        }

        let boundary = chunk.boundary_after();
        let prosody = self.config.pauses.get(boundary);
        let pause = samples_for(prosody.pause(), self.config.sample_rate);

        if chunk.is_final() {
            // No following junction: keep the closing pause, skip the breath.
            samples.resize(samples.len() + pause, 0.0);
        } else if boundary == BoundaryType::None {
            let n = samples_for(self.config.crossfade, self.config.sample_rate)
                .min(samples.len() / 2);
            self.held_tail = samples.split_off(samples.len() - n);
        } else {
            let mut gap = vec![0.0; pause];
            let draw: f32 = self.rng.gen();
            if draw < prosody.breath_probability && self.config.enable_breath_sounds {
                mix_into(&mut gap, &self.breath.samples, self.config.breath_gain);
                self.report.breaths_inserted += 1;
            }
            debug!(
                chunk = chunk.index(),
                boundary = %boundary,
                gap = gap.len(),
                "junction"
            );
            samples.extend_from_slice(&gap);
        }
        samples
    }

    /// Hand `samples` to the consumer and wait until it has taken them.
    /// False when the utterance was cancelled or the receiver went away first.
    async fn deliver(
        &mut self,
        out: &mpsc::Sender<AudioBuffer>,
        samples: Vec<f32>,
        cancel: &CancellationToken,
    ) -> bool {
        if samples.is_empty() {
            return true;
        }
        let len = samples.len();
        let buffer = AudioBuffer::new(samples, self.config.sample_rate);
        let queued = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            res = out.send(buffer) => res.is_ok(),
        };
        if !queued {
            cancel.cancel();
            return false;
        }
        if self.report.first_audio_at.is_none() {
            self.report.first_audio_at = Some(Instant::now());
        }

        // The slot frees only when the consumer receives the segment.
        let taken = tokio::select! {
            biased;
            permit = out.reserve() => permit.is_ok(),
            _ = cancel.cancelled() => false,
        };
        if !taken {
            cancel.cancel();
            return false;
        }
        self.report.samples_emitted += len;
        true
    }

    fn abandon(mut self) -> StitchReport {
        debug!(
            utterance_id = %self.utterance_id,
            discarded = self.held_tail.len(),
            "stitcher cancelled"
        );
        self.held_tail.clear();
        self.report.cancelled = true;
        self.report
    }
}
