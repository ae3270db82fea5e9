//! Integration tests for the prosodic pipeline
//!
//! Backends are scripted in-process; slow requests use tokio's paused clock,
//! so nothing here needs a network or real time.

use async_trait::async_trait;
use prosody_engine::{
    plan, plan_with, BackendPool, BoundaryType, ChannelSink, EngineConfig, ProsodicConfig,
    ProsodicEngine, ProsodyError, ProsodyResult, TtsBackend, UtteranceOutcome, VoiceParams,
};
use prosody_engine::{AttributionEvent, AudioBuffer, NoopSink, SilentTts};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const RATE: u32 = 1_000;

/// Returns 100 samples per chunk; selected texts are slow or fail.
#[derive(Default)]
struct ScriptedTts {
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    fail_on: Option<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTts {
    fn slow(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(text.to_string(), delay);
        self
    }

    fn every(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    fn failing(mut self, text: &str) -> Self {
        self.fail_on = Some(text.to_string());
        self
    }
}

#[async_trait]
impl TtsBackend for ScriptedTts {
    async fn synthesize(&self, text: &str, _voice: &VoiceParams) -> ProsodyResult<AudioBuffer> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.get(text).copied().unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on.as_deref() == Some(text) {
            return Err(ProsodyError::Backend("voice rejected".into()));
        }
        Ok(AudioBuffer::new(vec![0.3; 100], RATE))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        sample_rate: RATE,
        ..Default::default()
    }
}

fn engine_with(
    backend: Arc<dyn TtsBackend>,
) -> (ProsodicEngine, UnboundedReceiver<AttributionEvent>) {
    let (sink, events) = ChannelSink::new();
    let engine = ProsodicEngine::new(engine_config(), backend, Arc::new(sink)).unwrap();
    (engine, events)
}

fn drain(events: &mut UnboundedReceiver<AttributionEvent>) -> Vec<AttributionEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = events.try_recv() {
        out.push(ev);
    }
    out
}

const FOUR_SENTENCES: &str = "Good morning. We shipped it today. The team is proud. See you soon.";

const SAMPLES: &[&str] = &[
    "Hello, world! This is a test of the prosodic parser.",
    "Okay then. I wanted to call you because the order shipped, and it should arrive on Friday.",
    "First, we gather the data; then we clean it. Finally we train the model and we evaluate it carefully.",
    "Wait... what? No - really?! \"Yes,\" she said (quietly).",
    "one",
    "a b c d e f g h i j k l m n o p",
];

#[test]
fn chunk_texts_rebuild_the_input() {
    for text in SAMPLES {
        let chunks = plan(text);
        let joined: Vec<&str> = chunks.iter().map(|c| c.text()).collect();
        let normalized: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(joined.join(" "), normalized.join(" "), "{}", text);
    }
}

#[test]
fn first_chunk_respects_word_count() {
    for first in 1..=4 {
        for text in SAMPLES {
            let chunks = plan_with(text, first, 10, 2);
            assert!(chunks[0].word_count() <= first, "{} / {}", first, text);
        }
    }
}

#[test]
fn exactly_one_first_and_one_final() {
    for text in SAMPLES {
        let chunks = plan(text);
        assert_eq!(chunks.iter().filter(|c| c.is_first()).count(), 1);
        assert_eq!(chunks.iter().filter(|c| c.is_final()).count(), 1);
        assert!(chunks[0].is_first());
        assert!(chunks.last().unwrap().is_final());
    }
}

#[test]
fn boundaries_link_and_positions_rise() {
    for text in SAMPLES {
        let chunks = plan(text);
        assert_eq!(chunks[0].boundary_before(), BoundaryType::None);
        assert_eq!(chunks[0].position_ratio(), 0.0);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].boundary_after(), pair[1].boundary_before());
            assert!(pair[0].position_ratio() <= pair[1].position_ratio());
        }
        if chunks.len() > 1 {
            assert_eq!(chunks.last().unwrap().position_ratio(), 1.0);
        }
    }
}

#[test]
fn forty_unpunctuated_words_breathe() {
    let words: Vec<&str> = "the old red barn stood near the quiet river bank"
        .split(' ')
        .cycle()
        .take(40)
        .collect();
    let text = words.join(" ");
    let chunks = plan(&text);

    assert!(chunks.len() >= 3, "{:?}", chunks);
    let inner = &chunks[1..chunks.len() - 1];
    assert!(!inner.is_empty());
    for chunk in inner {
        assert_eq!(chunk.boundary_after(), BoundaryType::Breath, "{:?}", chunk);
    }
    for chunk in &chunks[1..] {
        assert!(chunk.estimated_syllable_count() <= 10, "{:?}", chunk);
    }
}

#[test]
fn tighter_budget_means_more_breaths() {
    let text = "the old red barn stood near the quiet river bank for many long years";
    let loose = plan_with(text, 2, 10, 2);
    let tight = plan_with(text, 2, 4, 2);
    assert!(tight.len() > loose.len());
    for chunk in &tight[1..] {
        assert!(chunk.estimated_syllable_count() <= 4, "{:?}", chunk);
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_on_second_chunk_substitutes_silence() {
    init_logging();
    let backend = ScriptedTts::default().slow("We shipped it today.", Duration::from_secs(10));
    let (engine, mut events) = engine_with(Arc::new(backend));
    let chunks = engine.plan(FOUR_SENTENCES, &ProsodicConfig::default());
    assert_eq!(chunks.len(), 4);

    let report = engine
        .speak(FOUR_SENTENCES, VoiceParams::default(), &ProsodicConfig::default())
        .unwrap()
        .finish()
        .await;

    assert_eq!(report.outcome, UtteranceOutcome::Completed);
    assert_eq!(report.chunks_emitted, 4);
    assert_eq!(report.degraded_chunks, 1);

    let events = drain(&mut events);
    assert_eq!(events.len(), 4);
    for (i, ev) in events.iter().enumerate() {
        assert_eq!(ev.chunk_position, i);
        if i == 1 {
            assert!(ev.degraded);
            let expected = chunks[1].estimated_duration(engine.config().ms_per_syllable);
            assert_eq!(ev.audio_ms, expected.as_millis() as u64);
        } else {
            assert!(!ev.degraded);
            assert_eq!(ev.audio_ms, 100);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_suppresses_later_attribution() {
    init_logging();
    let backend = ScriptedTts::default().every(Duration::from_millis(500));
    let (engine, mut events) = engine_with(Arc::new(backend));

    let mut handle = engine
        .speak(FOUR_SENTENCES, VoiceParams::default(), &ProsodicConfig::default())
        .unwrap();
    let first = handle.recv().await.unwrap();
    assert!(!first.is_empty());
    handle.cancel();
    let report = handle.finish().await;

    assert_eq!(report.outcome, UtteranceOutcome::Cancelled);
    assert!(report.chunks_emitted < 4);
    assert_eq!(drain(&mut events).len(), report.chunks_emitted);
}

#[tokio::test]
async fn cancel_discards_audio_already_stitched() {
    init_logging();
    let (engine, mut events) = engine_with(Arc::new(SilentTts::new(RATE)));

    let mut handle = engine
        .speak(FOUR_SENTENCES, VoiceParams::default(), &ProsodicConfig::default())
        .unwrap();
    assert!(handle.recv().await.is_some());
    // Give an instant backend every chance to run ahead of the listener.
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    handle.cancel();

    assert!(handle.recv().await.is_none());
    assert!(handle.try_recv().is_none());
    let report = handle.finish().await;
    assert_eq!(report.outcome, UtteranceOutcome::Cancelled);
    assert_eq!(report.chunks_emitted, 1);

    let events = drain(&mut events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].chunk_position, 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_cancels() {
    let backend: Arc<dyn TtsBackend> =
        Arc::new(ScriptedTts::default().every(Duration::from_millis(1_500)));
    let (engine, _events) = engine_with(backend);
    let handle = engine
        .speak(FOUR_SENTENCES, VoiceParams::default(), &ProsodicConfig::default())
        .unwrap();
    let (_, audio, cancel, task) = handle.into_parts();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(engine.pool().available() < engine.pool().capacity());
    drop(audio);

    // Far sooner than the backend would answer.
    let report = tokio::time::timeout(Duration::from_millis(500), task)
        .await
        .expect("utterance should stop once nobody listens")
        .unwrap();
    assert!(cancel.is_cancelled());
    assert_eq!(report.outcome, UtteranceOutcome::Cancelled);
    assert_eq!(report.chunks_emitted, 0);

    // let the aborted request task release its permit
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.pool().available(), engine.pool().capacity());
}

#[tokio::test]
async fn backend_error_returns_partial_audio() {
    init_logging();
    let backend = ScriptedTts::default().failing("The team is proud.");
    let (engine, mut events) = engine_with(Arc::new(backend));

    let (audio, report) = engine
        .synthesize(FOUR_SENTENCES, VoiceParams::default(), &ProsodicConfig::default())
        .await
        .unwrap();

    assert!(report.is_partial());
    assert_eq!(report.chunks_emitted, 2);
    assert!(!audio.is_empty());
    let events = drain(&mut events);
    assert_eq!(events.iter().map(|e| e.chunk_position).collect::<Vec<_>>(), vec![0, 1]);
}

#[tokio::test(start_paused = true)]
async fn lookahead_bounds_requests_in_flight() {
    for depth in [1usize, 2] {
        let backend = Arc::new(ScriptedTts::default().every(Duration::from_millis(100)));
        let config = EngineConfig {
            lookahead_depth: depth,
            ..engine_config()
        };
        let engine = ProsodicEngine::new(config, backend.clone(), Arc::new(NoopSink)).unwrap();
        let report = engine
            .speak(FOUR_SENTENCES, VoiceParams::default(), &ProsodicConfig::default())
            .unwrap()
            .finish()
            .await;
        assert_eq!(report.outcome, UtteranceOutcome::Completed);
        assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), depth);
    }
}

#[tokio::test(start_paused = true)]
async fn utterances_share_one_pool() {
    init_logging();
    let backend: Arc<dyn TtsBackend> =
        Arc::new(ScriptedTts::default().every(Duration::from_millis(50)));
    let pool = BackendPool::new(backend, 1);
    let a = ProsodicEngine::with_pool(engine_config(), pool.clone(), Arc::new(NoopSink)).unwrap();
    let b = ProsodicEngine::with_pool(engine_config(), pool.clone(), Arc::new(NoopSink)).unwrap();

    let options = ProsodicConfig::default();
    let (ra, rb) = futures::future::join(
        a.synthesize(FOUR_SENTENCES, VoiceParams::new("alloy"), &options),
        b.synthesize("Hello, world! How are you today?", VoiceParams::new("nova"), &options),
    )
    .await;

    let (_, ra) = ra.unwrap();
    let (_, rb) = rb.unwrap();
    assert_eq!(ra.outcome, UtteranceOutcome::Completed);
    assert_eq!(rb.outcome, UtteranceOutcome::Completed);
    assert_ne!(ra.utterance_id, rb.utterance_id);
    assert_eq!(pool.available(), 1);
}

#[tokio::test]
async fn seeded_breaths_are_reproducible() {
    let (engine, _events) = engine_with(Arc::new(SilentTts::new(RATE)));
    let text = "Well, that went better than expected. We should celebrate, honestly.";
    let options = ProsodicConfig::default();

    let mut runs = Vec::new();
    for _ in 0..2 {
        let handle = engine
            .speak_with_rng(
                text,
                VoiceParams::default(),
                &options,
                Box::new(ChaCha20Rng::seed_from_u64(42)),
            )
            .unwrap();
        runs.push(handle.collect(RATE).await);
    }
    assert_eq!(runs[0].0, runs[1].0);
    assert_eq!(runs[0].1.breaths_inserted, runs[1].1.breaths_inserted);
}

#[tokio::test]
async fn disabled_breaths_keep_the_timing() {
    let (engine, _events) = engine_with(Arc::new(SilentTts::new(RATE)));
    let text = "Well, that went better than expected. We should celebrate, honestly.";
    let seed = || Box::new(ChaCha20Rng::seed_from_u64(7));

    let on = engine
        .speak_with_rng(text, VoiceParams::default(), &ProsodicConfig::default(), seed())
        .unwrap()
        .collect(RATE)
        .await;
    let off_options = ProsodicConfig {
        enable_breath_sounds: false,
        ..Default::default()
    };
    let off = engine
        .speak_with_rng(text, VoiceParams::default(), &off_options, seed())
        .unwrap()
        .collect(RATE)
        .await;

    assert_eq!(off.1.breaths_inserted, 0);
    assert!(off.0.samples.iter().all(|&s| s == 0.0));
    // A breath can only lengthen a junction.
    assert!(on.0.len() >= off.0.len());
}
