//! TTS backends and the shared backend pool.
//!
//! The engine treats every chunk as one request/response pair; whatever
//! streaming the backend does internally is invisible here.

use crate::audio::AudioBuffer;
use crate::error::{ProsodyError, ProsodyResult};
use crate::syllable::estimate_text_syllables;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Voice selection passed through to the backend untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceParams {
    /// Backend-specific voice identifier (e.g. "alloy")
    pub voice_id: String,
    /// Speaking rate multiplier (1.0 = normal)
    #[serde(default = "default_speed")]
    pub speed: f32,
}

fn default_speed() -> f32 {
    1.0
}

impl VoiceParams {
    pub fn new(voice_id: impl Into<String>) -> Self {
        Self {
            voice_id: voice_id.into(),
            speed: default_speed(),
        }
    }
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self::new("alloy")
    }
}

/// Backend that turns one chunk of text into audio.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Synthesize `text`. Errors are treated as fatal to the utterance; slow
    /// responses are handled by the scheduler's timeout, not here.
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> ProsodyResult<AudioBuffer>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "tts"
    }
}

/// Placeholder TTS: silence sized like speech. Keeps the pipeline testable without a network.
#[derive(Debug, Clone)]
pub struct SilentTts {
    pub sample_rate: u32,
    pub ms_per_syllable: u32,
}

impl SilentTts {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ms_per_syllable: 220,
        }
    }
}

#[async_trait]
impl TtsBackend for SilentTts {
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> ProsodyResult<AudioBuffer> {
        if text.trim().is_empty() {
            return Ok(AudioBuffer::empty(self.sample_rate));
        }
        let speed = if voice.speed > 0.0 { voice.speed } else { 1.0 };
        let ms = f64::from(estimate_text_syllables(text) * self.ms_per_syllable) / f64::from(speed);
        Ok(AudioBuffer::silence(
            Duration::from_millis(ms.round() as u64),
            self.sample_rate,
        ))
    }

    fn name(&self) -> &str {
        "silent"
    }
}

/// Production TTS backend: OpenAI-compatible `/audio/speech` API returning WAV.
/// Uses `TTS_API_URL` (e.g. https://api.openai.com/v1), `TTS_API_KEY` and `TTS_MODEL`.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleTts {
    /// Base URL without trailing slash
    pub base_url: String,
    /// Bearer API key
    pub api_key: String,
    /// TTS model: tts-1 (fast) or tts-1-hd (higher quality)
    pub model: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleTts {
    /// Build from environment: TTS_API_URL, TTS_API_KEY, TTS_MODEL.
    pub fn from_env() -> ProsodyResult<Self> {
        let base_url = std::env::var("TTS_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("TTS_API_KEY")
            .map_err(|_| ProsodyError::Config("TTS requires TTS_API_KEY".to_string()))?;
        let model = std::env::var("TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string());
        Self::new(base_url, api_key, model)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> ProsodyResult<Self> {
        // Connections are pooled by the client and shared by every clone.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }
}

#[async_trait]
impl TtsBackend for OpenAiCompatibleTts {
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> ProsodyResult<AudioBuffer> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(AudioBuffer::empty(24_000));
        }
        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": voice.voice_id,
            "speed": voice.speed,
            "response_format": "wav",
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ProsodyError::Backend(format!("TTS API error {}: {}", status, body)));
        }
        let bytes = res.bytes().await?;
        AudioBuffer::from_wav_bytes(&bytes)
            .map_err(|e| ProsodyError::Backend(format!("undecodable TTS response: {}", e)))
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

/// Shared handle to one backend, bounding concurrent requests across utterances.
///
/// Cloning is cheap; every clone draws permits from the same semaphore.
#[derive(Clone)]
pub struct BackendPool {
    backend: Arc<dyn TtsBackend>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl BackendPool {
    pub fn new(backend: Arc<dyn TtsBackend>, max_concurrent: usize) -> Self {
        let capacity = max_concurrent.max(1);
        info!(
            backend = backend.name(),
            capacity, "TTS backend pool ready"
        );
        Self {
            backend,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a permit, then synthesize. The permit is released when the
    /// request finishes or its future is dropped.
    pub async fn synthesize(&self, text: &str, voice: &VoiceParams) -> ProsodyResult<AudioBuffer> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ProsodyError::Backend("backend pool closed".to_string()))?;
        debug!(backend = self.backend.name(), chars = text.len(), "backend request");
        self.backend.synthesize(text, voice).await
    }

    /// Like [`BackendPool::synthesize`], but the backend call (not the wait for
    /// a permit) must finish within `deadline`.
    pub async fn synthesize_within(
        &self,
        chunk: usize,
        text: &str,
        voice: &VoiceParams,
        deadline: Duration,
    ) -> ProsodyResult<AudioBuffer> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ProsodyError::Backend("backend pool closed".to_string()))?;
        let started = tokio::time::Instant::now();
        match tokio::time::timeout(deadline, self.backend.synthesize(text, voice)).await {
            Ok(result) => result,
            Err(_) => Err(ProsodyError::BackendTimeout {
                chunk,
                elapsed: started.elapsed(),
            }),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl std::fmt::Debug for BackendPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendPool")
            .field("backend", &self.backend.name())
            .field("capacity", &self.capacity)
            .finish()
    }
}
