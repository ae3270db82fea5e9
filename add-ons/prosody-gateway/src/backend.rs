//! Backend selection at startup: the OpenAI-compatible TTS when keys are
//! present, else the silent placeholder so the pipeline still runs.

use prosody_engine::{
    AttributionSink, FanoutSink, OpenAiCompatibleTts, SilentTts, TracingSink, TtsBackend,
    WebhookSink,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Pick the best available TTS backend and log which one was chosen.
pub fn select_backend(sample_rate: u32) -> Arc<dyn TtsBackend> {
    match OpenAiCompatibleTts::from_env() {
        Ok(tts) => {
            info!(
                target: "prosody::gateway",
                "TTS: [OpenAI-compatible] {} (model {})",
                tts.base_url,
                tts.model
            );
            Arc::new(tts)
        }
        Err(e) => {
            info!(
                target: "prosody::gateway",
                "TTS: [Silent] ({}; set TTS_API_KEY for real speech)",
                e
            );
            Arc::new(SilentTts::new(sample_rate))
        }
    }
}

/// Attribution goes to the log; `ATTRIBUTION_WEBHOOK_URL` adds a webhook.
pub fn select_sink() -> Arc<dyn AttributionSink> {
    let mut sinks = FanoutSink::new(vec![Arc::new(TracingSink)]);
    if let Ok(url) = std::env::var("ATTRIBUTION_WEBHOOK_URL") {
        match WebhookSink::new(url.clone()) {
            Ok(hook) => {
                info!(target: "prosody::gateway", "Attribution webhook: {}", url);
                sinks.push(Arc::new(hook));
            }
            Err(e) => warn!(target: "prosody::gateway", "Attribution webhook disabled: {}", e),
        }
    }
    Arc::new(sinks)
}
