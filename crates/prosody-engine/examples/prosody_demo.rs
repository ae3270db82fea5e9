//! Prosody Demo — speak one utterance and write it to a WAV file.
//!
//! Uses `OpenAiCompatibleTts` when `TTS_API_KEY` is set, else `SilentTts`
//! (silence sized like speech, so the pauses and breaths are all you hear).
//!
//! ```text
//! cargo run -p prosody-engine --example prosody_demo -- "Hello, world! This is a test." out.wav
//! ```

use prosody_engine::{
    EngineConfig, OpenAiCompatibleTts, ProsodicConfig, ProsodicEngine, SilentTts, TracingSink,
    TtsBackend, VoiceParams,
};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut args = std::env::args().skip(1);
    let text = args
        .next()
        .unwrap_or_else(|| "Hello, world! This is a test of the prosodic parser.".to_string());
    let out = args.next().unwrap_or_else(|| "prosody_demo.wav".to_string());

    let config = EngineConfig::load()?;
    let tts: Arc<dyn TtsBackend> = match OpenAiCompatibleTts::from_env() {
        Ok(t) => {
            info!("Using OpenAiCompatibleTts ({}).", t.model);
            Arc::new(t)
        }
        Err(e) => {
            info!("Using SilentTts: {}", e);
            Arc::new(SilentTts::new(config.sample_rate))
        }
    };

    let engine = ProsodicEngine::new(config, tts, Arc::new(TracingSink))?;
    for chunk in engine.plan(&text, &ProsodicConfig::default()) {
        info!(
            "chunk {} [{} -> {}] {:?}",
            chunk.index(),
            chunk.boundary_before(),
            chunk.boundary_after(),
            chunk.text()
        );
    }

    let (audio, report) = engine
        .synthesize(&text, VoiceParams::default(), &ProsodicConfig::default())
        .await?;
    std::fs::write(&out, audio.to_wav_bytes()?)?;
    info!(
        "wrote {} ({:?}, outcome {:?}, first audio after {:?})",
        out,
        audio.duration(),
        report.outcome,
        report.time_to_first_audio
    );
    Ok(())
}
