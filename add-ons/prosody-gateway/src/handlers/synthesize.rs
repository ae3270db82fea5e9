//! `POST /synthesize/prosodic`: speak text and stream the stitched audio back.
//!
//! The body is written as segments leave the stitcher, so the client starts
//! receiving audio after the first chunk. Closing the connection cancels the
//! utterance.

use crate::AppState;
use async_stream::stream;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use prosody_engine::audio::{f32_le_bytes, pcm16_le_bytes, streaming_wav_header};
use prosody_engine::{
    ProsodicChunk, ProsodicConfig, ProsodyError, UtteranceOutcome, UtteranceReport, VoiceParams,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Raw little-endian f32 samples
    PcmF32le,
    /// Raw little-endian 16-bit samples
    PcmS16le,
    /// 16-bit mono WAV with an open-ended header
    #[default]
    Wav,
}

impl OutputFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Wav => "audio/wav",
            OutputFormat::PcmF32le | OutputFormat::PcmS16le => "audio/pcm",
        }
    }

    pub fn encode(self, samples: &[f32]) -> Vec<u8> {
        match self {
            OutputFormat::PcmF32le => f32_le_bytes(samples),
            OutputFormat::PcmS16le | OutputFormat::Wav => pcm16_le_bytes(samples),
        }
    }
}

/// `"alloy"` or `{"voice_id": "alloy", "speed": 1.1}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VoiceField {
    Id(String),
    Params(VoiceParams),
}

impl From<VoiceField> for VoiceParams {
    fn from(field: VoiceField) -> Self {
        match field {
            VoiceField::Id(id) => VoiceParams::new(id),
            VoiceField::Params(params) => params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SynthesizeRequest {
    pub text: String,
    #[serde(default)]
    pub voice: Option<VoiceField>,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub prosodic_config: ProsodicConfig,
}

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub chunks: Vec<ProsodicChunk>,
}

fn error_response(status: StatusCode, err: &ProsodyError) -> Response {
    tracing::warn!(target: "prosody::gateway", "request rejected: {}", err);
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

/// POST /synthesize/prosodic
pub async fn synthesize_prosodic(
    State(state): State<AppState>,
    Json(req): Json<SynthesizeRequest>,
) -> Response {
    let voice: VoiceParams = req.voice.map(Into::into).unwrap_or_default();
    let handle = match state.engine.speak(&req.text, voice, &req.prosodic_config) {
        Ok(h) => h,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };

    let format = req.output_format;
    let sample_rate = state.engine.config().sample_rate;
    let (utterance_id, mut audio, cancel, report) = handle.into_parts();
    tracing::info!(
        target: "prosody::gateway",
        utterance_id = %utterance_id,
        format = ?format,
        chars = req.text.len(),
        "streaming utterance"
    );

    // Dropped with the body when the client goes away.
    let guard = cancel.drop_guard();
    let body = stream! {
        if format == OutputFormat::Wav {
            yield Ok::<_, Infallible>(Bytes::from(streaming_wav_header(sample_rate)));
        }
        while let Some(segment) = audio.recv().await {
            yield Ok(Bytes::from(format.encode(&segment.samples)));
        }
        let _ = guard.disarm();
        // Headers are long gone; a cut-short utterance can only be reported here.
        match report.await {
            Ok(report) => log_outcome(&report),
            Err(e) => tracing::error!(target: "prosody::gateway", "utterance task failed: {}", e),
        }
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
            (header::HeaderName::from_static("x-utterance-id"), utterance_id),
            (header::HeaderName::from_static("x-sample-rate"), sample_rate.to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

fn log_outcome(report: &UtteranceReport) {
    match &report.outcome {
        UtteranceOutcome::Partial { reason } => tracing::warn!(
            target: "prosody::gateway",
            utterance_id = %report.utterance_id,
            emitted = report.chunks_emitted,
            planned = report.chunks_planned,
            "response truncated: {}",
            reason
        ),
        outcome => tracing::info!(
            target: "prosody::gateway",
            utterance_id = %report.utterance_id,
            outcome = ?outcome,
            emitted = report.chunks_emitted,
            "response finished"
        ),
    }
}

/// POST /synthesize/prosodic/plan – the chunk plan only, no audio.
pub async fn plan_prosodic(
    State(state): State<AppState>,
    Json(req): Json<SynthesizeRequest>,
) -> Response {
    if let Err(e) = req.prosodic_config.validate() {
        return error_response(StatusCode::BAD_REQUEST, &e);
    }
    let chunks = state.engine.plan(&req.text, &req.prosodic_config);
    Json(PlanResponse { chunks }).into_response()
}
