//! Attribution events: which chunk, boundary and voice produced which audio.
//!
//! Sinks are fire-and-forget. `emit` is synchronous and must never block or
//! fail the audio path; delivery problems are logged and dropped.

use crate::boundary::BoundaryType;
use crate::error::{ProsodyError, ProsodyResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One event per chunk whose audio reached the output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionEvent {
    pub utterance_id: String,
    pub chunk_position: usize,
    pub boundary_type: BoundaryType,
    pub voice_id: String,
    /// The chunk's audio was substituted with silence after a backend timeout
    pub degraded: bool,
    pub audio_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Receives attribution events. Implementations must return promptly.
pub trait AttributionSink: Send + Sync {
    fn emit(&self, event: AttributionEvent);
}

/// Drops every event.
#[derive(Debug, Default)]
pub struct NoopSink;

impl AttributionSink for NoopSink {
    fn emit(&self, _event: AttributionEvent) {}
}

/// Writes each event as a structured log line.
#[derive(Debug, Default)]
pub struct TracingSink;

impl AttributionSink for TracingSink {
    fn emit(&self, event: AttributionEvent) {
        if event.degraded {
            warn!(
                target: "prosody::attribution",
                utterance_id = %event.utterance_id,
                chunk = event.chunk_position,
                boundary = %event.boundary_type,
                voice = %event.voice_id,
                audio_ms = event.audio_ms,
                "degraded chunk emitted"
            );
        } else {
            info!(
                target: "prosody::attribution",
                utterance_id = %event.utterance_id,
                chunk = event.chunk_position,
                boundary = %event.boundary_type,
                voice = %event.voice_id,
                audio_ms = event.audio_ms,
                "chunk emitted"
            );
        }
    }
}

/// Forwards events over an unbounded channel. A closed receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<AttributionEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AttributionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AttributionSink for ChannelSink {
    fn emit(&self, event: AttributionEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("attribution receiver gone, dropping event for chunk {}", e.0.chunk_position);
        }
    }
}

/// POSTs each event as JSON from a spawned task. Must be used inside a tokio runtime.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// POST one event, mapping transport failures and non-2xx replies to
    /// [`ProsodyError::Attribution`].
    pub async fn deliver(&self, event: &AttributionEvent) -> ProsodyResult<()> {
        let res = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| ProsodyError::Attribution(format!("delivery failed: {}", e)))?;
        if !res.status().is_success() {
            return Err(ProsodyError::Attribution(format!(
                "webhook rejected event: {}",
                res.status()
            )));
        }
        Ok(())
    }
}

impl AttributionSink for WebhookSink {
    fn emit(&self, event: AttributionEvent) {
        let sink = self.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.deliver(&event).await {
                warn!(
                    target: "prosody::attribution",
                    chunk = event.chunk_position,
                    "{}", e
                );
            }
        });
    }
}

/// Sends each event to every inner sink.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AttributionSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn AttributionSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn AttributionSink>) {
        self.sinks.push(sink);
    }
}

impl AttributionSink for FanoutSink {
    fn emit(&self, event: AttributionEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(position: usize) -> AttributionEvent {
        AttributionEvent {
            utterance_id: "u-1".into(),
            chunk_position: position,
            boundary_type: BoundaryType::Clause,
            voice_id: "alloy".into(),
            degraded: false,
            audio_ms: 420,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(event(0));
        sink.emit(event(1));
        assert_eq!(rx.try_recv().unwrap().chunk_position, 0);
        assert_eq!(rx.try_recv().unwrap().chunk_position, 1);
    }

    #[test]
    fn channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(event(0));
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let (a, mut rx_a) = ChannelSink::new();
        let (b, mut rx_b) = ChannelSink::new();
        let fanout = FanoutSink::new(vec![Arc::new(a), Arc::new(b), Arc::new(NoopSink)]);
        fanout.emit(event(3));
        assert_eq!(rx_a.try_recv().unwrap().chunk_position, 3);
        assert_eq!(rx_b.try_recv().unwrap().chunk_position, 3);
    }

    #[test]
    fn event_json_shape() {
        let json = serde_json::to_value(event(2)).unwrap();
        assert_eq!(json["chunk_position"], 2);
        assert_eq!(json["boundary_type"], "clause");
        assert_eq!(json["voice_id"], "alloy");
        assert_eq!(json["degraded"], false);
    }

    #[tokio::test]
    async fn unreachable_webhook_is_an_attribution_error() {
        let sink = WebhookSink::new("http://127.0.0.1:9/attribution").unwrap();
        let err = sink.deliver(&event(0)).await.unwrap_err();
        assert!(matches!(err, ProsodyError::Attribution(_)));
    }
}
