//! Prosody Gateway: HTTP surface for the prosodic engine.
//!
//! `POST /synthesize/prosodic` streams stitched audio for one utterance;
//! `POST /synthesize/prosodic/plan` returns the chunk plan as JSON.

mod backend;
mod handlers;

use axum::routing::post;
use axum::Router;
use handlers::synthesize::{plan_prosodic, synthesize_prosodic};
use prosody_engine::{EngineConfig, ProsodicEngine};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BIND: &str = "127.0.0.1:8000";

#[derive(Clone)]
pub struct AppState {
    pub engine: ProsodicEngine,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/synthesize/prosodic", post(synthesize_prosodic))
        .route("/synthesize/prosodic/plan", post(plan_prosodic))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[prosody-gateway] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::load()?;
    let tts = backend::select_backend(config.sample_rate);
    let sink = backend::select_sink();
    let engine = ProsodicEngine::new(config, tts, sink)?;

    let addr: SocketAddr = std::env::var("PROSODY_BIND")
        .unwrap_or_else(|_| DEFAULT_BIND.to_string())
        .parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(target: "prosody::gateway", "prosody-gateway listening on {}", addr);

    let server = axum::serve(listener, app(AppState { engine }));
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(target: "prosody::gateway", "Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(target: "prosody::gateway", "Shutdown initiated (Ctrl+C received)");
        }
    }
    Ok(())
}
