//! Tone Trainer · Vietnamese tone listening backend
//!
//! - Axum HTTP + WebSocket API (one quiz session per WebSocket connection)
//! - Text-to-speech proxy for word pronunciation
//! - Optional OpenAI quiz evaluation (via environment variables)
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                : u16 (default 3000)
//!   OPENAI_API_KEY      : enables model-backed evaluation if present
//!   OPENAI_BASE_URL     : default "https://api.openai.com/v1"
//!   OPENAI_MODEL        : default "gpt-4o-mini"
//!   DATA_DIR            : difficulty store directory (default "./data")
//!   TTS_UPSTREAM_URL    : default Google Translate TTS endpoint
//!   TTS_TIMEOUT_MS      : upstream TTS timeout (default 8000)
//!   TRAINER_CONFIG_PATH : path to TOML config (prompts, quiz size, extra word groups)
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use tone_trainer::routes::build_router;
use tone_trainer::state::AppState;
use tone_trainer::telemetry;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared state: corpus, difficulty store, evaluator, TTS proxy.
  let state = Arc::new(AppState::new()?);

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "tone_trainer", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!(target: "tone_trainer", "Shutdown signal received");
    })
    .await?;
  Ok(())
}
