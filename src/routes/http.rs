//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs parameters and basic result info.

use std::sync::Arc;
use axum::{
  extract::{Query, State},
  http::{header, HeaderValue, StatusCode},
  response::{IntoResponse, Response},
  Json,
};
use tracing::{info, instrument};

use crate::logic::*;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_get_words(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(words_payload(&state))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_difficulty(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(difficulty_payload(&state).await)
}

#[instrument(level = "info", skip(state), fields(size = ?q.size))]
pub async fn http_get_quiz(
  State(state): State<Arc<AppState>>,
  Query(q): Query<QuizQuery>,
) -> impl IntoResponse {
  let questions = preview_quiz(&state, q.size).await;
  info!(target: "quiz", questions = questions.len(), "HTTP quiz preview served");
  Json(QuizOut { questions })
}

/// Text-to-speech proxy. Never cached: the same URL must not replay another word's audio.
#[instrument(level = "info", skip(state, q), fields(text_len = q.text.as_deref().map_or(0, str::len), lang = ?q.lang))]
pub async fn http_get_tts(
  State(state): State<Arc<AppState>>,
  Query(q): Query<TtsQuery>,
) -> Response {
  let text = q.text.unwrap_or_default();
  match state.tts.fetch(&text, q.lang.as_deref()).await {
    Ok(bytes) => {
      info!(target: "tts_proxy", bytes = bytes.len(), "HTTP tts served");
      (
        [
          (header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg")),
          (header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store, must-revalidate")),
          (header::PRAGMA, HeaderValue::from_static("no-cache")),
          (header::EXPIRES, HeaderValue::from_static("0")),
        ],
        bytes,
      )
        .into_response()
    }
    Err(e) => {
      let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
      (status, Json(ErrorOut { error: e.to_string() })).into_response()
    }
  }
}
