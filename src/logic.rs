//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - corpus/difficulty payloads
//!   - stateless quiz previews
//!   - starting and submitting a per-connection quiz session against shared state
//!   - fetching speech audio through the TTS proxy (free text or a question's word)

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, info, instrument};

use crate::domain::{Evaluation, QuizQuestion, Tone};
use crate::protocol::{DifficultyOut, ToneOut, WordsOut};
use crate::quiz::generate_quiz;
use crate::session::{QuizSession, SessionError};
use crate::state::AppState;
use crate::tts::{ProxyError, DEFAULT_LANG};

/// Upper bound for `GET /api/v1/quiz?size=N`.
pub const MAX_PREVIEW_SIZE: usize = 50;

pub fn words_payload(state: &AppState) -> WordsOut {
  WordsOut {
    tones: Tone::ALL.iter().map(|t| ToneOut { tone: *t, marker: t.marker() }).collect(),
    groups: state.corpus.groups().to_vec(),
  }
}

pub async fn difficulty_payload(state: &AppState) -> DifficultyOut {
  let difficulties = state.difficulties().await.into_iter().collect();
  DifficultyOut { difficulties }
}

/// Generate a quiz without a session, biased by the current difficulty map.
#[instrument(level = "info", skip(state))]
pub async fn preview_quiz(state: &AppState, size: Option<usize>) -> Vec<QuizQuestion> {
  let size = size.unwrap_or(state.quiz_size).clamp(1, MAX_PREVIEW_SIZE);
  let difficulties = state.difficulties().await;
  let questions = generate_quiz(&state.corpus, &difficulties, size);
  debug!(target: "quiz", requested = size, generated = questions.len(), "Quiz preview generated");
  questions
}

/// idle|results -> active, reading the difficulty map under the store's read lock.
pub async fn start_quiz(state: &AppState, session: &mut QuizSession) -> Result<(), SessionError> {
  let store = state.difficulty.read().await;
  session.start(&state.corpus, store.snapshot())
}

pub async fn retry_quiz(state: &AppState, session: &mut QuizSession) -> Result<(), SessionError> {
  let store = state.difficulty.read().await;
  session.retry(&state.corpus, store.snapshot())
}

/// Evaluate the session's answers; outcomes are applied under the store's write lock.
#[instrument(level = "info", skip(state, session), fields(session = %session.id()))]
pub async fn submit_quiz(state: &AppState, session: &mut QuizSession) -> Result<Evaluation, SessionError> {
  let evaluation = session.submit(state.evaluator.as_ref(), &state.difficulty).await?;
  info!(target: "quiz", session = %session.id(), score = evaluation.score, "Quiz submitted");
  Ok(evaluation)
}

/// Fetch MPEG audio through the proxy and return it base64-encoded.
#[instrument(level = "info", skip(state, text), fields(text_len = text.len()))]
pub async fn speak_audio(state: &AppState, text: &str, lang: Option<&str>) -> Result<(String, String), ProxyError> {
  let bytes = state.tts.fetch(text, lang).await?;
  Ok(("audio/mpeg".to_string(), STANDARD.encode(bytes)))
}

/// Speak the word behind a question without exposing it in the snapshot.
/// `None` when the index is out of range or no quiz is loaded.
#[instrument(level = "info", skip(state, session), fields(session = %session.id()))]
pub async fn question_audio(
  state: &AppState,
  session: &QuizSession,
  index: Option<usize>,
) -> Option<Result<(String, String), ProxyError>> {
  let index = index.unwrap_or(session.current_index());
  let word = session.questions().get(index)?.word_to_play.clone();
  Some(speak_audio(state, &word, Some(DEFAULT_LANG)).await)
}
