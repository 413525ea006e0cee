//! WebSocket upgrade + message loop. Each connection owns one quiz session.
//! Every client message yields one reply, followed by any notices the
//! transition raised.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, error, info, instrument, warn};

use crate::logic::*;
use crate::notice::{Notice, Notices};
use crate::protocol::{to_snapshot, ClientWsMessage, ServerWsMessage};
use crate::session::{QuizSession, SessionError};
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "tone_trainer", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  let notices = Notices::default();
  let mut notice_rx = notices.subscribe();
  let mut session = QuizSession::new(state.quiz_size, notices);
  info!(target: "tone_trainer", session = %session.id(), "WebSocket connected");

  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "tone_trainer", "WS received: {:?}", &incoming);
            handle_client_ws(incoming, &state, &mut session).await
          }
          Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
        };

        let mut outgoing = vec![reply_msg];
        outgoing.extend(drain_notices(&mut notice_rx).into_iter().map(ServerWsMessage::from));
        if send_all(&mut socket, outgoing).await.is_err() {
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "tone_trainer", session = %session.id(), "WebSocket disconnected");
}

async fn send_all(socket: &mut WebSocket, msgs: Vec<ServerWsMessage>) -> Result<(), axum::Error> {
  for m in msgs {
    let out = serde_json::to_string(&m).unwrap_or_else(|e| {
      serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
    });
    if let Err(e) = socket.send(Message::Text(out)).await {
      error!(target: "tone_trainer", error = %e, "WS send error");
      return Err(e);
    }
  }
  Ok(())
}

pub(crate) fn drain_notices(rx: &mut broadcast::Receiver<Notice>) -> Vec<Notice> {
  let mut out = Vec::new();
  loop {
    match rx.try_recv() {
      Ok(n) => out.push(n),
      Err(TryRecvError::Lagged(skipped)) => warn!(target: "tone_trainer", skipped, "Dropped notices"),
      Err(TryRecvError::Empty | TryRecvError::Closed) => return out,
    }
  }
}

/// Apply one client message to the connection's session.
/// Session faults are reported through notices and the refreshed snapshot, so
/// only protocol-level problems become `error` replies.
#[instrument(level = "info", skip(state, session), fields(session = %session.id()))]
pub(crate) async fn handle_client_ws(msg: ClientWsMessage, state: &AppState, session: &mut QuizSession) -> ServerWsMessage {
  let outcome = match msg {
    ClientWsMessage::Ping => return ServerWsMessage::Pong,

    ClientWsMessage::SpeakAudio { text, lang } => {
      return match speak_audio(state, &text, lang.as_deref()).await {
        Ok((mime, audio_base64)) => ServerWsMessage::Audio { mime, audio_base64 },
        Err(e) => ServerWsMessage::Error { message: e.to_string() },
      };
    }

    ClientWsMessage::PlayQuestion { index } => {
      return match question_audio(state, session, index).await {
        Some(Ok((mime, audio_base64))) => ServerWsMessage::Audio { mime, audio_base64 },
        Some(Err(e)) => ServerWsMessage::Error { message: e.to_string() },
        None => ServerWsMessage::Error { message: "No such question".into() },
      };
    }

    ClientWsMessage::StartQuiz => start_quiz(state, session).await,
    ClientWsMessage::Retry => retry_quiz(state, session).await,
    ClientWsMessage::SelectAnswer { answer } => session.select_answer(&answer),
    ClientWsMessage::Next => session.advance(),
    ClientWsMessage::Previous => session.retreat(),
    ClientWsMessage::Submit => submit_quiz(state, session).await.map(|_| ()),
  };

  match outcome {
    Ok(()) => ServerWsMessage::Quiz { snapshot: to_snapshot(session) },
    // Already surfaced as a notice; the snapshot shows the preserved state.
    Err(SessionError::InputIncomplete { .. } | SessionError::Evaluation(_) | SessionError::EmptyQuiz) => {
      ServerWsMessage::Quiz { snapshot: to_snapshot(session) }
    }
    Err(e) => ServerWsMessage::Error { message: e.to_string() },
  }
}
