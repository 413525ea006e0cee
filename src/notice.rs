//! User-visible notices ("toasts") raised by the session and the recorder.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
  Destructive,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Notice {
  pub level: NoticeLevel,
  pub title: String,
  pub description: String,
}

impl Notice {
  pub fn destructive(title: impl Into<String>, description: impl Into<String>) -> Self {
    Self { level: NoticeLevel::Destructive, title: title.into(), description: description.into() }
  }
}

/// Fan-out channel for notices. Raising with no subscribers is not an error.
#[derive(Clone, Debug)]
pub struct Notices {
  tx: broadcast::Sender<Notice>,
}

impl Default for Notices {
  fn default() -> Self {
    let (tx, _) = broadcast::channel(32);
    Self { tx }
  }
}

impl Notices {
  pub fn raise(&self, notice: Notice) {
    debug!(target: "tone_trainer", title = %notice.title, "Notice raised");
    let _ = self.tx.send(notice);
  }

  pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
    self.tx.subscribe()
  }
}
