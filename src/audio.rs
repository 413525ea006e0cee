//! Audio output seam shared by the speak controller and the voice recorder.
//!
//! `AudioOutput` is the media element + object URL pair of a browser: bytes are
//! registered as a temporary playable resource, played, stopped, and released.
//! `PlayableResource` owns one registration and releases it on drop, so every
//! exit path (natural end, error, supersession, teardown) gives it back.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId(pub u64);

/// How one playback attempt ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaybackOutcome {
  Ended,
  Stopped,
  Failed(String),
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AudioError {
  #[error("cannot create playable resource: {0}")]
  Resource(String),
  #[error("playback failed to start: {0}")]
  Playback(String),
}

pub trait AudioOutput: Send + Sync {
  fn create_resource(&self, bytes: Vec<u8>, mime: &str) -> Result<ResourceId, AudioError>;
  /// Begin playback. The receiver resolves exactly once (end, stop or error);
  /// a dropped sender counts as stopped.
  fn play(&self, id: ResourceId) -> Result<oneshot::Receiver<PlaybackOutcome>, AudioError>;
  fn stop(&self, id: ResourceId);
  fn release(&self, id: ResourceId);
}

/// Scoped registration of bytes with an `AudioOutput`.
pub struct PlayableResource {
  id: ResourceId,
  mime: String,
  len: usize,
  output: Arc<dyn AudioOutput>,
}

impl PlayableResource {
  pub fn create(output: Arc<dyn AudioOutput>, bytes: Vec<u8>, mime: &str) -> Result<Self, AudioError> {
    let len = bytes.len();
    let id = output.create_resource(bytes, mime)?;
    debug!(target: "speak", id = id.0, len, mime, "Playable resource created");
    Ok(Self { id, mime: mime.to_string(), len, output })
  }

  pub fn id(&self) -> ResourceId {
    self.id
  }
  pub fn mime(&self) -> &str {
    &self.mime
  }
  pub fn len(&self) -> usize {
    self.len
  }
  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn play(&self) -> Result<oneshot::Receiver<PlaybackOutcome>, AudioError> {
    self.output.play(self.id)
  }

  pub fn stop(&self) {
    self.output.stop(self.id);
  }
}

impl Drop for PlayableResource {
  fn drop(&mut self) {
    self.output.stop(self.id);
    self.output.release(self.id);
    debug!(target: "speak", id = self.id.0, "Playable resource released");
  }
}

#[cfg(test)]
pub(crate) mod testing {
  //! In-memory `AudioOutput` that lets tests end playback by hand.

  use super::*;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
  use std::sync::{Mutex, PoisonError};

  #[derive(Default)]
  pub struct FakeOutput {
    next: AtomicU64,
    resources: Mutex<HashMap<u64, Vec<u8>>>,
    playing: Mutex<HashMap<u64, oneshot::Sender<PlaybackOutcome>>>,
    fail_plays: AtomicUsize,
    plays: AtomicUsize,
  }

  impl FakeOutput {
    pub fn live_resources(&self) -> usize {
      self.resources.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn play_count(&self) -> usize {
      self.plays.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
      !self.playing.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    /// Make the next `n` play() calls fail to start.
    pub fn fail_next_plays(&self, n: usize) {
      self.fail_plays.store(n, Ordering::SeqCst);
    }

    /// Finish the playback whose resource holds `bytes`. Returns false if none.
    pub fn end_playback(&self, bytes: &[u8]) -> bool {
      let id = {
        let res = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
        res.iter().find(|(_, b)| b.as_slice() == bytes).map(|(id, _)| *id)
      };
      let Some(id) = id else { return false };
      let tx = self.playing.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
      match tx {
        Some(tx) => tx.send(PlaybackOutcome::Ended).is_ok(),
        None => false,
      }
    }
  }

  impl AudioOutput for FakeOutput {
    fn create_resource(&self, bytes: Vec<u8>, _mime: &str) -> Result<ResourceId, AudioError> {
      let id = self.next.fetch_add(1, Ordering::SeqCst);
      self.resources.lock().unwrap_or_else(PoisonError::into_inner).insert(id, bytes);
      Ok(ResourceId(id))
    }

    fn play(&self, id: ResourceId) -> Result<oneshot::Receiver<PlaybackOutcome>, AudioError> {
      let failing = self
        .fail_plays
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
      if failing {
        return Err(AudioError::Playback("NotAllowedError".into()));
      }
      if !self.resources.lock().unwrap_or_else(PoisonError::into_inner).contains_key(&id.0) {
        return Err(AudioError::Playback("resource revoked".into()));
      }
      self.plays.fetch_add(1, Ordering::SeqCst);
      let (tx, rx) = oneshot::channel();
      self.playing.lock().unwrap_or_else(PoisonError::into_inner).insert(id.0, tx);
      Ok(rx)
    }

    fn stop(&self, id: ResourceId) {
      if let Some(tx) = self.playing.lock().unwrap_or_else(PoisonError::into_inner).remove(&id.0) {
        let _ = tx.send(PlaybackOutcome::Stopped);
      }
    }

    fn release(&self, id: ResourceId) {
      self.resources.lock().unwrap_or_else(PoisonError::into_inner).remove(&id.0);
    }
  }

  #[test]
  fn resource_is_released_on_drop() {
    let out = Arc::new(FakeOutput::default());
    let res = PlayableResource::create(out.clone(), b"abc".to_vec(), "audio/mpeg").unwrap();
    assert_eq!(res.len(), 3);
    let mut rx = res.play().unwrap();
    assert_eq!(out.live_resources(), 1);
    drop(res);
    assert_eq!(out.live_resources(), 0);
    assert_eq!(rx.try_recv().unwrap(), PlaybackOutcome::Stopped);
  }
}
