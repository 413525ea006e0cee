//! Voice recorder: a short microphone clip the learner can replay against the reference audio.
//!
//! The capture stream, the countdown task and the clip are each owned by the recorder
//! state and released on every exit path (stop, auto-stop, delete, re-record, teardown).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::audio::{AudioOutput, PlayableResource, PlaybackOutcome};
use crate::notice::{Notice, Notices};

pub const DEFAULT_MIME: &str = "audio/webm";
const MOBILE_MIME_PREFERENCE: [&str; 3] = ["audio/webm;codecs=opus", "audio/webm", "audio/mp4"];
const DESKTOP_MIME_PREFERENCE: [&str; 1] = ["audio/webm"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DeviceProfile {
  Mobile,
  #[default]
  Desktop,
}

#[derive(Clone, Debug)]
pub struct RecorderConfig {
  pub max_seconds: u32,
  pub tick: Duration,
  pub profile: DeviceProfile,
}

impl Default for RecorderConfig {
  fn default() -> Self {
    Self { max_seconds: 3, tick: Duration::from_secs(1), profile: DeviceProfile::Desktop }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderStatus {
  Idle,
  PermissionDenied,
  Recording,
  Recorded,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RecorderError {
  #[error("microphone access denied")]
  PermissionDenied,
  #[error("operation not allowed while {0:?}")]
  InvalidState(RecorderStatus),
  #[error("clip is already playing")]
  AlreadyPlaying,
  #[error("playback failed: {0}")]
  Playback(String),
  #[error("no recorded clip")]
  NoClip,
}

/// Microphone access (getUserMedia-like).
#[async_trait]
pub trait Microphone: Send + Sync {
  async fn request_access(&self) -> Result<Box<dyn CaptureStream>, RecorderError>;
}

/// An open capture stream. `stop` must be idempotent and turns the device off.
pub trait CaptureStream: Send {
  fn supports(&self, mime: &str) -> bool;
  /// Start capturing; `None` lets the device pick its format.
  fn begin(&mut self, mime: Option<&str>);
  /// The format actually in use, if the device reports one.
  fn mime_type(&self) -> Option<String>;
  fn take_chunks(&mut self) -> Vec<Vec<u8>>;
  fn stop(&mut self);
}

/// Pick the capture format for a device profile, or `None` when nothing preferred is supported.
pub fn negotiate_mime(profile: DeviceProfile, supports: impl Fn(&str) -> bool) -> Option<&'static str> {
  let preference: &[&'static str] = match profile {
    DeviceProfile::Mobile => &MOBILE_MIME_PREFERENCE,
    DeviceProfile::Desktop => &DESKTOP_MIME_PREFERENCE,
  };
  preference.iter().copied().find(|m| supports(m))
}

struct RecorderState {
  status: RecorderStatus,
  countdown: u32,
  /// Bumped whenever a recording starts or is abandoned; stale countdown ticks compare against it.
  generation: u64,
  requesting: bool,
  stream: Option<Box<dyn CaptureStream>>,
  countdown_task: Option<JoinHandle<()>>,
  clip: Option<Arc<PlayableResource>>,
  play_seq: u64,
  playing: bool,
}

struct Shared {
  state: Mutex<RecorderState>,
  mic: Arc<dyn Microphone>,
  output: Arc<dyn AudioOutput>,
  notices: Notices,
  config: RecorderConfig,
}

impl Shared {
  fn lock(&self) -> MutexGuard<'_, RecorderState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// recording -> recorded. Caller holds the lock and has checked the status.
  fn finish_recording(&self, st: &mut RecorderState) -> Result<(), RecorderError> {
    if let Some(task) = st.countdown_task.take() {
      task.abort();
    }
    st.generation += 1;
    let Some(mut stream) = st.stream.take() else {
      st.status = RecorderStatus::Idle;
      return Err(RecorderError::NoClip);
    };
    let bytes: Vec<u8> = stream.take_chunks().into_iter().filter(|c| !c.is_empty()).flatten().collect();
    let mime = stream.mime_type().filter(|m| !m.is_empty()).unwrap_or_else(|| DEFAULT_MIME.to_string());
    stream.stop();
    drop(stream);

    match PlayableResource::create(self.output.clone(), bytes, &mime) {
      Ok(clip) => {
        info!(target: "recorder", mime = %mime, bytes = clip.len(), "Recording completed");
        st.clip = Some(Arc::new(clip));
        st.status = RecorderStatus::Recorded;
        Ok(())
      }
      Err(e) => {
        warn!(target: "recorder", error = %e, "Could not store recorded clip");
        st.status = RecorderStatus::Idle;
        self.notices.raise(Notice::destructive("Recording Error", "Could not save your recording. Please try again."));
        Err(RecorderError::Playback(e.to_string()))
      }
    }
  }

  /// Release stream, timer and clip. Leaves `PermissionDenied` in place.
  fn release_all(&self, st: &mut RecorderState) {
    st.generation += 1;
    if let Some(task) = st.countdown_task.take() {
      task.abort();
    }
    if let Some(mut stream) = st.stream.take() {
      stream.stop();
    }
    st.clip = None;
    st.playing = false;
    st.play_seq += 1;
    if st.status != RecorderStatus::PermissionDenied {
      st.status = RecorderStatus::Idle;
    }
  }
}

/// One recorder instance. Dropping it tears everything down.
pub struct VoiceRecorder {
  shared: Arc<Shared>,
}

impl VoiceRecorder {
  pub fn new(mic: Arc<dyn Microphone>, output: Arc<dyn AudioOutput>, notices: Notices, config: RecorderConfig) -> Self {
    let state = RecorderState {
      status: RecorderStatus::Idle,
      countdown: config.max_seconds,
      generation: 0,
      requesting: false,
      stream: None,
      countdown_task: None,
      clip: None,
      play_seq: 0,
      playing: false,
    };
    Self { shared: Arc::new(Shared { state: Mutex::new(state), mic, output, notices, config }) }
  }

  pub fn status(&self) -> RecorderStatus {
    self.shared.lock().status
  }

  /// Seconds left in the current recording.
  pub fn countdown(&self) -> u32 {
    self.shared.lock().countdown
  }

  pub fn is_playing(&self) -> bool {
    self.shared.lock().playing
  }

  pub fn clip_mime(&self) -> Option<String> {
    self.shared.lock().clip.as_ref().map(|c| c.mime().to_string())
  }

  /// idle|recorded -> recording. Re-recording discards the previous clip.
  #[instrument(level = "info", skip(self))]
  pub async fn start(&self) -> Result<(), RecorderError> {
    let generation = {
      let mut st = self.shared.lock();
      match st.status {
        RecorderStatus::PermissionDenied => return Err(RecorderError::PermissionDenied),
        RecorderStatus::Recording => return Err(RecorderError::InvalidState(RecorderStatus::Recording)),
        _ if st.requesting => return Err(RecorderError::InvalidState(st.status)),
        _ => {}
      }
      self.shared.release_all(&mut st);
      st.requesting = true;
      st.generation
    };

    let access = self.shared.mic.request_access().await;

    let mut st = self.shared.lock();
    st.requesting = false;
    let mut stream = match access {
      Ok(stream) => stream,
      Err(e) => {
        warn!(target: "recorder", error = %e, "Microphone access denied");
        st.status = RecorderStatus::PermissionDenied;
        self.shared.notices.raise(Notice::destructive(
          "Microphone Access Denied",
          "Please enable microphone permissions in your browser settings to use this feature.",
        ));
        return Err(RecorderError::PermissionDenied);
      }
    };
    if st.generation != generation {
      // Torn down while waiting for permission.
      stream.stop();
      return Err(RecorderError::InvalidState(st.status));
    }

    let mime = negotiate_mime(self.shared.config.profile, |m| stream.supports(m));
    stream.begin(mime);
    debug!(target: "recorder", profile = ?self.shared.config.profile, mime = ?mime, "Capture started");

    st.stream = Some(stream);
    st.status = RecorderStatus::Recording;
    st.countdown = self.shared.config.max_seconds;
    st.generation += 1;
    st.countdown_task = Some(spawn_countdown(Arc::downgrade(&self.shared), st.generation, self.shared.config.tick));
    Ok(())
  }

  /// recording -> recorded.
  #[instrument(level = "info", skip(self))]
  pub fn stop(&self) -> Result<(), RecorderError> {
    let mut st = self.shared.lock();
    if st.status != RecorderStatus::Recording {
      return Err(RecorderError::InvalidState(st.status));
    }
    self.shared.finish_recording(&mut st)
  }

  /// Play the stored clip, retrying once with a fresh attempt before reporting failure.
  #[instrument(level = "info", skip(self))]
  pub fn play(&self) -> Result<(), RecorderError> {
    let mut st = self.shared.lock();
    if st.status != RecorderStatus::Recorded {
      return Err(RecorderError::InvalidState(st.status));
    }
    let Some(clip) = st.clip.clone() else {
      return Err(RecorderError::NoClip);
    };
    if st.playing {
      return Err(RecorderError::AlreadyPlaying);
    }

    let finished = match clip.play() {
      Ok(rx) => rx,
      Err(first) => {
        warn!(target: "recorder", error = %first, "Clip playback failed; retrying");
        clip.stop();
        match clip.play() {
          Ok(rx) => rx,
          Err(e) => {
            warn!(target: "recorder", error = %e, "Clip playback retry failed");
            self.shared.notices.raise(Notice::destructive(
              "Playback Error",
              "Failed to play recording. Please try again.",
            ));
            return Err(RecorderError::Playback(e.to_string()));
          }
        }
      }
    };

    st.playing = true;
    st.play_seq += 1;
    let seq = st.play_seq;
    let weak = Arc::downgrade(&self.shared);
    tokio::spawn(async move {
      let outcome = finished.await.unwrap_or(PlaybackOutcome::Stopped);
      let Some(shared) = weak.upgrade() else { return };
      let mut st = shared.lock();
      if st.play_seq != seq {
        return;
      }
      st.playing = false;
      if let PlaybackOutcome::Failed(reason) = outcome {
        warn!(target: "recorder", %reason, "Clip playback error");
        shared.notices.raise(Notice::destructive("Playback Error", "Failed to play recording. Please try again."));
      }
    });
    Ok(())
  }

  /// recorded -> idle, releasing the clip.
  #[instrument(level = "info", skip(self))]
  pub fn delete(&self) -> Result<(), RecorderError> {
    let mut st = self.shared.lock();
    if st.status != RecorderStatus::Recorded {
      return Err(RecorderError::InvalidState(st.status));
    }
    self.shared.release_all(&mut st);
    st.countdown = self.shared.config.max_seconds;
    debug!(target: "recorder", "Recording deleted");
    Ok(())
  }

  /// Release every resource this recorder holds.
  pub fn teardown(&self) {
    let mut st = self.shared.lock();
    self.shared.release_all(&mut st);
  }
}

impl Drop for VoiceRecorder {
  fn drop(&mut self) {
    self.teardown();
  }
}

fn spawn_countdown(shared: Weak<Shared>, generation: u64, tick: Duration) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
    loop {
      interval.tick().await;
      let Some(shared) = shared.upgrade() else { return };
      let mut st = shared.lock();
      if st.generation != generation || st.status != RecorderStatus::Recording {
        return;
      }
      st.countdown = st.countdown.saturating_sub(1);
      if st.countdown == 0 {
        debug!(target: "recorder", "Countdown elapsed; stopping");
        // Detach our own handle; aborting it here would be a no-op anyway.
        drop(st.countdown_task.take());
        let _ = shared.finish_recording(&mut st);
        return;
      }
    }
  })
}
