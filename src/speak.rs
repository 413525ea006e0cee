//! "Speak" capability: make a word audible through an ordered provider chain.
//!
//! Tier 1 fetches audio bytes from the TTS proxy and plays them; tier 2 asks the
//! on-device synthesizer. Each call takes a ticket from a monotonic counter. Any
//! continuation holding a stale ticket is dropped, so the most recent request
//! always wins and a slow, superseded one can never touch `is_speaking`.

use std::sync::{
  atomic::{AtomicU64, Ordering},
  Arc, Mutex, PoisonError,
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, instrument, warn};

use crate::audio::{AudioOutput, PlayableResource, PlaybackOutcome};

#[derive(Clone, Debug)]
pub struct SpeakConfig {
  /// Language code sent to the TTS proxy.
  pub language_code: String,
  /// BCP-47 tag for on-device utterances.
  pub voice_lang: String,
  /// Slower than normal speech, for learners.
  pub rate: f32,
  pub fetch_timeout: Duration,
}

impl Default for SpeakConfig {
  fn default() -> Self {
    Self {
      language_code: "vi".into(),
      voice_lang: "vi-VN".into(),
      rate: 0.8,
      fetch_timeout: Duration::from_secs(4),
    }
  }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum SpeakError {
  #[error("audio fetch failed: {0}")]
  Fetch(String),
  #[error("audio fetch timed out after {0:?}")]
  Timeout(Duration),
  #[error("audio fetch returned an empty payload")]
  EmptyPayload,
  #[error("playback failed to start: {0}")]
  PlaybackStart(String),
  #[error("on-device speech synthesis is unavailable")]
  SynthesisUnavailable,
  #[error("superseded by a newer request")]
  Superseded,
  #[error("no provider could speak: {0}")]
  AllProvidersFailed(String),
}

/// Tier-1 byte source (the TTS proxy).
#[async_trait]
pub trait AudioFetcher: Send + Sync {
  async fn fetch(&self, text: &str, language_code: &str) -> Result<Vec<u8>, SpeakError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Voice {
  pub name: String,
  pub lang: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UtteranceRequest {
  pub text: String,
  pub lang: String,
  pub rate: f32,
  pub voice: Option<Voice>,
}

/// Tier-2 on-device synthesizer (speechSynthesis-like; one global queue).
pub trait SpeechSynthesizer: Send + Sync {
  fn is_available(&self) -> bool;
  fn voices(&self) -> Vec<Voice>;
  fn speak(&self, request: UtteranceRequest) -> Result<oneshot::Receiver<PlaybackOutcome>, SpeakError>;
  fn cancel(&self);
}

/// Request ticket; compared at every resumption point.
#[derive(Clone)]
pub struct Ticket {
  seq: u64,
  current: Arc<AtomicU64>,
}

impl Ticket {
  pub fn seq(&self) -> u64 {
    self.seq
  }
  pub fn is_current(&self) -> bool {
    self.current.load(Ordering::SeqCst) == self.seq
  }
}

/// Audible speech handed back by a provider.
pub struct Utterance {
  pub finished: oneshot::Receiver<PlaybackOutcome>,
  pub resource: Option<PlayableResource>,
}

#[async_trait]
pub trait SpeechProvider: Send + Sync {
  fn name(&self) -> &'static str;
  /// Start audible speech or report why not.
  async fn start(&self, text: &str, ticket: &Ticket) -> Result<Utterance, SpeakError>;
  /// Synchronously silence anything this provider has audible.
  fn cancel(&self) {}
}

pub struct RemoteTtsProvider {
  fetcher: Arc<dyn AudioFetcher>,
  output: Arc<dyn AudioOutput>,
  config: SpeakConfig,
}

impl RemoteTtsProvider {
  pub fn new(fetcher: Arc<dyn AudioFetcher>, output: Arc<dyn AudioOutput>, config: SpeakConfig) -> Self {
    Self { fetcher, output, config }
  }
}

#[async_trait]
impl SpeechProvider for RemoteTtsProvider {
  fn name(&self) -> &'static str {
    "remote_tts"
  }

  async fn start(&self, text: &str, ticket: &Ticket) -> Result<Utterance, SpeakError> {
    let fetch = self.fetcher.fetch(text, &self.config.language_code);
    let bytes = tokio::time::timeout(self.config.fetch_timeout, fetch)
      .await
      .map_err(|_| SpeakError::Timeout(self.config.fetch_timeout))??;
    if !ticket.is_current() {
      return Err(SpeakError::Superseded);
    }
    if bytes.is_empty() {
      return Err(SpeakError::EmptyPayload);
    }
    let resource = PlayableResource::create(self.output.clone(), bytes, "audio/mpeg")
      .map_err(|e| SpeakError::PlaybackStart(e.to_string()))?;
    let finished = resource.play().map_err(|e| SpeakError::PlaybackStart(e.to_string()))?;
    Ok(Utterance { finished, resource: Some(resource) })
  }
}

pub struct DeviceSynthesisProvider {
  synth: Arc<dyn SpeechSynthesizer>,
  config: SpeakConfig,
}

impl DeviceSynthesisProvider {
  pub fn new(synth: Arc<dyn SpeechSynthesizer>, config: SpeakConfig) -> Self {
    Self { synth, config }
  }
}

/// Prefer a Vietnamese voice whose name looks like a quality one, then any Vietnamese voice.
pub fn choose_voice(voices: &[Voice], lang_prefix: &str) -> Option<Voice> {
  let prefix = lang_prefix.to_lowercase();
  let matching: Vec<&Voice> = voices.iter().filter(|v| v.lang.to_lowercase().starts_with(&prefix)).collect();
  let preferred = matching.iter().find(|v| {
    let name = v.name.to_lowercase();
    ["google", "viet", "việt", "vietnam"].iter().any(|k| name.contains(k))
  });
  preferred.or_else(|| matching.first()).map(|v| (*v).clone())
}

#[async_trait]
impl SpeechProvider for DeviceSynthesisProvider {
  fn name(&self) -> &'static str {
    "device_synthesis"
  }

  async fn start(&self, text: &str, ticket: &Ticket) -> Result<Utterance, SpeakError> {
    if !self.synth.is_available() {
      return Err(SpeakError::SynthesisUnavailable);
    }
    if !ticket.is_current() {
      return Err(SpeakError::Superseded);
    }
    let voice = choose_voice(&self.synth.voices(), &self.config.language_code);
    let request = UtteranceRequest {
      text: text.to_string(),
      lang: self.config.voice_lang.clone(),
      rate: self.config.rate,
      voice,
    };
    self.synth.cancel();
    let finished = self.synth.speak(request)?;
    Ok(Utterance { finished, resource: None })
  }

  fn cancel(&self) {
    self.synth.cancel();
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpeakOutcome {
  Started { provider: &'static str },
}

struct ActivePlayback {
  seq: u64,
  provider: &'static str,
  _resource: Option<PlayableResource>,
}

struct SpeakInner {
  providers: Vec<Arc<dyn SpeechProvider>>,
  current: Arc<AtomicU64>,
  speaking: watch::Sender<bool>,
  active: Mutex<Option<ActivePlayback>>,
}

impl SpeakInner {
  fn active(&self) -> std::sync::MutexGuard<'_, Option<ActivePlayback>> {
    self.active.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn silence_everything(&self) {
    let previous = self.active().take();
    if let Some(p) = &previous {
      debug!(target: "speak", seq = p.seq, provider = p.provider, "Stopping previous playback");
    }
    drop(previous);
    for p in &self.providers {
      p.cancel();
    }
  }

  fn on_finished(&self, seq: u64, outcome: PlaybackOutcome) {
    let finished = {
      let mut active = self.active();
      if active.as_ref().is_some_and(|a| a.seq == seq) {
        active.take()
      } else {
        None
      }
    };
    drop(finished);

    if self.current.load(Ordering::SeqCst) == seq {
      self.speaking.send_replace(false);
      debug!(target: "speak", seq, ?outcome, "Playback finished");
    } else {
      debug!(target: "speak", seq, ?outcome, "Ignoring stale playback completion");
    }
  }
}

/// One speak control. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SpeakController {
  inner: Arc<SpeakInner>,
}

impl SpeakController {
  pub fn new(providers: Vec<Arc<dyn SpeechProvider>>) -> Self {
    let (speaking, _) = watch::channel(false);
    Self {
      inner: Arc::new(SpeakInner {
        providers,
        current: Arc::new(AtomicU64::new(0)),
        speaking,
        active: Mutex::new(None),
      }),
    }
  }

  /// The usual chain: remote proxy first, on-device synthesis second.
  pub fn with_fallback(
    fetcher: Arc<dyn AudioFetcher>,
    output: Arc<dyn AudioOutput>,
    synth: Arc<dyn SpeechSynthesizer>,
    config: SpeakConfig,
  ) -> Self {
    Self::new(vec![
      Arc::new(RemoteTtsProvider::new(fetcher, output, config.clone())),
      Arc::new(DeviceSynthesisProvider::new(synth, config)),
    ])
  }

  pub fn is_speaking(&self) -> bool {
    *self.inner.speaking.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.inner.speaking.subscribe()
  }

  /// Preempt whatever is in flight and try each provider in order.
  #[instrument(level = "info", skip(self), fields(text_len = text.len()))]
  pub async fn speak(&self, text: &str) -> Result<SpeakOutcome, SpeakError> {
    let inner = &self.inner;
    let seq = inner.current.fetch_add(1, Ordering::SeqCst) + 1;
    let ticket = Ticket { seq, current: inner.current.clone() };

    inner.silence_everything();
    inner.speaking.send_replace(true);

    let mut last_error = String::from("no providers configured");
    for provider in &inner.providers {
      if !ticket.is_current() {
        return Err(SpeakError::Superseded);
      }
      match provider.start(text, &ticket).await {
        Ok(utterance) => {
          if self.install(&ticket, provider.name(), utterance) {
            info!(target: "speak", seq, provider = provider.name(), "Speech started");
            return Ok(SpeakOutcome::Started { provider: provider.name() });
          }
          return Err(SpeakError::Superseded);
        }
        Err(SpeakError::Superseded) => {
          debug!(target: "speak", seq, "Request superseded mid-flight");
          return Err(SpeakError::Superseded);
        }
        Err(e) => {
          warn!(target: "speak", seq, provider = provider.name(), error = %e, "Speech provider failed; trying next");
          last_error = e.to_string();
        }
      }
    }

    if ticket.is_current() {
      inner.speaking.send_replace(false);
    }
    Err(SpeakError::AllProvidersFailed(last_error))
  }

  /// Silence everything and clear the indicator.
  pub fn stop(&self) {
    self.inner.current.fetch_add(1, Ordering::SeqCst);
    self.inner.silence_everything();
    self.inner.speaking.send_replace(false);
  }

  fn install(&self, ticket: &Ticket, provider: &'static str, utterance: Utterance) -> bool {
    let Utterance { finished, resource } = utterance;
    {
      let mut active = self.inner.active();
      if !ticket.is_current() {
        // Dropping the resource stops and releases it.
        return false;
      }
      *active = Some(ActivePlayback { seq: ticket.seq, provider, _resource: resource });
    }

    let inner = Arc::clone(&self.inner);
    let seq = ticket.seq;
    tokio::spawn(async move {
      let outcome = finished.await.unwrap_or(PlaybackOutcome::Stopped);
      inner.on_finished(seq, outcome);
    });
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::audio::testing::FakeOutput;
  use std::collections::HashMap;
  use std::sync::atomic::AtomicUsize;

  /// Per-text delay and payload; unknown texts fail.
  #[derive(Default)]
  struct FakeFetcher {
    replies: HashMap<String, (Duration, Result<Vec<u8>, SpeakError>)>,
    calls: AtomicUsize,
  }

  impl FakeFetcher {
    fn reply(mut self, text: &str, delay_ms: u64, payload: Result<Vec<u8>, SpeakError>) -> Self {
      self.replies.insert(text.into(), (Duration::from_millis(delay_ms), payload));
      self
    }
  }

  #[async_trait]
  impl AudioFetcher for FakeFetcher {
    async fn fetch(&self, text: &str, language_code: &str) -> Result<Vec<u8>, SpeakError> {
      assert_eq!(language_code, "vi");
      self.calls.fetch_add(1, Ordering::SeqCst);
      match self.replies.get(text) {
        Some((delay, payload)) => {
          tokio::time::sleep(*delay).await;
          payload.clone()
        }
        None => Err(SpeakError::Fetch("HTTP 502".into())),
      }
    }
  }

  #[derive(Default)]
  struct FakeSynth {
    unavailable: bool,
    voices: Vec<Voice>,
    requests: Mutex<Vec<UtteranceRequest>>,
    pending: Mutex<Option<oneshot::Sender<PlaybackOutcome>>>,
    cancels: AtomicUsize,
  }

  impl FakeSynth {
    fn finish(&self) -> bool {
      match self.pending.lock().unwrap().take() {
        Some(tx) => tx.send(PlaybackOutcome::Ended).is_ok(),
        None => false,
      }
    }
  }

  impl SpeechSynthesizer for FakeSynth {
    fn is_available(&self) -> bool {
      !self.unavailable
    }
    fn voices(&self) -> Vec<Voice> {
      self.voices.clone()
    }
    fn speak(&self, request: UtteranceRequest) -> Result<oneshot::Receiver<PlaybackOutcome>, SpeakError> {
      self.requests.lock().unwrap().push(request);
      let (tx, rx) = oneshot::channel();
      *self.pending.lock().unwrap() = Some(tx);
      Ok(rx)
    }
    fn cancel(&self) {
      self.cancels.fetch_add(1, Ordering::SeqCst);
      if let Some(tx) = self.pending.lock().unwrap().take() {
        let _ = tx.send(PlaybackOutcome::Stopped);
      }
    }
  }

  fn controller(fetcher: FakeFetcher, synth: FakeSynth) -> (SpeakController, Arc<FakeOutput>, Arc<FakeSynth>) {
    let output = Arc::new(FakeOutput::default());
    let synth = Arc::new(synth);
    let ctl = SpeakController::with_fallback(Arc::new(fetcher), output.clone(), synth.clone(), SpeakConfig::default());
    (ctl, output, synth)
  }

  async fn wait_idle(ctl: &SpeakController) {
    let mut rx = ctl.subscribe();
    tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| !*s))
      .await
      .expect("speaking never cleared")
      .expect("watch closed");
  }

  #[tokio::test(start_paused = true)]
  async fn remote_tier_plays_and_clears_on_end() {
    let fetcher = FakeFetcher::default().reply("ma", 100, Ok(b"ma".to_vec()));
    let (ctl, output, synth) = controller(fetcher, FakeSynth::default());

    let out = ctl.speak("ma").await.unwrap();
    assert_eq!(out, SpeakOutcome::Started { provider: "remote_tts" });
    assert!(ctl.is_speaking());
    assert!(synth.requests.lock().unwrap().is_empty());
    assert_eq!(output.live_resources(), 1);

    assert!(output.end_playback(b"ma"));
    wait_idle(&ctl).await;
    assert_eq!(output.live_resources(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn newer_request_wins_over_slow_stale_fetch() {
    let fetcher = FakeFetcher::default()
      .reply("ma", 2_000, Ok(b"ma".to_vec()))
      .reply("mà", 10, Ok("mà".as_bytes().to_vec()));
    let (ctl, output, _synth) = controller(fetcher, FakeSynth::default());

    let first_ctl = ctl.clone();
    let first = tokio::spawn(async move { first_ctl.speak("ma").await });
    tokio::time::sleep(Duration::from_millis(1)).await;

    ctl.speak("mà").await.unwrap();
    assert!(ctl.is_speaking());

    // The slow fetch completes after being superseded and must not play.
    assert_eq!(first.await.unwrap(), Err(SpeakError::Superseded));
    assert!(ctl.is_speaking());
    assert_eq!(output.play_count(), 1);

    assert!(output.end_playback("mà".as_bytes()));
    wait_idle(&ctl).await;
    assert_eq!(output.live_resources(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn stale_completion_does_not_touch_indicator() {
    let fetcher = FakeFetcher::default()
      .reply("ma", 0, Ok(b"ma".to_vec()))
      .reply("mà", 500, Ok("mà".as_bytes().to_vec()));
    let (ctl, output, _synth) = controller(fetcher, FakeSynth::default());

    ctl.speak("ma").await.unwrap();
    let second_ctl = ctl.clone();
    let second = tokio::spawn(async move { second_ctl.speak("mà").await });
    tokio::time::sleep(Duration::from_millis(1)).await;

    // First playback was stopped by the new request; its completion is stale.
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(ctl.is_speaking());
    assert_eq!(output.live_resources(), 0);

    second.await.unwrap().unwrap();
    assert!(ctl.is_speaking());
    assert!(output.end_playback("mà".as_bytes()));
    wait_idle(&ctl).await;
  }

  #[tokio::test(start_paused = true)]
  async fn falls_back_to_device_synthesis_on_fetch_error() {
    let synth = FakeSynth {
      voices: vec![
        Voice { name: "English".into(), lang: "en-US".into() },
        Voice { name: "Linh".into(), lang: "vi-VN".into() },
        Voice { name: "Google Tiếng Việt".into(), lang: "vi-VN".into() },
      ],
      ..FakeSynth::default()
    };
    let (ctl, output, synth) = controller(FakeFetcher::default(), synth);

    let out = ctl.speak("bà").await.unwrap();
    assert_eq!(out, SpeakOutcome::Started { provider: "device_synthesis" });
    assert!(ctl.is_speaking());
    assert_eq!(output.live_resources(), 0);
    {
      let reqs = synth.requests.lock().unwrap();
      assert_eq!(reqs.len(), 1);
      assert_eq!(reqs[0].lang, "vi-VN");
      assert!((reqs[0].rate - 0.8).abs() < f32::EPSILON);
      assert_eq!(reqs[0].voice.as_ref().map(|v| v.name.as_str()), Some("Google Tiếng Việt"));
    }

    assert!(synth.finish());
    wait_idle(&ctl).await;
  }

  #[tokio::test(start_paused = true)]
  async fn timeout_and_empty_payload_fall_back() {
    let fetcher = FakeFetcher::default()
      .reply("cá", 10_000, Ok(b"late".to_vec()))
      .reply("cà", 0, Ok(Vec::new()));
    let (ctl, output, synth) = controller(fetcher, FakeSynth::default());

    let started = tokio::time::Instant::now();
    let out = ctl.speak("cá").await.unwrap();
    assert_eq!(out, SpeakOutcome::Started { provider: "device_synthesis" });
    assert!(started.elapsed() >= Duration::from_secs(4));
    assert!(started.elapsed() < Duration::from_secs(10));

    let out = ctl.speak("cà").await.unwrap();
    assert_eq!(out, SpeakOutcome::Started { provider: "device_synthesis" });
    assert_eq!(output.play_count(), 0);
    assert_eq!(synth.requests.lock().unwrap().len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn playback_start_failure_releases_resource_and_falls_back() {
    let fetcher = FakeFetcher::default().reply("lá", 0, Ok(b"la".to_vec()));
    let (ctl, output, _synth) = controller(fetcher, FakeSynth::default());
    output.fail_next_plays(1);

    let out = ctl.speak("lá").await.unwrap();
    assert_eq!(out, SpeakOutcome::Started { provider: "device_synthesis" });
    assert_eq!(output.live_resources(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn all_tiers_failing_clears_indicator() {
    let synth = FakeSynth { unavailable: true, ..FakeSynth::default() };
    let (ctl, _output, _synth) = controller(FakeFetcher::default(), synth);

    let err = ctl.speak("dạ").await.unwrap_err();
    assert!(matches!(err, SpeakError::AllProvidersFailed(_)));
    assert!(!ctl.is_speaking());
  }

  #[tokio::test(start_paused = true)]
  async fn stop_silences_and_releases() {
    let fetcher = FakeFetcher::default().reply("ma", 0, Ok(b"ma".to_vec()));
    let (ctl, output, synth) = controller(fetcher, FakeSynth::default());
    ctl.speak("ma").await.unwrap();
    ctl.stop();
    assert!(!ctl.is_speaking());
    assert_eq!(output.live_resources(), 0);
    assert!(synth.cancels.load(Ordering::SeqCst) >= 1);
  }

  #[test]
  fn voice_choice_falls_back_to_any_vietnamese_voice() {
    let voices = vec![
      Voice { name: "Samantha".into(), lang: "en-US".into() },
      Voice { name: "An".into(), lang: "VI-vn".into() },
    ];
    assert_eq!(choose_voice(&voices, "vi").map(|v| v.name), Some("An".to_string()));
    assert!(choose_voice(&voices[..1], "vi").is_none());
  }
}
