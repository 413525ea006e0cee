//! Text-to-speech proxy (server half) and the HTTP audio fetcher (client half).
//!
//! The proxy forwards to an undocumented translate TTS endpoint with browser-like
//! headers so the page never hits it cross-origin. Responses are never cached:
//! the same URL must not serve audio for a different word.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, REFERER, USER_AGENT};
use tracing::{debug, instrument, warn};

use crate::speak::{AudioFetcher, SpeakError};

pub const DEFAULT_UPSTREAM_URL: &str = "https://translate.google.com/translate_tts";
pub const DEFAULT_LANG: &str = "vi";
const BROWSER_UA: &str =
  "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const UPSTREAM_REFERER: &str = "https://translate.google.com/";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProxyError {
  #[error("Missing 'text' query param")]
  BadRequest,
  #[error("Upstream TTS request failed")]
  Upstream(u16),
  #[error("TTS request timeout")]
  Timeout,
  #[error("TTS proxy error")]
  Transport(String),
}

impl ProxyError {
  /// HTTP status the proxy answers with.
  pub fn status_code(&self) -> u16 {
    match self {
      ProxyError::BadRequest => 400,
      ProxyError::Upstream(status) => *status,
      ProxyError::Timeout => 504,
      ProxyError::Transport(_) => 502,
    }
  }
}

#[derive(Clone)]
pub struct TtsProxy {
  client: reqwest::Client,
  upstream_url: String,
  timeout: Duration,
}

impl TtsProxy {
  pub fn new(upstream_url: impl Into<String>, timeout: Duration) -> Result<Self, String> {
    let client = reqwest::Client::builder()
      .redirect(reqwest::redirect::Policy::limited(5))
      .build()
      .map_err(|e| e.to_string())?;
    Ok(Self { client, upstream_url: upstream_url.into(), timeout })
  }

  /// Read `TTS_UPSTREAM_URL` and `TTS_TIMEOUT_MS`.
  pub fn from_env() -> Result<Self, String> {
    let upstream = std::env::var("TTS_UPSTREAM_URL").unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.into());
    let timeout_ms = std::env::var("TTS_TIMEOUT_MS")
      .ok()
      .and_then(|v| v.parse::<u64>().ok())
      .unwrap_or(8_000);
    Self::new(upstream, Duration::from_millis(timeout_ms))
  }

  pub fn upstream_url(&self) -> &str {
    &self.upstream_url
  }

  fn request_url(&self, text: &str, lang: &str) -> Result<reqwest::Url, ProxyError> {
    reqwest::Url::parse_with_params(
      &self.upstream_url,
      &[("ie", "UTF-8"), ("q", text), ("tl", lang), ("client", "tw-ob")],
    )
    .map_err(|e| ProxyError::Transport(e.to_string()))
  }

  /// Fetch MPEG audio for `text`. `lang` defaults to "vi" and is lower-cased.
  #[instrument(level = "info", skip(self, text), fields(text_len = text.len()))]
  pub async fn fetch(&self, text: &str, lang: Option<&str>) -> Result<Vec<u8>, ProxyError> {
    if text.trim().is_empty() {
      return Err(ProxyError::BadRequest);
    }
    let lang = lang.map(str::to_lowercase).unwrap_or_else(|| DEFAULT_LANG.to_string());
    let url = self.request_url(text, &lang)?;

    let started = std::time::Instant::now();
    let res = self
      .client
      .get(url)
      .header(USER_AGENT, BROWSER_UA)
      .header(REFERER, UPSTREAM_REFERER)
      .header(ACCEPT, "*/*")
      .timeout(self.timeout)
      .send()
      .await
      .map_err(classify)?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      warn!(target: "tts_proxy", status, %lang, "Upstream TTS returned non-OK status");
      return Err(ProxyError::Upstream(status));
    }

    let bytes = res.bytes().await.map_err(classify)?;
    debug!(target: "tts_proxy", %lang, bytes = bytes.len(), elapsed = ?started.elapsed(), "Upstream audio received");
    Ok(bytes.to_vec())
  }
}

fn classify(e: reqwest::Error) -> ProxyError {
  if e.is_timeout() {
    warn!(target: "tts_proxy", "Upstream TTS timed out");
    ProxyError::Timeout
  } else {
    warn!(target: "tts_proxy", error = %e, "Upstream TTS transport error");
    ProxyError::Transport(e.to_string())
  }
}

/// Tier-1 fetcher: calls our own `/api/v1/tts` endpoint.
#[derive(Clone)]
pub struct HttpAudioFetcher {
  client: reqwest::Client,
  endpoint: String,
}

impl HttpAudioFetcher {
  pub fn new(endpoint: impl Into<String>) -> Self {
    Self { client: reqwest::Client::new(), endpoint: endpoint.into() }
  }
}

#[async_trait]
impl AudioFetcher for HttpAudioFetcher {
  async fn fetch(&self, text: &str, language_code: &str) -> Result<Vec<u8>, SpeakError> {
    let res = self
      .client
      .get(&self.endpoint)
      .query(&[("text", text), ("lang", language_code)])
      .send()
      .await
      .map_err(|e| SpeakError::Fetch(e.to_string()))?;
    if !res.status().is_success() {
      return Err(SpeakError::Fetch(format!("HTTP {}", res.status().as_u16())));
    }
    let bytes = res.bytes().await.map_err(|e| SpeakError::Fetch(e.to_string()))?;
    Ok(bytes.to_vec())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::{extract::Query, http::StatusCode, routing::get, Router};
  use std::collections::HashMap;

  /// Serve a fake upstream on an ephemeral port and return its base URL.
  async fn fake_upstream() -> String {
    async fn tts(Query(q): Query<HashMap<String, String>>) -> Result<Vec<u8>, StatusCode> {
      match q.get("q").map(String::as_str) {
        Some("slow") => {
          tokio::time::sleep(Duration::from_secs(2)).await;
          Ok(b"late".to_vec())
        }
        Some("missing") => Err(StatusCode::NOT_FOUND),
        Some(text) => Ok(format!("{}:{}", q.get("tl").cloned().unwrap_or_default(), text).into_bytes()),
        None => Err(StatusCode::BAD_REQUEST),
      }
    }
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, Router::new().route("/translate_tts", get(tts))).await.unwrap();
    });
    format!("http://{addr}/translate_tts")
  }

  #[tokio::test]
  async fn proxy_forwards_text_and_lowercases_lang() {
    let proxy = TtsProxy::new(fake_upstream().await, Duration::from_secs(1)).unwrap();
    assert_eq!(proxy.fetch("mã", Some("VI")).await.unwrap(), "vi:mã".as_bytes());
    assert_eq!(proxy.fetch("ma", None).await.unwrap(), b"vi:ma");
  }

  #[tokio::test]
  async fn proxy_classifies_failures() {
    let proxy = TtsProxy::new(fake_upstream().await, Duration::from_millis(200)).unwrap();
    assert_eq!(proxy.fetch("   ", None).await, Err(ProxyError::BadRequest));
    assert_eq!(proxy.fetch("missing", None).await, Err(ProxyError::Upstream(404)));
    assert_eq!(proxy.fetch("slow", None).await, Err(ProxyError::Timeout));
    assert_eq!(ProxyError::Timeout.status_code(), 504);

    let dead = TtsProxy::new("http://127.0.0.1:1/translate_tts", Duration::from_millis(200)).unwrap();
    let err = dead.fetch("ma", None).await.unwrap_err();
    assert_eq!(err.status_code(), 502);
    assert_eq!(err.to_string(), "TTS proxy error");
  }
}
