//! Minimal OpenAI-compatible client used as the quiz evaluation capability.
//!
//! We only call chat.completions and request a strict JSON object.
//! Calls are instrumented and log model names, latencies, and response sizes (not contents).
//!
//! NOTE: We never log the API key and we keep payload truncations short.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::config::Prompts;
use crate::domain::{Evaluation, EvaluationItem};
use crate::evaluation::{parse_evaluation, validate_request, EvaluationError, QuizEvaluator};
use crate::util::{fill_template, trunc_for_log};

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
  pub prompts: Prompts,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env(prompts: Prompts) -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    Self::new(api_key, base_url, model, prompts)
  }

  pub fn new(api_key: String, base_url: String, model: String, prompts: Prompts) -> Option<Self> {
    let client = reqwest::Client::builder().timeout(Duration::from_secs(20)).build().ok()?;
    Some(Self { client, api_key, base_url, model, prompts })
  }

  /// JSON-object chat completion; returns the raw message content.
  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model))]
  async fn chat_json_raw(&self, system: &str, user: &str, temperature: f32) -> Result<String, String> {
    let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "tone-trainer/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(|e| e.to_string())?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      return Err(format!("OpenAI HTTP {}: {}", status.as_u16(), trunc_for_log(&msg, 200)));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| e.to_string())?;
    if let Some(usage) = &body.usage {
      info!(target: "quiz", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    Ok(body.choices.first().and_then(|c| c.message.content.clone()).unwrap_or_default())
  }
}

/// Render the quiz transcript with the configured templates.
pub fn render_quiz_prompt(prompts: &Prompts, items: &[EvaluationItem]) -> String {
  let rendered: String = items
    .iter()
    .map(|it| {
      let options = it.options.join(", ");
      fill_template(
        &prompts.quiz_eval_item_template,
        &[
          ("question", it.question.as_str()),
          ("options", options.as_str()),
          ("correct_answer", it.correct_answer.as_str()),
          ("user_answer", it.user_answer.as_str()),
        ],
      )
    })
    .collect::<Vec<_>>()
    .join("\n");
  fill_template(&prompts.quiz_eval_user_template, &[("items", rendered.as_str())])
}

#[async_trait]
impl QuizEvaluator for OpenAI {
  #[instrument(level = "info", skip(self, items), fields(items = items.len(), model = %self.model))]
  async fn evaluate(&self, items: &[EvaluationItem]) -> Result<Evaluation, EvaluationError> {
    validate_request(items)?;
    let user = render_quiz_prompt(&self.prompts, items);
    let start = std::time::Instant::now();
    let raw = self
      .chat_json_raw(&self.prompts.quiz_eval_system, &user, 0.2)
      .await
      .map_err(|e| {
        error!(target: "quiz", elapsed = ?start.elapsed(), error = %e, "Model call failed during quiz evaluation");
        EvaluationError::Upstream(e)
      })?;
    debug!(target: "quiz", elapsed = ?start.elapsed(), reply_len = raw.len(), "Model evaluation received");

    let evaluation = parse_evaluation(&raw).inspect_err(|e| {
      error!(target: "quiz", error = %e, reply = %trunc_for_log(&raw, 120), "Model returned malformed evaluation");
    })?;
    info!(target: "quiz", score = evaluation.score, "Quiz evaluated by model");
    Ok(evaluation)
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
