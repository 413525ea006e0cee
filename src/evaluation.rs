//! Quiz evaluation capability.
//!
//! The session only sees `QuizEvaluator`. Two implementations exist: the model-backed
//! client in `openai.rs` and `LocalEvaluator`, used when no API key is configured.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::corpus::Corpus;
use crate::domain::{Evaluation, EvaluationItem};

/// Upper bound on transcript length accepted by evaluators.
pub const MAX_EVALUATION_ITEMS: usize = 50;
const MAX_FIELD_CHARS: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
  #[error("evaluation upstream error: {0}")]
  Upstream(String),
  #[error("malformed evaluation response: {0}")]
  Malformed(String),
  #[error("invalid evaluation request: {0}")]
  InvalidRequest(String),
}

#[async_trait]
pub trait QuizEvaluator: Send + Sync {
  async fn evaluate(&self, items: &[EvaluationItem]) -> Result<Evaluation, EvaluationError>;
}

/// Reject transcripts an evaluator must not be asked to grade.
pub fn validate_request(items: &[EvaluationItem]) -> Result<(), EvaluationError> {
  if items.is_empty() {
    return Err(EvaluationError::InvalidRequest("empty transcript".into()));
  }
  if items.len() > MAX_EVALUATION_ITEMS {
    return Err(EvaluationError::InvalidRequest(format!(
      "{} items exceeds limit of {MAX_EVALUATION_ITEMS}",
      items.len()
    )));
  }
  for (i, item) in items.iter().enumerate() {
    if item.options.is_empty() {
      return Err(EvaluationError::InvalidRequest(format!("item {i} has no options")));
    }
    let too_long = [&item.question, &item.correct_answer, &item.user_answer]
      .into_iter()
      .chain(item.options.iter())
      .any(|s| s.chars().count() > MAX_FIELD_CHARS);
    if too_long {
      return Err(EvaluationError::InvalidRequest(format!("item {i} has an oversized field")));
    }
  }
  Ok(())
}

/// Parse a model reply into an `Evaluation`. Missing or out-of-range fields are
/// a malformed response, never defaulted.
pub fn parse_evaluation(raw: &str) -> Result<Evaluation, EvaluationError> {
  #[derive(Deserialize)]
  struct Raw {
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    feedback: Option<String>,
  }

  let r: Raw = serde_json::from_str(raw.trim()).map_err(|e| EvaluationError::Malformed(format!("JSON parse error: {e}")))?;
  let score = r.score.ok_or_else(|| EvaluationError::Malformed("missing score".into()))?;
  if !score.is_finite() || !(0.0..=100.0).contains(&score) {
    return Err(EvaluationError::Malformed(format!("score {score} outside [0,100]")));
  }
  let feedback = r
    .feedback
    .map(|f| f.trim().to_string())
    .filter(|f| !f.is_empty())
    .ok_or_else(|| EvaluationError::Malformed("missing feedback".into()))?;
  Ok(Evaluation { score: score as f32, feedback })
}

/// Deterministic scorer: percentage correct plus a list of missed words.
pub struct LocalEvaluator {
  corpus: Arc<Corpus>,
}

impl LocalEvaluator {
  pub fn new(corpus: Arc<Corpus>) -> Self {
    Self { corpus }
  }
}

#[async_trait]
impl QuizEvaluator for LocalEvaluator {
  #[instrument(level = "info", skip(self, items), fields(items = items.len()))]
  async fn evaluate(&self, items: &[EvaluationItem]) -> Result<Evaluation, EvaluationError> {
    validate_request(items)?;
    let correct = items.iter().filter(|i| i.is_correct()).count();
    let score = (100.0 * correct as f32 / items.len() as f32).round();

    let mut feedback = format!("You got **{correct} of {}** right.", items.len());
    let missed: Vec<&EvaluationItem> = items.iter().filter(|i| !i.is_correct()).collect();
    if missed.is_empty() {
      feedback.push_str(" Every tone was heard correctly.");
    } else {
      feedback.push_str("\n\nWords to practice:");
      for item in missed {
        let detail = self
          .corpus
          .variant(&item.correct_answer)
          .map(|v| format!(" ({}: {})", v.tone, v.meaning))
          .unwrap_or_default();
        let chosen = if item.user_answer.is_empty() { "nothing" } else { item.user_answer.as_str() };
        feedback.push_str(&format!("\n- **{}**{detail}, you chose *{chosen}*", item.correct_answer));
      }
    }
    debug!(target: "quiz", correct, score, "Local evaluation complete");
    Ok(Evaluation { score, feedback })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(correct: &str, user: &str) -> EvaluationItem {
    EvaluationItem {
      question: "Which word do you hear?".into(),
      options: vec!["ma".into(), "mà".into(), "má".into()],
      correct_answer: correct.into(),
      user_answer: user.into(),
    }
  }

  #[test]
  fn parse_accepts_well_formed_reply() {
    let e = parse_evaluation(r#"{"score": 80, "feedback": "Watch the **falling** tone."}"#).unwrap();
    assert_eq!(e.score, 80.0);
    assert!(e.feedback.contains("falling"));
  }

  #[test]
  fn parse_rejects_missing_or_bad_fields() {
    assert!(matches!(parse_evaluation(r#"{"feedback": "x"}"#), Err(EvaluationError::Malformed(_))));
    assert!(matches!(parse_evaluation(r#"{"score": 50}"#), Err(EvaluationError::Malformed(_))));
    assert!(matches!(parse_evaluation(r#"{"score": 50, "feedback": "  "}"#), Err(EvaluationError::Malformed(_))));
    assert!(matches!(parse_evaluation(r#"{"score": 150, "feedback": "x"}"#), Err(EvaluationError::Malformed(_))));
    assert!(matches!(parse_evaluation("not json"), Err(EvaluationError::Malformed(_))));
  }

  #[test]
  fn request_validation_rejects_empty_and_oversized() {
    assert!(validate_request(&[]).is_err());
    let many = vec![item("ma", "ma"); MAX_EVALUATION_ITEMS + 1];
    assert!(matches!(validate_request(&many), Err(EvaluationError::InvalidRequest(_))));
    let mut long = item("ma", "ma");
    long.user_answer = "a".repeat(MAX_FIELD_CHARS + 1);
    assert!(validate_request(&[long]).is_err());
    assert!(validate_request(&[item("ma", "")]).is_ok());
  }

  #[tokio::test]
  async fn local_evaluator_scores_and_lists_misses() {
    let eval = LocalEvaluator::new(Arc::new(Corpus::builtin()));
    let out = eval
      .evaluate(&[item("ma", "ma"), item("mà", "má"), item("má", "má"), item("mạ", "")])
      .await
      .unwrap();
    assert_eq!(out.score, 50.0);
    assert!(out.feedback.contains("**mà** (falling: but/that), you chose *má*"));
    assert!(out.feedback.contains("you chose *nothing*"));
    assert!(!out.feedback.contains("**ma**"));
  }
}
