//! Trainer configuration: evaluation prompts, quiz size and extra word groups from TOML.
//!
//! See `TrainerConfig` and `Prompts` for the expected schema.

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::{WordGroup, WordVariant};
use crate::quiz::DEFAULT_QUIZ_SIZE;

fn default_quiz_size() -> usize {
  DEFAULT_QUIZ_SIZE
}

#[derive(Clone, Debug, Deserialize)]
pub struct TrainerConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default = "default_quiz_size")]
  pub quiz_size: usize,
  /// Appended to the built-in corpus.
  #[serde(default)]
  pub word_groups: Vec<WordGroupCfg>,
}

impl Default for TrainerConfig {
  fn default() -> Self {
    Self { prompts: Prompts::default(), quiz_size: DEFAULT_QUIZ_SIZE, word_groups: Vec::new() }
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct WordGroupCfg {
  pub base_spelling: String,
  #[serde(default)]
  pub note: Option<String>,
  #[serde(default)]
  pub variants: Vec<WordVariant>,
}

impl From<WordGroupCfg> for WordGroup {
  fn from(c: WordGroupCfg) -> Self {
    WordGroup { base_spelling: c.base_spelling, note: c.note, variants: c.variants }
  }
}

/// Prompts for the model-backed evaluator. Override in TOML to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub quiz_eval_system: String,
  /// `{items}` is replaced by the rendered item list.
  pub quiz_eval_user_template: String,
  /// Rendered once per item: `{question}`, `{options}`, `{correct_answer}`, `{user_answer}`.
  pub quiz_eval_item_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      quiz_eval_system: "You are an expert Vietnamese language tutor. You are given the results of a quiz taken by a student learning Vietnamese tones. Evaluate the quiz and provide a score out of 100. Then provide personalized feedback to the student, highlighting the specific tones or words they struggled with. Respond ONLY with strict JSON: {\"score\": number 0-100, \"feedback\": string}. Feedback may use **bold** and *italic*.".into(),
      quiz_eval_user_template: "Quiz Data:\n{items}".into(),
      quiz_eval_item_template: "Question: {question}\nOptions: {options}\nCorrect Answer: {correct_answer}\nUser Answer: {user_answer}\n".into(),
    }
  }
}

/// Load `TrainerConfig` from TRAINER_CONFIG_PATH. Missing path means defaults;
/// IO/parse errors are logged and also fall back to defaults.
pub fn load_trainer_config_from_env() -> TrainerConfig {
  let Ok(path) = std::env::var("TRAINER_CONFIG_PATH") else {
    return TrainerConfig::default();
  };
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_trainer_config(&s) {
      Ok(cfg) => {
        info!(target: "tone_trainer", %path, extra_groups = cfg.word_groups.len(), "Loaded trainer config (TOML)");
        cfg
      }
      Err(e) => {
        error!(target: "tone_trainer", %path, error = %e, "Failed to parse TOML config");
        TrainerConfig::default()
      }
    },
    Err(e) => {
      error!(target: "tone_trainer", %path, error = %e, "Failed to read TOML config file");
      TrainerConfig::default()
    }
  }
}

pub fn parse_trainer_config(s: &str) -> Result<TrainerConfig, toml::de::Error> {
  toml::from_str::<TrainerConfig>(s)
}
