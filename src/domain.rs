//! Domain models: tones, word variants/groups, quiz questions and evaluation payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the six Vietnamese pitch-contour classes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Tone {
  Level,
  Falling,
  Rising,
  FallingRising,
  Creaky,
  Heavy,
}

impl Tone {
  pub const ALL: [Tone; 6] = [
    Tone::Level,
    Tone::Falling,
    Tone::Rising,
    Tone::FallingRising,
    Tone::Creaky,
    Tone::Heavy,
  ];

  pub fn label(self) -> &'static str {
    match self {
      Tone::Level => "level",
      Tone::Falling => "falling",
      Tone::Rising => "rising",
      Tone::FallingRising => "falling-rising",
      Tone::Creaky => "creaky",
      Tone::Heavy => "heavy",
    }
  }

  /// Conventional diacritic and Vietnamese tone name.
  pub fn marker(self) -> &'static str {
    match self {
      Tone::Level => "no mark (ngang)",
      Tone::Falling => "grave accent (`) - huyền",
      Tone::Rising => "acute accent (´) - sắc",
      Tone::FallingRising => "hook above (̉) - hỏi",
      Tone::Creaky => "tilde (~) - ngã",
      Tone::Heavy => "dot below (.) - nặng",
    }
  }
}

impl fmt::Display for Tone {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WordVariant {
  pub word: String,
  pub tone: Tone,
  pub meaning: String,
}

/// A confusable cluster: same base spelling family, different tone/diacritic.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WordGroup {
  pub base_spelling: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub note: Option<String>,
  pub variants: Vec<WordVariant>,
}

impl WordGroup {
  /// A group can only be quizzed when it offers at least two options.
  pub fn is_quizzable(&self) -> bool {
    self.variants.len() >= 2
  }

  pub fn words(&self) -> impl Iterator<Item = &str> {
    self.variants.iter().map(|v| v.word.as_str())
  }

  pub fn variant(&self, word: &str) -> Option<&WordVariant> {
    self.variants.iter().find(|v| v.word == word)
  }
}

/// One multiple-choice listening question. Immutable once generated.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
  pub question_text: String,
  pub word_to_play: String,
  pub options: Vec<String>,
  pub correct_answer: String,
  pub base_spelling: String,
}

/// One line of the transcript sent to the evaluation capability.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationItem {
  pub question: String,
  pub options: Vec<String>,
  pub correct_answer: String,
  pub user_answer: String,
}

impl EvaluationItem {
  pub fn is_correct(&self) -> bool {
    self.user_answer == self.correct_answer
  }
}

/// Score in [0,100] plus short markdown-lite feedback.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
  pub score: f32,
  pub feedback: String,
}
