//! Quiz session state machine: idle -> active -> submitting -> results.
//!
//! A submission is split in two halves so that transport layers can hold the
//! session in `Submitting` while the evaluator runs:
//!   - `begin_submit` validates completeness and freezes the transcript,
//!   - `complete_submit` records the outcome and, on success only, feeds the
//!     difficulty store.
//! `submit` chains both around an evaluator call.

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::corpus::Corpus;
use crate::difficulty::{DifficultyMap, DifficultyStore};
use crate::domain::{Evaluation, EvaluationItem, QuizQuestion};
use crate::evaluation::{EvaluationError, QuizEvaluator};
use crate::notice::{Notice, Notices};
use crate::quiz::generate_quiz;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuizState {
  Idle,
  Active,
  Submitting,
  Results,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
  #[error("{unanswered} of {total} questions are still unanswered")]
  InputIncomplete { unanswered: usize, total: usize },
  #[error("quiz is not active (state: {0:?})")]
  NotActive(QuizState),
  #[error("a submission is already in progress")]
  SubmitInProgress,
  #[error("no submission is pending")]
  NoSubmissionPending,
  #[error("'{0}' is not an option for the current question")]
  InvalidOption(String),
  #[error("no eligible word groups to build a quiz from")]
  EmptyQuiz,
  #[error("evaluation failed: {0}")]
  Evaluation(#[from] EvaluationError),
}

/// Per-question line of the results review.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewLine {
  pub index: usize,
  pub word_to_play: String,
  pub correct_answer: String,
  pub user_answer: Option<String>,
  pub correct: bool,
}

pub struct QuizSession {
  id: Uuid,
  quiz_size: usize,
  questions: Vec<QuizQuestion>,
  current_index: usize,
  answers: BTreeMap<usize, String>,
  state: QuizState,
  results: Option<Evaluation>,
  pending: Option<Vec<EvaluationItem>>,
  notices: Notices,
}

impl QuizSession {
  pub fn new(quiz_size: usize, notices: Notices) -> Self {
    Self {
      id: Uuid::new_v4(),
      quiz_size,
      questions: Vec::new(),
      current_index: 0,
      answers: BTreeMap::new(),
      state: QuizState::Idle,
      results: None,
      pending: None,
      notices,
    }
  }

  pub fn id(&self) -> Uuid {
    self.id
  }
  pub fn state(&self) -> QuizState {
    self.state
  }
  pub fn questions(&self) -> &[QuizQuestion] {
    &self.questions
  }
  pub fn current_index(&self) -> usize {
    self.current_index
  }
  pub fn answers(&self) -> &BTreeMap<usize, String> {
    &self.answers
  }
  pub fn results(&self) -> Option<&Evaluation> {
    self.results.as_ref()
  }
  pub fn notices(&self) -> &Notices {
    &self.notices
  }

  pub fn current_question(&self) -> Option<&QuizQuestion> {
    self.questions.get(self.current_index)
  }

  /// Fraction in (0,1]; 0 when there is no quiz.
  pub fn progress(&self) -> f32 {
    if self.questions.is_empty() {
      0.0
    } else {
      (self.current_index + 1) as f32 / self.questions.len() as f32
    }
  }

  pub fn unanswered_count(&self) -> usize {
    (0..self.questions.len()).filter(|i| !self.answers.contains_key(i)).count()
  }

  /// idle|active|results -> active with a freshly generated quiz.
  #[instrument(level = "info", skip(self, corpus, difficulties), fields(session = %self.id))]
  pub fn start(&mut self, corpus: &Corpus, difficulties: &DifficultyMap) -> Result<(), SessionError> {
    if self.state == QuizState::Submitting {
      return Err(SessionError::SubmitInProgress);
    }
    let questions = generate_quiz(corpus, difficulties, self.quiz_size);
    self.answers.clear();
    self.current_index = 0;
    self.results = None;
    self.pending = None;

    if questions.is_empty() {
      self.questions.clear();
      self.state = QuizState::Idle;
      warn!(target: "quiz", session = %self.id, "No eligible word groups; quiz not started");
      self.notices.raise(Notice::destructive("No Quiz Available", "There are no word groups with enough variants to quiz."));
      return Err(SessionError::EmptyQuiz);
    }

    info!(target: "quiz", session = %self.id, questions = questions.len(), "Quiz started");
    self.questions = questions;
    self.state = QuizState::Active;
    Ok(())
  }

  /// results -> active: an entirely new quiz.
  pub fn retry(&mut self, corpus: &Corpus, difficulties: &DifficultyMap) -> Result<(), SessionError> {
    self.start(corpus, difficulties)
  }

  /// Record (or overwrite) the answer for the current question.
  pub fn select_answer(&mut self, answer: &str) -> Result<(), SessionError> {
    self.require_active()?;
    let question = self
      .questions
      .get(self.current_index)
      .ok_or(SessionError::NotActive(self.state))?;
    if !question.options.iter().any(|o| o == answer) {
      return Err(SessionError::InvalidOption(answer.to_string()));
    }
    self.answers.insert(self.current_index, answer.to_string());
    Ok(())
  }

  /// Move forward; no-op on the last question.
  pub fn advance(&mut self) -> Result<(), SessionError> {
    self.require_active()?;
    if self.current_index + 1 < self.questions.len() {
      self.current_index += 1;
    }
    Ok(())
  }

  /// Move back; no-op on the first question.
  pub fn retreat(&mut self) -> Result<(), SessionError> {
    self.require_active()?;
    self.current_index = self.current_index.saturating_sub(1);
    Ok(())
  }

  /// active -> submitting. Rejects incomplete quizzes and re-entry.
  #[instrument(level = "info", skip(self), fields(session = %self.id))]
  pub fn begin_submit(&mut self) -> Result<Vec<EvaluationItem>, SessionError> {
    if self.state == QuizState::Submitting {
      return Err(SessionError::SubmitInProgress);
    }
    self.require_active()?;

    let total = self.questions.len();
    let unanswered = self.unanswered_count();
    if unanswered > 0 {
      self.notices.raise(Notice::destructive(
        "Incomplete Quiz",
        format!("Please answer all {total} questions before submitting ({unanswered} remaining)."),
      ));
      info!(target: "quiz", session = %self.id, unanswered, total, "Submit rejected: incomplete");
      return Err(SessionError::InputIncomplete { unanswered, total });
    }

    let items: Vec<EvaluationItem> = self
      .questions
      .iter()
      .enumerate()
      .map(|(i, q)| EvaluationItem {
        question: q.question_text.clone(),
        options: q.options.clone(),
        correct_answer: q.correct_answer.clone(),
        user_answer: self.answers.get(&i).cloned().unwrap_or_default(),
      })
      .collect();

    self.pending = Some(items.clone());
    self.state = QuizState::Submitting;
    Ok(items)
  }

  /// submitting -> results on success (difficulties adjusted once), or back to
  /// active with answers untouched on failure.
  #[instrument(level = "info", skip(self, outcome, store), fields(session = %self.id, ok = outcome.is_ok()))]
  pub async fn complete_submit(
    &mut self,
    outcome: Result<Evaluation, EvaluationError>,
    store: &mut DifficultyStore,
  ) -> Result<&Evaluation, SessionError> {
    if self.state != QuizState::Submitting {
      return Err(SessionError::NoSubmissionPending);
    }
    let items = self.pending.take().unwrap_or_default();

    match outcome {
      Ok(evaluation) => {
        if let Err(e) = store.apply_outcomes(&items).await {
          error!(target: "quiz", session = %self.id, error = %e, "Failed to persist difficulty update");
        }
        info!(target: "quiz", session = %self.id, score = evaluation.score, "Quiz evaluated");
        self.state = QuizState::Results;
        Ok(&*self.results.insert(evaluation))
      }
      Err(e) => {
        error!(target: "quiz", session = %self.id, error = %e, "Quiz evaluation failed; returning to active");
        self.state = QuizState::Active;
        self.notices.raise(Notice::destructive(
          "Evaluation Error",
          "There was a problem evaluating your quiz. Please try again.",
        ));
        Err(SessionError::Evaluation(e))
      }
    }
  }

  /// Full submit: validate, evaluate, then apply outcomes under the store's write lock.
  pub async fn submit(
    &mut self,
    evaluator: &dyn QuizEvaluator,
    store: &RwLock<DifficultyStore>,
  ) -> Result<Evaluation, SessionError> {
    let items = self.begin_submit()?;
    let outcome = evaluator.evaluate(&items).await;
    let mut guard = store.write().await;
    self.complete_submit(outcome, &mut guard).await.cloned()
  }

  /// Results review, one line per question.
  pub fn review(&self) -> Vec<ReviewLine> {
    self
      .questions
      .iter()
      .enumerate()
      .map(|(i, q)| {
        let user_answer = self.answers.get(&i).cloned();
        ReviewLine {
          index: i,
          word_to_play: q.word_to_play.clone(),
          correct_answer: q.correct_answer.clone(),
          correct: user_answer.as_deref() == Some(q.correct_answer.as_str()),
          user_answer,
        }
      })
      .collect()
  }

  fn require_active(&self) -> Result<(), SessionError> {
    match self.state {
      QuizState::Active => Ok(()),
      QuizState::Submitting => Err(SessionError::SubmitInProgress),
      other => Err(SessionError::NotActive(other)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::difficulty::{KeyValueStore, MemoryStore, DIFFICULTY_STORAGE_KEY};
  use async_trait::async_trait;
  use std::sync::Arc;

  struct FixedEvaluator(Result<Evaluation, ()>);

  #[async_trait]
  impl QuizEvaluator for FixedEvaluator {
    async fn evaluate(&self, _items: &[EvaluationItem]) -> Result<Evaluation, EvaluationError> {
      self.0.clone().map_err(|_| EvaluationError::Upstream("boom".into()))
    }
  }

  fn ok_evaluator() -> FixedEvaluator {
    FixedEvaluator(Ok(Evaluation { score: 66.0, feedback: "Nice.".into() }))
  }

  fn store() -> (Arc<MemoryStore>, RwLock<DifficultyStore>) {
    let kv = Arc::new(MemoryStore::default());
    let store = DifficultyStore::load(kv.clone());
    (kv, RwLock::new(store))
  }

  fn started(size: usize) -> QuizSession {
    let mut s = QuizSession::new(size, Notices::default());
    s.start(&Corpus::builtin(), &DifficultyMap::new()).unwrap();
    s
  }

  fn wrong_option(q: &QuizQuestion) -> String {
    q.options.iter().find(|o| **o != q.correct_answer).cloned().unwrap()
  }

  #[test]
  fn start_resets_everything() {
    let mut s = started(3);
    assert_eq!(s.state(), QuizState::Active);
    assert_eq!(s.questions().len(), 3);
    assert_eq!(s.current_index(), 0);
    let first = s.questions()[0].options[0].clone();
    s.select_answer(&first).unwrap();
    s.advance().unwrap();
    s.start(&Corpus::builtin(), &DifficultyMap::new()).unwrap();
    assert!(s.answers().is_empty());
    assert_eq!(s.current_index(), 0);
    assert!(s.results().is_none());
  }

  #[test]
  fn navigation_is_bounded_and_progress_tracks_index() {
    let mut s = started(3);
    s.retreat().unwrap();
    assert_eq!(s.current_index(), 0);
    assert!((s.progress() - 1.0 / 3.0).abs() < 1e-6);
    s.advance().unwrap();
    s.advance().unwrap();
    s.advance().unwrap();
    assert_eq!(s.current_index(), 2);
    assert!((s.progress() - 1.0).abs() < 1e-6);
  }

  #[test]
  fn answers_overwrite_and_must_be_options() {
    let mut s = started(2);
    let q = s.current_question().unwrap().clone();
    s.select_answer(&q.options[0]).unwrap();
    s.select_answer(&q.options[1]).unwrap();
    assert_eq!(s.answers().get(&0), Some(&q.options[1]));
    assert!(matches!(s.select_answer("zzz"), Err(SessionError::InvalidOption(_))));
  }

  #[test]
  fn operations_outside_active_are_rejected() {
    let mut s = QuizSession::new(3, Notices::default());
    assert!(matches!(s.advance(), Err(SessionError::NotActive(QuizState::Idle))));
    assert!(matches!(s.begin_submit(), Err(SessionError::NotActive(QuizState::Idle))));
  }

  #[tokio::test]
  async fn incomplete_submit_is_rejected_and_keeps_answers() {
    let mut s = started(3);
    let mut notices = s.notices().subscribe();
    for _ in 0..2 {
      let q = s.current_question().unwrap().clone();
      s.select_answer(&q.correct_answer).unwrap();
      s.advance().unwrap();
    }
    let (_, store) = store();
    let err = s.submit(&ok_evaluator(), &store).await.unwrap_err();
    assert!(matches!(err, SessionError::InputIncomplete { unanswered: 1, total: 3 }));
    assert_eq!(s.state(), QuizState::Active);
    assert_eq!(s.answers().len(), 2);
    let notice = notices.try_recv().unwrap();
    assert_eq!(notice.title, "Incomplete Quiz");
    assert!(notice.description.contains("1 remaining"));
  }

  #[tokio::test]
  async fn evaluation_failure_returns_to_active_without_touching_store() {
    let mut s = started(3);
    for i in 0..3 {
      let q = s.current_question().unwrap().clone();
      s.select_answer(&q.correct_answer).unwrap();
      if i < 2 {
        s.advance().unwrap();
      }
    }
    let (kv, store) = store();
    let err = s.submit(&FixedEvaluator(Err(())), &store).await.unwrap_err();
    assert!(matches!(err, SessionError::Evaluation(_)));
    assert_eq!(s.state(), QuizState::Active);
    assert_eq!(s.answers().len(), 3);
    assert_eq!(s.current_index(), 2);
    assert!(store.read().await.snapshot().is_empty());
    assert!(kv.get(DIFFICULTY_STORAGE_KEY).unwrap().is_none());
  }

  #[tokio::test]
  async fn successful_submit_adjusts_exactly_the_submitted_words() {
    let mut s = started(3);
    let qs = s.questions().to_vec();
    s.select_answer(&qs[0].correct_answer).unwrap();
    s.advance().unwrap();
    s.select_answer(&wrong_option(&qs[1])).unwrap();
    s.advance().unwrap();
    s.select_answer(&qs[2].correct_answer).unwrap();

    let (kv, store) = store();
    store.write().await.adjust(&qs[0].correct_answer, 4);
    let eval = s.submit(&ok_evaluator(), &store).await.unwrap();
    assert_eq!(eval.score, 66.0);
    assert_eq!(s.state(), QuizState::Results);
    assert_eq!(s.results().map(|r| r.feedback.as_str()), Some("Nice."));

    let st = store.read().await;
    assert_eq!(st.get(&qs[0].correct_answer), 3);
    assert_eq!(st.get(&qs[1].correct_answer), 2);
    assert_eq!(st.get(&qs[2].correct_answer), 0);
    assert_eq!(st.snapshot().len(), 3);
    assert!(kv.get(DIFFICULTY_STORAGE_KEY).unwrap().is_some());

    let review = s.review();
    assert!(review[0].correct && !review[1].correct && review[2].correct);
  }

  #[tokio::test]
  async fn submit_cannot_reenter_while_evaluating() {
    let mut s = started(2);
    for i in 0..2 {
      let q = s.current_question().unwrap().clone();
      s.select_answer(&q.correct_answer).unwrap();
      if i == 0 {
        s.advance().unwrap();
      }
    }
    s.begin_submit().unwrap();
    assert!(matches!(s.begin_submit(), Err(SessionError::SubmitInProgress)));
    assert!(matches!(s.start(&Corpus::builtin(), &DifficultyMap::new()), Err(SessionError::SubmitInProgress)));
    assert!(matches!(s.select_answer("x"), Err(SessionError::SubmitInProgress)));

    let (_, store) = store();
    let mut guard = store.write().await;
    s.complete_submit(Ok(Evaluation { score: 100.0, feedback: "ok".into() }), &mut guard).await.unwrap();
    assert!(matches!(
      s.complete_submit(Ok(Evaluation { score: 1.0, feedback: "again".into() }), &mut guard).await,
      Err(SessionError::NoSubmissionPending)
    ));
    assert_eq!(guard.snapshot().len(), 2);
  }

  #[tokio::test]
  async fn retry_builds_a_new_quiz_from_results() {
    let mut s = started(2);
    for i in 0..2 {
      let q = s.current_question().unwrap().clone();
      s.select_answer(&q.correct_answer).unwrap();
      if i == 0 {
        s.advance().unwrap();
      }
    }
    let kv = Arc::new(MemoryStore::default());
    let mut st = DifficultyStore::load(kv);
    s.begin_submit().unwrap();
    s.complete_submit(Ok(Evaluation { score: 100.0, feedback: "ok".into() }), &mut st).await.unwrap();
    assert_eq!(s.state(), QuizState::Results);

    s.retry(&Corpus::builtin(), st.snapshot()).unwrap();
    assert_eq!(s.state(), QuizState::Active);
    assert!(s.results().is_none());
    assert!(s.answers().is_empty());
    assert_eq!(s.questions().len(), 2);
  }

  #[test]
  fn empty_corpus_keeps_session_idle() {
    let mut s = QuizSession::new(10, Notices::default());
    let err = s.start(&Corpus::new(vec![]), &DifficultyMap::new()).unwrap_err();
    assert!(matches!(err, SessionError::EmptyQuiz));
    assert_eq!(s.state(), QuizState::Idle);
  }
}
