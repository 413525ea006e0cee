//! Quiz generation: difficulty-weighted group sampling without replacement.
//!
//! Flow:
//! 1) Keep only groups with >= 2 variants.
//! 2) Weight each group by sum(difficulty(word) + 1) over its variants.
//! 3) Draw groups one at a time proportionally to weight, removing each pick.
//! 4) Per group: random correct variant, shuffled options, then shuffle the quiz.

use rand::{seq::SliceRandom, Rng};
use tracing::{debug, instrument};

use crate::corpus::Corpus;
use crate::difficulty::DifficultyMap;
use crate::domain::{QuizQuestion, WordGroup};

pub const QUESTION_TEXT: &str = "Which word do you hear?";
pub const DEFAULT_QUIZ_SIZE: usize = 10;

/// Selection weight of a group. The +1 per variant keeps unseen words eligible.
pub fn group_weight(group: &WordGroup, difficulties: &DifficultyMap) -> u64 {
  group
    .variants
    .iter()
    .map(|v| u64::from(difficulties.get(&v.word).copied().unwrap_or(0)) + 1)
    .sum()
}

/// Generate up to `quiz_size` questions from distinct eligible groups.
/// Returns an empty quiz when the corpus has no eligible group.
pub fn generate_quiz(corpus: &Corpus, difficulties: &DifficultyMap, quiz_size: usize) -> Vec<QuizQuestion> {
  generate_quiz_with_rng(corpus, difficulties, quiz_size, &mut rand::thread_rng())
}

#[instrument(level = "debug", skip(corpus, difficulties, rng))]
pub fn generate_quiz_with_rng<R: Rng + ?Sized>(
  corpus: &Corpus,
  difficulties: &DifficultyMap,
  quiz_size: usize,
  rng: &mut R,
) -> Vec<QuizQuestion> {
  let selected = sample_groups(corpus, difficulties, quiz_size, rng);

  let mut questions: Vec<QuizQuestion> = selected
    .into_iter()
    .filter_map(|group| build_question(group, rng))
    .collect();
  questions.shuffle(rng);

  debug!(target: "quiz", count = questions.len(), "Generated quiz");
  questions
}

fn sample_groups<'a, R: Rng + ?Sized>(
  corpus: &'a Corpus,
  difficulties: &DifficultyMap,
  quiz_size: usize,
  rng: &mut R,
) -> Vec<&'a WordGroup> {
  let mut pool: Vec<(&WordGroup, u64)> = corpus
    .eligible()
    .map(|g| (g, group_weight(g, difficulties)))
    .collect();
  let target = quiz_size.min(pool.len());
  let mut selected = Vec::with_capacity(target);

  while selected.len() < target && !pool.is_empty() {
    let total: u64 = pool.iter().map(|(_, w)| *w).sum();
    if total == 0 {
      break;
    }
    // Integer cut point in [0, total): the first candidate whose running sum
    // exceeds it owns that slice of the weight line.
    let cut = rng.gen_range(0..total);
    let mut acc = 0u64;
    let idx = pool
      .iter()
      .position(|(_, w)| {
        acc += w;
        acc > cut
      })
      .unwrap_or(pool.len() - 1);
    let (group, _) = pool.remove(idx);
    selected.push(group);
  }
  selected
}

fn build_question<R: Rng + ?Sized>(group: &WordGroup, rng: &mut R) -> Option<QuizQuestion> {
  let correct = group.variants.choose(rng)?;
  let mut options: Vec<String> = group.words().map(str::to_string).collect();
  options.shuffle(rng);
  Some(QuizQuestion {
    question_text: QUESTION_TEXT.to_string(),
    word_to_play: correct.word.clone(),
    options,
    correct_answer: correct.word.clone(),
    base_spelling: group.base_spelling.clone(),
  })
}
