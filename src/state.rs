//! Application state shared by every HTTP handler and WebSocket connection.
//!
//! This module owns:
//!   - the word corpus (built-in table plus TOML extras)
//!   - the process-wide difficulty store (single writer behind a RwLock)
//!   - the quiz evaluator (OpenAI when configured, local scorer otherwise)
//!   - the TTS proxy client
//!
//! Quiz sessions themselves are per connection and live in `routes::ws`.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::config::{load_trainer_config_from_env, TrainerConfig};
use crate::corpus::Corpus;
use crate::difficulty::{DifficultyMap, DifficultyStore, FileStore, KeyValueStore};
use crate::evaluation::{LocalEvaluator, QuizEvaluator, MAX_EVALUATION_ITEMS};
use crate::openai::OpenAI;
use crate::quiz::DEFAULT_QUIZ_SIZE;
use crate::tts::TtsProxy;

pub struct AppState {
    pub corpus: Arc<Corpus>,
    pub evaluator: Arc<dyn QuizEvaluator>,
    pub difficulty: RwLock<DifficultyStore>,
    pub tts: TtsProxy,
    pub quiz_size: usize,
}

impl AppState {
    /// Build state from env: load config, corpus, stored difficulties, evaluator and TTS proxy.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Result<Self, String> {
        let cfg: TrainerConfig = load_trainer_config_from_env();

        let mut corpus = Corpus::builtin();
        corpus.extend(cfg.word_groups.iter().cloned().map(Into::into));
        let corpus = Arc::new(corpus);
        info!(
            target: "tone_trainer",
            groups = corpus.groups().len(),
            eligible = corpus.eligible().count(),
            "Word corpus ready"
        );

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".into());
        info!(target: "tone_trainer", %data_dir, "Using file-backed difficulty store");
        let kv: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(data_dir));

        let evaluator: Arc<dyn QuizEvaluator> = match OpenAI::from_env(cfg.prompts.clone()) {
            Some(oa) => {
                info!(target: "tone_trainer", base_url = %oa.base_url, model = %oa.model, "OpenAI evaluation enabled.");
                Arc::new(oa)
            }
            None => {
                info!(target: "tone_trainer", "OpenAI disabled (no OPENAI_API_KEY). Using local scorer.");
                Arc::new(LocalEvaluator::new(corpus.clone()))
            }
        };

        let tts = TtsProxy::from_env()?;
        info!(target: "tone_trainer", upstream = %tts.upstream_url(), "TTS proxy ready");

        let quiz_size = effective_quiz_size(cfg.quiz_size);

        Ok(Self::with_parts(corpus, evaluator, kv, tts, quiz_size))
    }

    /// Assemble state from explicit parts (tests, embedding).
    pub fn with_parts(
        corpus: Arc<Corpus>,
        evaluator: Arc<dyn QuizEvaluator>,
        kv: Arc<dyn KeyValueStore>,
        tts: TtsProxy,
        quiz_size: usize,
    ) -> Self {
        Self {
            corpus,
            evaluator,
            difficulty: RwLock::new(DifficultyStore::load(kv)),
            tts,
            quiz_size,
        }
    }

    /// Copy of the current difficulty map, taken under the read lock.
    #[instrument(level = "debug", skip(self))]
    pub async fn difficulties(&self) -> DifficultyMap {
        self.difficulty.read().await.snapshot().clone()
    }
}

/// Configured quiz length, bounded by what an evaluator will accept.
fn effective_quiz_size(configured: usize) -> usize {
    match configured {
        0 => {
            warn!(target: "tone_trainer", "quiz_size = 0 in config; using default");
            DEFAULT_QUIZ_SIZE
        }
        n if n > MAX_EVALUATION_ITEMS => {
            warn!(target: "tone_trainer", configured = n, max = MAX_EVALUATION_ITEMS, "quiz_size too large; clamping");
            MAX_EVALUATION_ITEMS
        }
        n => n,
    }
}
