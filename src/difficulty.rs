//! Per-word difficulty scores persisted in a key-value blob.
//!
//! `DifficultyStore` is the single writer: it loads once at startup, serves reads
//! to the quiz generator and applies a whole quiz's outcomes before flushing.

use std::{
  collections::{BTreeMap, HashMap},
  fs,
  io::{ErrorKind, Write},
  path::PathBuf,
  sync::{Arc, Mutex, PoisonError},
};

use tempfile::NamedTempFile;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::EvaluationItem;

pub const DIFFICULTY_STORAGE_KEY: &str = "vietnamese_word_difficulty";
pub const MAX_DIFFICULTY: u8 = 10;
/// Applied to the correct answer's word when the learner missed it.
pub const MISS_ADJUSTMENT: i32 = 2;
/// Applied when the learner picked the correct word.
pub const HIT_ADJUSTMENT: i32 = -1;

pub type DifficultyMap = HashMap<String, u8>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("storage io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("storage serialization error: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("storage task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}

/// Minimal blob storage contract (browser local storage, a directory, memory...).
pub trait KeyValueStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
  fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// One JSON file per key inside `dir`, replaced atomically on every write.
#[derive(Clone, Debug)]
pub struct FileStore {
  dir: PathBuf,
}

impl FileStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  fn path_for(&self, key: &str) -> PathBuf {
    self.dir.join(format!("{key}.json"))
  }
}

impl KeyValueStore for FileStore {
  fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    match fs::read_to_string(self.path_for(key)) {
      Ok(s) => Ok(Some(s)),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
    fs::create_dir_all(&self.dir)?;
    let mut tmp = NamedTempFile::new_in(&self.dir)?;
    tmp.write_all(value.as_bytes())?;
    tmp.flush()?;
    tmp.persist(self.path_for(key)).map_err(|e| e.error)?;
    Ok(())
  }
}

/// In-process store, used when no data directory is wanted and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
  inner: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(map.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
    let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    map.insert(key.to_string(), value.to_string());
    Ok(())
  }
}

pub struct DifficultyStore {
  map: DifficultyMap,
  kv: Arc<dyn KeyValueStore>,
}

impl DifficultyStore {
  /// Read the persisted map. Absence means first run; a corrupt blob is logged
  /// and treated as empty.
  #[instrument(level = "info", skip(kv))]
  pub fn load(kv: Arc<dyn KeyValueStore>) -> Self {
    let map = match kv.get(DIFFICULTY_STORAGE_KEY) {
      Ok(Some(raw)) => parse_map(&raw),
      Ok(None) => {
        info!(target: "difficulty", "No stored difficulties; starting empty");
        DifficultyMap::new()
      }
      Err(e) => {
        error!(target: "difficulty", error = %e, "Failed to read stored difficulties; starting empty");
        DifficultyMap::new()
      }
    };
    info!(target: "difficulty", words = map.len(), "Difficulty store loaded");
    Self { map, kv }
  }

  pub fn get(&self, word: &str) -> u8 {
    self.map.get(word).copied().unwrap_or(0)
  }

  pub fn snapshot(&self) -> &DifficultyMap {
    &self.map
  }

  /// Adjust one word in memory, clamped to [0, MAX_DIFFICULTY]. Returns the new score.
  pub fn adjust(&mut self, word: &str, delta: i32) -> u8 {
    let current = i32::from(self.get(word));
    let next = (current + delta).clamp(0, i32::from(MAX_DIFFICULTY)) as u8;
    self.map.insert(word.to_string(), next);
    next
  }

  /// Apply one submitted quiz: hit => -1, miss => +2, keyed by the correct word.
  /// The whole set is applied before a single flush.
  #[instrument(level = "info", skip(self, items), fields(items = items.len()))]
  pub async fn apply_outcomes(&mut self, items: &[EvaluationItem]) -> Result<(), StoreError> {
    for item in items {
      let delta = if item.is_correct() { HIT_ADJUSTMENT } else { MISS_ADJUSTMENT };
      let score = self.adjust(&item.correct_answer, delta);
      debug!(target: "difficulty", word = %item.correct_answer, delta, score, "Adjusted difficulty");
    }
    self.flush().await
  }

  /// Write the whole map. The store write runs on the blocking pool; callers
  /// holding the write lock keep flushes ordered.
  pub async fn flush(&self) -> Result<(), StoreError> {
    let ordered: BTreeMap<&str, u8> = self.map.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    let raw = serde_json::to_string(&ordered)?;
    let kv = self.kv.clone();
    tokio::task::spawn_blocking(move || kv.set(DIFFICULTY_STORAGE_KEY, &raw)).await?
  }
}

fn parse_map(raw: &str) -> DifficultyMap {
  let parsed: HashMap<String, serde_json::Value> = match serde_json::from_str(raw) {
    Ok(m) => m,
    Err(e) => {
      error!(target: "difficulty", error = %e, "Stored difficulties are not a JSON object; starting empty");
      return DifficultyMap::new();
    }
  };
  parsed
    .into_iter()
    .filter_map(|(word, value)| match value.as_i64() {
      Some(n) => Some((word, n.clamp(0, i64::from(MAX_DIFFICULTY)) as u8)),
      None => {
        warn!(target: "difficulty", %word, %value, "Dropping non-integer difficulty");
        None
      }
    })
    .collect()
}
