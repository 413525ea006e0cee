//! Built-in word corpus: clusters of tone-confusable Vietnamese words.
//!
//! The table is static; `Corpus` owns an expanded copy so that groups loaded
//! from configuration can be appended at startup.

use std::collections::HashSet;

use tracing::{error, info};

use crate::domain::{Tone, WordGroup, WordVariant};

#[derive(Clone, Copy)]
struct GroupDef {
  base: &'static str,
  note: Option<&'static str>,
  variants: &'static [(&'static str, Tone, &'static str)],
}

macro_rules! group {
  ($base:expr, $note:expr, [$(($word:expr, $tone:ident, $meaning:expr)),* $(,)?]) => {
    GroupDef {
      base: $base,
      note: $note,
      variants: &[$(($word, Tone::$tone, $meaning)),*],
    }
  };
}

/// Owned, ordered list of word groups.
#[derive(Clone, Debug, Default)]
pub struct Corpus {
  groups: Vec<WordGroup>,
}

impl Corpus {
  pub fn new(groups: Vec<WordGroup>) -> Self {
    Self { groups }
  }

  /// The built-in table shipped with the trainer.
  pub fn builtin() -> Self {
    let groups = WORD_GROUPS
      .iter()
      .map(|g| WordGroup {
        base_spelling: g.base.to_string(),
        note: g.note.map(str::to_string),
        variants: g
          .variants
          .iter()
          .map(|(word, tone, meaning)| WordVariant {
            word: (*word).to_string(),
            tone: *tone,
            meaning: (*meaning).to_string(),
          })
          .collect(),
      })
      .collect();
    Self { groups }
  }

  /// Append extra groups (from configuration). Groups without variants, or
  /// with a word listed twice, are skipped.
  pub fn extend(&mut self, extra: impl IntoIterator<Item = WordGroup>) {
    let mut added = 0usize;
    for g in extra {
      if g.variants.is_empty() {
        error!(target: "quiz", base = %g.base_spelling, "Skipping word group: no variants.");
        continue;
      }
      let distinct: HashSet<&str> = g.words().collect();
      if distinct.len() != g.variants.len() {
        error!(target: "quiz", base = %g.base_spelling, "Skipping word group: duplicate variant words.");
        continue;
      }
      self.groups.push(g);
      added += 1;
    }
    info!(target: "quiz", added, total = self.groups.len(), "Extended corpus");
  }

  pub fn groups(&self) -> &[WordGroup] {
    &self.groups
  }

  /// Groups with at least two variants.
  pub fn eligible(&self) -> impl Iterator<Item = &WordGroup> {
    self.groups.iter().filter(|g| g.is_quizzable())
  }

  /// First group that contains `word`.
  pub fn group_of(&self, word: &str) -> Option<&WordGroup> {
    self.groups.iter().find(|g| g.variant(word).is_some())
  }

  pub fn variant(&self, word: &str) -> Option<&WordVariant> {
    self.group_of(word).and_then(|g| g.variant(word))
  }
}

const WORD_GROUPS: &[GroupDef] = &[
  group!("ma", None, [
    ("ma", Level, "ghost"),
    ("mà", Falling, "but/that"),
    ("má", Rising, "mother/cheek"),
    ("mả", FallingRising, "grave"),
    ("mã", Creaky, "code/horse"),
    ("mạ", Heavy, "rice seedling"),
  ]),
  group!("nấm/nắm/nặm", Some("Similar sounds, different letters"), [
    ("nấm", Rising, "mushroom"),
    ("nắm", Rising, "to grasp/handful"),
    ("nặm", Heavy, "to knead"),
    ("nậm", Heavy, "to chew"),
  ]),
  group!("mặt/mật/mất", Some("Similar sounds, different letters"), [
    ("mặt", Heavy, "face"),
    ("mật", Heavy, "honey/secret"),
    ("mất", Rising, "to lose"),
  ]),
  group!("tay/tai/tài", Some("Similar sounds, different letters"), [
    ("tay", Level, "hand/arm"),
    ("tai", Level, "ear"),
    ("tài", Falling, "talent/wealth"),
    ("tãi", Creaky, "to scatter"),
  ]),
  group!("cay/cai/cài", Some("Similar sounds, different letters"), [
    ("cay", Level, "spicy/bitter"),
    ("cai", Level, "to quit/wean"),
    ("cài", Falling, "to fasten/pin"),
    ("cải", FallingRising, "cabbage/to improve"),
  ]),
  group!("bay/bai/bày", Some("Similar sounds, different letters"), [
    ("bay", Level, "to fly"),
    ("bai", Level, "withered"),
    ("bày", Falling, "to arrange/display"),
    ("bãi", Creaky, "beach/field"),
  ]),
  group!("co", None, [
    ("co", Level, "to contract/shrink"),
    ("có", Rising, "to have"),
    ("cò", Falling, "stork"),
    ("cõ", Creaky, "to carry on the back (rare)"),
    ("cỏ", FallingRising, "grass"),
    ("cọ", Heavy, "to scrub/palm tree"),
  ]),
  group!("be", None, [
    ("be", Level, "to patch (cloth)"),
    ("bé", Rising, "child/small"),
    ("bè", Falling, "raft"),
    ("bẻ", FallingRising, "to break (by bending)"),
    ("bẽ", Creaky, "shy"),
    ("bệ", Heavy, "base/pedestal"),
  ]),
  group!("lam", None, [
    ("lam", Level, "indigo blue"),
    ("làm", Falling, "to do/to make"),
    ("lám", Rising, "(dialect/non-standard)"),
    ("lảm", FallingRising, "to chatter/talk excessively"),
    ("lạm", Heavy, "to overstep/abuse"),
  ]),
  group!("nam", None, [
    ("nam", Level, "south"),
    ("nàm", Falling, "(rare)"),
    ("nám", Rising, "freckles/brown spots"),
    ("nảm", FallingRising, "dialect variant"),
    ("nạm", Heavy, "brisket (beef cut)"),
  ]),
  group!("la", None, [
    ("la", Level, "to shout"),
    ("là", Falling, "to be"),
    ("lá", Rising, "leaf"),
    ("lả", FallingRising, "to drift"),
    ("lã", Creaky, "wasteland"),
    ("lạ", Heavy, "strange"),
  ]),
  group!("ba", None, [
    ("ba", Level, "three"),
    ("bà", Falling, "grandmother/Mrs."),
    ("bá", Rising, "uncle (father's older brother)"),
    ("bả", FallingRising, "poison"),
    ("bã", Creaky, "residue/pulp"),
    ("bạ", Heavy, "aimlessly/randomly"),
  ]),
  group!("ca", None, [
    ("ca", Level, "song/to sing"),
    ("cà", Falling, "eggplant"),
    ("cá", Rising, "fish"),
    ("cả", FallingRising, "whole/entire"),
    ("cã", Creaky, "(rare)"),
    ("cạ", Heavy, "to rub against"),
  ]),
  group!("da", None, [
    ("da", Level, "skin"),
    ("dà", Falling, "to give"),
    ("dá", Rising, "stomach lining"),
    ("dả", FallingRising, "to vomit"),
    ("dã", Creaky, "wild"),
    ("dạ", Heavy, "yes/stomach"),
  ]),
  group!("tha", None, [
    ("tha", Level, "to forgive"),
    ("thà", Falling, "would rather"),
    ("thá", Rising, "to release"),
    ("thả", FallingRising, "to drop/release"),
    ("thã", Creaky, "sluggish"),
    ("thạ", Heavy, "to blame"),
  ]),
  group!("sa", None, [
    ("sa", Level, "to fall"),
    ("sà", Falling, "to sink"),
    ("sá", Rising, "close to"),
    ("sả", FallingRising, "lemongrass"),
    ("sã", Creaky, "prepared"),
    ("sạ", Heavy, "harrow"),
  ]),
  group!("con", None, [
    ("con", Level, "child/animal"),
    ("còn", Falling, "still remain"),
    ("cón", Rising, "small"),
    ("cổn", FallingRising, "to struggle"),
    ("cõn", Creaky, "fist"),
    ("cọn", Heavy, "tapered"),
  ]),
  group!("ban", None, [
    ("ban", Level, "to give/to issue"),
    ("bàn", Falling, "table/to discuss"),
    ("bán", Rising, "to sell"),
    ("bản", FallingRising, "copy/version/village"),
    ("bãn", Creaky, "weary (rare)"),
    ("bạn", Heavy, "friend"),
  ]),
  group!("tan", None, [
    ("tan", Level, "to melt/end"),
    ("tàn", Falling, "cruel/remnant"),
    ("tán", Rising, "to court/scatter"),
    ("tản", FallingRising, "to scatter"),
    ("tãn", Creaky, "all gone"),
    ("tạn", Heavy, "temporarily"),
  ]),
];
