//! Lorebook and pending lore suggestions.
//!
//! The lorebook is the durable key/value memory the context assembler
//! re-injects into prompts. Keys are compared case-insensitively after
//! trimming. Chapter summaries written by memory compaction live here too,
//! under keys of the form `Summary: Chapter N`.

use crate::world::define_id;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

define_id!(
    /// Unique identifier for lorebook entries and suggestions.
    LoreId
);

const SUMMARY_PREFIX: &str = "summary:";

/// Key under which the given chapter summary is stored.
pub fn summary_key(chapter: u32) -> String {
    format!("Summary: Chapter {chapter}")
}

/// Whether a key follows the chapter summary naming convention.
pub fn is_summary_key(key: &str) -> bool {
    key.trim().to_lowercase().starts_with(SUMMARY_PREFIX)
}

pub(crate) fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LorebookEntry {
    pub id: LoreId,
    pub key: String,
    pub value: String,
}

impl LorebookEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: LoreId::new(),
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn is_summary(&self) -> bool {
        is_summary_key(&self.key)
    }
}

/// Ordered collection of lore entries. Insertion order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lorebook {
    entries: Vec<LorebookEntry>,
}

impl Lorebook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[LorebookEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: LoreId) -> Option<&LorebookEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn find_by_key(&self, key: &str) -> Option<&LorebookEntry> {
        let key = normalize_key(key);
        self.entries.iter().find(|e| normalize_key(&e.key) == key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.find_by_key(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    /// Append an entry and return its id.
    ///
    /// Duplicate keys are allowed here; callers that care check
    /// [`contains_key`](Self::contains_key) first.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) -> LoreId {
        let entry = LorebookEntry::new(key, value);
        let id = entry.id;
        self.entries.push(entry);
        id
    }

    pub fn update(&mut self, id: LoreId, key: impl Into<String>, value: impl Into<String>) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.key = key.into();
                entry.value = value.into();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: LoreId) -> Option<LorebookEntry> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(index))
    }

    /// Chapter summaries in insertion order.
    pub fn summaries(&self) -> impl Iterator<Item = &LorebookEntry> {
        self.entries.iter().filter(|e| e.is_summary())
    }
}

/// A lore entry proposed by extraction, waiting for the player to decide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoreSuggestion {
    pub id: LoreId,
    pub key: String,
    pub value: String,
}

/// Pending lore suggestions. Never committed without an explicit accept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuggestionQueue {
    pending: Vec<LoreSuggestion>,
}

impl SuggestionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &[LoreSuggestion] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let key = normalize_key(key);
        self.pending.iter().any(|s| normalize_key(&s.key) == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(|s| s.key.as_str())
    }

    /// Queue a suggestion unless its key is blank or already pending.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<LoreId> {
        let key = key.into();
        if key.trim().is_empty() || self.contains_key(&key) {
            return None;
        }
        let suggestion = LoreSuggestion {
            id: LoreId::new(),
            key: key.trim().to_string(),
            value: value.into(),
        };
        let id = suggestion.id;
        self.pending.push(suggestion);
        Some(id)
    }

    /// Remove a suggestion from the queue and return it.
    pub fn take(&mut self, id: LoreId) -> Option<LoreSuggestion> {
        let index = self.pending.iter().position(|s| s.id == id)?;
        Some(self.pending.remove(index))
    }

    pub fn dismiss(&mut self, id: LoreId) -> bool {
        self.take(id).is_some()
    }

    pub fn dismiss_all(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }
}

impl Lorebook {
    /// Move a pending suggestion into the lorebook.
    pub fn accept(&mut self, queue: &mut SuggestionQueue, id: LoreId) -> Option<LoreId> {
        let suggestion = queue.take(id)?;
        let entry = LorebookEntry {
            id: suggestion.id,
            key: suggestion.key,
            value: suggestion.value,
        };
        self.entries.push(entry);
        Some(id)
    }
}

impl fmt::Display for LorebookEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_keys() {
        assert_eq!(summary_key(2), "Summary: Chapter 2");
        assert!(is_summary_key("Summary: Chapter 2"));
        assert!(is_summary_key("  summary: the flood"));
        assert!(!is_summary_key("Summary of the village"));
        assert!(!is_summary_key("Thị Nở"));
    }

    #[test]
    fn test_key_lookup_is_case_insensitive() {
        let mut book = Lorebook::new();
        book.add("Làng Vũ Đại", "A village on the river");
        assert!(book.contains_key("làng vũ đại"));
        assert!(book.contains_key("  LÀNG VŨ ĐẠI "));
        assert!(!book.contains_key("Thị Nở"));
    }

    #[test]
    fn test_update_and_remove() {
        let mut book = Lorebook::new();
        let id = book.add("Ferry", "Old");
        assert!(book.update(id, "Ferry", "Rebuilt after the flood"));
        assert_eq!(book.get(id).map(|e| e.value.as_str()), Some("Rebuilt after the flood"));

        let removed = book.remove(id);
        assert_eq!(removed.map(|e| e.key), Some("Ferry".to_string()));
        assert!(book.is_empty());
        assert!(!book.update(id, "Ferry", "gone"));
    }

    #[test]
    fn test_suggestion_queue() {
        let mut queue = SuggestionQueue::new();
        let first = queue.push("Thị Nở", "A woman by the river");
        assert!(first.is_some());
        assert!(queue.push("thị nở", "duplicate").is_none());
        assert!(queue.push("   ", "blank").is_none());
        let second = queue.push("Bá Kiến", "The village chief");

        let mut book = Lorebook::new();
        let accepted = first.and_then(|id| book.accept(&mut queue, id));
        assert!(accepted.is_some());
        assert!(book.contains_key("Thị Nở"));
        assert_eq!(queue.len(), 1);

        assert!(second.map(|id| queue.dismiss(id)).unwrap_or(false));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_dismiss_all() {
        let mut queue = SuggestionQueue::new();
        queue.push("A", "a");
        queue.push("B", "b");
        assert_eq!(queue.dismiss_all(), 2);
        assert!(queue.is_empty());
    }
}
