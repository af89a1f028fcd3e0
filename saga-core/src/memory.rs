//! Memory compaction.
//!
//! Every `threshold` successful turns the recent history is condensed into
//! a chapter summary and stored in the lorebook, where the context
//! assembler keeps the latest few in every prompt. At most one compaction
//! runs at a time; a failed compaction leaves the turn counter alone so the
//! next turn tries again.

use crate::lore::summary_key;
use crate::pipeline::{
    generate_typed, ChapterSummary, Generator, ModelError, PipelineConfig, Stage,
};
use crate::world::{CharacterData, GameState, HistoryMessage, MessageRole};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const SUMMARY_INSTRUCTION: &str = include_str!("pipeline/prompts/summary.txt");

/// Configuration for memory compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionConfig {
    /// Successful turns between compactions.
    pub threshold: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self { threshold: 5 }
    }
}

impl CompactionConfig {
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    /// Number of history messages one compaction summarizes.
    pub fn window(&self) -> usize {
        2 * self.threshold as usize
    }
}

/// Decides when to compact and guards against concurrent compactions.
#[derive(Debug, Clone, Default)]
pub struct MemoryCompactor {
    config: CompactionConfig,
    in_flight: Arc<AtomicBool>,
}

/// Held for the duration of one compaction. Releases the guard on drop.
#[derive(Debug)]
pub struct CompactionGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for CompactionGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl MemoryCompactor {
    pub fn new(config: CompactionConfig) -> Self {
        Self {
            config,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Whether the counter has reached the threshold.
    pub fn is_due(&self, state: &GameState) -> bool {
        state.turns_since_compaction >= self.config.threshold
    }

    /// Claim the compaction slot if one is due and none is running.
    pub fn try_begin(&self, state: &GameState) -> Option<CompactionGuard> {
        if !self.is_due(state) {
            return None;
        }
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(CompactionGuard {
            flag: self.in_flight.clone(),
        })
    }

    /// The messages the next compaction summarizes.
    pub fn window(&self, state: &GameState) -> Vec<HistoryMessage> {
        state.recent_history(self.config.window()).to_vec()
    }
}

/// Ask the model for a first-person summary of `messages`.
pub async fn summarize(
    model: &dyn Generator,
    config: &PipelineConfig,
    character: &CharacterData,
    messages: &[HistoryMessage],
) -> Result<String, ModelError> {
    let mut transcript = String::new();
    for message in messages {
        let who = match message.role {
            MessageRole::Player => character.name.as_str(),
            MessageRole::Model => "Story",
        };
        transcript.push_str(&format!("{who}: {}\n\n", message.content));
    }

    let system = format!(
        "{SUMMARY_INSTRUCTION}\nThe player's character is {}.",
        character.name
    );
    let request = config.request(
        Stage::Summary,
        system,
        transcript,
        ChapterSummary::as_tool(),
    );
    let summary: ChapterSummary = generate_typed(model, request).await?;
    Ok(summary.summary.trim().to_string())
}

/// Store a finished summary as the next chapter.
///
/// `covered_turns` is the counter value the summarized window was taken at.
/// Turns committed while the summary was being written stay counted.
/// Returns the lorebook key it was stored under.
pub fn commit_summary(
    state: &mut GameState,
    summary: impl Into<String>,
    covered_turns: u32,
) -> String {
    state.chapters_compacted += 1;
    let key = summary_key(state.chapters_compacted);
    state.lorebook.add(key.clone(), summary);
    state.turns_since_compaction = state.turns_since_compaction.saturating_sub(covered_turns);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Scenario;

    fn state() -> GameState {
        GameState::new(CharacterData::new("Lan"), Scenario::new("River", "Anon"))
    }

    #[test]
    fn test_window_is_twice_threshold() {
        let config = CompactionConfig::default().with_threshold(2);
        assert_eq!(config.window(), 4);

        let compactor = MemoryCompactor::new(config);
        let mut state = state();
        for i in 0..7 {
            state.history.push(HistoryMessage::player(format!("m{i}")));
        }
        let window = compactor.window(&state);
        let contents: Vec<_> = window.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4", "m5", "m6"]);
    }

    #[test]
    fn test_guard_is_exclusive() {
        let compactor = MemoryCompactor::new(CompactionConfig::default());
        let mut state = state();
        assert!(compactor.try_begin(&state).is_none());

        state.turns_since_compaction = 5;
        let guard = compactor.try_begin(&state);
        assert!(guard.is_some());
        assert!(compactor.is_in_flight());
        assert!(compactor.try_begin(&state).is_none());

        drop(guard);
        assert!(!compactor.is_in_flight());
        assert!(compactor.try_begin(&state).is_some());
    }

    #[test]
    fn test_commit_summary_numbers_chapters() {
        let mut state = state();
        state.turns_since_compaction = 5;
        assert_eq!(commit_summary(&mut state, "first", 5), "Summary: Chapter 1");
        assert_eq!(state.turns_since_compaction, 0);
        assert_eq!(commit_summary(&mut state, "second", 5), "Summary: Chapter 2");
        assert_eq!(state.turns_since_compaction, 0);
        assert_eq!(state.lorebook.summaries().count(), 2);
    }

    #[test]
    fn test_commit_summary_keeps_turns_played_meanwhile() {
        let mut state = state();
        // Window taken at 5, two more turns committed before the summary landed.
        state.turns_since_compaction = 7;
        commit_summary(&mut state, "first", 5);
        assert_eq!(state.turns_since_compaction, 2);
        assert_eq!(state.chapters_compacted, 1);
    }
}
