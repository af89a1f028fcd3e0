//! Context assembly for generation stages.
//!
//! Builds the system prompt for one stage from a base instruction and the
//! current game state. Lore is bounded: the most recent chapter summaries
//! plus any entry whose key appears in the text of the current turn. The
//! output depends only on its inputs.

use crate::lore::{Lorebook, LorebookEntry};
use crate::world::{GameState, RelationshipState};
use std::collections::HashSet;
use tracing::debug;

/// Configuration for context assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    /// How many of the latest chapter summaries are always included.
    pub recent_summaries: usize,

    /// How many history messages the story stages see verbatim.
    pub recent_history: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            recent_summaries: 3,
            recent_history: 6,
        }
    }
}

impl ContextConfig {
    pub fn with_recent_summaries(mut self, count: usize) -> Self {
        self.recent_summaries = count;
        self
    }

    pub fn with_recent_history(mut self, count: usize) -> Self {
        self.recent_history = count;
        self
    }
}

const NSFW_ON: &str = "MATURE MODE IS ON: mature themes, realistic description and complex language are allowed. Handle sensitive subjects with the restraint of literary prose.";
const NSFW_ON_PREGNANCY: &str = "When describing the pregnancy, include its real hardships (sickness, pain, worry). Describe childbirth intensely and realistically, without looking away.";
const NSFW_OFF: &str = "MATURE MODE IS OFF: keep the story clean and avoid detailed violence or sexual content.";
const NSFW_OFF_PREGNANCY: &str = "When describing the pregnancy, focus on its gentle, emotional side. Narrate childbirth indirectly, dwelling on the joy.";

/// Lore entries to include for this turn, in lorebook order.
///
/// The last `recent_summaries` chapter summaries, unioned with every entry
/// whose key occurs (case-insensitively) in `turn_text`.
pub fn select_lore<'a>(
    lorebook: &'a Lorebook,
    turn_text: &str,
    recent_summaries: usize,
) -> Vec<&'a LorebookEntry> {
    let summaries: Vec<_> = lorebook.summaries().map(|e| e.id).collect();
    let keep: HashSet<_> = summaries
        .iter()
        .rev()
        .take(recent_summaries)
        .copied()
        .collect();

    let text = turn_text.to_lowercase();
    lorebook
        .entries()
        .iter()
        .filter(|entry| {
            if keep.contains(&entry.id) {
                return true;
            }
            let key = entry.key.trim().to_lowercase();
            !key.is_empty() && text.contains(&key)
        })
        .collect()
}

/// Build the system prompt for one stage.
pub fn assemble_context(
    base_instruction: &str,
    state: &GameState,
    turn_text: &str,
    config: &ContextConfig,
) -> String {
    let character = &state.character;
    let mut context = String::from("\n\n--- CURRENT CONTEXT ---\n");

    context.push_str(&format!(
        "My character:\nName: {}\nGender: {}\nAppearance: {}\nPersonality: {}\nBackground: {}\n",
        character.name,
        character.gender,
        character.appearance,
        character.personality,
        character.background
    ));

    let equipped = state.equipment.equipped_names();
    if !equipped.is_empty() {
        context.push_str(&format!("Equipped: {}.\n", equipped.join(", ")));
    }

    if !state.inventory.is_empty() {
        let carried: Vec<_> = state.inventory.iter().map(|i| i.name.as_str()).collect();
        context.push_str(&format!("Carrying: {}.\n", carried.join(", ")));
    }

    if !state.companions.is_empty() {
        context.push_str(&format!(
            "Travelling with: {}.\n",
            state.companions.join(", ")
        ));
    }

    context.push_str(&format!(
        "Time: {} ({}).\n",
        state.clock.display(),
        state.clock.time_of_day()
    ));

    let lore = select_lore(&state.lorebook, turn_text, config.recent_summaries);
    debug!(
        selected = lore.len(),
        total = state.lorebook.len(),
        "Selected lore for context"
    );
    if !lore.is_empty() {
        context.push_str("Lorebook:\n");
        for entry in &lore {
            context.push_str(&format!("- {}: {}\n", entry.key, entry.value));
        }
    }

    match &state.relationship {
        RelationshipState::Married { spouse } => {
            context.push_str(&format!("I am married to {spouse}.\n"));
        }
        RelationshipState::Dating { partner } => {
            context.push_str(&format!("I am dating {partner}.\n"));
        }
        RelationshipState::Single => {}
    }

    if let Some(pregnancy) = &state.pregnancy {
        context.push_str(&format!(
            "We are expecting a child: week {} of the pregnancy, with {}.\n",
            pregnancy.weeks(state.clock),
            pregnancy.partner_name
        ));
    }

    if state.nsfw {
        context.push_str(NSFW_ON);
        context.push('\n');
        if state.pregnancy.is_some() {
            context.push_str(NSFW_ON_PREGNANCY);
            context.push('\n');
        }
    } else {
        context.push_str(NSFW_OFF);
        context.push('\n');
        if state.pregnancy.is_some() {
            context.push_str(NSFW_OFF_PREGNANCY);
            context.push('\n');
        }
    }

    context.push_str("--- END CONTEXT ---");
    debug!(chars = context.len(), "Assembled context");

    format!("{base_instruction}\n{context}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lore::summary_key;
    use crate::scenario::Scenario;
    use crate::world::{CharacterData, Item, ItemCategory, Pregnancy};

    fn state() -> GameState {
        let character = CharacterData::new("Lan")
            .with_gender("female")
            .with_appearance("tall")
            .with_personality("stubborn")
            .with_background("ferry keeper's daughter");
        GameState::new(character, Scenario::new("River", "Anon"))
    }

    #[test]
    fn test_lore_selection_bounds_summaries() {
        let mut book = Lorebook::new();
        for chapter in 1..=5 {
            book.add(summary_key(chapter), format!("chapter {chapter}"));
        }
        book.add("Thị Nở", "A woman by the river");
        book.add("Bá Kiến", "The village chief");

        let selected = select_lore(&book, "I walk over to thị nở", 3);
        let keys: Vec<_> = selected.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "Summary: Chapter 3",
                "Summary: Chapter 4",
                "Summary: Chapter 5",
                "Thị Nở"
            ]
        );
    }

    #[test]
    fn test_context_contains_character_and_equipment() {
        let mut state = state();
        state.equipment.weapon = Some(Item::new("con dao", "", ItemCategory::Equipment));
        let context = assemble_context("BASE", &state, "look around", &ContextConfig::default());

        assert!(context.starts_with("BASE\n"));
        assert!(context.contains("Name: Lan"));
        assert!(context.contains("Gender: female"));
        assert!(context.contains("Equipped: con dao."));
        assert!(context.contains("Day 1, 08:00"));
        assert!(context.contains("MATURE MODE IS OFF"));
        assert!(!context.contains("married"));
        assert!(!context.contains("Lorebook:"));
    }

    #[test]
    fn test_relationship_and_pregnancy_sentences() {
        let mut state = state();
        state.relationship = RelationshipState::Married {
            spouse: "Minh".to_string(),
        };
        state.pregnancy = Some(Pregnancy {
            partner_name: "Minh".to_string(),
            conception_time: state.clock.minutes(),
        });
        state.nsfw = true;

        let context = assemble_context("BASE", &state, "", &ContextConfig::default());
        assert!(context.contains("I am married to Minh."));
        assert!(context.contains("week 1 of the pregnancy, with Minh"));
        assert!(context.contains("MATURE MODE IS ON"));
        assert!(context.contains(NSFW_ON_PREGNANCY));
        assert!(!context.contains("MATURE MODE IS OFF"));
    }

    #[test]
    fn test_context_is_deterministic() {
        let mut state = state();
        state.lorebook.add("Ferry", "Crosses at dawn");
        let config = ContextConfig::default();
        let a = assemble_context("BASE", &state, "the ferry", &config);
        let b = assemble_context("BASE", &state, "the ferry", &config);
        assert_eq!(a, b);
        assert!(a.contains("- Ferry: Crosses at dawn"));
    }
}
