//! Narrative game state types.
//!
//! Contains the domain model the pipeline reads and the reducer mutates:
//! the player's persona, items and equipment, affinity, relationship and
//! pregnancy state, the world clock, history, and the `GameState` root.

use crate::lore::{Lorebook, SuggestionQueue};
use crate::pipeline::Stage;
use crate::scenario::Scenario;
use saga_macros::ResponseSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

pub(crate) use define_id;

define_id!(
    /// Unique identifier for items.
    ItemId
);
define_id!(
    /// Unique identifier for history messages.
    MessageId
);
define_id!(
    /// Unique identifier for player goals.
    GoalId
);
define_id!(
    /// Unique identifier for a game (and its save slot).
    GameId
);

// ============================================================================
// Character
// ============================================================================

/// The player's persona. Replaced wholesale, never edited mid-story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterData {
    pub name: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub appearance: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub background: String,
}

impl CharacterData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gender: String::new(),
            appearance: String::new(),
            personality: String::new(),
            background: String::new(),
        }
    }

    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = gender.into();
        self
    }

    pub fn with_appearance(mut self, appearance: impl Into<String>) -> Self {
        self.appearance = appearance.into();
        self
    }

    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = personality.into();
        self
    }

    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.background = background.into();
        self
    }

    /// Whether every attribute character creation asks for is filled in.
    pub fn is_complete(&self) -> bool {
        [
            &self.name,
            &self.gender,
            &self.appearance,
            &self.personality,
            &self.background,
        ]
        .iter()
        .all(|s| !s.trim().is_empty())
    }
}

// ============================================================================
// Items & Equipment
// ============================================================================

/// Broad item category, as reported by the world stage.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ResponseSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ItemCategory {
    Equipment,
    #[default]
    Consumable,
    Key,
}

impl ItemCategory {
    pub fn name(&self) -> &'static str {
        match self {
            ItemCategory::Equipment => "equipment",
            ItemCategory::Consumable => "consumable",
            ItemCategory::Key => "key",
        }
    }
}

/// An item owned either by the inventory or by an equipment slot, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: ItemCategory,
}

impl Item {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: ItemCategory,
    ) -> Self {
        Self {
            id: ItemId::new(),
            name: name.into(),
            description: description.into(),
            category,
        }
    }

    /// Case-insensitive name comparison.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.trim().to_lowercase() == name.trim().to_lowercase()
    }
}

/// Equipment slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipmentSlot {
    Weapon,
    Armor,
}

const WEAPON_KEYWORDS: &[&str] = &[
    "sword", "blade", "knife", "dagger", "axe", "spear", "bow", "club", "mace", "staff",
    "hammer", "kiếm", "gươm", "dao",
];

const ARMOR_KEYWORDS: &[&str] = &[
    "armor", "armour", "shield", "helmet", "mail", "coat", "cloak", "robe", "tunic", "áo",
    "giáp",
];

impl EquipmentSlot {
    pub const ALL: [EquipmentSlot; 2] = [EquipmentSlot::Weapon, EquipmentSlot::Armor];

    pub fn name(&self) -> &'static str {
        match self {
            EquipmentSlot::Weapon => "weapon",
            EquipmentSlot::Armor => "armor",
        }
    }

    /// Infer the slot an item goes into from keywords in its name.
    ///
    /// Weapon terms are checked first.
    pub fn infer(item_name: &str) -> Option<Self> {
        let name = item_name.to_lowercase();
        if WEAPON_KEYWORDS.iter().any(|k| name.contains(k)) {
            Some(EquipmentSlot::Weapon)
        } else if ARMOR_KEYWORDS.iter().any(|k| name.contains(k)) {
            Some(EquipmentSlot::Armor)
        } else {
            None
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "weapon" => Some(EquipmentSlot::Weapon),
            "armor" | "armour" => Some(EquipmentSlot::Armor),
            _ => None,
        }
    }
}

impl fmt::Display for EquipmentSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed set of slots, each holding at most one item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    pub weapon: Option<Item>,
    pub armor: Option<Item>,
}

impl Equipment {
    pub fn get(&self, slot: EquipmentSlot) -> Option<&Item> {
        match slot {
            EquipmentSlot::Weapon => self.weapon.as_ref(),
            EquipmentSlot::Armor => self.armor.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, slot: EquipmentSlot) -> &mut Option<Item> {
        match slot {
            EquipmentSlot::Weapon => &mut self.weapon,
            EquipmentSlot::Armor => &mut self.armor,
        }
    }

    /// Names of equipped items, in slot order.
    pub fn equipped_names(&self) -> Vec<&str> {
        EquipmentSlot::ALL
            .iter()
            .filter_map(|slot| self.get(*slot))
            .map(|item| item.name.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.weapon.is_none() && self.armor.is_none()
    }
}

// ============================================================================
// Affinity
// ============================================================================

pub const AFFINITY_MIN: i32 = -100;
pub const AFFINITY_MAX: i32 = 100;

/// NPC name to affinity score, always within [`AFFINITY_MIN`, `AFFINITY_MAX`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Affinity(BTreeMap<String, i32>);

impl Affinity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current score, 0 for NPCs never scored.
    pub fn get(&self, npc: &str) -> i32 {
        self.0.get(npc).copied().unwrap_or(0)
    }

    /// Add `change` to the NPC's score, clamping to the valid range.
    pub fn apply_change(&mut self, npc: &str, change: i32) -> i32 {
        let current = self.get(npc);
        let updated = current.saturating_add(change).clamp(AFFINITY_MIN, AFFINITY_MAX);
        self.0.insert(npc.to_string(), updated);
        updated
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Display bucket for an affinity score.
pub fn affinity_tier(score: i32) -> &'static str {
    match score {
        i32::MIN..=-60 => "hostile",
        -59..=-20 => "cold",
        -19..=19 => "neutral",
        20..=59 => "friendly",
        _ => "devoted",
    }
}

// ============================================================================
// Relationships
// ============================================================================

/// Romantic status of the player. Transitions only move forward.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RelationshipState {
    #[default]
    Single,
    Dating {
        partner: String,
    },
    Married {
        spouse: String,
    },
}

impl RelationshipState {
    pub fn dating_partner(&self) -> Option<&str> {
        match self {
            RelationshipState::Dating { partner } => Some(partner),
            _ => None,
        }
    }

    pub fn spouse(&self) -> Option<&str> {
        match self {
            RelationshipState::Married { spouse } => Some(spouse),
            _ => None,
        }
    }

    pub fn is_dating(&self, npc: &str) -> bool {
        self.dating_partner()
            .map(|p| p.trim().to_lowercase() == npc.trim().to_lowercase())
            .unwrap_or(false)
    }
}

/// Active pregnancy. At most one at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pregnancy {
    pub partner_name: String,
    /// Clock minutes at conception.
    pub conception_time: u64,
}

impl Pregnancy {
    /// Whole weeks since conception, never less than 1.
    pub fn weeks(&self, clock: GameClock) -> u64 {
        let elapsed = clock.minutes().saturating_sub(self.conception_time);
        (elapsed / MINUTES_PER_WEEK).max(1)
    }
}

// ============================================================================
// Clock
// ============================================================================

pub const MINUTES_PER_DAY: u64 = 24 * 60;
pub const MINUTES_PER_WEEK: u64 = 7 * MINUTES_PER_DAY;

/// 08:00 on day one.
pub const DEFAULT_START_MINUTES: u64 = 8 * 60;

/// Minutes since the start of day one. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameClock(u64);

impl GameClock {
    pub fn new(minutes: u64) -> Self {
        Self(minutes)
    }

    pub fn minutes(&self) -> u64 {
        self.0
    }

    pub fn advance(&mut self, minutes: u32) {
        self.0 = self.0.saturating_add(minutes as u64);
    }

    pub fn day(&self) -> u64 {
        self.0 / MINUTES_PER_DAY + 1
    }

    pub fn hour(&self) -> u8 {
        ((self.0 % MINUTES_PER_DAY) / 60) as u8
    }

    pub fn minute(&self) -> u8 {
        (self.0 % 60) as u8
    }

    pub fn time_of_day(&self) -> &'static str {
        match self.hour() {
            5..=7 => "dawn",
            8..=11 => "morning",
            12..=13 => "midday",
            14..=17 => "afternoon",
            18..=20 => "evening",
            _ => "night",
        }
    }

    /// "Day N, HH:MM"
    pub fn display(&self) -> String {
        format!("Day {}, {:02}:{:02}", self.day(), self.hour(), self.minute())
    }
}

impl Default for GameClock {
    fn default() -> Self {
        Self(DEFAULT_START_MINUTES)
    }
}

impl fmt::Display for GameClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

// ============================================================================
// History
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Player,
    Model,
}

/// One entry of the story transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    /// Character who spoke last in this message; `None` for the narrator.
    #[serde(default)]
    pub speaker: Option<String>,
    /// Stage that produced the final text.
    #[serde(default)]
    pub origin: Option<Stage>,
}

impl HistoryMessage {
    pub fn player(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::Player,
            content: content.into(),
            speaker: None,
            origin: None,
        }
    }

    pub fn model(content: impl Into<String>, speaker: Option<String>, origin: Stage) -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::Model,
            content: content.into(),
            speaker,
            origin: Some(origin),
        }
    }
}

/// A player-authored goal. Never touched by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: GoalId,
    pub text: String,
    pub completed: bool,
}

/// What is needed to replay the last turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastTurnInfo {
    pub prompt: String,
    pub previous_world_update: Option<String>,
}

// ============================================================================
// Game State
// ============================================================================

/// The complete state of one game. Serialized wholesale for saves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub id: GameId,
    pub character: CharacterData,
    pub scenario: Scenario,

    pub history: Vec<HistoryMessage>,
    pub lorebook: Lorebook,
    #[serde(default)]
    pub lore_suggestions: SuggestionQueue,

    pub affinity: Affinity,
    pub inventory: Vec<Item>,
    pub equipment: Equipment,
    pub companions: Vec<String>,
    pub relationship: RelationshipState,
    pub pregnancy: Option<Pregnancy>,
    pub clock: GameClock,

    pub off_screen_update: Option<String>,
    pub last_turn: Option<LastTurnInfo>,
    #[serde(default)]
    pub suggested_actions: Vec<String>,
    #[serde(default)]
    pub goals: Vec<Goal>,
    pub nsfw: bool,

    /// Successful turns since the last memory compaction.
    #[serde(default)]
    pub turns_since_compaction: u32,
    /// Number of chapter summaries written so far.
    #[serde(default)]
    pub chapters_compacted: u32,
}

impl GameState {
    pub fn new(character: CharacterData, scenario: Scenario) -> Self {
        Self {
            id: GameId::new(),
            character,
            scenario,
            history: Vec::new(),
            lorebook: Lorebook::new(),
            lore_suggestions: SuggestionQueue::new(),
            affinity: Affinity::new(),
            inventory: Vec::new(),
            equipment: Equipment::default(),
            companions: Vec::new(),
            relationship: RelationshipState::Single,
            pregnancy: None,
            clock: GameClock::default(),
            off_screen_update: None,
            last_turn: None,
            suggested_actions: Vec::new(),
            goals: Vec::new(),
            nsfw: false,
            turns_since_compaction: 0,
            chapters_compacted: 0,
        }
    }

    pub fn with_clock(mut self, clock: GameClock) -> Self {
        self.clock = clock;
        self
    }

    /// Full reset: every piece of progress goes, persona and scenario stay.
    pub fn reset(&mut self) {
        let fresh = GameState::new(self.character.clone(), self.scenario.clone());
        *self = GameState { id: self.id, ..fresh };
    }

    /// A copy with the same persona, scenario, clock and content policy but
    /// nothing else, used to generate a clean opening.
    pub fn opening_view(&self) -> GameState {
        GameState {
            id: self.id,
            clock: self.clock,
            nsfw: self.nsfw,
            ..GameState::new(self.character.clone(), self.scenario.clone())
        }
    }

    pub fn inventory_item(&self, id: ItemId) -> Option<&Item> {
        self.inventory.iter().find(|i| i.id == id)
    }

    pub fn has_item_named(&self, name: &str) -> bool {
        self.inventory.iter().any(|i| i.is_named(name))
    }

    pub fn is_companion(&self, npc: &str) -> bool {
        let npc = npc.trim().to_lowercase();
        self.companions.iter().any(|c| c.trim().to_lowercase() == npc)
    }

    pub fn last_model_message(&self) -> Option<&HistoryMessage> {
        self.history
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Model)
    }

    /// The most recent `count` messages, oldest first.
    pub fn recent_history(&self, count: usize) -> &[HistoryMessage] {
        let start = self.history.len().saturating_sub(count);
        &self.history[start..]
    }

    /// Replace the content of one message. Returns false if it does not exist.
    pub fn edit_message(&mut self, id: MessageId, content: impl Into<String>) -> bool {
        match self.history.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.content = content.into();
                true
            }
            None => false,
        }
    }

    pub fn add_goal(&mut self, text: impl Into<String>) -> GoalId {
        let goal = Goal {
            id: GoalId::new(),
            text: text.into(),
            completed: false,
        };
        let id = goal.id;
        self.goals.push(goal);
        id
    }

    pub fn toggle_goal(&mut self, id: GoalId) -> bool {
        match self.goals.iter_mut().find(|g| g.id == id) {
            Some(goal) => {
                goal.completed = !goal.completed;
                true
            }
            None => false,
        }
    }

    pub fn remove_goal(&mut self, id: GoalId) -> bool {
        let before = self.goals.len();
        self.goals.retain(|g| g.id != id);
        self.goals.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> GameState {
        GameState::new(CharacterData::new("Lan"), Scenario::custom("", "", ""))
    }

    #[test]
    fn test_affinity_clamps() {
        let mut affinity = Affinity::new();
        assert_eq!(affinity.apply_change("Thị Nở", 80), 80);
        assert_eq!(affinity.apply_change("Thị Nở", 80), 100);
        assert_eq!(affinity.apply_change("Thị Nở", -250), -100);
        assert_eq!(affinity.get("Bá Kiến"), 0);
    }

    #[test]
    fn test_affinity_tiers() {
        assert_eq!(affinity_tier(-100), "hostile");
        assert_eq!(affinity_tier(-30), "cold");
        assert_eq!(affinity_tier(0), "neutral");
        assert_eq!(affinity_tier(45), "friendly");
        assert_eq!(affinity_tier(100), "devoted");
    }

    #[test]
    fn test_slot_inference() {
        assert_eq!(EquipmentSlot::infer("con dao"), Some(EquipmentSlot::Weapon));
        assert_eq!(EquipmentSlot::infer("Rusty Sword"), Some(EquipmentSlot::Weapon));
        assert_eq!(EquipmentSlot::infer("áo giáp"), Some(EquipmentSlot::Armor));
        assert_eq!(EquipmentSlot::infer("Leather Armor"), Some(EquipmentSlot::Armor));
        assert_eq!(EquipmentSlot::infer("bread"), None);
    }

    #[test]
    fn test_clock_display() {
        let mut clock = GameClock::default();
        assert_eq!(clock.display(), "Day 1, 08:00");
        assert_eq!(clock.time_of_day(), "morning");

        clock.advance(17 * 60 + 5);
        assert_eq!(clock.display(), "Day 2, 01:05");
        assert_eq!(clock.time_of_day(), "night");
    }

    #[test]
    fn test_pregnancy_weeks_minimum_one() {
        let pregnancy = Pregnancy {
            partner_name: "Minh".to_string(),
            conception_time: 1000,
        };
        assert_eq!(pregnancy.weeks(GameClock::new(1000)), 1);
        assert_eq!(pregnancy.weeks(GameClock::new(1000 + MINUTES_PER_WEEK * 3 + 5)), 3);
    }

    #[test]
    fn test_relationship_helpers() {
        let dating = RelationshipState::Dating {
            partner: "Thị Nở".to_string(),
        };
        assert!(dating.is_dating("thị nở"));
        assert_eq!(dating.spouse(), None);

        let married = RelationshipState::Married {
            spouse: "Thị Nở".to_string(),
        };
        assert_eq!(married.dating_partner(), None);
        assert_eq!(married.spouse(), Some("Thị Nở"));
    }

    #[test]
    fn test_goals() {
        let mut state = sample_state();
        let id = state.add_goal("Find the ferry");
        assert!(state.toggle_goal(id));
        assert!(state.goals[0].completed);
        assert!(state.remove_goal(id));
        assert!(!state.remove_goal(id));
    }

    #[test]
    fn test_reset_keeps_persona() {
        let mut state = sample_state();
        state.affinity.apply_change("Minh", 10);
        state.nsfw = true;
        state.clock.advance(300);
        let id = state.id;

        state.reset();

        assert!(state.affinity.is_empty());
        assert!(!state.nsfw);
        assert_eq!(state.clock, GameClock::default());
        assert_eq!(state.character.name, "Lan");
        assert_eq!(state.id, id);
    }

    #[test]
    fn test_character_completeness() {
        let partial = CharacterData::new("Lan").with_gender("female");
        assert!(!partial.is_complete());

        let full = partial
            .with_appearance("tall")
            .with_personality("stubborn")
            .with_background("ferry keeper's daughter");
        assert!(full.is_complete());
    }
}
