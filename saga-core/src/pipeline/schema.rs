//! Response payloads for each stage.
//!
//! Each type derives [`ResponseSchema`], so the schema offered to the model
//! is generated from the same definition serde deserializes into. Wire
//! names are camelCase.

use crate::world::ItemCategory;
use saga_macros::ResponseSchema;
use serde::{Deserialize, Serialize};

/// Post-parse shape checks serde cannot express.
pub trait Validate {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

// ============================================================================
// World stage
// ============================================================================

/// A change in how one character feels about the player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ResponseSchema)]
#[serde(rename_all = "camelCase")]
pub struct AffinityUpdate {
    /// Name of the non-player character
    pub npc_name: String,
    /// Change in affinity, usually between -15 and 15
    pub change: i32,
    /// Why the feeling changed
    #[serde(default)]
    pub reason: String,
}

/// Whether an item enters or leaves the inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ResponseSchema)]
#[serde(rename_all = "lowercase")]
pub enum ItemAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ResponseSchema)]
pub struct ItemPayload {
    /// Item name
    pub name: String,
    /// Short description of the item
    #[serde(default)]
    pub description: String,
    /// Item category
    #[serde(rename = "type", default)]
    pub category: ItemCategory,
}

/// An inventory change caused directly by the player's action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ResponseSchema)]
pub struct ItemUpdate {
    pub action: ItemAction,
    pub item: ItemPayload,
}

impl ItemUpdate {
    pub fn add(name: &str, description: &str, category: ItemCategory) -> Self {
        Self {
            action: ItemAction::Add,
            item: ItemPayload {
                name: name.to_string(),
                description: description.to_string(),
                category,
            },
        }
    }

    pub fn remove(name: &str) -> Self {
        Self {
            action: ItemAction::Remove,
            item: ItemPayload {
                name: name.to_string(),
                description: String::new(),
                category: ItemCategory::default(),
            },
        }
    }
}

/// The player starts dating someone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ResponseSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatingUpdate {
    /// Name of the new partner
    pub partner_name: String,
}

/// The player marries someone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ResponseSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarriageUpdate {
    /// Name of the new spouse
    pub spouse_name: String,
}

/// The player's household expects a child
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ResponseSchema)]
#[serde(rename_all = "camelCase")]
pub struct PregnancyUpdate {
    /// Name of the other parent
    pub partner_name: String,
}

/// Silent world-state changes caused by the player's action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ResponseSchema)]
#[serde(rename_all = "camelCase")]
#[schema(name = "update_world")]
pub struct WorldDelta {
    /// Changes in how characters feel about the player
    #[serde(default)]
    pub affinity_updates: Vec<AffinityUpdate>,
    /// Items gained or lost
    #[serde(default)]
    pub item_updates: Vec<ItemUpdate>,
    /// Everyone now travelling with the player. Omit when unchanged
    #[serde(default)]
    pub companions: Option<Vec<String>>,
    /// Set only when a confession was accepted
    #[serde(default)]
    pub dating_update: Option<DatingUpdate>,
    /// Set only when a proposal was accepted
    #[serde(default)]
    pub marriage_update: Option<MarriageUpdate>,
    /// Set only for a rare, natural pregnancy between spouses
    #[serde(default)]
    pub pregnancy_update: Option<PregnancyUpdate>,
    /// One or two sentences about what happens out of the player's sight
    #[serde(default)]
    pub off_screen_world_update: Option<String>,
    /// Minutes the action took
    #[serde(default)]
    pub time_passed: Option<u32>,
}

impl WorldDelta {
    pub fn is_empty(&self) -> bool {
        *self == WorldDelta::default()
    }
}

impl Validate for WorldDelta {
    fn validate(&self) -> Result<(), String> {
        if self.affinity_updates.iter().any(|u| u.npc_name.trim().is_empty()) {
            return Err("affinity update without an NPC name".to_string());
        }
        if self.item_updates.iter().any(|u| u.item.name.trim().is_empty()) {
            return Err("item update without an item name".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Narration and dialogue
// ============================================================================

/// Fewest usable suggested actions a narration may carry.
pub const MIN_SUGGESTED_ACTIONS: usize = 3;

/// The next passage of the story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ResponseSchema)]
#[serde(rename_all = "camelCase")]
#[schema(name = "narrate")]
pub struct NarrationOutput {
    /// Two to four paragraphs of narration, with [DIALOGUE:"Name"] wherever a character speaks
    pub narrative: String,
    /// Short, varied actions the player could take next
    #[serde(default)]
    #[schema(min_items = 3, max_items = 5)]
    pub suggested_actions: Vec<String>,
}

impl Validate for NarrationOutput {
    fn validate(&self) -> Result<(), String> {
        if self.narrative.trim().is_empty() {
            return Err("empty narrative".to_string());
        }
        let actions = self
            .suggested_actions
            .iter()
            .filter(|a| !a.trim().is_empty())
            .count();
        if actions < MIN_SUGGESTED_ACTIONS {
            return Err(format!(
                "expected at least {MIN_SUGGESTED_ACTIONS} suggested actions, got {actions}"
            ));
        }
        Ok(())
    }
}

/// A single line of dialogue for one character
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ResponseSchema)]
#[schema(name = "speak")]
pub struct DialogueLine {
    /// What the character says, without quotation marks
    pub dialogue: String,
}

impl Validate for DialogueLine {
    fn validate(&self) -> Result<(), String> {
        if self.dialogue.trim().is_empty() {
            return Err("empty dialogue line".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Utility stages
// ============================================================================

/// A short first-person summary of the recent story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ResponseSchema)]
#[schema(name = "summarize_chapter")]
pub struct ChapterSummary {
    /// One paragraph, first person, from the player's character's point of view
    pub summary: String,
}

impl Validate for ChapterSummary {
    fn validate(&self) -> Result<(), String> {
        if self.summary.trim().is_empty() {
            return Err("empty summary".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ResponseSchema)]
pub struct LoreCandidate {
    /// Name of the person, place or item
    pub key: String,
    /// Short description based on the passage
    pub value: String,
}

/// New named entities found in a passage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ResponseSchema)]
#[schema(name = "record_entities")]
pub struct LoreCandidates {
    /// Empty when nothing new appeared
    #[serde(default)]
    pub entities: Vec<LoreCandidate>,
}

impl Validate for LoreCandidates {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_world_delta_schema() {
        let schema = WorldDelta::response_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["timePassed"]["type"], "integer");
        assert_eq!(
            schema["properties"]["itemUpdates"]["items"]["properties"]["item"]["properties"]
                ["type"]["enum"],
            json!(["equipment", "consumable", "key"])
        );
        assert_eq!(schema["required"], json!([]));
        assert_eq!(WorldDelta::as_tool().name, "update_world");
    }

    #[test]
    fn test_narration_schema_bounds() {
        let schema = NarrationOutput::response_schema();
        assert_eq!(schema["properties"]["suggestedActions"]["minItems"], 3);
        assert_eq!(schema["properties"]["suggestedActions"]["maxItems"], 5);
        assert_eq!(schema["required"], json!(["narrative"]));
    }

    #[test]
    fn test_world_delta_parses_sparse_payload() {
        let delta: WorldDelta = serde_json::from_value(json!({
            "itemUpdates": [{
                "action": "add",
                "item": {"name": "con dao", "type": "equipment", "description": "một con dao cũ"}
            }],
            "timePassed": 10
        }))
        .unwrap();

        assert_eq!(delta.item_updates.len(), 1);
        assert_eq!(delta.item_updates[0].item.category, ItemCategory::Equipment);
        assert_eq!(delta.time_passed, Some(10));
        assert!(delta.companions.is_none());
        assert!(delta.affinity_updates.is_empty());
    }

    #[test]
    fn test_validation() {
        let bad = WorldDelta {
            affinity_updates: vec![AffinityUpdate {
                npc_name: " ".to_string(),
                change: 5,
                reason: String::new(),
            }],
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(WorldDelta::default().validate().is_ok());

        let empty = NarrationOutput {
            narrative: "\n".to_string(),
            suggested_actions: vec!["Wait".to_string(); 3],
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_narration_needs_three_actions() {
        let mut narration = NarrationOutput {
            narrative: "The ferry drifts.".to_string(),
            suggested_actions: vec!["Wait".to_string(), " ".to_string(), "Row".to_string()],
        };
        assert_eq!(
            narration.validate(),
            Err("expected at least 3 suggested actions, got 2".to_string())
        );

        narration.suggested_actions.push("Sing".to_string());
        assert!(narration.validate().is_ok());
    }
}
