//! Save slots and saved characters.
//!
//! A save slot is the whole [`GameState`] as one versioned JSON document.
//! Documents with a different version are rejected outright, never
//! migrated. Saved characters are reusable personas kept in their own
//! versioned roster.

use crate::world::{define_id, CharacterData, GameId, GameState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid save format")]
    InvalidFormat,

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current save slot version.
pub const SAVE_VERSION: u32 = 1;

/// Current saved-character roster version.
pub const CHARACTER_ROSTER_VERSION: u32 = 1;

/// Reject documents whose `version` is not `expected`, before parsing the
/// rest of them.
fn check_version(content: &str, expected: u32) -> Result<(), PersistError> {
    #[derive(Deserialize)]
    struct Versioned {
        version: u32,
    }

    let versioned: Versioned =
        serde_json::from_str(content).map_err(|_| PersistError::InvalidFormat)?;
    if versioned.version != expected {
        return Err(PersistError::VersionMismatch {
            expected,
            found: versioned.version,
        });
    }
    Ok(())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

// ============================================================================
// Save slots
// ============================================================================

/// One saved game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveSlot {
    pub id: GameId,
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub character_name: String,
    pub work_title: String,
    pub game_state: GameState,
}

/// What a save list shows without loading the whole state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveMetadata {
    pub id: GameId,
    pub timestamp: DateTime<Utc>,
    pub character_name: String,
    pub work_title: String,
}

impl SaveSlot {
    pub fn new(game_state: GameState) -> Self {
        Self {
            id: game_state.id,
            version: SAVE_VERSION,
            timestamp: Utc::now(),
            character_name: game_state.character.name.clone(),
            work_title: game_state.scenario.title.clone(),
            game_state,
        }
    }

    pub fn metadata(&self) -> SaveMetadata {
        SaveMetadata {
            id: self.id,
            timestamp: self.timestamp,
            character_name: self.character_name.clone(),
            work_title: self.work_title.clone(),
        }
    }

    /// Export as a JSON string.
    pub fn to_json_string(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Import from a JSON string.
    pub fn from_json_string(content: &str) -> Result<Self, PersistError> {
        check_version(content, SAVE_VERSION)?;
        Ok(serde_json::from_str(content)?)
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        fs::write(path, self.to_json_string()?).await?;
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        Self::from_json_string(&content)
    }

    /// Read a save's metadata without deserializing its game state.
    pub async fn peek_metadata(path: impl AsRef<Path>) -> Result<SaveMetadata, PersistError> {
        let content = fs::read_to_string(path).await?;
        check_version(&content, SAVE_VERSION)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// A save file found on disk.
#[derive(Debug, Clone)]
pub struct SaveInfo {
    pub path: PathBuf,
    pub metadata: SaveMetadata,
}

/// List compatible save files in a directory, most recent first.
///
/// Files that are not saves, or are saves of another version, are skipped.
pub async fn list_saves(dir: impl AsRef<Path>) -> Result<Vec<SaveInfo>, PersistError> {
    let mut saves = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            if let Ok(metadata) = SaveSlot::peek_metadata(&path).await {
                saves.push(SaveInfo { path, metadata });
            }
        }
    }

    saves.sort_by(|a, b| b.metadata.timestamp.cmp(&a.metadata.timestamp));
    Ok(saves)
}

/// File name for a save slot: one file per game.
pub fn save_path(dir: impl AsRef<Path>, slot: &SaveSlot) -> PathBuf {
    dir.as_ref()
        .join(format!("{}_{}.json", sanitize(&slot.character_name), slot.id))
}

// ============================================================================
// Saved characters
// ============================================================================

define_id!(
    /// Unique identifier for saved characters.
    CharacterId
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedCharacter {
    pub id: CharacterId,
    pub character: CharacterData,
}

/// Reusable personas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterRoster {
    pub version: u32,
    characters: Vec<SavedCharacter>,
}

impl Default for CharacterRoster {
    fn default() -> Self {
        Self {
            version: CHARACTER_ROSTER_VERSION,
            characters: Vec::new(),
        }
    }
}

impl CharacterRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn characters(&self) -> &[SavedCharacter] {
        &self.characters
    }

    pub fn get(&self, id: CharacterId) -> Option<&SavedCharacter> {
        self.characters.iter().find(|c| c.id == id)
    }

    /// Save a new persona. One with the same name is replaced.
    pub fn insert(&mut self, character: CharacterData) -> CharacterId {
        self.characters
            .retain(|c| c.character.name != character.name);
        let saved = SavedCharacter {
            id: CharacterId::new(),
            character,
        };
        let id = saved.id;
        self.characters.push(saved);
        id
    }

    pub fn update(&mut self, id: CharacterId, character: CharacterData) -> bool {
        match self.characters.iter_mut().find(|c| c.id == id) {
            Some(saved) => {
                saved.character = character;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: CharacterId) -> bool {
        let before = self.characters.len();
        self.characters.retain(|c| c.id != id);
        self.characters.len() != before
    }

    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        check_version(&content, CHARACTER_ROSTER_VERSION)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load the roster, or start an empty one if the file does not exist.
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        match Self::load_json(path).await {
            Err(PersistError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::new())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Scenario;

    fn state() -> GameState {
        GameState::new(CharacterData::new("Lan"), Scenario::new("River Town", "Anon"))
    }

    #[test]
    fn test_slot_metadata() {
        let slot = SaveSlot::new(state());
        assert_eq!(slot.version, SAVE_VERSION);
        assert_eq!(slot.character_name, "Lan");
        assert_eq!(slot.work_title, "River Town");
        assert_eq!(slot.id, slot.game_state.id);
    }

    #[test]
    fn test_export_import() {
        let mut game = state();
        game.lorebook.add("Ferry", "Crosses at dawn");
        let slot = SaveSlot::new(game);

        let json = slot.to_json_string().unwrap();
        let imported = SaveSlot::from_json_string(&json).unwrap();
        assert_eq!(imported.game_state, slot.game_state);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let slot = SaveSlot::new(state());
        let mut value = serde_json::to_value(&slot).unwrap();
        value["version"] = serde_json::json!(SAVE_VERSION + 1);

        let result = SaveSlot::from_json_string(&value.to_string());
        assert!(matches!(
            result,
            Err(PersistError::VersionMismatch { found, .. }) if found == SAVE_VERSION + 1
        ));
    }

    #[test]
    fn test_not_a_save() {
        let result = SaveSlot::from_json_string("{\"hello\": 1}");
        assert!(matches!(result, Err(PersistError::InvalidFormat)));
    }

    #[test]
    fn test_save_path_is_sanitized() {
        let slot = SaveSlot::new(GameState::new(
            CharacterData::new("Chí Phèo / 2"),
            Scenario::new("t", "a"),
        ));
        let path = save_path("/saves", &slot);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("Chí_Phèo___2_"));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn test_roster_replaces_same_name() {
        let mut roster = CharacterRoster::new();
        let first = roster.insert(CharacterData::new("Lan").with_gender("female"));
        let second = roster.insert(CharacterData::new("Lan").with_gender("other"));
        roster.insert(CharacterData::new("Minh"));

        assert_eq!(roster.characters().len(), 2);
        assert!(roster.get(first).is_none());
        assert_eq!(
            roster.get(second).map(|c| c.character.gender.as_str()),
            Some("other")
        );
    }

    #[test]
    fn test_roster_update_and_remove() {
        let mut roster = CharacterRoster::new();
        let id = roster.insert(CharacterData::new("Lan"));
        assert!(roster.update(id, CharacterData::new("Lan").with_background("tea seller")));
        assert_eq!(
            roster.get(id).map(|c| c.character.background.as_str()),
            Some("tea seller")
        );
        assert!(roster.remove(id));
        assert!(!roster.remove(id));
    }

    #[tokio::test]
    async fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let slot = SaveSlot::new(state());
        let path = save_path(dir.path(), &slot);

        slot.save_json(&path).await.unwrap();
        let loaded = SaveSlot::load_json(&path).await.unwrap();
        assert_eq!(loaded.game_state, slot.game_state);

        let metadata = SaveSlot::peek_metadata(&path).await.unwrap();
        assert_eq!(metadata, slot.metadata());
    }

    #[tokio::test]
    async fn test_roster_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let roster = CharacterRoster::load_or_default(dir.path().join("characters.json"))
            .await
            .unwrap();
        assert!(roster.characters().is_empty());
    }
}
