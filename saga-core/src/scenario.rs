//! Scenarios: the source work a story is played in.
//!
//! A scenario carries the base instructions for each generation stage and
//! the opening prompts. Nothing is shipped built in; scenarios are either
//! authored in code or created from player-supplied material with
//! [`Scenario::custom`].

use crate::world::{define_id, CharacterData};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

define_id!(
    /// Unique identifier for scenarios.
    ScenarioId
);

pub const BASE_WORLD_INSTRUCTION: &str = include_str!("pipeline/prompts/world.txt");
pub const BASE_STORYTELLER_INSTRUCTION: &str = include_str!("pipeline/prompts/storyteller.txt");
pub const BASE_CHARACTER_INSTRUCTION: &str = include_str!("pipeline/prompts/character.txt");

const DEFAULT_CUSTOM_TITLE: &str = "Custom World";
const DEFAULT_CUSTOM_AUTHOR: &str = "Player";
const DEFAULT_CUSTOM_OPENING: &str =
    "I am {name}. My background: {background}. My story begins now.";

/// The protagonist of the source work, for playing the original role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protagonist {
    pub name: String,
    pub gender: String,
    /// Opening prompt used when playing as this protagonist.
    pub opening: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: ScenarioId,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub description: String,
    /// Player-supplied source material, for custom worlds.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub protagonist: Option<Protagonist>,
    /// Opening prompt for a custom character. `{name}`, `{gender}` and
    /// `{background}` are substituted.
    pub custom_opening_template: String,

    pub world_instruction: String,
    pub storyteller_instruction: String,
    pub character_instruction: String,
}

impl Scenario {
    /// A scenario with the base stage instructions and no source material.
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: ScenarioId::new(),
            title: title.into(),
            author: author.into(),
            description: String::new(),
            content: None,
            protagonist: None,
            custom_opening_template: DEFAULT_CUSTOM_OPENING.to_string(),
            world_instruction: BASE_WORLD_INSTRUCTION.to_string(),
            storyteller_instruction: BASE_STORYTELLER_INSTRUCTION.to_string(),
            character_instruction: BASE_CHARACTER_INSTRUCTION.to_string(),
        }
    }

    /// Build a scenario from player-supplied material.
    ///
    /// Blank titles and authors fall back to defaults. The content is
    /// appended to every stage instruction so the model infers style,
    /// rules and characters from it.
    pub fn custom(title: &str, author: &str, content: &str) -> Self {
        let title = if title.trim().is_empty() {
            DEFAULT_CUSTOM_TITLE
        } else {
            title.trim()
        };
        let author = if author.trim().is_empty() {
            DEFAULT_CUSTOM_AUTHOR
        } else {
            author.trim()
        };

        let mut scenario = Scenario::new(title, author)
            .with_description("A world created from your own idea.");

        if !content.trim().is_empty() {
            scenario.world_instruction.push_str(&format!(
                "\nInfer the rules and characters of the world from this material: {content}"
            ));
            scenario.storyteller_instruction.push_str(&format!(
                "\nTake the style and setting from this material: {content}"
            ));
            scenario.character_instruction.push_str(&format!(
                "\nInfer the characters' personalities from this material: {content}"
            ));
            scenario.content = Some(content.to_string());
        }

        scenario
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_protagonist(
        mut self,
        name: impl Into<String>,
        gender: impl Into<String>,
        opening: impl Into<String>,
    ) -> Self {
        self.protagonist = Some(Protagonist {
            name: name.into(),
            gender: gender.into(),
            opening: opening.into(),
        });
        self
    }

    pub fn with_custom_opening(mut self, template: impl Into<String>) -> Self {
        self.custom_opening_template = template.into();
        self
    }

    /// Append scenario-specific guidance to the storyteller instruction.
    pub fn with_storyteller_style(mut self, style: &str) -> Self {
        self.storyteller_instruction.push('\n');
        self.storyteller_instruction.push_str(style);
        self
    }

    /// Append scenario-specific guidance to the character instruction.
    pub fn with_character_notes(mut self, notes: &str) -> Self {
        self.character_instruction.push('\n');
        self.character_instruction.push_str(notes);
        self
    }

    /// Append scenario-specific guidance to the world instruction.
    pub fn with_world_rules(mut self, rules: &str) -> Self {
        self.world_instruction.push('\n');
        self.world_instruction.push_str(rules);
        self
    }

    pub fn is_custom(&self) -> bool {
        self.content.is_some()
    }

    /// The persona used when playing the original protagonist.
    pub fn original_character(&self) -> Option<CharacterData> {
        self.protagonist.as_ref().map(|p| {
            CharacterData::new(&p.name)
                .with_gender(&p.gender)
                .with_appearance("As in the original work")
                .with_personality("As in the original work")
                .with_background("As in the original work")
        })
    }

    /// The opening prompt for the given persona.
    ///
    /// Playing the protagonist uses the work's own opening; anyone else gets
    /// the custom template.
    pub fn opening_prompt_for(&self, character: &CharacterData) -> String {
        if let Some(protagonist) = &self.protagonist {
            if protagonist.name == character.name && !protagonist.opening.is_empty() {
                return protagonist.opening.clone();
            }
        }
        self.custom_opening_template
            .replace("{name}", &character.name)
            .replace("{gender}", &character.gender)
            .replace("{background}", &character.background)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.title, self.author)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_defaults() {
        let scenario = Scenario::custom("  ", "", "");
        assert_eq!(scenario.title, "Custom World");
        assert_eq!(scenario.author, "Player");
        assert!(!scenario.is_custom());
        assert_eq!(scenario.world_instruction, BASE_WORLD_INSTRUCTION);
    }

    #[test]
    fn test_custom_content_reaches_instructions() {
        let scenario = Scenario::custom("River Town", "Me", "A town built on stilts.");
        assert!(scenario.is_custom());
        assert!(scenario.world_instruction.contains("A town built on stilts."));
        assert!(scenario.storyteller_instruction.contains("A town built on stilts."));
        assert!(scenario.character_instruction.contains("A town built on stilts."));
    }

    #[test]
    fn test_opening_prompt() {
        let scenario = Scenario::new("Village", "Anon")
            .with_protagonist("Chí Phèo", "male", "I come back from prison.")
            .with_custom_opening("I am {name}, a {gender} stranger. {background}");

        let original = scenario.original_character();
        assert_eq!(original.as_ref().map(|c| c.name.as_str()), Some("Chí Phèo"));
        assert_eq!(
            original.map(|c| scenario.opening_prompt_for(&c)),
            Some("I come back from prison.".to_string())
        );

        let custom = CharacterData::new("Lan")
            .with_gender("female")
            .with_background("I sell tea.");
        assert_eq!(
            scenario.opening_prompt_for(&custom),
            "I am Lan, a female stranger. I sell tea."
        );
    }
}
