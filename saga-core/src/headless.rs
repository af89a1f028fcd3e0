//! Headless game interface for programmatic use.
//!
//! This module provides a simplified interface for running stories without
//! a graphical front end. It's designed for:
//! - Automated testing with real model responses
//! - Coding agents playing the game
//! - Script-driven game sessions
//!
//! # Example
//!
//! ```ignore
//! use saga_core::headless::{HeadlessConfig, HeadlessGame};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HeadlessConfig::quick_start("Lan");
//!     let game = HeadlessGame::new(config)?;
//!
//!     let opening = game.begin().await?;
//!     println!("{}", opening.narrative);
//!
//!     let turn = game.send("I walk down to the ferry").await?;
//!     println!("{}", turn.narrative);
//!     println!("{}", game.clock());
//!
//!     game.save("lan.json").await?;
//!     Ok(())
//! }
//! ```

use crate::pipeline::{Generator, TurnResult};
use crate::scenario::Scenario;
use crate::session::{claude_from_env, GameSession, SessionConfig, SessionError, TurnError};
use crate::world::{affinity_tier, CharacterData, GameClock, GameState, RelationshipState};
use std::path::Path;
use std::sync::Arc;

/// Configuration for a headless game session.
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// The player's persona.
    pub character: CharacterData,
    /// The world the story is set in.
    pub scenario: Scenario,
    /// Whether adult content is allowed.
    pub nsfw: bool,
    /// Session tuning.
    pub session: SessionConfig,
}

impl HeadlessConfig {
    /// Create a quick-start configuration in a blank custom world.
    pub fn quick_start(name: impl Into<String>) -> Self {
        Self {
            character: CharacterData::new(name),
            scenario: Scenario::custom("", "", ""),
            nsfw: false,
            session: SessionConfig::default(),
        }
    }

    pub fn with_character(mut self, character: CharacterData) -> Self {
        self.character = character;
        self
    }

    pub fn with_scenario(mut self, scenario: Scenario) -> Self {
        self.scenario = scenario;
        self
    }

    pub fn with_nsfw(mut self, nsfw: bool) -> Self {
        self.nsfw = nsfw;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }
}

/// A headless game that can be driven programmatically.
pub struct HeadlessGame {
    session: GameSession,
    turns: usize,
}

impl HeadlessGame {
    /// Create a new game backed by the Claude API.
    ///
    /// Requires `ANTHROPIC_API_KEY` environment variable to be set.
    pub fn new(config: HeadlessConfig) -> Result<Self, SessionError> {
        let model = claude_from_env()?;
        Ok(Self::with_model(config, Arc::new(model)))
    }

    /// Create a new game backed by any generator.
    pub fn with_model(config: HeadlessConfig, model: Arc<dyn Generator>) -> Self {
        let mut state = GameState::new(config.character, config.scenario)
            .with_clock(GameClock::new(config.session.start_minutes));
        state.nsfw = config.nsfw;
        let session = GameSession::resume(config.session, model, state);
        Self { session, turns: 0 }
    }

    /// Load a saved game backed by the Claude API.
    pub async fn load(path: impl AsRef<Path>, config: SessionConfig) -> Result<Self, SessionError> {
        let model = claude_from_env()?;
        let session = GameSession::load(config, Arc::new(model), path).await?;
        let turns = session.with_state(|s| s.history.len());
        Ok(Self { session, turns })
    }

    /// Generate the opening scene.
    pub async fn begin(&self) -> Result<TurnResult, TurnError> {
        self.session.start_story(None).await
    }

    /// Send a player action and get the resulting turn.
    pub async fn send(&mut self, input: &str) -> Result<TurnResult, TurnError> {
        let result = self.session.player_action(input).await?;
        self.turns += 1;
        Ok(result)
    }

    /// Save the game.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        self.session.save(path).await?;
        Ok(())
    }

    pub fn player_name(&self) -> String {
        self.session.with_state(|s| s.character.name.clone())
    }

    pub fn world_title(&self) -> String {
        self.session.with_state(|s| s.scenario.title.clone())
    }

    pub fn clock(&self) -> String {
        self.session
            .with_state(|s| format!("{} ({})", s.clock, s.clock.time_of_day()))
    }

    /// Player actions sent this session.
    pub fn turn_count(&self) -> usize {
        self.turns
    }

    /// Affinity scores with their display tier.
    pub fn affinities(&self) -> Vec<(String, i32, &'static str)> {
        self.session.with_state(|s| {
            s.affinity
                .iter()
                .map(|(npc, score)| (npc.to_string(), score, affinity_tier(score)))
                .collect()
        })
    }

    pub fn inventory(&self) -> Vec<String> {
        self.session
            .with_state(|s| s.inventory.iter().map(|i| i.name.clone()).collect())
    }

    pub fn companions(&self) -> Vec<String> {
        self.session.with_state(|s| s.companions.clone())
    }

    /// One line describing the relationship, or None when single.
    pub fn relationship(&self) -> Option<String> {
        self.session.with_state(|s| match &s.relationship {
            RelationshipState::Single => None,
            RelationshipState::Dating { partner } => Some(format!("Dating {partner}")),
            RelationshipState::Married { spouse } => Some(format!("Married to {spouse}")),
        })
    }

    pub fn suggested_actions(&self) -> Vec<String> {
        self.session.with_state(|s| s.suggested_actions.clone())
    }

    pub fn last_response(&self) -> Option<String> {
        self.session
            .with_state(|s| s.last_model_message().map(|m| m.content.clone()))
    }

    pub fn state(&self) -> GameState {
        self.session.state()
    }

    pub fn session(&self) -> &GameSession {
        &self.session
    }
}
