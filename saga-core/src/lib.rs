//! Narrative role-play engine driven by a language model.
//!
//! This crate provides:
//! - A three-stage turn pipeline (world, narration, dialogue) with
//!   schema-constrained model output and rate-limit retries
//! - A world-state reducer for affinity, inventory, relationships and time
//! - Long-term memory through chapter summaries and a lorebook
//! - Save slots and saved characters
//!
//! # Quick Start
//!
//! ```ignore
//! use saga_core::{CharacterData, GameSession, Scenario, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let character = CharacterData::new("Lan").with_background("A tea seller");
//!     let scenario = Scenario::custom("River Town", "Anon", "A sleepy town on a river.");
//!
//!     let session = GameSession::from_env(SessionConfig::default(), character, scenario)?;
//!
//!     let opening = session.start_story(None).await?;
//!     println!("{}", opening.narrative);
//!
//!     let turn = session.player_action("I walk down to the ferry").await?;
//!     println!("{}", turn.narrative);
//!
//!     session.save("lan.json").await?;
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod error;
pub mod extraction;
pub mod headless;
pub mod lore;
pub mod memory;
pub mod persist;
pub mod pipeline;
pub mod reducer;
pub mod scenario;
pub mod session;
pub mod testing;
pub mod world;

// Re-export for convenience
pub use saga_macros::ResponseSchema;

// Primary public API
pub use error::ValidationError;
pub use headless::{HeadlessConfig, HeadlessGame};
pub use lore::{LoreId, Lorebook, SuggestionQueue};
pub use persist::{CharacterRoster, PersistError, SaveSlot};
pub use pipeline::{Speaker, Stage, StageError, TurnResult, WorldDelta};
pub use scenario::Scenario;
pub use session::{GameSession, SessionConfig, SessionError, TurnError};
pub use testing::{ScriptedModel, TestHarness};
pub use world::{CharacterData, EquipmentSlot, GameClock, GameState, ItemId};
