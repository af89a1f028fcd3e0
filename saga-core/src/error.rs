//! Local validation errors.
//!
//! These are raised before any model call is made, for player actions whose
//! preconditions do not hold.

use crate::world::ItemId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("You must be dating {npc} before you can propose")]
    NotDating { npc: String },

    #[error("You need a {item} for that")]
    MissingItem { item: String },

    #[error("{npc} is not travelling with you")]
    NotACompanion { npc: String },

    #[error("Item not found: {id}")]
    ItemNotFound { id: ItemId },

    #[error("Unknown equipment slot: {0}")]
    UnknownSlot(String),

    #[error("{name} cannot be equipped")]
    NotEquippable { name: String },

    #[error("Input is empty")]
    EmptyInput,

    #[error("There is no turn to regenerate")]
    NoTurnToRegenerate,

    #[error("There is no failed turn to retry")]
    NothingToRetry,
}
