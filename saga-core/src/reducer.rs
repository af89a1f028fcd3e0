//! World-state reducer.
//!
//! Folds a world-stage delta into the game state. Total: every field is
//! optional and absent fields are no-ops. Equip and unequip are the only
//! state changes not driven by model output and live here too.

use crate::error::ValidationError;
use crate::pipeline::{ItemAction, WorldDelta};
use crate::world::{EquipmentSlot, GameState, Item, ItemId, Pregnancy, RelationshipState};
use tracing::debug;

/// Minutes a turn takes when the world stage does not say.
pub const DEFAULT_MINUTES_PER_TURN: u32 = 15;

/// Apply a delta with the default turn length.
pub fn apply_world_delta(state: &mut GameState, delta: &WorldDelta) {
    apply_world_delta_with_default(state, delta, DEFAULT_MINUTES_PER_TURN);
}

/// Pure form of [`apply_world_delta`].
pub fn reduce(mut state: GameState, delta: &WorldDelta) -> GameState {
    apply_world_delta(&mut state, delta);
    state
}

/// Apply a delta, advancing the clock by `default_minutes` when the delta
/// carries no `timePassed`.
pub fn apply_world_delta_with_default(
    state: &mut GameState,
    delta: &WorldDelta,
    default_minutes: u32,
) {
    for update in &delta.affinity_updates {
        let npc = update.npc_name.trim();
        if npc.is_empty() {
            continue;
        }
        let score = state.affinity.apply_change(npc, update.change);
        debug!(npc, change = update.change, score, reason = %update.reason, "Affinity changed");
    }

    for update in &delta.item_updates {
        let name = update.item.name.trim();
        if name.is_empty() {
            continue;
        }
        match update.action {
            ItemAction::Add => {
                state.inventory.push(Item::new(
                    name,
                    update.item.description.clone(),
                    update.item.category,
                ));
            }
            ItemAction::Remove => {
                // The model may name an item that is already gone.
                if let Some(index) = state.inventory.iter().position(|i| i.is_named(name)) {
                    state.inventory.remove(index);
                }
            }
        }
    }

    if let Some(companions) = &delta.companions {
        state.companions = companions
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
    }

    if let Some(dating) = &delta.dating_update {
        let partner = dating.partner_name.trim();
        // Married is terminal: there is no path back to dating.
        if !partner.is_empty() && state.relationship.spouse().is_none() {
            state.relationship = RelationshipState::Dating {
                partner: partner.to_string(),
            };
        }
    }

    if let Some(marriage) = &delta.marriage_update {
        let spouse = marriage.spouse_name.trim();
        if !spouse.is_empty() {
            state.relationship = RelationshipState::Married {
                spouse: spouse.to_string(),
            };
        }
    }

    if let Some(pregnancy) = &delta.pregnancy_update {
        let partner = pregnancy.partner_name.trim();
        if state.pregnancy.is_none() && !partner.is_empty() {
            state.pregnancy = Some(Pregnancy {
                partner_name: partner.to_string(),
                conception_time: state.clock.minutes(),
            });
        }
    }

    state.off_screen_update = delta.off_screen_world_update.clone();
    state
        .clock
        .advance(delta.time_passed.unwrap_or(default_minutes));
}

/// Move an inventory item into the slot its name implies.
///
/// Whatever occupied the slot goes back to the inventory.
pub fn equip(state: &mut GameState, item_id: ItemId) -> Result<EquipmentSlot, ValidationError> {
    let index = state
        .inventory
        .iter()
        .position(|i| i.id == item_id)
        .ok_or(ValidationError::ItemNotFound { id: item_id })?;

    let slot = EquipmentSlot::infer(&state.inventory[index].name).ok_or_else(|| {
        ValidationError::NotEquippable {
            name: state.inventory[index].name.clone(),
        }
    })?;

    let item = state.inventory.remove(index);
    if let Some(previous) = state.equipment.slot_mut(slot).replace(item) {
        state.inventory.push(previous);
    }
    Ok(slot)
}

/// Empty a slot, returning its item to the inventory.
pub fn unequip(state: &mut GameState, slot: EquipmentSlot) -> Option<ItemId> {
    let item = state.equipment.slot_mut(slot).take()?;
    let id = item.id;
    state.inventory.push(item);
    Some(id)
}
