//! QA tests for world-state progression through full turns.
//!
//! These tests verify:
//! - Inventory and equipment, including keyword slot inference
//! - Relationship actions and their preconditions
//! - Pregnancy tracking and the game clock

use saga_core::pipeline::{
    DatingUpdate, ItemUpdate, MarriageUpdate, PregnancyUpdate, Stage, WorldDelta,
};
use saga_core::testing::{assert_has_item, assert_no_item, TestHarness};
use saga_core::world::{ItemCategory, RelationshipState, MINUTES_PER_WEEK};
use saga_core::{EquipmentSlot, TurnError, ValidationError};

fn companions(names: &[&str]) -> WorldDelta {
    WorldDelta {
        companions: Some(names.iter().map(|n| n.to_string()).collect()),
        ..Default::default()
    }
}

fn item_id(harness: &TestHarness, name: &str) -> saga_core::ItemId {
    harness
        .session
        .with_state(|s| s.inventory.iter().find(|i| i.is_named(name)).map(|i| i.id))
        .expect("item should be in the inventory")
}

// =============================================================================
// INVENTORY AND EQUIPMENT
// =============================================================================

#[tokio::test]
async fn test_picked_up_knife_is_equipped_and_shown_in_context() {
    let harness = TestHarness::new();
    harness.expect_world(WorldDelta {
        item_updates: vec![ItemUpdate::add(
            "con dao",
            "Một con dao nhỏ, lưỡi đã mẻ",
            ItemCategory::Equipment,
        )],
        ..Default::default()
    });

    harness.act("Tôi nhặt con dao lên").await.unwrap();
    assert_has_item(&harness, "con dao");

    let knife = item_id(&harness, "con dao");
    assert_eq!(harness.session.equip(knife).unwrap(), EquipmentSlot::Weapon);
    assert_no_item(&harness, "con dao");

    harness.act("Tôi đi ra chợ").await.unwrap();
    let world = harness.model.calls_for(Stage::World);
    assert!(world[1].system.contains("Equipped: con dao."));
}

#[tokio::test]
async fn test_equip_round_trip_restores_inventory() {
    let harness = TestHarness::new();
    harness.expect_world(WorldDelta {
        item_updates: vec![
            ItemUpdate::add("Leather armor", "", ItemCategory::Equipment),
            ItemUpdate::add("Rice cake", "", ItemCategory::Consumable),
        ],
        ..Default::default()
    });
    harness.act("I open the chest").await.unwrap();
    let before = harness.state().inventory;

    let armor = item_id(&harness, "leather armor");
    assert_eq!(harness.session.equip(armor).unwrap(), EquipmentSlot::Armor);
    assert_eq!(
        harness.session.unequip(EquipmentSlot::Armor).unwrap(),
        Some(armor)
    );

    let mut after = harness.state().inventory;
    let mut expected = before;
    after.sort_by_key(|i| i.id);
    expected.sort_by_key(|i| i.id);
    assert_eq!(after, expected);

    let cake = item_id(&harness, "rice cake");
    assert!(matches!(
        harness.session.equip(cake),
        Err(TurnError::Validation(ValidationError::NotEquippable { .. }))
    ));
}

#[tokio::test]
async fn test_removed_item_leaves_inventory() {
    let harness = TestHarness::new();
    harness.expect_world(WorldDelta {
        item_updates: vec![ItemUpdate::add("Lantern", "", ItemCategory::Equipment)],
        ..Default::default()
    });
    harness.act("I buy a lantern").await.unwrap();

    harness.expect_world(WorldDelta {
        item_updates: vec![ItemUpdate::remove("lantern"), ItemUpdate::remove("map")],
        ..Default::default()
    });
    harness.act("I drop the lantern in the river").await.unwrap();
    assert_no_item(&harness, "Lantern");
}

// =============================================================================
// RELATIONSHIPS
// =============================================================================

#[tokio::test]
async fn test_confess_date_propose_marry() {
    let harness = TestHarness::new();

    // Proposing before dating fails locally.
    let err = harness.session.propose("Minh").await.unwrap_err();
    assert!(matches!(
        err,
        TurnError::Validation(ValidationError::NotDating { .. })
    ));
    assert_eq!(harness.model.total_calls(), 0);

    harness.expect_world(WorldDelta {
        dating_update: Some(DatingUpdate {
            partner_name: "Minh".to_string(),
        }),
        ..Default::default()
    });
    harness.session.confess("Minh").await.unwrap();
    harness.settle().await;
    assert!(harness.state().relationship.is_dating("Minh"));
    let confession = &harness.state().history[0].content;
    assert!(confession.contains("Minh"));

    // Dating but no ring.
    let err = harness.session.propose("Minh").await.unwrap_err();
    assert!(matches!(
        err,
        TurnError::Validation(ValidationError::MissingItem { ref item }) if item == "grass ring"
    ));

    harness.expect_world(WorldDelta {
        item_updates: vec![ItemUpdate::add("Grass ring", "Woven by hand", ItemCategory::Key)],
        ..Default::default()
    });
    harness.act("I weave a ring from grass").await.unwrap();

    harness.expect_world(WorldDelta {
        marriage_update: Some(MarriageUpdate {
            spouse_name: "Minh".to_string(),
        }),
        ..Default::default()
    });
    harness.session.propose("Minh").await.unwrap();
    harness.settle().await;

    assert_eq!(
        harness.state().relationship,
        RelationshipState::Married {
            spouse: "Minh".to_string()
        }
    );
}

#[tokio::test]
async fn test_chat_requires_companion() {
    let harness = TestHarness::new();
    let err = harness.session.chat_with("Minh").await.unwrap_err();
    assert!(matches!(
        err,
        TurnError::Validation(ValidationError::NotACompanion { .. })
    ));

    harness.expect_world(companions(&["Minh"]));
    harness.act("I ask Minh to come along").await.unwrap();

    harness.session.chat_with("minh").await.unwrap();
    harness.settle().await;
    assert_eq!(harness.model.call_count(Stage::World), 2);
}

#[tokio::test]
async fn test_gift_removes_item_only_on_success() {
    let harness = TestHarness::new();
    let mut setup = companions(&["Thị Nở"]);
    setup.item_updates = vec![ItemUpdate::add("Bowl of congee", "", ItemCategory::Consumable)];
    harness.expect_world(setup);
    harness.act("I cook congee and invite Thị Nở").await.unwrap();
    let congee = item_id(&harness, "bowl of congee");

    // A failed gift turn keeps the item.
    harness.model.push_failure(
        Stage::Narration,
        saga_core::pipeline::ModelError::transport("reset"),
    );
    assert!(harness.session.give_gift("Thị Nở", congee).await.is_err());
    assert_has_item(&harness, "bowl of congee");

    harness.session.give_gift("Thị Nở", congee).await.unwrap();
    harness.settle().await;
    assert_no_item(&harness, "bowl of congee");

    // The gift turn's context no longer lists the item as carried.
    let world = harness.model.calls_for(Stage::World);
    assert!(!world.last().unwrap().system.contains("Bowl of congee"));

    let err = harness.session.give_gift("Thị Nở", congee).await.unwrap_err();
    assert!(matches!(
        err,
        TurnError::Validation(ValidationError::ItemNotFound { .. })
    ));
}

// =============================================================================
// TIME AND PREGNANCY
// =============================================================================

#[tokio::test]
async fn test_clock_advances_default_or_reported_time() {
    let harness = TestHarness::new();
    let start = harness.state().clock.minutes();
    assert_eq!(harness.session.clock_display(), "Day 1, 08:00");

    harness.act("I wait").await.unwrap();
    assert_eq!(harness.state().clock.minutes(), start + 15);

    harness.expect_world(WorldDelta {
        time_passed: Some(600),
        ..Default::default()
    });
    harness.act("I sleep until evening").await.unwrap();
    assert_eq!(harness.session.clock_display(), "Day 1, 18:15");
}

#[tokio::test]
async fn test_pregnancy_recorded_once_and_counted_in_weeks() {
    let harness = TestHarness::new();
    harness.expect_world(WorldDelta {
        pregnancy_update: Some(PregnancyUpdate {
            partner_name: "Minh".to_string(),
        }),
        time_passed: Some(MINUTES_PER_WEEK as u32 * 2),
        ..Default::default()
    });
    harness.act("Time passes").await.unwrap();

    let state = harness.state();
    let pregnancy = state.pregnancy.clone().unwrap();
    assert_eq!(pregnancy.partner_name, "Minh");
    assert_eq!(pregnancy.weeks(state.clock), 2);

    // A second update does not replace the first.
    harness.expect_world(WorldDelta {
        pregnancy_update: Some(PregnancyUpdate {
            partner_name: "Bá Kiến".to_string(),
        }),
        ..Default::default()
    });
    harness.act("More time passes").await.unwrap();
    assert_eq!(
        harness.state().pregnancy.map(|p| p.partner_name),
        Some("Minh".to_string())
    );

    let last = harness.model.calls_for(Stage::World).pop().unwrap();
    assert!(last
        .system
        .contains("We are expecting a child: week 2 of the pregnancy, with Minh."));
}
