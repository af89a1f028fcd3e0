//! QA tests for the turn pipeline using the scripted model.
//!
//! These tests verify:
//! - Opening and player turns commit the right history
//! - Dialogue placeholders are filled in order
//! - A failed stage leaves the game state untouched
//! - Rate-limited calls back off and retry
//! - Only one turn runs at a time

use saga_core::pipeline::{AffinityUpdate, ModelError, ModelErrorKind, Stage, WorldDelta};
use saga_core::testing::{assert_affinity, assert_history_len, TestHarness};
use saga_core::{Speaker, TurnError, ValidationError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// BASIC FLOW
// =============================================================================

#[tokio::test]
async fn test_opening_replaces_history() {
    let harness = TestHarness::new();
    harness.expect_narration("Mist hangs over the river.");

    let opening = harness.session.start_story(None).await.unwrap();
    harness.settle().await;

    assert_eq!(opening.narrative, "Mist hangs over the river.");
    assert_eq!(opening.speaker, Speaker::Narrator);
    assert_history_len(&harness, 1);

    let state = harness.state();
    assert_eq!(state.turns_since_compaction, 1);
    assert_eq!(state.suggested_actions.len(), 3);

    // The opening prompt is built from the character.
    let world = harness.model.calls_for(Stage::World);
    assert!(world[0].prompt.contains("I am Lan."));
}

#[tokio::test]
async fn test_player_turn_records_both_messages() {
    let harness = TestHarness::new();
    harness.expect_narration("The ferryman waves.");

    harness.act("I wave at the ferryman").await.unwrap();

    let state = harness.state();
    assert_eq!(state.history.len(), 2);
    assert_eq!(state.history[0].content, "I wave at the ferryman");
    assert_eq!(state.history[1].content, "The ferryman waves.");
    assert_eq!(
        state.last_turn.as_ref().map(|t| t.prompt.as_str()),
        Some("I wave at the ferryman")
    );
}

#[tokio::test]
async fn test_stages_run_in_order_with_delta_visible_to_narration() {
    let harness = TestHarness::new();
    harness
        .expect_world(WorldDelta {
            off_screen_world_update: Some("A storm gathers upriver.".to_string()),
            ..Default::default()
        })
        .expect_narration("You feel the wind pick up.");

    harness.act("I watch the sky").await.unwrap();

    let narration = harness.model.calls_for(Stage::Narration);
    assert_eq!(narration.len(), 1);
    assert!(narration[0].prompt.contains("A storm gathers upriver."));
    assert_eq!(
        harness.state().off_screen_update.as_deref(),
        Some("A storm gathers upriver.")
    );

    // The previous update is passed to the next world stage.
    harness.act("I head for shelter").await.unwrap();
    let world = harness.model.calls_for(Stage::World);
    assert!(world[1]
        .prompt
        .contains("Previous off-screen update: A storm gathers upriver."));
}

#[tokio::test]
async fn test_dialogue_slots_filled_in_order() {
    let harness = TestHarness::new();
    harness
        .expect_narration(
            "Minh looks up. [DIALOGUE:\"Minh\"] Thị Nở laughs. [DIALOGUE:\"Thị Nở\"]",
        )
        .expect_dialogue("Back so soon?")
        .expect_dialogue("He missed you.");

    let result = harness.act("I walk into the tea house").await.unwrap();

    assert_eq!(
        result.narrative,
        "Minh looks up. \"Back so soon?\" Thị Nở laughs. \"He missed you.\""
    );
    assert_eq!(result.speaker, Speaker::Character("Thị Nở".to_string()));
    assert_eq!(result.origin, Stage::Dialogue);

    let dialogue = harness.model.calls_for(Stage::Dialogue);
    assert_eq!(dialogue.len(), 2);
    assert!(dialogue[0].prompt.contains("Character: Minh"));
    // The second call sees the first line already written.
    assert!(dialogue[1].prompt.contains("\"Back so soon?\""));
}

#[tokio::test]
async fn test_no_placeholders_means_no_dialogue_calls() {
    let harness = TestHarness::new();
    harness.act("I sit quietly").await.unwrap();
    assert_eq!(harness.model.call_count(Stage::Dialogue), 0);
}

#[tokio::test]
async fn test_empty_input_rejected_without_model_call() {
    let harness = TestHarness::new();
    let result = harness.act("   ").await;

    assert!(matches!(
        result,
        Err(TurnError::Validation(ValidationError::EmptyInput))
    ));
    assert_eq!(harness.model.total_calls(), 0);
}

// =============================================================================
// FAILURES
// =============================================================================

#[tokio::test]
async fn test_failed_stage_commits_nothing() {
    let harness = TestHarness::new();
    harness.expect_world(WorldDelta {
        affinity_updates: vec![AffinityUpdate {
            npc_name: "Minh".to_string(),
            change: 20,
            reason: String::new(),
        }],
        time_passed: Some(60),
        ..Default::default()
    });
    harness
        .model
        .push_failure(Stage::Narration, ModelError::malformed("not json"));
    let before = harness.state();

    let result = harness.act("I insult Minh").await;

    match result {
        Err(TurnError::Stage(err)) => {
            assert_eq!(err.stage, Stage::Narration);
            assert_eq!(err.source.kind, ModelErrorKind::MalformedResponse);
        }
        other => panic!("expected a stage failure, got {other:?}"),
    }
    assert_eq!(harness.state(), before);
    assert_eq!(harness.model.call_count(Stage::Extraction), 0);
}

#[tokio::test]
async fn test_narration_with_too_few_actions_is_rejected() {
    let harness = TestHarness::new();
    harness.model.push_json(
        Stage::Narration,
        json!({
            "narrative": "The ferry drifts past the reeds.",
            "suggestedActions": ["Wait", "  "]
        }),
    );
    let before = harness.state();

    match harness.act("I wait on the ferry").await {
        Err(TurnError::Stage(err)) => {
            assert_eq!(err.stage, Stage::Narration);
            assert_eq!(err.source.kind, ModelErrorKind::MalformedResponse);
            assert!(err.source.message.contains("at least 3 suggested actions"));
        }
        other => panic!("expected a stage failure, got {other:?}"),
    }
    assert_eq!(harness.state(), before);

    // The default narration carries three actions.
    let turn = harness.session.retry().await.unwrap();
    assert_eq!(turn.suggested_actions.len(), 3);
    assert_history_len(&harness, 2);
}

#[tokio::test]
async fn test_dialogue_failure_aborts_turn() {
    let harness = TestHarness::new();
    harness.expect_narration("Minh turns. [DIALOGUE:\"Minh\"]");
    harness
        .model
        .push_failure(Stage::Dialogue, ModelError::transport("connection reset"));

    let result = harness.act("I call out to Minh").await;

    assert!(matches!(result, Err(TurnError::Stage(ref e)) if e.stage == Stage::Dialogue));
    assert_history_len(&harness, 0);
}

#[tokio::test]
async fn test_retry_runs_failed_turn_again() {
    let harness = TestHarness::new();
    harness
        .model
        .push_failure(Stage::World, ModelError::transport("timeout"));

    assert!(harness.act("I cross the bridge").await.is_err());
    harness.expect_narration("The planks creak.");

    let result = harness.session.retry().await.unwrap();
    harness.settle().await;

    assert_eq!(result.narrative, "The planks creak.");
    let state = harness.state();
    assert_eq!(state.history[0].content, "I cross the bridge");
    assert_history_len(&harness, 2);

    assert!(matches!(
        harness.session.retry().await,
        Err(TurnError::Validation(ValidationError::NothingToRetry))
    ));
}

#[tokio::test]
async fn test_auth_failure_is_reported() {
    let harness = TestHarness::new();
    harness
        .model
        .push_failure(Stage::World, ModelError::auth("invalid x-api-key"));

    let err = harness.act("Hello").await.unwrap_err();
    assert!(err.is_auth());
    // Auth failures are never retried.
    assert_eq!(harness.model.call_count(Stage::World), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_backs_off_then_succeeds() {
    // Default policy: 1s base, doubling, up to 1s jitter.
    let harness = TestHarness::with_config(saga_core::SessionConfig::default());
    harness
        .model
        .push_failure(Stage::World, ModelError::rate_limited("429"))
        .push_failure(Stage::World, ModelError::rate_limited("429"));

    let start = tokio::time::Instant::now();
    let result = harness.session.player_action("I wait at the ferry").await;
    let elapsed = start.elapsed();

    assert!(result.is_ok());
    assert_eq!(harness.model.call_count(Stage::World), 3);
    assert!(elapsed >= Duration::from_secs(3), "waited only {elapsed:?}");
    assert!(elapsed <= Duration::from_secs(5), "waited {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_gives_up_after_retries() {
    let harness = TestHarness::with_config(saga_core::SessionConfig::default());
    for _ in 0..3 {
        harness
            .model
            .push_failure(Stage::World, ModelError::rate_limited("429"));
    }

    let err = harness.session.player_action("I wait").await.unwrap_err();

    match err {
        TurnError::Stage(e) => {
            assert_eq!(e.stage, Stage::World);
            assert_eq!(e.source.kind, ModelErrorKind::RateLimited);
        }
        other => panic!("expected a stage failure, got {other:?}"),
    }
    assert_eq!(harness.model.call_count(Stage::World), 3);
    assert_history_len(&harness, 0);
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[tokio::test]
async fn test_second_turn_rejected_while_one_is_in_flight() {
    let harness = Arc::new(TestHarness::new());
    let gate = harness.model.push_gated(Stage::World, json!({}));

    let running = {
        let harness = harness.clone();
        tokio::spawn(async move { harness.session.player_action("I knock on the door").await })
    };
    while harness.model.call_count(Stage::World) == 0 {
        tokio::task::yield_now().await;
    }

    assert!(harness.session.is_turn_in_flight());
    assert!(matches!(
        harness.session.player_action("I knock again").await,
        Err(TurnError::TurnInFlight)
    ));
    assert!(matches!(
        harness.session.add_goal("Find the ferryman"),
        Err(TurnError::TurnInFlight)
    ));

    gate.notify_one();
    running.await.unwrap().unwrap();
    harness.settle().await;

    assert!(!harness.session.is_turn_in_flight());
    assert_history_len(&harness, 2);
    assert_eq!(harness.model.call_count(Stage::World), 1);
}

#[tokio::test]
async fn test_affinity_accumulates_across_turns() {
    let harness = TestHarness::new();
    for change in [30, 50, 40] {
        harness.expect_world(WorldDelta {
            affinity_updates: vec![AffinityUpdate {
                npc_name: "Minh".to_string(),
                change,
                reason: "kindness".to_string(),
            }],
            ..Default::default()
        });
        harness.act("I help Minh").await.unwrap();
    }
    assert_affinity(&harness, "Minh", 100);

    // The dialogue stage is told the current feeling.
    harness
        .expect_narration("[DIALOGUE:\"Minh\"]")
        .expect_dialogue("Thank you.");
    harness.act("I smile at Minh").await.unwrap();
    let dialogue = harness.model.calls_for(Stage::Dialogue);
    assert!(dialogue[0].prompt.contains("100 (devoted)"));
}
