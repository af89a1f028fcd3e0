//! Testing utilities for the narrative engine.
//!
//! This module provides tools for integration testing:
//! - `ScriptedModel` for deterministic testing without API calls
//! - `TestHarness` for scripted game scenarios
//! - Assertion helpers for verifying game state

use crate::pipeline::{
    GenerationRequest, Generator, LoreCandidate, ModelError, RetryPolicy, Stage, TurnResult,
    WorldDelta,
};
use crate::scenario::Scenario;
use crate::session::{GameSession, SessionConfig, TurnError};
use crate::world::{CharacterData, GameState};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// A scripted reply for one model call.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Return this tool input.
    Json(Value),
    /// Fail the call.
    Fail(ModelError),
    /// Block until the gate is notified, then return the value.
    Gated { gate: Arc<Notify>, value: Value },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A model that returns scripted replies.
///
/// Each stage has its own queue. When a queue is empty the stage's default
/// reply is used, so tests only script the calls they care about.
pub struct ScriptedModel {
    script: Mutex<HashMap<Stage, VecDeque<Reply>>>,
    defaults: Mutex<HashMap<Stage, Value>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedModel {
    /// Create a model whose defaults produce a quiet, valid turn.
    pub fn new() -> Self {
        let defaults = HashMap::from([
            (Stage::World, json!({})),
            (Stage::Narration, narration("The story continues.")),
            (Stage::Dialogue, json!({ "dialogue": "..." })),
            (Stage::Summary, json!({ "summary": "Things happened." })),
            (Stage::Extraction, json!({ "entities": [] })),
        ]);
        Self {
            script: Mutex::new(HashMap::new()),
            defaults: Mutex::new(defaults),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, stage: Stage, reply: Reply) -> &Self {
        lock(&self.script).entry(stage).or_default().push_back(reply);
        self
    }

    pub fn push_json(&self, stage: Stage, value: Value) -> &Self {
        self.push(stage, Reply::Json(value))
    }

    pub fn push_world(&self, delta: &WorldDelta) -> &Self {
        let value = serde_json::to_value(delta).unwrap_or_else(|_| json!({}));
        self.push_json(Stage::World, value)
    }

    pub fn push_narration(&self, text: &str) -> &Self {
        self.push_json(Stage::Narration, narration(text))
    }

    pub fn push_dialogue(&self, line: &str) -> &Self {
        self.push_json(Stage::Dialogue, json!({ "dialogue": line }))
    }

    pub fn push_summary(&self, text: &str) -> &Self {
        self.push_json(Stage::Summary, json!({ "summary": text }))
    }

    pub fn push_entities(&self, entities: &[(&str, &str)]) -> &Self {
        let entities: Vec<LoreCandidate> = entities
            .iter()
            .map(|(key, value)| LoreCandidate {
                key: key.to_string(),
                value: value.to_string(),
            })
            .collect();
        self.push_json(Stage::Extraction, json!({ "entities": entities }))
    }

    pub fn push_failure(&self, stage: Stage, error: ModelError) -> &Self {
        self.push(stage, Reply::Fail(error))
    }

    /// Queue a reply that blocks until the returned gate is notified.
    pub fn push_gated(&self, stage: Stage, value: Value) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.push(
            stage,
            Reply::Gated {
                gate: gate.clone(),
                value,
            },
        );
        gate
    }

    pub fn set_default(&self, stage: Stage, value: Value) {
        lock(&self.defaults).insert(stage, value);
    }

    /// Remove a stage's default so unscripted calls fail.
    pub fn clear_default(&self, stage: Stage) {
        lock(&self.defaults).remove(&stage);
    }

    pub fn call_count(&self, stage: Stage) -> usize {
        lock(&self.calls).iter().filter(|r| r.stage == stage).count()
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Requests received for `stage`, oldest first.
    pub fn calls_for(&self, stage: Stage) -> Vec<GenerationRequest> {
        lock(&self.calls)
            .iter()
            .filter(|r| r.stage == stage)
            .cloned()
            .collect()
    }
}

/// A narration reply with three stock suggestions.
pub fn narration(text: &str) -> Value {
    json!({
        "narrative": text,
        "suggestedActions": ["Look around", "Wait", "Walk on"],
    })
}

#[async_trait]
impl Generator for ScriptedModel {
    async fn generate(&self, request: GenerationRequest) -> Result<Value, ModelError> {
        let stage = request.stage;
        let reply = lock(&self.script)
            .get_mut(&stage)
            .and_then(VecDeque::pop_front);
        let fallback = lock(&self.defaults).get(&stage).cloned();
        lock(&self.calls).push(request);

        match reply {
            Some(Reply::Json(value)) => Ok(value),
            Some(Reply::Fail(err)) => Err(err),
            Some(Reply::Gated { gate, value }) => {
                gate.notified().await;
                Ok(value)
            }
            None => fallback.ok_or_else(|| {
                ModelError::transport(format!("no scripted reply for the {stage} stage"))
            }),
        }
    }
}

/// Test harness for running game scenarios.
pub struct TestHarness {
    /// The scripted model behind the session.
    pub model: Arc<ScriptedModel>,
    /// The session under test.
    pub session: GameSession,
}

impl TestHarness {
    /// Create a harness with a sample character in a blank world.
    pub fn new() -> Self {
        Self::with_config(Self::config())
    }

    /// Session config with instant retries.
    pub fn config() -> SessionConfig {
        let mut config = SessionConfig::default();
        config.pipeline.retry = RetryPolicy::default()
            .with_base_delay(Duration::ZERO)
            .with_max_jitter(Duration::ZERO);
        config
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let character = CharacterData::new("Lan")
            .with_gender("female")
            .with_background("A tea seller from the river town");
        let scenario = Scenario::custom("Test World", "Tester", "");
        let model = Arc::new(ScriptedModel::new());
        let session = GameSession::new(config, model.clone(), character, scenario);
        Self { model, session }
    }

    /// Create a harness that continues from `state`.
    pub fn with_state(state: GameState) -> Self {
        let model = Arc::new(ScriptedModel::new());
        let session = GameSession::resume(Self::config(), model.clone(), state);
        Self { model, session }
    }

    /// Queue the world delta for the next turn.
    pub fn expect_world(&self, delta: WorldDelta) -> &Self {
        self.model.push_world(&delta);
        self
    }

    /// Queue the narration for the next turn.
    pub fn expect_narration(&self, text: &str) -> &Self {
        self.model.push_narration(text);
        self
    }

    /// Queue a dialogue line.
    pub fn expect_dialogue(&self, line: &str) -> &Self {
        self.model.push_dialogue(line);
        self
    }

    /// Send player input, then wait for background work to settle.
    pub async fn act(&self, text: &str) -> Result<TurnResult, TurnError> {
        let result = self.session.player_action(text).await;
        self.settle().await;
        result
    }

    /// Wait for extraction and compaction to finish.
    pub async fn settle(&self) {
        self.session.wait_for_lore_suggestions().await;
        self.session.wait_for_compaction().await;
    }

    pub fn state(&self) -> GameState {
        self.session.state()
    }

    pub fn affinity(&self, npc: &str) -> i32 {
        self.session.with_state(|s| s.affinity.get(npc))
    }

    pub fn has_item(&self, name: &str) -> bool {
        self.session.with_state(|s| s.has_item_named(name))
    }

    pub fn history_len(&self) -> usize {
        self.session.with_state(|s| s.history.len())
    }

    pub fn last_narrative(&self) -> Option<String> {
        self.session
            .with_state(|s| s.last_model_message().map(|m| m.content.clone()))
    }

    pub fn has_suggestion(&self, key: &str) -> bool {
        self.session.with_state(|s| s.lore_suggestions.contains_key(key))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert an NPC's affinity score.
#[track_caller]
pub fn assert_affinity(harness: &TestHarness, npc: &str, expected: i32) {
    let actual = harness.affinity(npc);
    assert_eq!(
        actual, expected,
        "Expected affinity {expected} for '{npc}', got {actual}"
    );
}

/// Assert the inventory holds an item with the given name.
#[track_caller]
pub fn assert_has_item(harness: &TestHarness, name: &str) {
    assert!(
        harness.has_item(name),
        "Expected '{name}' to be in the inventory"
    );
}

/// Assert the inventory holds no item with the given name.
#[track_caller]
pub fn assert_no_item(harness: &TestHarness, name: &str) {
    assert!(
        !harness.has_item(name),
        "Expected '{name}' to NOT be in the inventory"
    );
}

/// Assert the number of history messages.
#[track_caller]
pub fn assert_history_len(harness: &TestHarness, expected: usize) {
    let actual = harness.history_len();
    assert_eq!(
        actual, expected,
        "Expected {expected} history messages, got {actual}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{AffinityUpdate, ItemUpdate};
    use crate::world::ItemCategory;

    #[tokio::test]
    async fn test_scripted_model_basic() {
        let harness = TestHarness::new();
        harness.expect_narration("You stand at the river ferry.");

        let result = harness.act("I look around").await.unwrap();

        assert_eq!(result.narrative, "You stand at the river ferry.");
        assert!(result.world_state_changes.is_empty());
        assert_history_len(&harness, 2);
    }

    #[tokio::test]
    async fn test_scripted_world_delta() {
        let harness = TestHarness::new();
        harness
            .expect_world(WorldDelta {
                affinity_updates: vec![AffinityUpdate {
                    npc_name: "Minh".to_string(),
                    change: 10,
                    reason: "shared tea".to_string(),
                }],
                item_updates: vec![ItemUpdate::add("Lantern", "", ItemCategory::Equipment)],
                ..Default::default()
            })
            .expect_narration("Minh smiles and hands you a lantern.");

        harness.act("I share my tea with Minh").await.unwrap();

        assert_affinity(&harness, "Minh", 10);
        assert_has_item(&harness, "lantern");
        assert_no_item(&harness, "Sword");
    }

    #[tokio::test]
    async fn test_call_log_per_stage() {
        let model = ScriptedModel::new();
        model.push_dialogue("Hello.");
        model.clear_default(Stage::Summary);

        let request = crate::pipeline::PipelineConfig::default().request(
            Stage::Summary,
            String::new(),
            String::new(),
            crate::pipeline::ChapterSummary::as_tool(),
        );
        assert!(model.generate(request).await.is_err());
        assert_eq!(model.call_count(Stage::Summary), 1);
        assert_eq!(model.call_count(Stage::Dialogue), 0);
        assert_eq!(model.total_calls(), 1);
    }
}
