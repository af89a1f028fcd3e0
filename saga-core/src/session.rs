//! GameSession - the primary public API for narrative play.
//!
//! Wraps the turn orchestrator, the world-state reducer, memory compaction,
//! lore extraction and persistence behind one handle. Only one turn may be
//! in flight at a time; a turn commits to the game state only after all of
//! its stages succeed. Compaction and extraction run as background tasks
//! that never fail a turn.

use crate::context::ContextConfig;
use crate::error::ValidationError;
use crate::extraction::extract_entities;
use crate::lore::LoreId;
use crate::memory::{commit_summary, summarize, CompactionConfig, MemoryCompactor};
use crate::persist::{PersistError, SaveSlot};
use crate::pipeline::{
    ClaudeModel, Generator, ModelError, PipelineConfig, ResilientModel, StageError,
    TurnOrchestrator, TurnResult,
};
use crate::reducer::{self, DEFAULT_MINUTES_PER_TURN};
use crate::scenario::Scenario;
use crate::world::{
    CharacterData, EquipmentSlot, GameClock, GameState, GoalId, HistoryMessage, ItemId,
    LastTurnInfo, MessageId, MessageRole, DEFAULT_START_MINUTES,
};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Errors from player actions.
#[derive(Debug, Clone, Error)]
pub enum TurnError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("A turn is already in progress")]
    TurnInFlight,
}

impl TurnError {
    /// Whether the credential was rejected and must be re-entered.
    pub fn is_auth(&self) -> bool {
        matches!(self, TurnError::Stage(e) if e.is_auth())
    }
}

/// Errors from GameSession setup and persistence.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Turn failed: {0}")]
    Turn(#[from] TurnError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("No API key configured - set ANTHROPIC_API_KEY environment variable")]
    NoApiKey,
}

/// Configuration for a game session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub pipeline: PipelineConfig,
    pub context: ContextConfig,
    pub compaction: CompactionConfig,

    /// Item the player must carry to propose.
    pub ring_item_name: String,

    /// Minutes a turn takes when the world stage does not say.
    pub default_minutes_per_turn: u32,

    /// Clock value a new game starts at.
    pub start_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            context: ContextConfig::default(),
            compaction: CompactionConfig::default(),
            ring_item_name: "grass ring".to_string(),
            default_minutes_per_turn: DEFAULT_MINUTES_PER_TURN,
            start_minutes: DEFAULT_START_MINUTES,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_context(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }

    pub fn with_compaction_threshold(mut self, threshold: u32) -> Self {
        self.compaction = self.compaction.with_threshold(threshold);
        self
    }

    pub fn with_ring_item(mut self, name: impl Into<String>) -> Self {
        self.ring_item_name = name.into();
        self
    }

    pub fn with_default_minutes(mut self, minutes: u32) -> Self {
        self.default_minutes_per_turn = minutes;
        self
    }

    pub fn with_start_minutes(mut self, minutes: u64) -> Self {
        self.start_minutes = minutes;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnKind {
    /// First turn: replaces history.
    Opening,
    /// A player action: records the player's message.
    Action,
    /// Replays the last turn in place of its model message.
    Regenerate,
}

/// Everything needed to run, and re-run, one turn.
#[derive(Debug, Clone)]
struct PendingTurn {
    kind: TurnKind,
    prompt: String,
    previous_world_update: Option<String>,
    /// Inventory item handed over as part of this turn.
    consumed_item: Option<ItemId>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build the live Claude generator, reporting a missing or rejected key as
/// [`SessionError::NoApiKey`].
pub(crate) fn claude_from_env() -> Result<ClaudeModel, SessionError> {
    ClaudeModel::from_env().map_err(session_error_from_model)
}

fn session_error_from_model(err: ModelError) -> SessionError {
    if err.is_auth() {
        SessionError::NoApiKey
    } else {
        SessionError::Model(err)
    }
}

/// A narrative game session.
pub struct GameSession {
    config: SessionConfig,
    model: Arc<dyn Generator>,
    orchestrator: TurnOrchestrator,
    compactor: MemoryCompactor,
    state: Arc<Mutex<GameState>>,
    turn_lock: tokio::sync::Mutex<()>,
    failed_turn: Mutex<Option<PendingTurn>>,
    extraction: Mutex<Option<JoinHandle<()>>>,
    compaction: Mutex<Option<JoinHandle<()>>>,
    /// Bumped when the story restarts. Background work from an older
    /// generation is discarded.
    generation: Arc<AtomicU64>,
    notices: Arc<Mutex<Vec<String>>>,
}

impl GameSession {
    /// Create a session for a new game.
    ///
    /// `model` is wrapped with the configured retry policy.
    pub fn new(
        config: SessionConfig,
        model: Arc<dyn Generator>,
        character: CharacterData,
        scenario: Scenario,
    ) -> Self {
        let state = GameState::new(character, scenario)
            .with_clock(GameClock::new(config.start_minutes));
        Self::resume(config, model, state)
    }

    /// Create a session backed by the Claude API.
    ///
    /// Requires `ANTHROPIC_API_KEY` environment variable to be set.
    pub fn from_env(
        config: SessionConfig,
        character: CharacterData,
        scenario: Scenario,
    ) -> Result<Self, SessionError> {
        let model = claude_from_env()?;
        Ok(Self::new(config, Arc::new(model), character, scenario))
    }

    /// Continue an existing game.
    pub fn resume(config: SessionConfig, model: Arc<dyn Generator>, state: GameState) -> Self {
        let model: Arc<dyn Generator> =
            Arc::new(ResilientModel::new(model, config.pipeline.retry));
        let orchestrator =
            TurnOrchestrator::new(model.clone(), config.pipeline.clone(), config.context);
        let compactor = MemoryCompactor::new(config.compaction);

        Self {
            config,
            model,
            orchestrator,
            compactor,
            state: Arc::new(Mutex::new(state)),
            turn_lock: tokio::sync::Mutex::new(()),
            failed_turn: Mutex::new(None),
            extraction: Mutex::new(None),
            compaction: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
            notices: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Load a saved game from a JSON file.
    pub async fn load(
        config: SessionConfig,
        model: Arc<dyn Generator>,
        path: impl AsRef<Path>,
    ) -> Result<Self, SessionError> {
        let slot = SaveSlot::load_json(path).await?;
        Ok(Self::resume(config, model, slot.game_state))
    }

    /// Continue a game exported with [`export_json`](Self::export_json).
    pub fn import_json(
        config: SessionConfig,
        model: Arc<dyn Generator>,
        json: &str,
    ) -> Result<Self, SessionError> {
        let slot = SaveSlot::from_json_string(json)?;
        Ok(Self::resume(config, model, slot.game_state))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ========================================================================
    // State access
    // ========================================================================

    /// A snapshot of the current game state.
    pub fn state(&self) -> GameState {
        lock(&self.state).clone()
    }

    /// Read the game state without cloning it.
    pub fn with_state<R>(&self, f: impl FnOnce(&GameState) -> R) -> R {
        f(&lock(&self.state))
    }

    pub fn clock_display(&self) -> String {
        self.with_state(|s| s.clock.display())
    }

    pub fn is_turn_in_flight(&self) -> bool {
        self.turn_lock.try_lock().is_err()
    }

    pub fn is_compacting(&self) -> bool {
        self.compactor.is_in_flight()
    }

    /// Drain non-fatal status lines (for example a failed compaction).
    pub fn take_notices(&self) -> Vec<String> {
        std::mem::take(&mut *lock(&self.notices))
    }

    // ========================================================================
    // Turns
    // ========================================================================

    /// Generate the opening of the story.
    ///
    /// Uses `opening` if given, otherwise the scenario's opening for the
    /// current character. On success the history holds only the opening.
    pub async fn start_story(&self, opening: Option<&str>) -> Result<TurnResult, TurnError> {
        let prompt = match opening {
            Some(text) if !text.trim().is_empty() => text.trim().to_string(),
            Some(_) => return Err(ValidationError::EmptyInput.into()),
            None => self.with_state(|s| s.scenario.opening_prompt_for(&s.character)),
        };
        self.execute(PendingTurn {
            kind: TurnKind::Opening,
            prompt,
            previous_world_update: None,
            consumed_item: None,
        })
        .await
    }

    /// Process a free-text player action.
    pub async fn player_action(&self, text: &str) -> Result<TurnResult, TurnError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyInput.into());
        }
        self.action(text.to_string(), None).await
    }

    /// Discard the last model message and replay the turn that produced it.
    pub async fn regenerate(&self) -> Result<TurnResult, TurnError> {
        let last = self
            .with_state(|s| s.last_turn.clone())
            .ok_or(ValidationError::NoTurnToRegenerate)?;
        self.execute(PendingTurn {
            kind: TurnKind::Regenerate,
            prompt: last.prompt,
            previous_world_update: last.previous_world_update,
            consumed_item: None,
        })
        .await
    }

    /// Run the last failed turn again from scratch.
    pub async fn retry(&self) -> Result<TurnResult, TurnError> {
        let pending = lock(&self.failed_turn)
            .clone()
            .ok_or(ValidationError::NothingToRetry)?;
        self.execute(pending).await
    }

    /// Confess feelings to an NPC.
    pub async fn confess(&self, npc: &str) -> Result<TurnResult, TurnError> {
        self.action(
            format!(
                "I gather all my courage, confess my feelings and ask {npc} to start dating me."
            ),
            None,
        )
        .await
    }

    /// Propose to the NPC the player is dating. Requires the ring item.
    pub async fn propose(&self, npc: &str) -> Result<TurnResult, TurnError> {
        let ring = self.config.ring_item_name.clone();
        self.with_state(|s| {
            if !s.relationship.is_dating(npc) {
                return Err(ValidationError::NotDating {
                    npc: npc.to_string(),
                });
            }
            if !s.has_item_named(&ring) {
                return Err(ValidationError::MissingItem { item: ring.clone() });
            }
            Ok(())
        })?;
        self.action(
            format!("I take out a {ring} and propose to {npc}, the one I have been dating."),
            None,
        )
        .await
    }

    /// Strike up a conversation with a companion.
    pub async fn chat_with(&self, npc: &str) -> Result<TurnResult, TurnError> {
        self.require_companion(npc)?;
        self.action(
            format!("I start a friendly, easy conversation with {npc}."),
            None,
        )
        .await
    }

    /// Give an inventory item to a companion. The item leaves the inventory
    /// when the turn succeeds.
    pub async fn give_gift(&self, npc: &str, item_id: ItemId) -> Result<TurnResult, TurnError> {
        self.require_companion(npc)?;
        let item_name = self
            .with_state(|s| s.inventory_item(item_id).map(|i| i.name.clone()))
            .ok_or(ValidationError::ItemNotFound { id: item_id })?;
        self.action(
            format!("I take the {item_name} from my bag and give it to {npc}."),
            Some(item_id),
        )
        .await
    }

    fn require_companion(&self, npc: &str) -> Result<(), ValidationError> {
        if self.with_state(|s| s.is_companion(npc)) {
            Ok(())
        } else {
            Err(ValidationError::NotACompanion {
                npc: npc.to_string(),
            })
        }
    }

    async fn action(
        &self,
        prompt: String,
        consumed_item: Option<ItemId>,
    ) -> Result<TurnResult, TurnError> {
        let previous_world_update = self.with_state(|s| s.off_screen_update.clone());
        self.execute(PendingTurn {
            kind: TurnKind::Action,
            prompt,
            previous_world_update,
            consumed_item,
        })
        .await
    }

    async fn execute(&self, turn: PendingTurn) -> Result<TurnResult, TurnError> {
        let _turn = self
            .turn_lock
            .try_lock()
            .map_err(|_| TurnError::TurnInFlight)?;

        // A new turn supersedes any extraction still running for the last one.
        if let Some(handle) = lock(&self.extraction).take() {
            handle.abort();
        }

        let mut snapshot = self.state();
        if turn.kind == TurnKind::Regenerate {
            if let Some(MessageRole::Model) = snapshot.history.last().map(|m| m.role) {
                snapshot.history.pop();
            }
        }
        if let Some(id) = turn.consumed_item {
            snapshot.inventory.retain(|i| i.id != id);
        }

        let outcome = match turn.kind {
            TurnKind::Opening => {
                self.orchestrator
                    .run_opening_turn(&turn.prompt, &snapshot)
                    .await
            }
            TurnKind::Action | TurnKind::Regenerate => {
                self.orchestrator
                    .run_turn(
                        &turn.prompt,
                        turn.previous_world_update.as_deref(),
                        &snapshot,
                    )
                    .await
            }
        };

        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                error!(stage = %err.stage, error = %err.source, "Turn aborted");
                *lock(&self.failed_turn) = Some(turn);
                return Err(err.into());
            }
        };

        *lock(&self.failed_turn) = None;
        self.commit(&turn, &result);
        Ok(result)
    }

    /// Fold a successful turn into the game state and start background work.
    fn commit(&self, turn: &PendingTurn, result: &TurnResult) {
        let mut state = lock(&self.state);

        match turn.kind {
            TurnKind::Opening => {
                self.restart_background();
                state.history.clear();
                state.lore_suggestions.dismiss_all();
                state.turns_since_compaction = 0;
            }
            TurnKind::Action => {
                state.history.push(HistoryMessage::player(&turn.prompt));
            }
            TurnKind::Regenerate => {
                if let Some(MessageRole::Model) = state.history.last().map(|m| m.role) {
                    state.history.pop();
                }
                state.turns_since_compaction = state.turns_since_compaction.saturating_sub(1);
            }
        }
        state.history.push(result.to_message());

        if let Some(id) = turn.consumed_item {
            state.inventory.retain(|i| i.id != id);
        }

        reducer::apply_world_delta_with_default(
            &mut state,
            &result.world_state_changes,
            self.config.default_minutes_per_turn,
        );
        state.suggested_actions = result.suggested_actions.clone();
        state.last_turn = Some(LastTurnInfo {
            prompt: turn.prompt.clone(),
            previous_world_update: turn.previous_world_update.clone(),
        });
        state.turns_since_compaction += 1;

        info!(
            turns_since_compaction = state.turns_since_compaction,
            clock = %state.clock,
            "Turn committed"
        );

        self.spawn_extraction(&state, &result.narrative);
        self.spawn_compaction(&state);
    }

    fn spawn_extraction(&self, state: &GameState, narrative: &str) {
        let mut known: Vec<String> = state.lorebook.keys().map(str::to_string).collect();
        known.extend(state.lore_suggestions.keys().map(str::to_string));
        let player = state.character.name.clone();
        let narrative = narrative.to_string();
        let model = self.model.clone();
        let pipeline = self.config.pipeline.clone();
        let shared = self.state.clone();
        let current = self.generation.clone();
        let generation = current.load(Ordering::Acquire);

        let handle = tokio::spawn(async move {
            let found = extract_entities(model.as_ref(), &pipeline, &narrative, &known, &player).await;
            if found.is_empty() {
                return;
            }
            let mut state = lock(&shared);
            if current.load(Ordering::Acquire) != generation {
                return;
            }
            for candidate in found {
                // The lorebook may have changed while extraction ran.
                if !state.lorebook.contains_key(&candidate.key) {
                    state.lore_suggestions.push(candidate.key, candidate.value);
                }
            }
        });

        if let Some(previous) = lock(&self.extraction).replace(handle) {
            previous.abort();
        }
    }

    fn spawn_compaction(&self, state: &GameState) {
        let Some(guard) = self.compactor.try_begin(state) else {
            return;
        };
        let window = self.compactor.window(state);
        let covered = state.turns_since_compaction;
        let character = state.character.clone();
        let model = self.model.clone();
        let pipeline = self.config.pipeline.clone();
        let shared = self.state.clone();
        let notices = self.notices.clone();
        let current = self.generation.clone();
        let generation = current.load(Ordering::Acquire);

        info!(messages = window.len(), "Compacting memory");
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let outcome = summarize(model.as_ref(), &pipeline, &character, &window).await;
            let mut state = lock(&shared);
            if current.load(Ordering::Acquire) != generation {
                info!("Story restarted, dropping stale summary");
                return;
            }
            match outcome {
                Ok(summary) => {
                    let key = commit_summary(&mut state, summary, covered);
                    info!(key = %key, "Chapter summary stored");
                }
                Err(err) => {
                    warn!(error = %err, "Memory compaction failed");
                    lock(&notices).push(format!(
                        "Could not summarize the story so far ({err}). Will try again next turn."
                    ));
                }
            }
        });
        *lock(&self.compaction) = Some(handle);
    }

    /// Invalidate and stop background work started for the old story.
    ///
    /// Callers hold the state lock, so no stale task can commit after this.
    fn restart_background(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.abort_background();
    }

    fn abort_background(&self) {
        for slot in [&self.extraction, &self.compaction] {
            if let Some(handle) = lock(slot).take() {
                handle.abort();
            }
        }
    }

    /// Wait for the running lore extraction, if any, to finish.
    pub async fn wait_for_lore_suggestions(&self) {
        let handle = lock(&self.extraction).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Wait for the running compaction, if any, to finish.
    pub async fn wait_for_compaction(&self) {
        let handle = lock(&self.compaction).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    // ========================================================================
    // Direct player actions
    // ========================================================================

    /// Apply a direct edit. Rejected while a turn is in flight.
    fn mutate<R>(&self, f: impl FnOnce(&mut GameState) -> R) -> Result<R, TurnError> {
        let _turn = self
            .turn_lock
            .try_lock()
            .map_err(|_| TurnError::TurnInFlight)?;
        Ok(f(&mut lock(&self.state)))
    }

    pub fn equip(&self, item_id: ItemId) -> Result<EquipmentSlot, TurnError> {
        self.mutate(|s| reducer::equip(s, item_id))?
            .map_err(TurnError::from)
    }

    pub fn unequip(&self, slot: EquipmentSlot) -> Result<Option<ItemId>, TurnError> {
        self.mutate(|s| reducer::unequip(s, slot))
    }

    pub fn add_lore(&self, key: &str, value: &str) -> Result<LoreId, TurnError> {
        if key.trim().is_empty() {
            return Err(ValidationError::EmptyInput.into());
        }
        self.mutate(|s| s.lorebook.add(key.trim(), value))
    }

    pub fn update_lore(&self, id: LoreId, key: &str, value: &str) -> Result<bool, TurnError> {
        if key.trim().is_empty() {
            return Err(ValidationError::EmptyInput.into());
        }
        self.mutate(|s| s.lorebook.update(id, key.trim(), value))
    }

    pub fn remove_lore(&self, id: LoreId) -> Result<bool, TurnError> {
        self.mutate(|s| s.lorebook.remove(id).is_some())
    }

    pub fn accept_suggestion(&self, id: LoreId) -> Result<Option<LoreId>, TurnError> {
        self.mutate(|s| {
            let GameState {
                lorebook,
                lore_suggestions,
                ..
            } = s;
            lorebook.accept(lore_suggestions, id)
        })
    }

    pub fn dismiss_suggestion(&self, id: LoreId) -> Result<bool, TurnError> {
        self.mutate(|s| s.lore_suggestions.dismiss(id))
    }

    pub fn dismiss_all_suggestions(&self) -> Result<usize, TurnError> {
        self.mutate(|s| s.lore_suggestions.dismiss_all())
    }

    pub fn add_goal(&self, text: &str) -> Result<GoalId, TurnError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyInput.into());
        }
        self.mutate(|s| s.add_goal(text.trim()))
    }

    pub fn toggle_goal(&self, id: GoalId) -> Result<bool, TurnError> {
        self.mutate(|s| s.toggle_goal(id))
    }

    pub fn remove_goal(&self, id: GoalId) -> Result<bool, TurnError> {
        self.mutate(|s| s.remove_goal(id))
    }

    pub fn set_nsfw(&self, enabled: bool) -> Result<(), TurnError> {
        self.mutate(|s| s.nsfw = enabled)
    }

    pub fn edit_message(&self, id: MessageId, content: &str) -> Result<bool, TurnError> {
        self.mutate(|s| s.edit_message(id, content))
    }

    /// Throw away all progress, keeping the persona and scenario.
    pub fn reset(&self) -> Result<(), TurnError> {
        let start = GameClock::new(self.config.start_minutes);
        self.mutate(|s| {
            self.restart_background();
            s.reset();
            s.clock = start;
        })?;
        lock(&self.failed_turn).take();
        Ok(())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Save the game to a JSON file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        SaveSlot::new(self.state()).save_json(path).await
    }

    /// Export the game as a JSON string.
    pub fn export_json(&self) -> Result<String, PersistError> {
        SaveSlot::new(self.state()).to_json_string()
    }
}

impl Drop for GameSession {
    fn drop(&mut self) {
        self.abort_background();
    }
}
