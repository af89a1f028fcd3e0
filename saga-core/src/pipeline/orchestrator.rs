//! Three-stage turn orchestration.
//!
//! World, narration and dialogue run strictly in sequence, each feeding the
//! next. The orchestrator only reads game state; committing the result is
//! the caller's job, so a failure at any stage leaves nothing behind.

use super::client::{generate_typed, Generator, ModelError};
use super::narrative::NarrativeDraft;
use super::schema::{DialogueLine, NarrationOutput, WorldDelta};
use super::{PipelineConfig, Stage};
use crate::context::{assemble_context, ContextConfig};
use crate::world::{affinity_tier, GameState, HistoryMessage, MessageRole};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Upper bound on suggested actions kept from the narration stage.
const MAX_SUGGESTED_ACTIONS: usize = 5;

/// A stage failed and the turn was aborted.
#[derive(Debug, Clone, Error)]
#[error("{stage} stage failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    pub source: ModelError,
}

impl StageError {
    pub fn is_auth(&self) -> bool {
        self.source.is_auth()
    }
}

/// Who speaks last in a turn's narrative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Speaker {
    Narrator,
    Character(String),
}

impl Speaker {
    pub fn name(&self) -> Option<&str> {
        match self {
            Speaker::Narrator => None,
            Speaker::Character(name) => Some(name),
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::Narrator => f.write_str("Narrator"),
            Speaker::Character(name) => f.write_str(name),
        }
    }
}

/// Output of one successful turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    /// Narrative with every dialogue slot filled.
    pub narrative: String,
    pub speaker: Speaker,
    /// Stage that produced the final text.
    pub origin: Stage,
    pub suggested_actions: Vec<String>,
    pub world_state_changes: WorldDelta,
}

impl TurnResult {
    /// The history entry this result is recorded as.
    pub fn to_message(&self) -> HistoryMessage {
        HistoryMessage::model(
            self.narrative.clone(),
            self.speaker.name().map(str::to_string),
            self.origin,
        )
    }
}

/// Runs the world, narration and dialogue stages for a turn.
pub struct TurnOrchestrator {
    model: Arc<dyn Generator>,
    config: PipelineConfig,
    context: ContextConfig,
}

impl TurnOrchestrator {
    pub fn new(model: Arc<dyn Generator>, config: PipelineConfig, context: ContextConfig) -> Self {
        Self {
            model,
            config,
            context,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn context_config(&self) -> &ContextConfig {
        &self.context
    }

    /// Run a full turn against `state`.
    pub async fn run_turn(
        &self,
        player_text: &str,
        previous_world_update: Option<&str>,
        state: &GameState,
    ) -> Result<TurnResult, StageError> {
        info!(chars = player_text.len(), "Turn started");

        let delta = self
            .world_stage(player_text, previous_world_update, state)
            .await
            .map_err(|source| StageError {
                stage: Stage::World,
                source,
            })?;

        let narration = self
            .narration_stage(player_text, &delta, state)
            .await
            .map_err(|source| StageError {
                stage: Stage::Narration,
                source,
            })?;

        let mut draft = NarrativeDraft::parse(&narration.narrative);
        let slots = draft.slot_count();
        if slots > 0 {
            self.dialogue_stage(player_text, &mut draft, state)
                .await
                .map_err(|source| StageError {
                    stage: Stage::Dialogue,
                    source,
                })?;
        }

        let (speaker, origin) = match draft.last_filled_speaker() {
            Some(name) => (Speaker::Character(name.to_string()), Stage::Dialogue),
            None => (Speaker::Narrator, Stage::Narration),
        };

        let mut suggested_actions: Vec<String> = narration
            .suggested_actions
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        suggested_actions.truncate(MAX_SUGGESTED_ACTIONS);

        info!(
            speaker = %speaker,
            origin = %origin,
            placeholders = slots,
            "Turn finished"
        );

        Ok(TurnResult {
            narrative: draft.render(),
            speaker,
            origin,
            suggested_actions,
            world_state_changes: delta,
        })
    }

    /// Run the opening turn. Sees only the persona, scenario, clock and
    /// content policy of `state`.
    pub async fn run_opening_turn(
        &self,
        opening_prompt: &str,
        state: &GameState,
    ) -> Result<TurnResult, StageError> {
        let clean = state.opening_view();
        self.run_turn(opening_prompt, None, &clean).await
    }

    async fn world_stage(
        &self,
        player_text: &str,
        previous_world_update: Option<&str>,
        state: &GameState,
    ) -> Result<WorldDelta, ModelError> {
        let system = assemble_context(
            &state.scenario.world_instruction,
            state,
            player_text,
            &self.context,
        );

        let mut prompt = self.recent_story(state);
        prompt.push_str(&format!(
            "Previous off-screen update: {}\n",
            previous_world_update.unwrap_or("none")
        ));
        if !state.affinity.is_empty() {
            let scores: Vec<_> = state
                .affinity
                .iter()
                .map(|(npc, score)| format!("{npc}: {score}"))
                .collect();
            prompt.push_str(&format!("Current affinity: {}\n", scores.join(", ")));
        }
        if !state.companions.is_empty() {
            prompt.push_str(&format!(
                "Current companions: {}\n",
                state.companions.join(", ")
            ));
        }
        prompt.push_str(&format!("Player action: {player_text}"));

        let request = self
            .config
            .request(Stage::World, system, prompt, WorldDelta::as_tool());
        generate_typed(self.model.as_ref(), request).await
    }

    async fn narration_stage(
        &self,
        player_text: &str,
        delta: &WorldDelta,
        state: &GameState,
    ) -> Result<NarrationOutput, ModelError> {
        let system = assemble_context(
            &state.scenario.storyteller_instruction,
            state,
            player_text,
            &self.context,
        );

        let mut prompt = self.recent_story(state);
        if let Some(update) = &delta.off_screen_world_update {
            prompt.push_str(&format!("Off-screen update from the World-Smith: {update}\n"));
        }
        prompt.push_str(&format!("Player action: {player_text}"));

        let request =
            self.config
                .request(Stage::Narration, system, prompt, NarrationOutput::as_tool());
        generate_typed(self.model.as_ref(), request).await
    }

    /// Fill every slot in narrative order, one call each. Each call sees the
    /// lines already written.
    async fn dialogue_stage(
        &self,
        player_text: &str,
        draft: &mut NarrativeDraft,
        state: &GameState,
    ) -> Result<(), ModelError> {
        while let Some((index, speaker)) = draft.next_unfilled() {
            let speaker = speaker.to_string();
            let passage = draft.render_for_slot(index);
            debug!(speaker = %speaker, slot = index, "Writing dialogue line");

            let relevance = format!("{player_text}\n{passage}");
            let system = assemble_context(
                &state.scenario.character_instruction,
                state,
                &relevance,
                &self.context,
            );

            let score = state.affinity.get(&speaker);
            let prompt = format!(
                "Character: {speaker}\n\
                 {speaker}'s feeling toward me: {score} ({tier})\n\
                 Player action: {player_text}\n\n\
                 Story so far, with the line to write marked:\n{passage}",
                tier = affinity_tier(score),
            );

            let request =
                self.config
                    .request(Stage::Dialogue, system, prompt, DialogueLine::as_tool());
            let line: DialogueLine = generate_typed(self.model.as_ref(), request).await?;
            draft.fill(index, line.dialogue);
        }
        Ok(())
    }

    fn recent_story(&self, state: &GameState) -> String {
        let recent = state.recent_history(self.context.recent_history);
        if recent.is_empty() {
            return String::new();
        }
        let mut story = String::from("Recent story:\n");
        for message in recent {
            let who = match message.role {
                MessageRole::Player => "Me",
                MessageRole::Model => "Story",
            };
            story.push_str(&format!("{who}: {}\n", message.content));
        }
        story.push('\n');
        story
    }
}
