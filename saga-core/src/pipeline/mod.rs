//! Multi-stage generation pipeline.
//!
//! A player turn runs three dependent model calls (world, narration,
//! dialogue) through a [`Generator`]. Chapter summaries and lore extraction
//! use the same client with their own stages.

mod client;
pub mod narrative;
mod orchestrator;
pub mod schema;

pub use client::{
    extract_json, generate_typed, ClaudeModel, GenerationRequest, Generator, ModelError,
    ModelErrorKind, ResilientModel, RetryPolicy,
};
pub use narrative::{NarrativeDraft, Segment};
pub use orchestrator::{Speaker, StageError, TurnOrchestrator, TurnResult};
pub use schema::{
    AffinityUpdate, ChapterSummary, DatingUpdate, DialogueLine, ItemAction, ItemPayload,
    ItemUpdate, LoreCandidate, LoreCandidates, MarriageUpdate, NarrationOutput, PregnancyUpdate,
    Validate, WorldDelta,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default model for the story stages.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Default model for summaries and extraction (fast and cheap).
pub const DEFAULT_UTILITY_MODEL: &str = "claude-3-5-haiku-20241022";

/// One kind of model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    World,
    Narration,
    Dialogue,
    Summary,
    Extraction,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::World => "world",
            Stage::Narration => "narration",
            Stage::Dialogue => "dialogue",
            Stage::Summary => "summary",
            Stage::Extraction => "extraction",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for the generation pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Model for the world stage.
    pub world_model: String,

    /// Model for the narration stage.
    pub narration_model: String,

    /// Model for the dialogue stage.
    pub dialogue_model: String,

    /// Model for chapter summaries and lore extraction.
    pub utility_model: String,

    /// Maximum tokens per response.
    pub max_tokens: usize,

    /// Temperature for the story stages. Utility stages always run at 0.
    pub temperature: Option<f32>,

    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            world_model: DEFAULT_MODEL.to_string(),
            narration_model: DEFAULT_MODEL.to_string(),
            dialogue_model: DEFAULT_MODEL.to_string(),
            utility_model: DEFAULT_UTILITY_MODEL.to_string(),
            max_tokens: 2048,
            temperature: Some(0.8),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Use one model for every story stage.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.world_model = model.clone();
        self.narration_model = model.clone();
        self.dialogue_model = model;
        self
    }

    pub fn with_utility_model(mut self, model: impl Into<String>) -> Self {
        self.utility_model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model_for(&self, stage: Stage) -> &str {
        match stage {
            Stage::World => &self.world_model,
            Stage::Narration => &self.narration_model,
            Stage::Dialogue => &self.dialogue_model,
            Stage::Summary | Stage::Extraction => &self.utility_model,
        }
    }

    pub fn temperature_for(&self, stage: Stage) -> Option<f32> {
        match stage {
            Stage::Summary | Stage::Extraction => Some(0.0),
            _ => self.temperature,
        }
    }

    /// Build a generation request for one stage.
    pub fn request(
        &self,
        stage: Stage,
        system: String,
        prompt: String,
        schema: claude::Tool,
    ) -> GenerationRequest {
        GenerationRequest {
            stage,
            model: self.model_for(stage).to_string(),
            system,
            prompt,
            schema,
            max_tokens: self.max_tokens,
            temperature: self.temperature_for(stage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_routing() {
        let config = PipelineConfig::default()
            .with_model("story-model")
            .with_utility_model("cheap-model");
        assert_eq!(config.model_for(Stage::World), "story-model");
        assert_eq!(config.model_for(Stage::Dialogue), "story-model");
        assert_eq!(config.model_for(Stage::Summary), "cheap-model");
        assert_eq!(config.model_for(Stage::Extraction), "cheap-model");
    }

    #[test]
    fn test_utility_stages_are_deterministic() {
        let config = PipelineConfig::default().with_temperature(1.0);
        assert_eq!(config.temperature_for(Stage::Narration), Some(1.0));
        assert_eq!(config.temperature_for(Stage::Summary), Some(0.0));
    }

    #[test]
    fn test_request_carries_stage_settings() {
        let config = PipelineConfig::default().with_max_tokens(512);
        let request = config.request(
            Stage::Dialogue,
            "system".to_string(),
            "prompt".to_string(),
            DialogueLine::as_tool(),
        );
        assert_eq!(request.stage, Stage::Dialogue);
        assert_eq!(request.max_tokens, 512);
        assert_eq!(request.schema.name, "speak");
    }
}
