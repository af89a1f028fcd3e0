//! Lore extraction.
//!
//! After a turn, the narrative is scanned for named entities the lorebook
//! does not know yet. Results only ever become suggestions; the player
//! decides what enters the lorebook. Extraction is best effort and never
//! fails a turn.

use crate::lore::normalize_key;
use crate::pipeline::{generate_typed, Generator, LoreCandidate, LoreCandidates, PipelineConfig, Stage};
use std::collections::HashSet;
use tracing::{debug, warn};

const EXTRACTION_INSTRUCTION: &str = include_str!("pipeline/prompts/extraction.txt");

/// Drop candidates that are blank, the player, already known, or repeated
/// within the batch. Keys compare case-insensitively after trimming.
pub fn filter_new_entities<'a>(
    candidates: Vec<LoreCandidate>,
    existing_keys: impl IntoIterator<Item = &'a str>,
    player_name: &str,
) -> Vec<LoreCandidate> {
    let mut seen: HashSet<String> = existing_keys.into_iter().map(normalize_key).collect();
    let player = normalize_key(player_name);

    candidates
        .into_iter()
        .filter_map(|candidate| {
            let key = normalize_key(&candidate.key);
            if key.is_empty() || key == player || !seen.insert(key) {
                return None;
            }
            Some(LoreCandidate {
                key: candidate.key.trim().to_string(),
                value: candidate.value.trim().to_string(),
            })
        })
        .collect()
}

/// Propose lore entries for entities newly named in `narrative`.
///
/// Returns an empty list on any failure.
pub async fn extract_entities(
    model: &dyn Generator,
    config: &PipelineConfig,
    narrative: &str,
    existing_keys: &[String],
    player_name: &str,
) -> Vec<LoreCandidate> {
    let known = if existing_keys.is_empty() {
        "(empty)".to_string()
    } else {
        existing_keys
            .iter()
            .map(|k| format!("- {k}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let system = format!(
        "{EXTRACTION_INSTRUCTION}\nThe player's character is {player_name}.\n\nCURRENT LOREBOOK (for reference, do not extract again):\n{known}"
    );

    let request = config.request(
        Stage::Extraction,
        system,
        narrative.to_string(),
        LoreCandidates::as_tool(),
    );

    match generate_typed::<LoreCandidates>(model, request).await {
        Ok(found) => {
            let total = found.entities.len();
            let fresh = filter_new_entities(
                found.entities,
                existing_keys.iter().map(String::as_str),
                player_name,
            );
            debug!(total, fresh = fresh.len(), "Lore extraction finished");
            fresh
        }
        Err(err) => {
            warn!(error = %err, "Lore extraction failed");
            Vec::new()
        }
    }
}
