//! Narrative text with dialogue slots.
//!
//! The narration stage marks every spoken line with a placeholder such as
//! `[DIALOGUE:"Thị Nở"]`. Parsing turns the text into a sequence of
//! [`Segment`]s so each slot can be filled independently, in order, without
//! string replacement. Placeholders that do not parse stay as plain text.

use serde::{Deserialize, Serialize};

const TAG: &str = "dialogue";
const QUOTES: &[char] = &['"', '\'', '“', '”', '‘', '’', '«', '»'];

/// Marker shown in place of the slot currently being written.
const TARGET_MARKER: &str = "<<LINE TO WRITE>>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    Text(String),
    Dialogue {
        speaker: String,
        line: Option<String>,
    },
}

/// A parsed narrative whose dialogue slots may be partially filled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeDraft {
    segments: Vec<Segment>,
}

impl NarrativeDraft {
    pub fn parse(text: &str) -> Self {
        let mut segments = Vec::new();
        let mut buffer = String::new();
        let mut rest = text;

        while let Some(open) = rest.find('[') {
            buffer.push_str(&rest[..open]);
            let candidate = &rest[open..];
            match parse_placeholder(candidate) {
                Some((speaker, consumed)) => {
                    if !buffer.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut buffer)));
                    }
                    segments.push(Segment::Dialogue {
                        speaker,
                        line: None,
                    });
                    rest = &candidate[consumed..];
                }
                None => {
                    buffer.push('[');
                    rest = &candidate[1..];
                }
            }
        }
        buffer.push_str(rest);
        if !buffer.is_empty() {
            segments.push(Segment::Text(buffer));
        }

        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of dialogue slots, filled or not.
    pub fn slot_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Dialogue { .. }))
            .count()
    }

    pub fn has_slots(&self) -> bool {
        self.slot_count() > 0
    }

    /// Segment index and speaker of the first unfilled slot.
    pub fn next_unfilled(&self) -> Option<(usize, &str)> {
        self.segments
            .iter()
            .enumerate()
            .find_map(|(index, segment)| match segment {
                Segment::Dialogue {
                    speaker,
                    line: None,
                } => Some((index, speaker.as_str())),
                _ => None,
            })
    }

    /// Fill the slot at `index`. Returns false if it is not a dialogue slot.
    pub fn fill(&mut self, index: usize, text: impl Into<String>) -> bool {
        match self.segments.get_mut(index) {
            Some(Segment::Dialogue { line, .. }) => {
                *line = Some(text.into());
                true
            }
            _ => false,
        }
    }

    /// Speaker of the last filled slot, in narrative order.
    pub fn last_filled_speaker(&self) -> Option<&str> {
        self.segments.iter().rev().find_map(|segment| match segment {
            Segment::Dialogue {
                speaker,
                line: Some(_),
            } => Some(speaker.as_str()),
            _ => None,
        })
    }

    /// Render to text. Filled slots become quoted lines; unfilled slots keep
    /// their placeholder.
    pub fn render(&self) -> String {
        self.render_with_target(None)
    }

    /// Render with the slot at `index` replaced by a marker, for asking the
    /// model to write exactly that line.
    pub fn render_for_slot(&self, index: usize) -> String {
        self.render_with_target(Some(index))
    }

    fn render_with_target(&self, target: Option<usize>) -> String {
        let mut out = String::new();
        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Dialogue { speaker, .. } if Some(index) == target => {
                    out.push_str(&format!("{TARGET_MARKER} ({speaker})"));
                }
                Segment::Dialogue {
                    line: Some(line), ..
                } => {
                    out.push('"');
                    out.push_str(line.trim().trim_matches(QUOTES));
                    out.push('"');
                }
                Segment::Dialogue {
                    speaker,
                    line: None,
                } => out.push_str(&placeholder(speaker)),
            }
        }
        out
    }
}

/// The canonical placeholder for a speaker.
pub fn placeholder(speaker: &str) -> String {
    format!("[DIALOGUE:\"{speaker}\"]")
}

/// Parse a placeholder at the start of `s` (which begins with `[`).
///
/// Returns the speaker and the number of bytes consumed.
fn parse_placeholder(s: &str) -> Option<(String, usize)> {
    let body = s.strip_prefix('[')?;
    let close = body.find(']')?;
    let inner = &body[..close];
    let (tag, name) = inner.split_once(':')?;
    if !tag.trim().eq_ignore_ascii_case(TAG) {
        return None;
    }
    let name = name.trim().trim_matches(QUOTES).trim();
    if name.is_empty() || name.contains('[') {
        return None;
    }
    Some((name.to_string(), close + 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_without_placeholders() {
        let draft = NarrativeDraft::parse("The river is quiet tonight.");
        assert_eq!(draft.slot_count(), 0);
        assert_eq!(draft.render(), "The river is quiet tonight.");
    }

    #[test]
    fn test_parse_placeholders_in_order() {
        let draft = NarrativeDraft::parse(
            "Thị Nở hesitates, then says [DIALOGUE:\"Thị Nở\"]. Bá Kiến laughs [dialogue: “Bá Kiến”]",
        );
        assert_eq!(draft.slot_count(), 2);
        assert_eq!(draft.next_unfilled().map(|(_, s)| s), Some("Thị Nở"));
        assert_eq!(
            draft.segments().last(),
            Some(&Segment::Dialogue {
                speaker: "Bá Kiến".to_string(),
                line: None
            })
        );
    }

    #[test]
    fn test_unquoted_name_is_accepted() {
        let draft = NarrativeDraft::parse("She says [DIALOGUE:Lan]");
        assert_eq!(draft.next_unfilled().map(|(_, s)| s), Some("Lan"));
    }

    #[test]
    fn test_malformed_placeholders_stay_text() {
        let text = "A [note] and [DIALOGUE:\"\"] and [DIALOGUE:\"Lan\" unclosed";
        let draft = NarrativeDraft::parse(text);
        assert_eq!(draft.slot_count(), 0);
        assert_eq!(draft.render(), text);
    }

    #[test]
    fn test_fill_and_render() {
        let mut draft = NarrativeDraft::parse("He says [DIALOGUE:\"Minh\"] and she answers [DIALOGUE:\"Lan\"].");

        let (first, speaker) = draft.next_unfilled().unwrap();
        assert_eq!(speaker, "Minh");
        assert!(draft.fill(first, "Good evening."));
        assert_eq!(draft.last_filled_speaker(), Some("Minh"));

        let (second, _) = draft.next_unfilled().unwrap();
        assert!(draft
            .render_for_slot(second)
            .contains("<<LINE TO WRITE>> (Lan)"));
        assert!(draft.fill(second, "\"Is it?\""));

        assert!(draft.next_unfilled().is_none());
        assert_eq!(draft.last_filled_speaker(), Some("Lan"));
        assert_eq!(
            draft.render(),
            "He says \"Good evening.\" and she answers \"Is it?\"."
        );
    }

    #[test]
    fn test_duplicate_speakers_are_separate_slots() {
        let mut draft =
            NarrativeDraft::parse("[DIALOGUE:\"Minh\"] He pauses. [DIALOGUE:\"Minh\"]");
        assert_eq!(draft.slot_count(), 2);
        let (first, _) = draft.next_unfilled().unwrap();
        draft.fill(first, "Wait.");
        let (second, speaker) = draft.next_unfilled().unwrap();
        assert_ne!(first, second);
        assert_eq!(speaker, "Minh");
    }

    #[test]
    fn test_fill_rejects_text_segment() {
        let mut draft = NarrativeDraft::parse("Only text");
        assert!(!draft.fill(0, "line"));
    }
}
