//! Simulation state carried between turns.
//!
//! `SimulationState` is a value object: the sequencer receives it by
//! reference and hands back a new one, so a failed turn leaves the caller's
//! copy untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::archetype::ArchetypeResult;
use crate::errors::{SimError, SimResult};
use crate::sub_dialogue::DialogueTranscript;
use crate::trait_scores::TraitRecord;

/// Discrete decision taken on a multiple-choice turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserChoice {
    pub turn: u32,
    pub choice_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationState {
    pub simulation_id: String,
    pub scenario_type: String,
    pub current_turn: u32,
    pub story_so_far: String,
    pub user_actions: Vec<String>,
    #[serde(default)]
    pub user_choices: Vec<UserChoice>,
    #[serde(default)]
    pub trait_scores: TraitRecord,
    /// Exchange in progress on the current turn, if any.
    #[serde(default)]
    pub active_dialogue: Option<DialogueTranscript>,
    #[serde(default)]
    pub archetype_result: Option<ArchetypeResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SimulationState {
    pub fn new(scenario_type: &str, opening_story: &str) -> Self {
        let now = Utc::now();
        Self {
            simulation_id: Uuid::new_v4().to_string(),
            scenario_type: scenario_type.to_string(),
            current_turn: 1,
            story_so_far: opening_story.to_string(),
            user_actions: Vec::new(),
            user_choices: Vec::new(),
            trait_scores: TraitRecord::new(),
            active_dialogue: None,
            archetype_result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Terminal and read-only once an archetype has been written.
    pub fn is_complete(&self) -> bool {
        self.archetype_result.is_some()
    }

    /// Tail of the story bounded for prompt construction.
    pub fn story_window(&self, max_chars: usize) -> &str {
        tail_window(&self.story_so_far, max_chars)
    }

    pub(crate) fn append_story(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.story_so_far.is_empty() {
            self.story_so_far.push_str("\n\n");
        }
        self.story_so_far.push_str(text);
    }
}

/// Last `max_chars` characters of `text`; older content is dropped.
pub fn tail_window(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}

/// The user's contribution to one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnInput {
    FreeText(String),
    Choice(String),
}

impl TurnInput {
    /// Build from the inbound `{userInput | choiceId}` pair; exactly one must
    /// be present and non-blank.
    pub fn from_parts(user_input: Option<&str>, choice_id: Option<&str>) -> SimResult<Self> {
        let text = user_input.map(str::trim).filter(|s| !s.is_empty());
        let choice = choice_id.map(str::trim).filter(|s| !s.is_empty());
        match (text, choice) {
            (Some(t), None) => Ok(TurnInput::FreeText(t.to_string())),
            (None, Some(c)) => Ok(TurnInput::Choice(c.to_string())),
            (Some(_), Some(_)) => Err(SimError::validation(
                "userInput",
                "provide either userInput or choiceId, not both",
            )),
            (None, None) => Err(SimError::validation(
                "userInput",
                "userInput or choiceId is required",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_starts_at_turn_one() {
        let s = SimulationState::new("boundary_call", "It begins.");
        assert_eq!(s.current_turn, 1);
        assert!(s.user_actions.is_empty());
        assert!(s.trait_scores.is_empty());
        assert!(!s.is_complete());
    }

    #[test]
    fn tail_window_drops_oldest_content() {
        assert_eq!(tail_window("abcdef", 3), "def");
        assert_eq!(tail_window("abc", 10), "abc");
        // multi-byte characters stay intact
        assert_eq!(tail_window("héllo wörld", 5), "wörld");
    }

    #[test]
    fn story_appends_with_paragraph_breaks() {
        let mut s = SimulationState::new("x", "First.");
        s.append_story("Second.");
        s.append_story("   ");
        assert_eq!(s.story_so_far, "First.\n\nSecond.");
    }

    #[test]
    fn turn_input_requires_exactly_one_field() {
        assert_eq!(
            TurnInput::from_parts(Some(" call me later "), None).unwrap(),
            TurnInput::FreeText("call me later".to_string())
        );
        assert_eq!(
            TurnInput::from_parts(None, Some("accept")).unwrap(),
            TurnInput::Choice("accept".to_string())
        );
        assert!(TurnInput::from_parts(Some("   "), None).is_err());
        assert!(TurnInput::from_parts(None, None).is_err());
        assert!(TurnInput::from_parts(Some("a"), Some("b")).is_err());
    }
}
