use lazy_static::lazy_static;
use regex::Regex;

use crate::errors::{SimError, SimResult};
use crate::trait_scores::{TraitRecord, TraitScale};

lazy_static! {
    static ref SCENARIO_TYPE_PATTERN: Regex = Regex::new(r"^[a-z0-9_-]{1,64}$").unwrap();
    static ref EXCHANGE_ID_PATTERN: Regex = Regex::new(r"^[a-zA-Z0-9_-]{1,64}$").unwrap();
    static ref CHOICE_ID_PATTERN: Regex = Regex::new(r"^[a-zA-Z0-9_-]{1,64}$").unwrap();
    static ref TRAIT_NAME_PATTERN: Regex = Regex::new(r"^[a-z][a-z0-9_]{0,63}$").unwrap();
    static ref SIMULATION_ID_PATTERN: Regex =
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$").unwrap();
}

/// Limits applied to every inbound request before it reaches the engine.
#[derive(Debug, Clone)]
pub struct InputValidator {
    pub max_input_chars: usize,
    pub max_story_chars: usize,
    pub max_history_turns: usize,
}

impl Default for InputValidator {
    fn default() -> Self {
        Self {
            max_input_chars: 2_000,
            max_story_chars: 200_000,
            max_history_turns: 64,
        }
    }
}

impl InputValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate_scenario_type(&self, scenario_type: &str) -> SimResult<()> {
        if !SCENARIO_TYPE_PATTERN.is_match(scenario_type) {
            return Err(SimError::validation("scenarioType", "invalid scenario type"));
        }
        Ok(())
    }

    pub fn validate_simulation_id(&self, id: &str) -> SimResult<()> {
        if !SIMULATION_ID_PATTERN.is_match(id) {
            return Err(SimError::validation("simulationId", "invalid simulation id"));
        }
        Ok(())
    }

    pub fn validate_exchange_id(&self, id: &str) -> SimResult<()> {
        if !EXCHANGE_ID_PATTERN.is_match(id) {
            return Err(SimError::validation("exchangeId", "invalid exchange id"));
        }
        Ok(())
    }

    /// Free text from the user: non-blank and bounded.
    pub fn validate_user_text(&self, field: &str, text: &str) -> SimResult<()> {
        if text.trim().is_empty() {
            return Err(SimError::validation(field, "must not be empty"));
        }
        if text.chars().count() > self.max_input_chars {
            return Err(SimError::validation(
                field,
                format!("must be at most {} characters", self.max_input_chars),
            ));
        }
        Ok(())
    }

    pub fn validate_choice_id(&self, choice_id: &str) -> SimResult<()> {
        if !CHOICE_ID_PATTERN.is_match(choice_id.trim()) {
            return Err(SimError::validation("choiceId", "invalid choice id"));
        }
        Ok(())
    }

    pub fn validate_story(&self, story: &str) -> SimResult<()> {
        if story.chars().count() > self.max_story_chars {
            return Err(SimError::validation("storySoFar", "story is too long"));
        }
        Ok(())
    }

    /// Scores carried by the client must name known-shaped traits and sit on `scale`.
    pub fn validate_trait_scores(&self, record: &TraitRecord, scale: TraitScale) -> SimResult<()> {
        if record.len() > self.max_history_turns {
            return Err(SimError::validation("traitScores", "too many traits"));
        }
        for (name, value) in record.iter() {
            if !TRAIT_NAME_PATTERN.is_match(name) {
                return Err(SimError::validation("traitScores", format!("invalid trait name '{name}'")));
            }
            if !scale.contains(value) {
                return Err(SimError::validation(
                    "traitScores",
                    format!("'{name}' = {value} is outside {}..={}", scale.min, scale.max),
                ));
            }
        }
        Ok(())
    }

    pub fn validate_history_len(&self, turns: usize) -> SimResult<()> {
        if turns > self.max_history_turns {
            return Err(SimError::validation(
                "conversationHistory",
                format!("at most {} turns allowed", self.max_history_turns),
            ));
        }
        Ok(())
    }
}
