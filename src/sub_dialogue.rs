//! Nested multi-exchange conversation embedded in a single turn.
//!
//! Each `step` appends exactly one initiator message and exactly one
//! respondent reply. The exchange ends when the model reports completion or
//! when the initiator has used up the turn ceiling, whichever comes first.
//! Parse failures here are absorbed: the raw reply becomes the message and
//! the score falls back to the scale midpoint.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::{SimError, SimResult};
use crate::generation::TextGenerator;
use crate::prompts::PromptComposer;
use crate::response_interpreter::{self, loose_integer};
use crate::scenario::ExchangeSpec;
use crate::trait_scores::TraitScale;

pub const FALLBACK_RATIONALE: &str = "Scored from the overall tone of the conversation.";
const FALLBACK_CLOSING: &str = "Alright, let's leave it there.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The simulated counterpart.
    Respondent,
    /// The user.
    Initiator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub sender: Sender,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogueStatus {
    #[serde(alias = "in_progress")]
    Continue,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueTranscript {
    pub turns: Vec<DialogueTurn>,
    pub status: DialogueStatus,
}

impl Default for DialogueTranscript {
    fn default() -> Self {
        Self {
            turns: Vec::new(),
            status: DialogueStatus::Continue,
        }
    }
}

impl DialogueTranscript {
    /// Transcript opened by the counterpart.
    pub fn seeded(opening_line: &str) -> Self {
        let mut t = Self::default();
        t.push(Sender::Respondent, opening_line);
        t
    }

    pub fn from_turns(turns: Vec<DialogueTurn>) -> Self {
        Self {
            turns,
            status: DialogueStatus::Continue,
        }
    }

    pub fn push(&mut self, sender: Sender, text: &str) {
        self.turns.push(DialogueTurn {
            sender,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn user_turns(&self) -> usize {
        self.turns.iter().filter(|t| t.sender == Sender::Initiator).count()
    }

    pub fn is_complete(&self) -> bool {
        self.status == DialogueStatus::Complete
    }

    pub fn last_reply(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.sender == Sender::Respondent)
            .map(|t| t.text.as_str())
    }
}

/// Score extracted when an exchange completes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeOutcome {
    pub trait_name: String,
    pub score: i32,
    pub rationale: String,
    /// True when the model gave no usable score and the midpoint was used.
    pub fallback: bool,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub transcript: DialogueTranscript,
    pub respondent_messages: Vec<String>,
    pub status: DialogueStatus,
    pub outcome: Option<ExchangeOutcome>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireExchangeReply {
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "respondentMessage", alias = "response")]
    message: Option<String>,
    #[serde(default)]
    trait_score: Option<Value>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Model reply for one step. An object carrying neither a status nor a
/// message is not a reply and is skipped by the extraction ladder.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "WireExchangeReply")]
struct ExchangeReply {
    status: Option<String>,
    message: Option<String>,
    trait_score: Option<Value>,
    reasoning: Option<String>,
}

impl TryFrom<WireExchangeReply> for ExchangeReply {
    type Error = &'static str;

    fn try_from(wire: WireExchangeReply) -> Result<Self, Self::Error> {
        if wire.status.is_none() && wire.message.is_none() {
            return Err("reply carries neither status nor message");
        }
        Ok(Self {
            status: wire.status,
            message: wire.message,
            trait_score: wire.trait_score,
            reasoning: wire.reasoning,
        })
    }
}

impl ExchangeReply {
    /// Unstructured completion used verbatim as the message.
    fn prose(raw: &str) -> Self {
        Self {
            message: Some(response_interpreter::strip_fences(raw)),
            ..Self::default()
        }
    }

    fn wants_completion(&self) -> bool {
        matches!(
            self.status.as_deref().map(|s| s.trim().to_ascii_lowercase()).as_deref(),
            Some("complete") | Some("completed") | Some("done") | Some("end")
        )
    }
}

#[derive(Debug, Clone)]
pub struct DialogueSettings {
    pub max_user_turns: usize,
    pub delimiter: String,
    pub max_output_tokens: u32,
    pub scale: TraitScale,
}

impl Default for DialogueSettings {
    fn default() -> Self {
        Self {
            max_user_turns: 3,
            delimiter: "||".to_string(),
            max_output_tokens: 300,
            scale: TraitScale::default(),
        }
    }
}

#[derive(Clone)]
pub struct SubDialogueEngine {
    generator: Arc<dyn TextGenerator>,
    prompts: Arc<dyn PromptComposer>,
    settings: DialogueSettings,
}

impl SubDialogueEngine {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        prompts: Arc<dyn PromptComposer>,
        settings: DialogueSettings,
    ) -> Self {
        Self {
            generator,
            prompts,
            settings,
        }
    }

    /// User-turn ceiling for `exchange`.
    pub fn ceiling_for(&self, exchange: &ExchangeSpec) -> usize {
        exchange
            .max_user_turns
            .filter(|n| *n > 0)
            .unwrap_or(self.settings.max_user_turns)
    }

    /// Advance the exchange by one user message and one reply.
    pub async fn step(
        &self,
        transcript: &DialogueTranscript,
        user_message: &str,
        exchange: &ExchangeSpec,
    ) -> SimResult<StepResult> {
        if transcript.is_complete() {
            return Err(SimError::validation(
                "conversationHistory",
                "this conversation has already finished",
            ));
        }
        let user_message = user_message.trim();
        if user_message.is_empty() {
            return Err(SimError::validation("userMessage", "must not be empty"));
        }

        let mut working = if transcript.turns.is_empty() {
            DialogueTranscript::seeded(&exchange.opening_line)
        } else {
            transcript.clone()
        };
        if working.turns.first().map(|t| t.sender) != Some(Sender::Respondent) {
            return Err(SimError::validation(
                "conversationHistory",
                "conversation must be opened by the respondent",
            ));
        }

        working.push(Sender::Initiator, user_message);
        let ceiling = self.ceiling_for(exchange);
        let ceiling_reached = working.user_turns() >= ceiling;

        let prompt = self.prompts.exchange_prompt(
            exchange,
            &working,
            ceiling_reached,
            self.settings.scale,
            &self.settings.delimiter,
        );
        let raw = self
            .generator
            .generate(&prompt, self.settings.max_output_tokens)
            .await?;

        let reply = response_interpreter::extract_or(
            &raw,
            &format!("exchange '{}' reply", exchange.exchange_id),
            ExchangeReply::prose(&raw),
        );

        let complete = ceiling_reached || reply.wants_completion();
        if ceiling_reached && !reply.wants_completion() {
            info!(
                "Exchange '{}' hit its ceiling of {} user turns, forcing completion",
                exchange.exchange_id, ceiling
            );
        }

        let mut messages = split_messages(reply.message.as_deref().unwrap_or(""), &self.settings.delimiter);
        if messages.is_empty() {
            if !complete {
                return Err(SimError::backend("sub_dialogue", "empty respondent reply"));
            }
            messages.push(FALLBACK_CLOSING.to_string());
        }
        working.push(Sender::Respondent, &messages.join("\n"));

        let (status, outcome) = if complete {
            working.status = DialogueStatus::Complete;
            (DialogueStatus::Complete, Some(self.outcome(exchange, &reply)))
        } else {
            (DialogueStatus::Continue, None)
        };

        debug!(
            "Exchange '{}' step: {} user turns, status {:?}",
            exchange.exchange_id,
            working.user_turns(),
            status
        );

        Ok(StepResult {
            transcript: working,
            respondent_messages: messages,
            status,
            outcome,
        })
    }

    fn outcome(&self, exchange: &ExchangeSpec, reply: &ExchangeReply) -> ExchangeOutcome {
        let scale = self.settings.scale;
        let parsed = reply.trait_score.as_ref().and_then(loose_integer);
        let (score, fallback) = match parsed {
            Some(v) => (scale.clamp(v), false),
            None => {
                warn!(
                    "Exchange '{}' finished without a usable score, using midpoint {}",
                    exchange.exchange_id,
                    scale.midpoint()
                );
                (scale.midpoint(), true)
            }
        };
        let rationale = reply
            .reasoning
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| FALLBACK_RATIONALE.to_string());

        ExchangeOutcome {
            trait_name: exchange.trait_name.clone(),
            score,
            rationale,
            fallback,
        }
    }
}

/// Split a reply into at most two messages on `delimiter`.
pub fn split_messages(text: &str, delimiter: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    let parts: Vec<String> = match text.split_once(delimiter) {
        Some((first, rest)) => vec![first.to_string(), rest.replace(delimiter, " ")],
        None => vec![text.to_string()],
    };
    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_caps_at_two_messages() {
        assert_eq!(split_messages("Hi!||How are you?", "||"), vec!["Hi!", "How are you?"]);
        assert_eq!(split_messages("a||b||c", "||"), vec!["a", "b c"]);
        assert_eq!(split_messages("just one", "||"), vec!["just one"]);
        assert_eq!(split_messages("||trailing", "||"), vec!["trailing"]);
        assert!(split_messages("   ", "||").is_empty());
    }

    #[test]
    fn transcript_counts_user_turns() {
        let mut t = DialogueTranscript::seeded("Hey");
        assert_eq!(t.user_turns(), 0);
        t.push(Sender::Initiator, "hi");
        t.push(Sender::Respondent, "so?");
        t.push(Sender::Initiator, "fine");
        assert_eq!(t.user_turns(), 2);
        assert_eq!(t.last_reply(), Some("so?"));
    }

    #[test]
    fn history_round_trips_with_lowercase_senders() {
        let raw = r#"{"turns":[{"sender":"respondent","text":"Hey"}],"status":"continue"}"#;
        let t: DialogueTranscript = serde_json::from_str(raw).unwrap();
        assert_eq!(t.turns[0].sender, Sender::Respondent);
        let back = serde_json::to_value(&t).unwrap();
        assert_eq!(back["turns"][0]["sender"], "respondent");
    }
}
