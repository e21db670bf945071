use std::sync::Arc;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::{
    api::{retry_or_fail, STATUS_NEEDS_RETRY},
    api_errors::AppError,
    app_state::AppState,
    sub_dialogue::{DialogueStatus, DialogueTranscript, DialogueTurn},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueContext {
    pub scenario_type: String,
    pub exchange_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueStepRequest {
    #[serde(default)]
    pub conversation_history: Vec<DialogueTurn>,
    pub user_message: String,
    pub context: DialogueContext,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueStepResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub respondent_message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub respondent_messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trait_score: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conversation_history: Vec<DialogueTurn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

fn status_name(status: DialogueStatus) -> &'static str {
    match status {
        DialogueStatus::Continue => "continue",
        DialogueStatus::Complete => "complete",
    }
}

pub async fn step_dialogue(
    State(st): State<Arc<AppState>>,
    Json(req): Json<DialogueStepRequest>,
) -> Result<Json<DialogueStepResponse>, AppError> {
    st.validator.validate_scenario_type(&req.context.scenario_type)?;
    st.validator.validate_exchange_id(&req.context.exchange_id)?;
    st.validator.validate_user_text("userMessage", &req.user_message)?;
    st.validator.validate_history_len(req.conversation_history.len())?;

    let scenario = st.catalog.require(&req.context.scenario_type)?;
    let exchange = scenario.exchange(&req.context.exchange_id).ok_or_else(|| {
        AppError::not_found(format!(
            "Exchange '{}' not found in scenario '{}'",
            req.context.exchange_id, req.context.scenario_type
        ))
    })?;

    let transcript = DialogueTranscript::from_turns(req.conversation_history);
    match st.sequencer.dialogue().step(&transcript, &req.user_message, exchange).await {
        Ok(step) => {
            let (trait_score, reasoning) = match step.outcome {
                Some(outcome) => (Some(outcome.score), Some(outcome.rationale)),
                None => (None, None),
            };
            Ok(Json(DialogueStepResponse {
                status: status_name(step.status),
                respondent_message: Some(step.respondent_messages.join("\n")),
                respondent_messages: step.respondent_messages,
                trait_score,
                reasoning,
                conversation_history: step.transcript.turns,
                error_message: None,
            }))
        }
        Err(err) => retry_or_fail(err).map(|message| {
            Json(DialogueStepResponse {
                status: STATUS_NEEDS_RETRY,
                respondent_message: None,
                respondent_messages: Vec::new(),
                trait_score: None,
                reasoning: None,
                conversation_history: Vec::new(),
                error_message: Some(message),
            })
        }),
    }
}
