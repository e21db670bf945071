use std::sync::Arc;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::{
    api::{retry_or_fail, STATUS_NEEDS_RETRY, STATUS_SUCCESS},
    api_errors::AppError,
    app_state::AppState,
    archetype::ArchetypeResult,
    scenario::TurnPlan,
    simulation::{SimulationState, TurnInput},
    trait_scores::TraitRecord,
    turn_sequencer::TurnOutcome,
};

/// Stateless turn: the client carries the story and turn counter.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    #[serde(default)]
    pub user_input: Option<String>,
    #[serde(default)]
    pub choice_id: Option<String>,
    #[serde(default)]
    pub story_so_far: String,
    pub scenario_type: String,
    pub current_turn: u32,
    #[serde(default)]
    pub user_actions: Vec<String>,
    /// Scores gathered so far; only needed on the final turn.
    #[serde(default)]
    pub trait_scores: Option<TraitRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_scene_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trait_scores: Option<TraitRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_turn: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archetype: Option<ArchetypeResult>,
}

impl TurnResponse {
    fn success(outcome: TurnOutcome) -> Self {
        let next_turn = outcome
            .archetype
            .is_none()
            .then_some(outcome.state.current_turn);
        Self {
            status: STATUS_SUCCESS,
            classification: outcome.classification,
            action_summary: outcome.action_summary,
            next_scene_text: outcome.scene_text,
            error_message: None,
            trait_scores: Some(outcome.state.trait_scores),
            next_turn,
            archetype: outcome.archetype,
        }
    }

    fn needs_retry(message: String) -> Self {
        Self {
            status: STATUS_NEEDS_RETRY,
            classification: None,
            action_summary: None,
            next_scene_text: None,
            error_message: Some(message),
            trait_scores: None,
            next_turn: None,
            archetype: None,
        }
    }
}

pub async fn submit_turn(
    State(st): State<Arc<AppState>>,
    Json(req): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, AppError> {
    st.validator.validate_scenario_type(&req.scenario_type)?;
    st.validator.validate_story(&req.story_so_far)?;
    let input = TurnInput::from_parts(req.user_input.as_deref(), req.choice_id.as_deref())?;
    match &input {
        TurnInput::FreeText(text) => st.validator.validate_user_text("userInput", text)?,
        TurnInput::Choice(id) => st.validator.validate_choice_id(id)?,
    }

    if let Some(scores) = &req.trait_scores {
        st.validator
            .validate_trait_scores(scores, st.sequencer.resolver().scale())?;
    }

    let scenario = st.catalog.require(&req.scenario_type)?;
    if let Some(TurnPlan::Dialogue(spec)) = scenario.plan_for(req.current_turn) {
        return Err(AppError::bad_request(format!(
            "turn {} is a conversation with {}; use /api/sub-dialogue/step",
            req.current_turn, spec.counterpart
        )));
    }

    let mut state = SimulationState::new(&req.scenario_type, &req.story_so_far);
    state.current_turn = req.current_turn;
    state.user_actions = req.user_actions;
    if let Some(scores) = req.trait_scores {
        state.trait_scores = scores;
    }

    match st.sequencer.advance(scenario, &state, input).await {
        Ok(outcome) => {
            tracing::info!(
                "Stateless turn {} of '{}' processed",
                req.current_turn,
                req.scenario_type
            );
            Ok(Json(TurnResponse::success(outcome)))
        }
        Err(err) => retry_or_fail(err).map(|message| Json(TurnResponse::needs_retry(message))),
    }
}
