use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    api::{retry_or_fail, STATUS_NEEDS_RETRY, STATUS_SUCCESS},
    api_errors::AppError,
    app_state::AppState,
    audit::{AuditSeverity, TurnAction, TurnAuditEvent},
    simulation::{SimulationState, TurnInput},
    turn_sequencer::{TurnOutcome, TurnPrompt},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSimulationRequest {
    pub scenario_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationView {
    pub simulation: SimulationState,
    pub next_prompt: Option<TurnPrompt>,
}

impl SimulationView {
    fn new(st: &AppState, simulation: SimulationState) -> Self {
        let next_prompt = if simulation.is_complete() || simulation.active_dialogue.is_some() {
            None
        } else {
            st.catalog
                .get(&simulation.scenario_type)
                .and_then(|s| TurnPrompt::for_turn(s, simulation.current_turn))
        };
        Self {
            simulation,
            next_prompt,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTurnRequest {
    #[serde(default)]
    pub user_input: Option<String>,
    #[serde(default)]
    pub choice_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTurnResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub outcome: Option<TurnOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

pub async fn create_simulation(
    State(st): State<Arc<AppState>>,
    Json(req): Json<CreateSimulationRequest>,
) -> Result<(StatusCode, Json<SimulationView>), AppError> {
    st.validator.validate_scenario_type(&req.scenario_type)?;
    let scenario = st.catalog.require(&req.scenario_type)?;
    let state = st.sequencer.start(scenario);
    st.store.save(&state)?;
    Ok((StatusCode::CREATED, Json(SimulationView::new(&st, state))))
}

pub async fn get_simulation(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SimulationView>, AppError> {
    st.validator.validate_simulation_id(&id)?;
    let state = st.store.require(&id)?;
    Ok(Json(SimulationView::new(&st, state)))
}

pub async fn submit_simulation_turn(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SubmitTurnRequest>,
) -> Result<Json<SubmitTurnResponse>, AppError> {
    st.validator.validate_simulation_id(&id)?;
    let input = TurnInput::from_parts(req.user_input.as_deref(), req.choice_id.as_deref())?;
    match &input {
        TurnInput::FreeText(text) => st.validator.validate_user_text("userInput", text)?,
        TurnInput::Choice(choice) => st.validator.validate_choice_id(choice)?,
    }

    let _permit = st.guard.acquire(&id)?;
    let state = st.store.require(&id)?;
    let scenario = st.catalog.require(&state.scenario_type)?;

    match st.sequencer.advance(scenario, &state, input).await {
        Ok(outcome) => {
            st.store.save(&outcome.state)?;
            Ok(Json(SubmitTurnResponse {
                status: STATUS_SUCCESS,
                outcome: Some(outcome),
                error_message: None,
            }))
        }
        Err(err) => {
            if !err.is_retryable() {
                TurnAuditEvent::new(&id, &state.scenario_type, state.current_turn, TurnAction::Rejected)
                    .with_severity(AuditSeverity::Warn)
                    .emit();
            }
            retry_or_fail(err).map(|message| {
                Json(SubmitTurnResponse {
                    status: STATUS_NEEDS_RETRY,
                    outcome: None,
                    error_message: Some(message),
                })
            })
        }
    }
}
