use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSummary {
    pub scenario_type: String,
    pub title: String,
    pub premise: String,
    pub turns: u32,
    pub required_traits: Vec<String>,
}

pub async fn list_scenarios(State(st): State<Arc<AppState>>) -> Json<Vec<ScenarioSummary>> {
    Json(
        st.catalog
            .list()
            .map(|s| ScenarioSummary {
                scenario_type: s.scenario_type.clone(),
                title: s.title.clone(),
                premise: s.premise.clone(),
                turns: s.final_turn(),
                required_traits: s.required_traits.clone(),
            })
            .collect(),
    )
}
