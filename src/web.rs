use std::sync::Arc;

use axum::{
    extract::State,
    http::Method,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    api::{
        dialogue::step_dialogue,
        scenarios::list_scenarios,
        simulations::{create_simulation, get_simulation, submit_simulation_turn},
        turn::submit_turn,
    },
    app_state::AppState,
};

/// Full HTTP surface: stateless turn and exchange endpoints, stored
/// simulations, scenario listing and health checks.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/api/turn", post(submit_turn))
        .route("/api/sub-dialogue/step", post(step_dialogue))
        .route("/api/simulations", post(create_simulation))
        .route("/api/simulations/{id}", get(get_simulation))
        .route("/api/simulations/{id}/turns", post(submit_simulation_turn))
        .route("/api/scenarios", get(list_scenarios))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn readyz(State(st): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let store_ok = st.store.list_ids().is_ok();
    Json(serde_json::json!({
        "ready": store_ok,
        "generator": st.generator_name,
        "scenarios": st.catalog.list().count(),
    }))
}
