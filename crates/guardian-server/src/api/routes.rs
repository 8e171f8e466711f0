//! REST API routes.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;

use crate::api::ws::{self, extract_bearer};
use crate::state::AppState;
use guardian_core::protocol::TrafficEntry;

/// Radius of the per-aircraft traffic query.
const NEARBY_RADIUS_M: f64 = 10_000.0;

/// Create the API router.
pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/v1/traffic", get(list_traffic))
        .route("/v1/traffic/:aircraft_id", get(nearby_traffic))
        .route("/v1/airfield", get(get_airfield))
        .route("/v1/runway", get(get_runway))
        .route("/v1/conflicts", get(list_conflicts))
        .route("/v1/aircraft/:aircraft_id", delete(remove_aircraft))
        // WebSocket streaming
        .route("/v1/ws", get(ws::ws_handler))
}

async fn list_traffic(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let traffic: Vec<TrafficEntry> = state.with_engine(|engine| {
        engine
            .positions()
            .all()
            .into_iter()
            .map(TrafficEntry::from)
            .collect()
    });
    Json(traffic)
}

async fn nearby_traffic(
    State(state): State<Arc<AppState>>,
    Path(aircraft_id): Path<String>,
) -> impl IntoResponse {
    match state.with_engine(|engine| engine.nearby(&aircraft_id, NEARBY_RADIUS_M)) {
        Some(nearby) => Json(nearby).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_airfield(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.with_engine(|engine| engine.airfield().cloned()) {
        Some(airfield) => Json(airfield).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_runway(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.with_engine(|engine| engine.runway_state(Utc::now())))
}

async fn list_conflicts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.with_engine(|engine| engine.active_conflicts()))
}

/// Operator removal. Requires the operator token as a bearer when one is configured.
async fn remove_aircraft(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(aircraft_id): Path<String>,
) -> impl IntoResponse {
    if let Some(expected) = state.config().operator_token.as_deref() {
        if extract_bearer(&headers).as_deref() != Some(expected) {
            return StatusCode::UNAUTHORIZED;
        }
    }
    match state.with_engine(|engine| engine.remove_aircraft(&aircraft_id, Utc::now())) {
        Some(envelopes) => {
            tracing::info!("Aircraft {} removed via REST", aircraft_id);
            state.deliver(envelopes, None);
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}
