//! HTTP Endpoints
//!
//! REST API of the Turn Coordinator.

use axum::{
    extract::{rejection::JsonRejection, Json, Query, State},
    http::{Method, StatusCode},
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use cohost_core::coordination::{
    EndTurnBody, OkResponse, RecentTurnsResponse, RequestTurnBody, RequestTurnResponse,
    TurnDecisionQuery, TurnDecisionResponse,
};

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::ServerError;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.server.timeout_seconds.max(1));

    Router::new()
        .route("/recent-turns", get(recent_turns))
        .route("/request-turn", post(request_turn))
        .route("/turn-decision", get(turn_decision))
        .route("/end-turn", post(end_turn))
        // Health check
        .route("/health", get(health_check))
        .route("/", get(health_check))
        // Prometheus metrics
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Unwrap a JSON body, mapping every rejection to a 400
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ServerError> {
    body.map(|Json(value)| value)
        .map_err(|e| ServerError::InvalidRequest(format!("Invalid JSON body: {}", e.body_text())))
}

async fn recent_turns(State(state): State<AppState>) -> Json<RecentTurnsResponse> {
    Json(state.coordinator.recent_turns())
}

async fn request_turn(
    State(state): State<AppState>,
    body: Result<Json<RequestTurnBody>, JsonRejection>,
) -> Result<Json<RequestTurnResponse>, ServerError> {
    let body = json_body(body)?;
    state.coordinator.request_turn(body).map(Json)
}

async fn turn_decision(
    State(state): State<AppState>,
    Query(query): Query<TurnDecisionQuery>,
) -> Json<TurnDecisionResponse> {
    Json(state.coordinator.turn_decision(&query))
}

async fn end_turn(
    State(state): State<AppState>,
    body: Result<Json<EndTurnBody>, JsonRejection>,
) -> Result<Json<OkResponse>, ServerError> {
    let body = json_body(body)?;
    state.coordinator.end_turn(body).map(Json)
}

async fn health_check() -> (StatusCode, Json<OkResponse>) {
    (StatusCode::OK, Json(OkResponse::ok()))
}
