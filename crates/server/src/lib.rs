//! Turn Coordinator Server
//!
//! HTTP service that arbitrates which co-host agent may speak. Agents post
//! a request per heard utterance, poll for the bucket decision, and report
//! the finished exchange to release the lease.

pub mod coordinator;
pub mod http;
pub mod metrics;
pub mod selection;
pub mod state;

pub use coordinator::{CoordinatorPolicy, TurnCoordinator};
pub use http::create_router;
pub use metrics::init_metrics;
pub use selection::{run_auction, Entrant, Rotation, Selection};
pub use state::AppState;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let status = StatusCode::from(self);
        if status.is_server_error() {
            tracing::error!(error = %message, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
