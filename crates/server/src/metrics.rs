//! Prometheus metrics for the coordinator

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use cohost_core::WinnerSelectionReason;

use crate::state::AppState;
use crate::ServerError;

pub const GRANTS_TOTAL: &str = "cohost_coordinator_grants_total";
pub const DENIALS_TOTAL: &str = "cohost_coordinator_denials_total";
pub const REFUSALS_TOTAL: &str = "cohost_coordinator_refusals_total";
pub const LEASE_EXPIRIES_TOTAL: &str = "cohost_coordinator_lease_expiries_total";

/// Install the global Prometheus recorder. Call once per process.
pub fn init_metrics() -> Result<PrometheusHandle, ServerError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Internal(format!("Failed to install metrics recorder: {}", e)))
}

pub fn record_grant(reason: WinnerSelectionReason) {
    ::metrics::counter!(GRANTS_TOTAL, "reason" => reason.as_str()).increment(1);
}

pub fn record_denials(count: usize) {
    if count > 0 {
        ::metrics::counter!(DENIALS_TOTAL).increment(count as u64);
    }
}

/// Request turned away because the floor was already held
pub fn record_refused() {
    ::metrics::counter!(REFUSALS_TOTAL).increment(1);
}

pub fn record_lease_expired() {
    ::metrics::counter!(LEASE_EXPIRIES_TOTAL).increment(1);
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics disabled\n".to_string(),
        ),
    }
}
