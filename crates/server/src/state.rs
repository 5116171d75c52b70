//! Application State
//!
//! Shared state across all handlers.

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use cohost_config::Settings;

use crate::coordinator::TurnCoordinator;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub coordinator: Arc<TurnCoordinator>,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Settings) -> Self {
        let coordinator = Arc::new(TurnCoordinator::new(&config.coordinator));
        Self {
            config: Arc::new(config),
            coordinator,
            metrics: None,
        }
    }

    /// Serve `/metrics` from this recorder handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn metrics(&self) -> Option<&PrometheusHandle> {
        self.metrics.as_ref()
    }
}
