//! Application state

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use strata_core::{ControlChannel, Registration};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registration: Arc<Registration>,
    pub control: ControlChannel,
}

impl AppState {
    pub fn new(registration: Arc<Registration>, control: ControlChannel) -> Self {
        Self {
            registration,
            control,
        }
    }
}

/// Renders the installed Prometheus recorder
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    pub fn new(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}
