use crate::error::AppError;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the process-wide Prometheus recorder and return the handle used to
/// render `/metrics`. Call once, from `main`.
pub fn init_metrics() -> Result<PrometheusHandle, AppError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Failed to install metrics recorder: {}", e))
        })
}

/// A handle backed by a recorder that is not installed globally. Rendering it
/// yields an empty exposition; used where a handle is required but the global
/// recorder must not be touched (tests, tooling).
pub fn unregistered_metrics_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}
