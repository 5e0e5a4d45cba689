use axum::extract::State;

use crate::AppState;

/// Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}
