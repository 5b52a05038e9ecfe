use axum::{extract::State, Json};

use crate::api::{state::AppState, types::*};
use crate::strategy::StrategyInfo;

/// GET /health -- liveness check with the number of running trade slots
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let running_trades = match &state.scheduler {
        Some(scheduler) => scheduler.running_ids().await.len(),
        None => 0,
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        gateway: state.gateway.to_string(),
        running_trades,
        uptime_secs: state.uptime_seconds(),
    })
}

/// GET /strategies
pub async fn list_strategies(State(state): State<AppState>) -> Json<Vec<StrategyInfo>> {
    Json(state.service.strategies())
}
