use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::error;

use crate::api::{state::AppState, types::*};
use crate::domain::Trade;
use crate::error::TrancheError;
use crate::services::{ExecutionStats, NewTrade, TradeInfo, TradeSummary};

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// NotFound -> 404, client mistakes -> 400, anything else -> 500
pub fn api_error(e: TrancheError) -> ApiError {
    let (code, status) = match &e {
        TrancheError::NotFound { .. } => (StatusCode::NOT_FOUND, None),
        TrancheError::InvalidState { from, .. } => (StatusCode::BAD_REQUEST, Some(*from)),
        TrancheError::Validation(_) => (StatusCode::BAD_REQUEST, None),
        _ => {
            error!("Request failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, None)
        }
    };
    (
        code,
        Json(ErrorResponse {
            error: e.to_string(),
            status,
        }),
    )
}

fn action_response(trade: Trade, verb: &str) -> TradeActionResponse {
    TradeActionResponse {
        message: format!("Trade {} {}", trade.id, verb),
        trade_id: trade.id,
        status: trade.status,
    }
}

/// POST /trades
pub async fn create_trade(
    State(state): State<AppState>,
    Json(request): Json<NewTrade>,
) -> std::result::Result<(StatusCode, Json<CreateTradeResponse>), ApiError> {
    let trade_id = state
        .service
        .create_trade(request)
        .await
        .map_err(api_error)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTradeResponse {
            message: format!("Trade {} created", trade_id),
            trade_id,
        }),
    ))
}

/// GET /trades
pub async fn list_trades(
    State(state): State<AppState>,
) -> std::result::Result<Json<Vec<TradeSummary>>, ApiError> {
    let summaries = state.service.list_summaries().await.map_err(api_error)?;
    Ok(Json(summaries))
}

/// GET /trades/:id
pub async fn get_trade(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<TradeInfo>, ApiError> {
    let info = state.service.trade_info(&id).await.map_err(api_error)?;
    Ok(Json(info))
}

/// GET /trades/:id/stats
pub async fn get_trade_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<ExecutionStats>, ApiError> {
    let stats = state.service.execution_stats(&id).await.map_err(api_error)?;
    Ok(Json(stats))
}

/// POST /trades/:id/pause
pub async fn pause_trade(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<TradeActionResponse>, ApiError> {
    let trade = state.service.pause(&id).await.map_err(api_error)?;
    Ok(Json(action_response(trade, "paused")))
}

/// POST /trades/:id/resume
pub async fn resume_trade(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<TradeActionResponse>, ApiError> {
    let trade = state.service.resume(&id).await.map_err(api_error)?;
    Ok(Json(action_response(trade, "resumed")))
}

/// POST /trades/:id/cancel
pub async fn cancel_trade(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<TradeActionResponse>, ApiError> {
    let trade = state.service.cancel(&id).await.map_err(api_error)?;
    Ok(Json(action_response(trade, "stopped")))
}
