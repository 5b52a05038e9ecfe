use serde::{Deserialize, Serialize};

use crate::domain::TradeStatus;

// ============================================================================
// Trade Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTradeResponse {
    pub trade_id: String,
    pub message: String,
}

/// Result of a pause/resume/cancel command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeActionResponse {
    pub trade_id: String,
    pub status: TradeStatus,
    pub message: String,
}

// ============================================================================
// System Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub gateway: String,
    pub running_trades: usize,
    pub uptime_secs: i64,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// The trade's actual status when a lifecycle command did not apply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TradeStatus>,
}
