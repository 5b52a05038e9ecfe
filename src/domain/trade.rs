use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TradeStatus;

/// Trade side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TradeSide {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "buy" | "bid" => Ok(TradeSide::Buy),
            "sell" | "ask" => Ok(TradeSide::Sell),
            _ => Err(format!("Unknown side: {}", s)),
        }
    }
}

/// A user's request to execute `total_quantity` of `symbol` at or better
/// than `limit_price` using a named strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub total_quantity: Decimal,
    pub limit_price: Decimal,
    pub strategy: String,
    /// Strategy-specific parameters, interpreted only by the strategy
    pub strategy_params: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub status: TradeStatus,
}

impl Trade {
    pub fn new(
        symbol: impl Into<String>,
        side: TradeSide,
        total_quantity: Decimal,
        limit_price: Decimal,
        strategy: impl Into<String>,
        strategy_params: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            total_quantity,
            limit_price,
            strategy: strategy.into(),
            strategy_params,
            timestamp: Utc::now(),
            status: TradeStatus::Pending,
        }
    }
}
