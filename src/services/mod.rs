//! Application services behind the HTTP API

mod stats;
mod trade_service;

pub use stats::{ExecutionStats, OrderCounts, OrderInfo, TradeInfo, TradeSummary};
pub use trade_service::{NewTrade, TradeService};
