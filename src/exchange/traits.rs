use async_trait::async_trait;

use crate::domain::{Balance, ExchangeOrder, MarketRule, Order, OrderBook};
use crate::error::Result;

/// Order book depth requested by strategies
pub const DEFAULT_BOOK_DEPTH: u32 = 1000;

/// Recent exchange orders pulled when looking for our own orders
pub const DEFAULT_LATEST_ORDERS_LIMIT: u32 = 500;

/// Signed access to the exchange.
///
/// Implementations retry transient failures (network, 5xx) a bounded number
/// of times before surfacing an error, so callers never loop on their own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get_balances(&self) -> Result<Vec<Balance>>;

    /// Most recent orders on the subaccount, newest first
    async fn get_latest_orders(&self, limit: u32) -> Result<Vec<ExchangeOrder>>;

    async fn get_orderbook(&self, market: &MarketRule, depth: u32) -> Result<OrderBook>;

    async fn place_order(&self, order: &Order) -> Result<()>;

    async fn cancel_order(&self, order: &ExchangeOrder) -> Result<()>;

    /// Cancel every resting order on the market for this subaccount
    async fn cancel_market_orders(&self, market: &MarketRule) -> Result<()>;
}
