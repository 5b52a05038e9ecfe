use async_trait::async_trait;

use crate::domain::{Order, Trade, TradeStatus};
use crate::error::Result;

/// Persistence of trades and their orders.
///
/// The store is the single writer of record. Status changes go through
/// [`TradeStore::transition_trade`], a compare-and-set on the current status,
/// so two writers cannot both move the same trade.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Trades whose status is ACTIVE or PENDING
    async fn get_active_trades(&self) -> Result<Vec<Trade>>;

    /// Orders whose status is open or partially filled
    async fn get_live_orders(&self) -> Result<Vec<Order>>;

    /// Orders stored locally but never confirmed by the exchange
    async fn get_pending_orders(&self) -> Result<Vec<Order>>;

    /// Insert an order. Re-adding an existing client order id is a no-op.
    async fn add_order(&self, order: &Order) -> Result<()>;

    /// Update an order in place, matched by client order id
    async fn update_order(&self, order: &Order) -> Result<()>;

    /// Overwrite a trade, matched by trade id
    async fn update_trade(&self, trade: &Trade) -> Result<()>;

    async fn get_trade(&self, trade_id: &str) -> Result<Trade>;

    /// Orders of one trade, oldest first
    async fn list_orders_for_trade(&self, trade_id: &str) -> Result<Vec<Order>>;

    async fn insert_trade(&self, trade: &Trade) -> Result<()>;

    /// All trades, newest first
    async fn list_trades(&self) -> Result<Vec<Trade>>;

    /// Move a trade from `from` to `to` if it is currently in `from`.
    ///
    /// Fails with `InvalidState` carrying the actual status when it is not,
    /// or when the edge is not part of the lifecycle.
    async fn transition_trade(
        &self,
        trade_id: &str,
        from: TradeStatus,
        to: TradeStatus,
    ) -> Result<Trade>;
}
