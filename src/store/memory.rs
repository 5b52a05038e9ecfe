//! In-memory trade store, used when no database is configured and in tests.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{Order, OrderStatus, Trade, TradeStatus};
use crate::error::{Result, TrancheError};

use super::TradeStore;

#[derive(Default)]
struct Tables {
    trades: HashMap<String, Trade>,
    /// Keyed by client order id
    orders: HashMap<u64, Order>,
}

/// Trade store backed by process memory. A single write lock serializes all
/// mutations, which gives the same per-row guarantees as the database.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    fn sorted_by_creation(mut orders: Vec<Order>) -> Vec<Order> {
        orders.sort_by_key(|o| (o.created_at, o.client_order_id));
        orders
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn get_active_trades(&self) -> Result<Vec<Trade>> {
        let tables = self.tables.read().await;
        Ok(tables
            .trades
            .values()
            .filter(|t| t.status.is_schedulable())
            .cloned()
            .collect())
    }

    async fn get_live_orders(&self) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        Ok(Self::sorted_by_creation(
            tables
                .orders
                .values()
                .filter(|o| o.status.is_live())
                .cloned()
                .collect(),
        ))
    }

    async fn get_pending_orders(&self) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        Ok(Self::sorted_by_creation(
            tables
                .orders
                .values()
                .filter(|o| o.status == OrderStatus::Pending)
                .cloned()
                .collect(),
        ))
    }

    async fn add_order(&self, order: &Order) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.trades.contains_key(&order.trade_id) {
            return Err(TrancheError::trade_not_found(&order.trade_id));
        }
        if tables.orders.contains_key(&order.client_order_id) {
            debug!("Order {} already stored", order.client_order_id);
            return Ok(());
        }
        tables.orders.insert(order.client_order_id, order.clone());
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.orders.get_mut(&order.client_order_id) {
            Some(existing) => {
                *existing = order.clone();
                Ok(())
            }
            None => Err(TrancheError::order_not_found(order.client_order_id)),
        }
    }

    async fn update_trade(&self, trade: &Trade) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.trades.get_mut(&trade.id) {
            Some(existing) => {
                *existing = trade.clone();
                Ok(())
            }
            None => Err(TrancheError::trade_not_found(&trade.id)),
        }
    }

    async fn get_trade(&self, trade_id: &str) -> Result<Trade> {
        self.tables
            .read()
            .await
            .trades
            .get(trade_id)
            .cloned()
            .ok_or_else(|| TrancheError::trade_not_found(trade_id))
    }

    async fn list_orders_for_trade(&self, trade_id: &str) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        Ok(Self::sorted_by_creation(
            tables
                .orders
                .values()
                .filter(|o| o.trade_id == trade_id)
                .cloned()
                .collect(),
        ))
    }

    async fn insert_trade(&self, trade: &Trade) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.trades.contains_key(&trade.id) {
            return Err(TrancheError::Validation(format!(
                "trade {} already exists",
                trade.id
            )));
        }
        tables.trades.insert(trade.id.clone(), trade.clone());
        Ok(())
    }

    async fn list_trades(&self) -> Result<Vec<Trade>> {
        let tables = self.tables.read().await;
        let mut trades: Vec<Trade> = tables.trades.values().cloned().collect();
        trades.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(trades)
    }

    async fn transition_trade(
        &self,
        trade_id: &str,
        from: TradeStatus,
        to: TradeStatus,
    ) -> Result<Trade> {
        let mut tables = self.tables.write().await;
        let trade = tables
            .trades
            .get_mut(trade_id)
            .ok_or_else(|| TrancheError::trade_not_found(trade_id))?;

        if trade.status != from || !from.can_transition_to(to) {
            return Err(TrancheError::InvalidState {
                trade_id: trade_id.to_string(),
                from: trade.status,
                to,
            });
        }

        trade.status = to;
        Ok(trade.clone())
    }
}
