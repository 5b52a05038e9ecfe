//! Paper exchange
//!
//! In-process stand-in for the venue, used for dry runs and tests:
//! - Post-only limit orders rest until filled or cancelled
//! - Optional auto-fill at the limit price on placement
//! - Injected placement failures for exercising retry paths
//! - Call counters for assertions

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::{
    timestamp_nanos, Balance, BookLevel, ExchangeOrder, FilledTotal, MarketRule, Order, OrderBook,
    OrderStatus, TradeSide,
};
use crate::error::{Result, TrancheError};
use crate::exchange::ExchangeGateway;
use crate::markets::MarketRegistry;

/// Maker fee charged on simulated fills, in quote currency
const PAPER_FEE_RATE: Decimal = dec!(0.0005);

/// Call counters
#[derive(Debug, Default)]
pub struct PaperStats {
    pub placed: AtomicU64,
    pub cancelled: AtomicU64,
    pub market_cancels: AtomicU64,
    pub failed_places: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaperStatsSnapshot {
    pub placed: u64,
    pub cancelled: u64,
    pub market_cancels: u64,
    pub failed_places: u64,
}

pub struct PaperExchange {
    registry: Arc<MarketRegistry>,
    /// Orders by client order id
    orders: RwLock<HashMap<u64, ExchangeOrder>>,
    /// Placement order, oldest first
    sequence: RwLock<Vec<u64>>,
    balances: RwLock<Vec<Balance>>,
    auto_fill: AtomicBool,
    fail_next: AtomicU32,
    next_exchange_id: AtomicU64,
    stats: PaperStats,
}

impl PaperExchange {
    pub fn new(registry: Arc<MarketRegistry>) -> Self {
        Self {
            registry,
            orders: RwLock::new(HashMap::new()),
            sequence: RwLock::new(Vec::new()),
            balances: RwLock::new(Vec::new()),
            auto_fill: AtomicBool::new(false),
            fail_next: AtomicU32::new(0),
            next_exchange_id: AtomicU64::new(1),
            stats: PaperStats::default(),
        }
    }

    /// Fill every order at its limit price as soon as it is placed
    pub fn with_auto_fill(self, enabled: bool) -> Self {
        self.auto_fill.store(enabled, Ordering::SeqCst);
        self
    }

    pub async fn set_balances(&self, balances: Vec<Balance>) {
        *self.balances.write().await = balances;
    }

    /// Make the next `count` placements fail with a 5xx-style gateway error
    pub fn fail_next_place(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn stats(&self) -> PaperStatsSnapshot {
        PaperStatsSnapshot {
            placed: self.stats.placed.load(Ordering::SeqCst),
            cancelled: self.stats.cancelled.load(Ordering::SeqCst),
            market_cancels: self.stats.market_cancels.load(Ordering::SeqCst),
            failed_places: self.stats.failed_places.load(Ordering::SeqCst),
        }
    }

    pub async fn order(&self, client_order_id: u64) -> Option<ExchangeOrder> {
        self.orders.read().await.get(&client_order_id).cloned()
    }

    pub async fn live_orders(&self) -> Vec<ExchangeOrder> {
        self.orders
            .read()
            .await
            .values()
            .filter(|o| o.status.is_live())
            .cloned()
            .collect()
    }

    /// Fully fill a resting order at its limit price
    pub async fn fill(&self, client_order_id: u64) -> Result<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&client_order_id)
            .ok_or_else(|| TrancheError::order_not_found(client_order_id))?;
        if !order.status.is_live() {
            return Err(TrancheError::Validation(format!(
                "order {} is {}",
                client_order_id, order.status
            )));
        }
        let quantity = order.quantity;
        Self::apply_fill(order, quantity);
        Ok(())
    }

    /// Fill part of a resting order
    pub async fn partial_fill(&self, client_order_id: u64, quantity: Decimal) -> Result<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&client_order_id)
            .ok_or_else(|| TrancheError::order_not_found(client_order_id))?;
        let already = order.filled.map(|f| f.base_amount).unwrap_or_default();
        let total = (already + quantity).min(order.quantity);
        Self::apply_fill(order, total);
        Ok(())
    }

    /// Forget an order entirely, as if the venue purged it from history
    pub async fn purge(&self, client_order_id: u64) {
        self.orders.write().await.remove(&client_order_id);
        self.sequence.write().await.retain(|id| *id != client_order_id);
    }

    fn apply_fill(order: &mut ExchangeOrder, base_filled: Decimal) {
        let now = timestamp_nanos(Utc::now());
        let quote = base_filled * order.price;
        order.filled = Some(FilledTotal {
            base_amount: base_filled,
            quote_amount: quote,
            fee_amount: (quote * PAPER_FEE_RATE).round_dp(8),
        });
        order.modified_at = Some(now);
        if base_filled >= order.quantity {
            order.status = OrderStatus::Filled;
            order.filled_at = Some(now);
        } else {
            order.status = OrderStatus::PartiallyFilled;
        }
    }

    fn cancel_in_place(order: &mut ExchangeOrder, reason: &str) -> bool {
        if !order.status.is_live() {
            return false;
        }
        let now = timestamp_nanos(Utc::now());
        order.status = OrderStatus::Cancelled;
        order.canceled_at = Some(now);
        order.modified_at = Some(now);
        order.reason = Some(reason.to_string());
        true
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn get_balances(&self) -> Result<Vec<Balance>> {
        Ok(self.balances.read().await.clone())
    }

    async fn get_latest_orders(&self, limit: u32) -> Result<Vec<ExchangeOrder>> {
        let sequence = self.sequence.read().await;
        let orders = self.orders.read().await;
        Ok(sequence
            .iter()
            .rev()
            .take(limit as usize)
            .filter_map(|id| orders.get(id).cloned())
            .collect())
    }

    async fn get_orderbook(&self, market: &MarketRule, depth: u32) -> Result<OrderBook> {
        let orders = self.orders.read().await;
        let mut book = OrderBook {
            market_id: market.market_id,
            ..Default::default()
        };
        for order in orders
            .values()
            .filter(|o| o.market_id == market.market_id && o.status.is_live())
        {
            let resting = order.quantity - order.filled.map(|f| f.base_amount).unwrap_or_default();
            let level = BookLevel {
                price: order.price,
                quantity: resting,
            };
            match order.side {
                TradeSide::Buy => book.bids.push(level),
                TradeSide::Sell => book.asks.push(level),
            }
        }
        book.bids.sort_by(|a, b| b.price.cmp(&a.price));
        book.asks.sort_by(|a, b| a.price.cmp(&b.price));
        book.bids.truncate(depth as usize);
        book.asks.truncate(depth as usize);
        Ok(book)
    }

    async fn place_order(&self, order: &Order) -> Result<()> {
        let pending_failures = self.fail_next.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fail_next.store(pending_failures - 1, Ordering::SeqCst);
            self.stats.failed_places.fetch_add(1, Ordering::SeqCst);
            return Err(TrancheError::Gateway {
                status: Some(500),
                message: "paper exchange: injected failure".to_string(),
            });
        }

        let market = self.registry.lookup(&order.symbol)?;
        if market.price_ticks(order.price).is_none()
            || market.quantity_ticks(order.quantity).is_none()
            || MarketRegistry::round_quantity(market, order.quantity)? != order.quantity
            || MarketRegistry::round_price(market, order.price)? != order.price
        {
            return Err(TrancheError::GatewayRejected {
                status: 400,
                message: format!(
                    "price {} / quantity {} not on tick grid",
                    order.price, order.quantity
                ),
            });
        }

        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.client_order_id) {
            return Err(TrancheError::GatewayRejected {
                status: 400,
                message: format!("duplicate client order id {}", order.client_order_id),
            });
        }

        let mut resting = ExchangeOrder {
            client_order_id: order.client_order_id,
            exchange_order_id: Some(self.next_exchange_id.fetch_add(1, Ordering::SeqCst)),
            market_id: market.market_id,
            side: order.side,
            price: order.price,
            quantity: order.quantity,
            status: OrderStatus::Open,
            created_at: timestamp_nanos(Utc::now()),
            modified_at: None,
            canceled_at: None,
            filled_at: None,
            filled: None,
            reason: None,
        };
        if self.auto_fill.load(Ordering::SeqCst) {
            let quantity = resting.quantity;
            Self::apply_fill(&mut resting, quantity);
        }

        debug!(
            "Paper {} {} {} @ {} -> {}",
            order.side, order.quantity, order.symbol, order.price, resting.status
        );
        orders.insert(order.client_order_id, resting);
        self.sequence.write().await.push(order.client_order_id);
        self.stats.placed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cancel_order(&self, order: &ExchangeOrder) -> Result<()> {
        let mut orders = self.orders.write().await;
        let resting = orders
            .get_mut(&order.client_order_id)
            .ok_or_else(|| TrancheError::order_not_found(order.client_order_id))?;
        if Self::cancel_in_place(resting, "cancelled by request") {
            self.stats.cancelled.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn cancel_market_orders(&self, market: &MarketRule) -> Result<()> {
        let mut orders = self.orders.write().await;
        let mut count = 0;
        for order in orders
            .values_mut()
            .filter(|o| o.market_id == market.market_id)
        {
            if Self::cancel_in_place(order, "market cancel") {
                count += 1;
            }
        }
        self.stats.market_cancels.fetch_add(1, Ordering::SeqCst);
        self.stats.cancelled.fetch_add(count, Ordering::SeqCst);
        if count > 0 {
            info!("Paper cancelled {} orders on {}", count, market.symbol);
        }
        Ok(())
    }
}
