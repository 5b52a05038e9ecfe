//! Read models for the API: trade details, execution statistics and the
//! trade list. Only FILLED orders count toward executed quantity.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{Order, OrderStatus, Trade, TradeSide, TradeStatus};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Clone, Serialize)]
pub struct OrderInfo {
    pub order_id: String,
    pub client_order_id: u64,
    pub exchange_order_id: Option<u64>,
    pub symbol: String,
    pub side: TradeSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub base_amount: Option<Decimal>,
    pub quote_amount: Option<Decimal>,
    pub fee_amount: Option<Decimal>,
    pub reason: Option<String>,
}

impl From<&Order> for OrderInfo {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id.clone(),
            client_order_id: order.client_order_id,
            exchange_order_id: order.exchange_order_id,
            symbol: order.symbol.clone(),
            side: order.side,
            price: order.price,
            quantity: order.quantity,
            status: order.status,
            created_at: order.created_at_utc(),
            filled_at: order.filled_at_utc(),
            base_amount: order.base_amount,
            quote_amount: order.quote_amount,
            fee_amount: order.fee_amount,
            reason: order.reason.clone(),
        }
    }
}

/// A trade with all of its orders
#[derive(Debug, Clone, Serialize)]
pub struct TradeInfo {
    pub trade_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub total_quantity: Decimal,
    pub limit_price: Decimal,
    pub strategy: String,
    pub strategy_params: serde_json::Value,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
    pub orders_count: usize,
    pub orders: Vec<OrderInfo>,
}

impl TradeInfo {
    pub fn new(trade: &Trade, orders: &[Order]) -> Self {
        Self {
            trade_id: trade.id.clone(),
            symbol: trade.symbol.clone(),
            side: trade.side,
            total_quantity: trade.total_quantity,
            limit_price: trade.limit_price,
            strategy: trade.strategy.clone(),
            strategy_params: trade.strategy_params.clone(),
            status: trade.status,
            created_at: trade.timestamp,
            orders_count: orders.len(),
            orders: orders.iter().map(OrderInfo::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderCounts {
    pub total: usize,
    pub pending: usize,
    pub filled: usize,
    pub open: usize,
    pub canceled: usize,
    pub rejected: usize,
    /// Filled orders as a percentage of all orders
    pub fill_rate: Decimal,
}

impl OrderCounts {
    fn from_orders(orders: &[Order]) -> Self {
        let count = |pred: fn(&OrderStatus) -> bool| {
            orders.iter().filter(|o| pred(&o.status)).count()
        };

        let total = orders.len();
        let filled = count(|s| *s == OrderStatus::Filled);
        Self {
            total,
            pending: count(|s| *s == OrderStatus::Pending),
            filled,
            open: count(OrderStatus::is_live),
            canceled: count(|s| *s == OrderStatus::Cancelled),
            rejected: count(|s| *s == OrderStatus::Rejected),
            fill_rate: percent(Decimal::from(filled), Decimal::from(total)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStats {
    pub trade_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub strategy: String,
    pub status: TradeStatus,
    pub total_target_quantity: Decimal,
    pub total_executed_quantity: Decimal,
    pub execution_progress: Decimal,
    /// VWAP over filled orders
    pub average_execution_price: Decimal,
    pub limit_price: Decimal,
    pub price_improvement_percent: Decimal,
    pub total_execution_value: Decimal,
    pub total_fees: Decimal,
    pub execution_time_seconds: f64,
    pub orders_statistics: OrderCounts,
}

impl ExecutionStats {
    pub fn compute(trade: &Trade, orders: &[Order]) -> Self {
        let fills = FillTotals::from_orders(orders);
        let vwap = fills.vwap();

        let price_improvement_percent = if vwap.is_zero() || trade.limit_price.is_zero() {
            Decimal::ZERO
        } else {
            let edge = match trade.side {
                TradeSide::Buy => trade.limit_price - vwap,
                TradeSide::Sell => vwap - trade.limit_price,
            };
            edge / trade.limit_price * HUNDRED
        };

        Self {
            trade_id: trade.id.clone(),
            symbol: trade.symbol.clone(),
            side: trade.side,
            strategy: trade.strategy.clone(),
            status: trade.status,
            total_target_quantity: trade.total_quantity,
            total_executed_quantity: fills.base,
            execution_progress: percent(fills.base, trade.total_quantity),
            average_execution_price: vwap,
            limit_price: trade.limit_price,
            price_improvement_percent,
            total_execution_value: fills.quote,
            total_fees: fills.fee,
            execution_time_seconds: execution_time_seconds(orders),
            orders_statistics: OrderCounts::from_orders(orders),
        }
    }
}

/// One row of the trade list
#[derive(Debug, Clone, Serialize)]
pub struct TradeSummary {
    pub trade_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub strategy: String,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
    pub target_quantity: Decimal,
    pub executed_quantity: Decimal,
    pub progress: Decimal,
    pub avg_price: Decimal,
    pub limit_price: Decimal,
    pub orders_count: usize,
    pub filled_orders_count: usize,
}

impl TradeSummary {
    pub fn compute(trade: &Trade, orders: &[Order]) -> Self {
        let fills = FillTotals::from_orders(orders);
        Self {
            trade_id: trade.id.clone(),
            symbol: trade.symbol.clone(),
            side: trade.side,
            strategy: trade.strategy.clone(),
            status: trade.status,
            created_at: trade.timestamp,
            target_quantity: trade.total_quantity,
            executed_quantity: fills.base,
            progress: percent(fills.base, trade.total_quantity),
            avg_price: fills.vwap(),
            limit_price: trade.limit_price,
            orders_count: orders.len(),
            filled_orders_count: fills.count,
        }
    }
}

#[derive(Debug, Default)]
struct FillTotals {
    base: Decimal,
    quote: Decimal,
    fee: Decimal,
    count: usize,
}

impl FillTotals {
    fn from_orders(orders: &[Order]) -> Self {
        orders
            .iter()
            .filter(|o| o.status == OrderStatus::Filled)
            .fold(Self::default(), |mut acc, o| {
                acc.base += o.base_amount.unwrap_or_default();
                acc.quote += o.quote_amount.unwrap_or_default();
                acc.fee += o.fee_amount.unwrap_or_default();
                acc.count += 1;
                acc
            })
    }

    fn vwap(&self) -> Decimal {
        if self.base.is_zero() {
            Decimal::ZERO
        } else {
            self.quote / self.base
        }
    }
}

fn percent(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        Decimal::ZERO
    } else {
        (part / whole * HUNDRED).normalize()
    }
}

/// First filled order's creation to the last fill
fn execution_time_seconds(orders: &[Order]) -> f64 {
    let filled = orders.iter().filter(|o| o.status == OrderStatus::Filled);
    let first_created = filled.clone().map(|o| o.created_at).min();
    let last_fill = filled.filter_map(|o| o.filled_at).max();

    match (first_created, last_fill) {
        (Some(start), Some(end)) if end > start => (end - start) as f64 / 1e9,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{timestamp_nanos, MarketRule};
    use rust_decimal_macros::dec;

    fn trade(side: TradeSide) -> Trade {
        Trade::new(
            "BTCUSDC",
            side,
            dec!(1),
            dec!(50000),
            "twap",
            serde_json::json!({"frequency": 60, "total_duration": 1}),
        )
    }

    fn filled(
        trade: &Trade,
        qty: Decimal,
        price: Decimal,
        created_secs: i64,
        filled_secs: i64,
    ) -> Order {
        let market = MarketRule::new(100004, "BTCUSDC", dec!(0.1), dec!(0.00001));
        let created = DateTime::from_timestamp(1_700_000_000 + created_secs, 0).unwrap();
        let mut order = Order::limit_slice(trade, &market, price, qty, created);
        order.status = OrderStatus::Filled;
        order.base_amount = Some(qty);
        order.quote_amount = Some(qty * price);
        order.fee_amount = Some(dec!(1));
        order.filled_at = Some(timestamp_nanos(
            DateTime::from_timestamp(1_700_000_000 + filled_secs, 0).unwrap(),
        ));
        order
    }

    #[test]
    fn test_half_filled_trade_reports_fifty_percent() {
        let trade = trade(TradeSide::Buy);
        let orders = vec![
            filled(&trade, dec!(0.25), dec!(49000), 0, 30),
            filled(&trade, dec!(0.25), dec!(49500), 60, 90),
        ];

        let stats = ExecutionStats::compute(&trade, &orders);
        assert_eq!(stats.execution_progress, dec!(50));
        assert_eq!(stats.total_executed_quantity, dec!(0.5));
        assert_eq!(stats.average_execution_price, dec!(49250));
        assert_eq!(stats.price_improvement_percent, dec!(1.5));
        assert_eq!(stats.total_fees, dec!(2));
        assert_eq!(stats.execution_time_seconds, 90.0);
        assert_eq!(stats.orders_statistics.filled, 2);
        assert_eq!(stats.orders_statistics.fill_rate, dec!(100));
    }

    #[test]
    fn test_sell_side_improvement_sign() {
        let trade = trade(TradeSide::Sell);
        let orders = vec![filled(&trade, dec!(0.1), dec!(51000), 0, 10)];

        let stats = ExecutionStats::compute(&trade, &orders);
        assert_eq!(stats.price_improvement_percent, dec!(2));
    }

    #[test]
    fn test_no_fills() {
        let trade = trade(TradeSide::Buy);
        let market = MarketRule::new(100004, "BTCUSDC", dec!(0.1), dec!(0.00001));
        let mut open = Order::limit_slice(&trade, &market, dec!(50000), dec!(0.1), Utc::now());
        open.status = OrderStatus::Open;
        let pending = Order::limit_slice(&trade, &market, dec!(50000), dec!(0.1), Utc::now());

        let stats = ExecutionStats::compute(&trade, &[open, pending]);
        assert_eq!(stats.execution_progress, Decimal::ZERO);
        assert_eq!(stats.average_execution_price, Decimal::ZERO);
        assert_eq!(stats.price_improvement_percent, Decimal::ZERO);
        assert_eq!(stats.execution_time_seconds, 0.0);
        assert_eq!(stats.orders_statistics.open, 1);
        assert_eq!(stats.orders_statistics.pending, 1);
        assert_eq!(stats.orders_statistics.fill_rate, Decimal::ZERO);
    }

    #[test]
    fn test_summary_ignores_cancelled_orders() {
        let trade = trade(TradeSide::Buy);
        let mut cancelled = filled(&trade, dec!(0.3), dec!(50000), 0, 10);
        cancelled.status = OrderStatus::Cancelled;
        let orders = vec![filled(&trade, dec!(0.2), dec!(50000), 0, 10), cancelled];

        let summary = TradeSummary::compute(&trade, &orders);
        assert_eq!(summary.executed_quantity, dec!(0.2));
        assert_eq!(summary.progress, dec!(20));
        assert_eq!(summary.orders_count, 2);
        assert_eq!(summary.filled_orders_count, 1);
    }
}
