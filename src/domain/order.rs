use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MarketRule, Trade, TradeSide};

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    MarketLimit,
    MarketWithProtection,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::MarketLimit => "market_limit",
            OrderType::MarketWithProtection => "market_with_protection",
        }
    }
}

impl TryFrom<&str> for OrderType {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "limit" => Ok(OrderType::Limit),
            "market_limit" => Ok(OrderType::MarketLimit),
            "market_with_protection" => Ok(OrderType::MarketWithProtection),
            _ => Err(format!("Unknown order type: {}", s)),
        }
    }
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Immediate Or Cancel
    IOC,
    /// Good Till Cancelled
    GTC,
    /// Fill Or Kill
    FOK,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::IOC => "IOC",
            TimeInForce::GTC => "GTC",
            TimeInForce::FOK => "FOK",
        }
    }
}

impl TryFrom<&str> for TimeInForce {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "IOC" => Ok(TimeInForce::IOC),
            "GTC" => Ok(TimeInForce::GTC),
            "FOK" => Ok(TimeInForce::FOK),
            _ => Err(format!("Unknown time in force: {}", s)),
        }
    }
}

/// Order status, mirroring exchange semantics plus the local `Pending`
/// state an order row holds until the exchange confirms it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Stored locally, not yet confirmed by the exchange
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        }
    }

    /// Resting on the book (open or partially filled)
    pub fn is_live(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// The order reached the exchange and consumed part of the trade's quantity
    pub fn was_accepted(&self) -> bool {
        !matches!(self, OrderStatus::Pending | OrderStatus::Rejected)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for OrderStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "open" => Ok(OrderStatus::Open),
            "partially_filled" | "partial" => Ok(OrderStatus::PartiallyFilled),
            "filled" => Ok(OrderStatus::Filled),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            "rejected" => Ok(OrderStatus::Rejected),
            _ => Err(format!("Unknown order status: {}", s)),
        }
    }
}

/// Cumulative fill totals reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilledTotal {
    pub base_amount: Decimal,
    pub quote_amount: Decimal,
    pub fee_amount: Decimal,
}

/// Nanoseconds since the unix epoch
pub fn timestamp_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt()
        .unwrap_or_else(|| at.timestamp_micros().saturating_mul(1_000))
}

/// Client order ids are positive 63-bit integers so they fit a signed BIGINT column
pub fn next_client_order_id() -> u64 {
    (Uuid::new_v4().as_u128() >> 65) as u64
}

/// Order (one exchange submission, tracked in our system)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Stable identifier that survives the exchange round trip
    pub client_order_id: u64,
    pub exchange_order_id: Option<u64>,
    pub trade_id: String,
    pub symbol: String,
    pub market_id: i64,
    pub side: TradeSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub status: OrderStatus,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub post_only: bool,
    /// Nanoseconds
    pub created_at: i64,
    pub modified_at: Option<i64>,
    pub canceled_at: Option<i64>,
    pub filled_at: Option<i64>,
    pub base_amount: Option<Decimal>,
    pub quote_amount: Option<Decimal>,
    pub fee_amount: Option<Decimal>,
    pub reason: Option<String>,
}

impl Order {
    /// Build a post-only GTC limit slice for `trade` with already validated
    /// price and quantity.
    pub fn limit_slice(
        trade: &Trade,
        market: &MarketRule,
        price: Decimal,
        quantity: Decimal,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            client_order_id: next_client_order_id(),
            exchange_order_id: None,
            trade_id: trade.id.clone(),
            symbol: trade.symbol.clone(),
            market_id: market.market_id,
            side: trade.side,
            price,
            quantity,
            status: OrderStatus::Pending,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::GTC,
            post_only: true,
            created_at: timestamp_nanos(at),
            modified_at: None,
            canceled_at: None,
            filled_at: None,
            base_amount: None,
            quote_amount: None,
            fee_amount: None,
            reason: None,
        }
    }

    /// Merge exchange-reported state into this row.
    ///
    /// Returns true when any field changed. Identity fields (ids, trade,
    /// price, quantity) are never touched.
    pub fn merge_exchange_state(&mut self, remote: &ExchangeOrder) -> bool {
        let before = (
            self.exchange_order_id,
            self.status,
            self.modified_at,
            self.canceled_at,
            self.filled_at,
            self.base_amount,
            self.quote_amount,
            self.fee_amount,
            self.reason.clone(),
        );

        if remote.exchange_order_id.is_some() {
            self.exchange_order_id = remote.exchange_order_id;
        }
        self.status = remote.status;
        self.modified_at = remote.modified_at.or(self.modified_at);
        self.canceled_at = remote.canceled_at.or(self.canceled_at);
        self.filled_at = remote.filled_at.or(self.filled_at);
        if let Some(filled) = remote.filled {
            self.base_amount = Some(filled.base_amount);
            self.quote_amount = Some(filled.quote_amount);
            self.fee_amount = Some(filled.fee_amount);
        }
        if remote.reason.is_some() {
            self.reason = remote.reason.clone();
        }

        let after = (
            self.exchange_order_id,
            self.status,
            self.modified_at,
            self.canceled_at,
            self.filled_at,
            self.base_amount,
            self.quote_amount,
            self.fee_amount,
            self.reason.clone(),
        );
        before != after
    }

    /// Order notional at the limit price
    pub fn value(&self) -> Decimal {
        self.price * self.quantity
    }

    pub fn created_at_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.created_at)
    }

    pub fn filled_at_utc(&self) -> Option<DateTime<Utc>> {
        self.filled_at.map(DateTime::from_timestamp_nanos)
    }
}

/// Order as reported by the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub client_order_id: u64,
    pub exchange_order_id: Option<u64>,
    pub market_id: i64,
    pub side: TradeSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub status: OrderStatus,
    pub created_at: i64,
    pub modified_at: Option<i64>,
    pub canceled_at: Option<i64>,
    pub filled_at: Option<i64>,
    pub filled: Option<FilledTotal>,
    pub reason: Option<String>,
}
