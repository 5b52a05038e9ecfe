use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Listing status of a market. The catalogue encodes it as an integer:
/// 1 and 2 are tradable, 3 is delisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MarketStatus {
    Active,
    ActiveRestricted,
    Inactive,
}

impl MarketStatus {
    pub fn is_tradable(&self) -> bool {
        !matches!(self, MarketStatus::Inactive)
    }
}

impl TryFrom<u8> for MarketStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MarketStatus::Active),
            2 => Ok(MarketStatus::ActiveRestricted),
            3 => Ok(MarketStatus::Inactive),
            other => Err(format!("Unknown market status: {}", other)),
        }
    }
}

impl From<MarketStatus> for u8 {
    fn from(status: MarketStatus) -> Self {
        match status {
            MarketStatus::Active => 1,
            MarketStatus::ActiveRestricted => 2,
            MarketStatus::Inactive => 3,
        }
    }
}

fn default_band_pct() -> u32 {
    100
}

/// Per-symbol trading constraints from the exchange catalogue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketRule {
    pub market_id: i64,
    pub symbol: String,
    pub base_asset_id: i64,
    pub base_lot_size: Decimal,
    pub quote_asset_id: i64,
    pub quote_lot_size: Decimal,
    pub price_display_decimals: u32,
    pub protection_price_levels: u32,
    #[serde(default = "default_band_pct")]
    pub price_band_bid_pct: u32,
    #[serde(default = "default_band_pct")]
    pub price_band_ask_pct: u32,
    pub price_tick_size: Decimal,
    pub quantity_tick_size: Decimal,
    pub fee_table_id: i64,
    pub status: MarketStatus,
    #[serde(default)]
    pub display_rank: u32,
    #[serde(default)]
    pub listed_at: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

impl MarketRule {
    /// Minimal tradable market with the given ticks
    pub fn new(
        market_id: i64,
        symbol: impl Into<String>,
        price_tick_size: Decimal,
        quantity_tick_size: Decimal,
    ) -> Self {
        Self {
            market_id,
            symbol: symbol.into(),
            base_asset_id: 0,
            base_lot_size: Decimal::ONE,
            quote_asset_id: 0,
            quote_lot_size: Decimal::ONE,
            price_display_decimals: price_tick_size.scale(),
            protection_price_levels: 0,
            price_band_bid_pct: default_band_pct(),
            price_band_ask_pct: default_band_pct(),
            price_tick_size,
            quantity_tick_size,
            fee_table_id: 0,
            status: MarketStatus::Active,
            display_rank: 0,
            listed_at: None,
            is_primary: false,
        }
    }

    /// Convert a price to an integer count of price ticks
    pub fn price_ticks(&self, price: Decimal) -> Option<u64> {
        to_ticks(price, self.price_tick_size)
    }

    /// Convert a quantity to an integer count of quantity ticks
    pub fn quantity_ticks(&self, quantity: Decimal) -> Option<u64> {
        to_ticks(quantity, self.quantity_tick_size)
    }

    pub fn price_from_ticks(&self, ticks: u64) -> Decimal {
        Decimal::from(ticks) * self.price_tick_size
    }

    pub fn quantity_from_ticks(&self, ticks: u64) -> Decimal {
        Decimal::from(ticks) * self.quantity_tick_size
    }
}

fn to_ticks(value: Decimal, tick: Decimal) -> Option<u64> {
    if tick <= Decimal::ZERO || value < Decimal::ZERO {
        return None;
    }
    value.checked_div(tick)?.trunc().to_u64()
}

/// One price level of an order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Order book snapshot (bids best-first descending, asks best-first ascending)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub market_id: i64,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    /// Mid price when both sides are present
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::TWO),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }
}

/// Asset balance on the trading subaccount
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub asset_id: i64,
    pub symbol: Option<String>,
    pub total: Decimal,
    pub available: Decimal,
}
