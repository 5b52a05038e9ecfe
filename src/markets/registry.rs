//! Read-only registry of per-symbol market rules.
//!
//! Loaded once at startup from the exchange catalogue and shared behind an
//! `Arc`; nothing mutates it afterwards.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, instrument};

use crate::domain::MarketRule;
use crate::error::{Result, TrancheError};

#[derive(Debug, Deserialize)]
struct CatalogueEnvelope {
    result: CatalogueResult,
}

#[derive(Debug, Deserialize)]
struct CatalogueResult {
    markets: Vec<MarketRule>,
}

#[derive(Debug, Clone, Default)]
pub struct MarketRegistry {
    by_symbol: HashMap<String, MarketRule>,
    symbol_by_id: HashMap<i64, String>,
}

impl MarketRegistry {
    /// Build a registry, rejecting duplicate symbols and non-positive ticks
    pub fn new(markets: Vec<MarketRule>) -> Result<Self> {
        let mut by_symbol = HashMap::with_capacity(markets.len());
        let mut symbol_by_id = HashMap::with_capacity(markets.len());

        for market in markets {
            if market.price_tick_size <= Decimal::ZERO || market.quantity_tick_size <= Decimal::ZERO
            {
                return Err(TrancheError::Validation(format!(
                    "market {} has a non-positive tick size",
                    market.symbol
                )));
            }
            if by_symbol.contains_key(&market.symbol) {
                return Err(TrancheError::Validation(format!(
                    "duplicate market symbol in catalogue: {}",
                    market.symbol
                )));
            }
            symbol_by_id.insert(market.market_id, market.symbol.clone());
            by_symbol.insert(market.symbol.clone(), market);
        }

        Ok(Self {
            by_symbol,
            symbol_by_id,
        })
    }

    /// Parse a catalogue document of the form `{"result": {"markets": [...]}}`
    pub fn from_json(raw: &str) -> Result<Self> {
        let envelope: CatalogueEnvelope = serde_json::from_str(raw)?;
        Self::new(envelope.result.markets)
    }

    #[instrument]
    pub fn load(path: impl AsRef<Path> + std::fmt::Debug) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let registry = Self::from_json(&raw)?;
        info!("Loaded {} markets", registry.len());
        Ok(registry)
    }

    pub fn lookup(&self, symbol: &str) -> Result<&MarketRule> {
        self.by_symbol
            .get(symbol)
            .ok_or_else(|| TrancheError::market_not_found(symbol))
    }

    pub fn by_market_id(&self, market_id: i64) -> Option<&MarketRule> {
        self.symbol_by_id
            .get(&market_id)
            .and_then(|symbol| self.by_symbol.get(symbol))
    }

    pub fn markets(&self) -> impl Iterator<Item = &MarketRule> {
        self.by_symbol.values()
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }

    /// Round a price down to the nearest multiple of the market's price tick
    pub fn round_price(market: &MarketRule, price: Decimal) -> Result<Decimal> {
        round_down(price, market.price_tick_size)
            .ok_or_else(|| TrancheError::Validation(format!("price {price} is out of range")))
    }

    /// Round a quantity down to the nearest multiple of the market's quantity tick
    pub fn round_quantity(market: &MarketRule, quantity: Decimal) -> Result<Decimal> {
        round_down(quantity, market.quantity_tick_size)
            .ok_or_else(|| TrancheError::Validation(format!("quantity {quantity} is out of range")))
    }

    /// Round both price and quantity. Rounding never increases either value,
    /// so a slice can never exceed what was asked for.
    pub fn validate(
        market: &MarketRule,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<(Decimal, Decimal)> {
        Ok((
            Self::round_price(market, price)?,
            Self::round_quantity(market, quantity)?,
        ))
    }
}

/// `None` when the tick count does not fit in a decimal
fn round_down(value: Decimal, tick: Decimal) -> Option<Decimal> {
    let ticks = value.checked_div(tick)?.trunc();
    Some(ticks.checked_mul(tick)?.normalize())
}
