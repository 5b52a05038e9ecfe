//! Time-weighted slicing.
//!
//! Each interval the strategy withdraws its previous slice if it is still
//! resting, then submits `remaining / remaining_intervals` at the trade's
//! limit price. The last interval always carries the full remainder.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::domain::{MarketRule, Order, OrderStatus, Trade, TradeStatus};
use crate::error::{Result, TrancheError};
use crate::exchange::{ExchangeGateway, DEFAULT_BOOK_DEPTH, DEFAULT_LATEST_ORDERS_LIMIT};
use crate::markets::MarketRegistry;
use crate::store::TradeStore;

use super::params::{TwapParams, TWAP};
use super::traits::{Strategy, TickOutcome};

pub struct TwapStrategy {
    gateway: Arc<dyn ExchangeGateway>,
    store: Arc<dyn TradeStore>,
    trade: Trade,
    market: MarketRule,
    frequency: Duration,
    end_time: DateTime<Utc>,
    limit_price: Decimal,
    total_quantity: Decimal,
    remaining_quantity: Decimal,
    last_submission: Option<DateTime<Utc>>,
    /// Recent exchange orders scanned for our own resting slices
    latest_orders_limit: u32,
}

impl TwapStrategy {
    /// Resolve the market and pre-validate price and quantity.
    ///
    /// Fails with `NotFound` for an unknown symbol and `Validation` when the
    /// market is not tradable or the trade rounds to nothing.
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        store: Arc<dyn TradeStore>,
        registry: &MarketRegistry,
        trade: Trade,
        params: TwapParams,
    ) -> Result<Self> {
        params.validate()?;
        let market = registry.lookup(&trade.symbol)?.clone();
        if !market.status.is_tradable() {
            return Err(TrancheError::Validation(format!(
                "market {} is not tradable",
                market.symbol
            )));
        }

        let (limit_price, total_quantity) =
            MarketRegistry::validate(&market, trade.limit_price, trade.total_quantity)?;
        if limit_price <= Decimal::ZERO {
            return Err(TrancheError::Validation(format!(
                "limit price {} is below one price tick",
                trade.limit_price
            )));
        }
        if total_quantity <= Decimal::ZERO {
            return Err(TrancheError::Validation(format!(
                "total quantity {} is below one quantity tick",
                trade.total_quantity
            )));
        }

        if market.price_ticks(limit_price).is_none()
            || market.quantity_ticks(total_quantity).is_none()
            || limit_price.checked_mul(total_quantity).is_none()
        {
            return Err(TrancheError::Validation(format!(
                "{} @ {} exceeds what the exchange can represent",
                trade.total_quantity, trade.limit_price
            )));
        }

        let end_time = trade
            .timestamp
            .checked_add_signed(params.total_duration())
            .ok_or_else(|| {
                TrancheError::Validation(format!(
                    "end time of a {}h trade is out of range",
                    params.total_duration
                ))
            })?;

        Ok(Self {
            gateway,
            store,
            frequency: params.frequency(),
            end_time,
            limit_price,
            total_quantity,
            remaining_quantity: total_quantity,
            last_submission: None,
            latest_orders_limit: DEFAULT_LATEST_ORDERS_LIMIT,
            trade,
            market,
        })
    }

    pub fn with_latest_orders_limit(mut self, limit: u32) -> Self {
        self.latest_orders_limit = limit;
        self
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn limit_price(&self) -> Decimal {
        self.limit_price
    }

    pub fn last_submission(&self) -> Option<DateTime<Utc>> {
        self.last_submission
    }

    /// Number of intervals left before `end_time`, never below one
    fn remaining_intervals(&self, now: DateTime<Utc>) -> Decimal {
        let left_ms = Decimal::from((self.end_time - now).num_milliseconds());
        let freq_ms = Decimal::from(self.frequency.num_milliseconds().max(1));
        (left_ms / freq_ms).max(Decimal::ONE)
    }

    /// Cancel this trade's slices still resting on the book
    async fn cancel_own_live_orders(&self) -> Result<usize> {
        let own: HashSet<u64> = self
            .store
            .list_orders_for_trade(&self.trade.id)
            .await?
            .iter()
            .map(|o| o.client_order_id)
            .collect();
        if own.is_empty() {
            return Ok(0);
        }

        let mut cancelled = 0;
        for order in self.gateway.get_latest_orders(self.latest_orders_limit).await? {
            if !order.status.is_live() || !own.contains(&order.client_order_id) {
                continue;
            }
            match self.gateway.cancel_order(&order).await {
                Ok(()) => cancelled += 1,
                Err(e) => warn!(
                    trade_id = %self.trade.id,
                    client_order_id = order.client_order_id,
                    "Failed to cancel resting slice: {}", e
                ),
            }
        }
        Ok(cancelled)
    }
}

#[async_trait]
impl Strategy for TwapStrategy {
    fn trade_id(&self) -> &str {
        &self.trade.id
    }

    fn name(&self) -> &str {
        TWAP
    }

    fn remaining_quantity(&self) -> Decimal {
        self.remaining_quantity
    }

    #[instrument(skip(self), fields(trade_id = %self.trade.id))]
    async fn prepare(&mut self) -> Result<()> {
        let orders = self.store.list_orders_for_trade(&self.trade.id).await?;
        let accepted: Vec<&Order> = orders.iter().filter(|o| o.status.was_accepted()).collect();
        if accepted.is_empty() {
            return Ok(());
        }

        let consumed: Decimal = accepted.iter().map(|o| o.quantity).sum();
        self.remaining_quantity = (self.total_quantity - consumed).max(Decimal::ZERO);
        self.last_submission = accepted.iter().map(|o| o.created_at_utc()).max();

        info!(
            "Resuming with {} prior slices, remaining {} of {}",
            accepted.len(),
            self.remaining_quantity,
            self.total_quantity
        );
        Ok(())
    }

    #[instrument(skip(self), fields(trade_id = %self.trade.id))]
    async fn process_interval(&mut self, now: DateTime<Utc>) -> Result<TickOutcome> {
        self.trade = self.store.get_trade(&self.trade.id).await?;
        if self.trade.status != TradeStatus::Active {
            debug!("Trade is {}, pulling orders", self.trade.status);
            self.pause().await?;
            return Ok(TickOutcome::Stop);
        }

        if let Some(last) = self.last_submission {
            if now - last < self.frequency {
                return Ok(TickOutcome::Continue);
            }
        }

        let cancelled = self.cancel_own_live_orders().await?;
        if cancelled > 0 {
            debug!("Cancelled {} resting slices", cancelled);
        }

        match self
            .gateway
            .get_orderbook(&self.market, DEFAULT_BOOK_DEPTH)
            .await
        {
            Ok(book) => debug!(
                best_bid = ?book.best_bid().map(|l| l.price),
                best_ask = ?book.best_ask().map(|l| l.price),
                "Book snapshot"
            ),
            Err(e) => warn!("Order book unavailable: {}", e),
        }

        let interval_quantity = self.remaining_quantity / self.remaining_intervals(now);
        let (price, quantity) =
            MarketRegistry::validate(&self.market, self.limit_price, interval_quantity)?;

        if quantity <= Decimal::ZERO {
            info!(
                "Slice {} rounds to zero, remaining {} left unexecuted",
                interval_quantity, self.remaining_quantity
            );
            self.stop().await?;
            return Ok(TickOutcome::Stop);
        }

        let mut order = Order::limit_slice(&self.trade, &self.market, price, quantity, now);
        self.store.add_order(&order).await?;

        match self.gateway.place_order(&order).await {
            Ok(()) => {
                self.last_submission = Some(now);
                self.remaining_quantity = (self.remaining_quantity - quantity).max(Decimal::ZERO);
                info!(
                    client_order_id = order.client_order_id,
                    "Placed {} {} @ {}, remaining {}",
                    order.side,
                    quantity,
                    price,
                    self.remaining_quantity
                );

                // A restarted slot counts this slice even before reconciliation sees it
                order.status = OrderStatus::Open;
                if let Err(e) = self.store.update_order(&order).await {
                    warn!(
                        client_order_id = order.client_order_id,
                        "Could not record acceptance: {}", e
                    );
                }
            }
            Err(e) => {
                warn!(
                    client_order_id = order.client_order_id,
                    "Order placement failed, will retry next tick: {}", e
                );
            }
        }

        Ok(TickOutcome::Continue)
    }

    async fn pause(&mut self) -> Result<()> {
        self.gateway.cancel_market_orders(&self.market).await
    }

    #[instrument(skip(self), fields(trade_id = %self.trade.id))]
    async fn stop(&mut self) -> Result<()> {
        self.pause().await?;
        match self
            .store
            .transition_trade(&self.trade.id, TradeStatus::Active, TradeStatus::Completed)
            .await
        {
            Ok(trade) => {
                info!("Trade completed");
                self.trade = trade;
                Ok(())
            }
            // Paused or cancelled by the user in the meantime
            Err(TrancheError::InvalidState { from, .. }) => {
                debug!("Trade moved to {} before completion", from);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn wind_down(&mut self) -> Result<()> {
        let trade = self.store.get_trade(&self.trade.id).await?;
        if trade.status != TradeStatus::Active {
            self.pause().await?;
        }
        self.trade = trade;
        Ok(())
    }
}
