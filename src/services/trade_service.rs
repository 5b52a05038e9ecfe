use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::domain::{Trade, TradeSide, TradeStatus};
use crate::error::{Result, TrancheError};
use crate::exchange::ExchangeGateway;
use crate::scheduler::TradeScheduler;
use crate::store::TradeStore;
use crate::strategy::{StrategyFactory, StrategyInfo};

use super::stats::{ExecutionStats, TradeInfo, TradeSummary};

/// Trade creation request
#[derive(Debug, Clone, Deserialize)]
pub struct NewTrade {
    pub symbol: String,
    pub side: String,
    pub total_quantity: Decimal,
    pub limit_price: Decimal,
    pub strategy: String,
    #[serde(default = "empty_params")]
    pub strategy_params: serde_json::Value,
}

fn empty_params() -> serde_json::Value {
    serde_json::json!({})
}

/// Backend of the trade API: creation, lifecycle commands and read models.
///
/// Lifecycle commands move the trade's status with a compare-and-set first
/// and only then touch the scheduler, so a rejected command changes nothing.
pub struct TradeService {
    store: Arc<dyn TradeStore>,
    gateway: Arc<dyn ExchangeGateway>,
    factory: StrategyFactory,
    scheduler: Option<Arc<TradeScheduler>>,
}

impl TradeService {
    pub fn new(
        store: Arc<dyn TradeStore>,
        gateway: Arc<dyn ExchangeGateway>,
        factory: StrategyFactory,
    ) -> Self {
        Self {
            store,
            gateway,
            factory,
            scheduler: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<TradeScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Validate and persist a new PENDING trade, returning its id.
    ///
    /// The trade is picked up by the next reconciliation pass.
    #[instrument(skip(self, request), fields(symbol = %request.symbol))]
    pub async fn create_trade(&self, request: NewTrade) -> Result<String> {
        let side = TradeSide::try_from(request.side.as_str()).map_err(TrancheError::Validation)?;
        if request.total_quantity <= Decimal::ZERO {
            return Err(TrancheError::Validation(
                "total_quantity must be positive".to_string(),
            ));
        }
        if request.limit_price <= Decimal::ZERO {
            return Err(TrancheError::Validation(
                "limit_price must be positive".to_string(),
            ));
        }

        let trade = Trade::new(
            request.symbol,
            side,
            request.total_quantity,
            request.limit_price,
            request.strategy.to_lowercase(),
            request.strategy_params,
        );

        // Unknown market or strategy is a bad request here, not a missing resource
        self.factory.check(&trade).map_err(|e| match e {
            TrancheError::NotFound { .. } => TrancheError::Validation(e.to_string()),
            other => other,
        })?;

        self.store.insert_trade(&trade).await?;
        info!(
            trade_id = %trade.id,
            "Created {} {} {} @ {}",
            trade.side, trade.total_quantity, trade.symbol, trade.limit_price
        );
        Ok(trade.id)
    }

    /// ACTIVE -> PAUSED, then stop the slot and cancel resting orders
    #[instrument(skip(self))]
    pub async fn pause(&self, trade_id: &str) -> Result<Trade> {
        let trade = self
            .store
            .transition_trade(trade_id, TradeStatus::Active, TradeStatus::Paused)
            .await?;
        self.halt(&trade).await;
        info!("Trade paused");
        Ok(trade)
    }

    /// PAUSED -> ACTIVE, then start a slot right away
    #[instrument(skip(self))]
    pub async fn resume(&self, trade_id: &str) -> Result<Trade> {
        let trade = self
            .store
            .transition_trade(trade_id, TradeStatus::Paused, TradeStatus::Active)
            .await?;
        if let Some(scheduler) = &self.scheduler {
            if let Err(e) = scheduler.admit(&trade).await {
                warn!("Resumed trade could not be admitted: {}", e);
            }
        }
        info!("Trade resumed");
        Ok(trade)
    }

    /// ACTIVE -> STOPPED, then stop the slot and cancel resting orders
    #[instrument(skip(self))]
    pub async fn cancel(&self, trade_id: &str) -> Result<Trade> {
        let trade = self
            .store
            .transition_trade(trade_id, TradeStatus::Active, TradeStatus::Stopped)
            .await?;
        self.halt(&trade).await;
        info!("Trade stopped");
        Ok(trade)
    }

    /// Retire the trade's slot. Its wind-down cancels the market's orders;
    /// with no slot to retire the orders are cancelled here instead.
    async fn halt(&self, trade: &Trade) {
        let retired = match &self.scheduler {
            Some(scheduler) => scheduler.retire(&trade.id).await,
            None => false,
        };
        if retired {
            return;
        }

        match self.factory.registry().lookup(&trade.symbol) {
            Ok(market) => {
                if let Err(e) = self.gateway.cancel_market_orders(market).await {
                    warn!("Cancelling orders for {} failed: {}", trade.symbol, e);
                }
            }
            Err(e) => warn!("Cannot cancel orders: {}", e),
        }
    }

    pub async fn trade_info(&self, trade_id: &str) -> Result<TradeInfo> {
        let trade = self.store.get_trade(trade_id).await?;
        let orders = self.store.list_orders_for_trade(trade_id).await?;
        Ok(TradeInfo::new(&trade, &orders))
    }

    pub async fn execution_stats(&self, trade_id: &str) -> Result<ExecutionStats> {
        let trade = self.store.get_trade(trade_id).await?;
        let orders = self.store.list_orders_for_trade(trade_id).await?;
        Ok(ExecutionStats::compute(&trade, &orders))
    }

    pub async fn list_summaries(&self) -> Result<Vec<TradeSummary>> {
        let trades = self.store.list_trades().await?;
        let mut summaries = Vec::with_capacity(trades.len());
        for trade in &trades {
            let orders = self.store.list_orders_for_trade(&trade.id).await?;
            summaries.push(TradeSummary::compute(trade, &orders));
        }
        Ok(summaries)
    }

    pub fn strategies(&self) -> Vec<StrategyInfo> {
        StrategyFactory::available_strategies()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::PaperExchange;
    use crate::domain::{MarketRule, Order};
    use crate::markets::MarketRegistry;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    fn setup() -> (TradeService, Arc<MemoryStore>, Arc<PaperExchange>) {
        let registry = Arc::new(
            MarketRegistry::new(vec![MarketRule::new(
                100004,
                "BTCUSDC",
                dec!(0.1),
                dec!(0.00001),
            )])
            .unwrap(),
        );
        let store = Arc::new(MemoryStore::new());
        let exchange = Arc::new(PaperExchange::new(registry.clone()));
        let factory = StrategyFactory::new(exchange.clone(), store.clone(), registry);
        let service = TradeService::new(store.clone(), exchange.clone(), factory);
        (service, store, exchange)
    }

    fn request() -> NewTrade {
        NewTrade {
            symbol: "BTCUSDC".to_string(),
            side: "buy".to_string(),
            total_quantity: dec!(1),
            limit_price: dec!(50000),
            strategy: "TWAP".to_string(),
            strategy_params: serde_json::json!({"frequency": 60, "total_duration": 1}),
        }
    }

    #[tokio::test]
    async fn test_create_trade_persists_pending() {
        let (service, store, _) = setup();
        let id = assert_ok!(service.create_trade(request()).await);

        let trade = assert_ok!(store.get_trade(&id).await);
        assert_eq!(trade.status, TradeStatus::Pending);
        assert_eq!(trade.strategy, "twap");
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_create_trade_validation() {
        let (service, _, _) = setup();

        let mut bad_side = request();
        bad_side.side = "hold".to_string();
        let mut zero_qty = request();
        zero_qty.total_quantity = Decimal::ZERO;
        let mut bad_price = request();
        bad_price.limit_price = dec!(-1);
        let mut unknown_market = request();
        unknown_market.symbol = "DOGEUSDC".to_string();
        let mut unknown_strategy = request();
        unknown_strategy.strategy = "iceberg".to_string();
        let mut bad_params = request();
        bad_params.strategy_params = serde_json::json!({"frequency": 0});

        for req in [bad_side, zero_qty, bad_price, unknown_market, unknown_strategy, bad_params] {
            let err = assert_err!(service.create_trade(req).await);
            assert!(matches!(err, TrancheError::Validation(_)), "{err}");
        }
    }

    #[tokio::test]
    async fn test_create_trade_rejects_oversized_values() {
        let (service, store, _) = setup();

        let mut endless = request();
        endless.strategy_params = serde_json::json!({
            "frequency": 60,
            "total_duration": "79228162514264337593543950335"
        });
        let mut millennia = request();
        millennia.strategy_params =
            serde_json::json!({"frequency": 60, "total_duration": "100000000000"});
        let mut max_qty = request();
        max_qty.total_quantity = Decimal::MAX;
        let mut max_price = request();
        max_price.limit_price = Decimal::MAX;

        for req in [endless, millennia, max_qty, max_price] {
            let err = assert_err!(service.create_trade(req).await);
            assert!(matches!(err, TrancheError::Validation(_)), "{err}");
        }
        assert!(store.list_trades().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pause_requires_active() {
        let (service, store, _) = setup();
        let id = service.create_trade(request()).await.unwrap();

        let err = service.pause(&id).await.unwrap_err();
        assert!(matches!(
            err,
            TrancheError::InvalidState {
                from: TradeStatus::Pending,
                to: TradeStatus::Paused,
                ..
            }
        ));
        assert_eq!(store.get_trade(&id).await.unwrap().status, TradeStatus::Pending);
    }

    #[tokio::test]
    async fn test_pause_without_slot_cancels_orders() {
        let (service, store, exchange) = setup();
        let id = service.create_trade(request()).await.unwrap();
        store
            .transition_trade(&id, TradeStatus::Pending, TradeStatus::Active)
            .await
            .unwrap();

        let trade = store.get_trade(&id).await.unwrap();
        let market = MarketRule::new(100004, "BTCUSDC", dec!(0.1), dec!(0.00001));
        let order = Order::limit_slice(&trade, &market, dec!(50000), dec!(0.01666), Utc::now());
        store.add_order(&order).await.unwrap();
        exchange.place_order(&order).await.unwrap();

        let paused = service.pause(&id).await.unwrap();
        assert_eq!(paused.status, TradeStatus::Paused);
        assert!(exchange.live_orders().await.is_empty());
        assert_eq!(exchange.stats().market_cancels, 1);

        let resumed = service.resume(&id).await.unwrap();
        assert_eq!(resumed.status, TradeStatus::Active);

        let stopped = service.cancel(&id).await.unwrap();
        assert_eq!(stopped.status, TradeStatus::Stopped);
        assert!(service.resume(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_trade_is_not_found() {
        let (service, _, _) = setup();
        assert!(service.trade_info("nope").await.unwrap_err().is_not_found());
        assert!(service.execution_stats("nope").await.unwrap_err().is_not_found());
        assert!(service.cancel("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_summaries_newest_first() {
        let (service, _, _) = setup();
        let first = service.create_trade(request()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = service.create_trade(request()).await.unwrap();

        let summaries = service.list_summaries().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].trade_id, second);
        assert_eq!(summaries[1].trade_id, first);
    }
}
