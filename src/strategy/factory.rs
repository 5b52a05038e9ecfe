use std::sync::Arc;

use crate::domain::Trade;
use crate::error::Result;
use crate::exchange::{ExchangeGateway, DEFAULT_LATEST_ORDERS_LIMIT};
use crate::markets::MarketRegistry;
use crate::store::TradeStore;

use super::params::{StrategyParams, TWAP};
use super::traits::Strategy;
use super::twap::TwapStrategy;

/// Builds strategy instances for trades
#[derive(Clone)]
pub struct StrategyFactory {
    gateway: Arc<dyn ExchangeGateway>,
    store: Arc<dyn TradeStore>,
    registry: Arc<MarketRegistry>,
    latest_orders_limit: u32,
}

impl StrategyFactory {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        store: Arc<dyn TradeStore>,
        registry: Arc<MarketRegistry>,
    ) -> Self {
        Self {
            gateway,
            store,
            registry,
            latest_orders_limit: DEFAULT_LATEST_ORDERS_LIMIT,
        }
    }

    /// How many recent exchange orders strategies scan for their own slices
    pub fn with_latest_orders_limit(mut self, limit: u32) -> Self {
        self.latest_orders_limit = limit;
        self
    }

    /// Decode the trade's parameters and construct its strategy
    pub fn build(&self, trade: &Trade) -> Result<Box<dyn Strategy>> {
        match StrategyParams::decode(&trade.strategy, &trade.strategy_params)? {
            StrategyParams::Twap(params) => Ok(Box::new(
                TwapStrategy::new(
                    self.gateway.clone(),
                    self.store.clone(),
                    &self.registry,
                    trade.clone(),
                    params,
                )?
                .with_latest_orders_limit(self.latest_orders_limit),
            )),
        }
    }

    /// Check a prospective trade without keeping the strategy
    pub fn check(&self, trade: &Trade) -> Result<()> {
        self.build(trade).map(|_| ())
    }

    pub fn registry(&self) -> &MarketRegistry {
        &self.registry
    }

    /// Get list of available strategy types
    pub fn available_strategies() -> Vec<StrategyInfo> {
        vec![StrategyInfo {
            name: TWAP.to_string(),
            description: "Split the quantity into equal time slices (frequency s, total_duration h)"
                .to_string(),
        }]
    }
}

/// Information about an available strategy type
#[derive(Debug, Clone, serde::Serialize)]
pub struct StrategyInfo {
    pub name: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::PaperExchange;
    use crate::domain::{MarketRule, Order, OrderBook, TradeSide, TradeStatus};
    use crate::exchange::MockExchangeGateway;
    use crate::store::MemoryStore;
    use crate::strategy::TickOutcome;
    use rust_decimal_macros::dec;

    fn factory() -> StrategyFactory {
        let registry = Arc::new(
            MarketRegistry::new(vec![MarketRule::new(
                100004,
                "BTCUSDC",
                dec!(0.1),
                dec!(0.00001),
            )])
            .unwrap(),
        );
        StrategyFactory::new(
            Arc::new(PaperExchange::new(registry.clone())),
            Arc::new(MemoryStore::new()),
            registry,
        )
    }

    #[test]
    fn test_build_twap() {
        let trade = Trade::new(
            "BTCUSDC",
            TradeSide::Buy,
            dec!(1),
            dec!(50000),
            "twap",
            serde_json::json!({"frequency": 60, "total_duration": 1}),
        );
        let strategy = factory().build(&trade).unwrap();
        assert_eq!(strategy.name(), "twap");
        assert_eq!(strategy.trade_id(), trade.id);
        assert_eq!(strategy.remaining_quantity(), dec!(1));
    }

    #[tokio::test]
    async fn test_configured_order_scan_limit_reaches_strategy() {
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
        let mut trade = Trade::new(
            "BTCUSDC",
            TradeSide::Buy,
            dec!(1),
            dec!(50000),
            "twap",
            serde_json::json!({"frequency": 60, "total_duration": 1}),
        );
        trade.status = TradeStatus::Active;
        store.insert_trade(&trade).await.unwrap();

        // An earlier slice makes the strategy look for resting orders
        let market = registry.lookup("BTCUSDC").unwrap().clone();
        let earlier = Order::limit_slice(&trade, &market, dec!(50000), dec!(0.01666), trade.timestamp);
        store.add_order(&earlier).await.unwrap();

        let mut gateway = MockExchangeGateway::new();
        gateway
            .expect_get_latest_orders()
            .withf(|limit| *limit == 25)
            .times(1)
            .returning(|_| Ok(vec![]));
        gateway
            .expect_get_orderbook()
            .returning(|_, _| Ok(OrderBook::default()));
        gateway.expect_place_order().returning(|_| Ok(()));

        let factory = StrategyFactory::new(Arc::new(gateway), store, registry)
            .with_latest_orders_limit(25);
        let mut strategy = factory.build(&trade).unwrap();
        assert_eq!(
            strategy.process_interval(trade.timestamp).await.unwrap(),
            TickOutcome::Continue
        );
    }

    #[test]
    fn test_unknown_strategy_name() {
        let trade = Trade::new(
            "BTCUSDC",
            TradeSide::Buy,
            dec!(1),
            dec!(50000),
            "vwap",
            serde_json::json!({}),
        );
        assert!(factory().check(&trade).unwrap_err().is_not_found());
    }

    #[test]
    fn test_available_strategies() {
        let strategies = StrategyFactory::available_strategies();
        assert!(strategies.iter().any(|s| s.name == "twap"));
    }
}
