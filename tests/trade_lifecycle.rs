use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;
use tranche::adapters::PaperExchange;
use tranche::config::{ReconciliationConfig, SchedulerConfig};
use tranche::domain::{
    Balance, ExchangeOrder, MarketRule, Order, OrderBook, OrderStatus, TradeStatus,
};
use tranche::exchange::ExchangeGateway;
use tranche::services::NewTrade;
use tranche::store::{MemoryStore, TradeStore};
use tranche::strategy::StrategyFactory;
use tranche::{
    AdmitOutcome, MarketRegistry, ReconciliationLoop, Result, TradeScheduler, TradeService,
};

/// Paper exchange whose placements take `delay` and record how many overlap
struct SlowExchange {
    inner: Arc<PaperExchange>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait]
impl ExchangeGateway for SlowExchange {
    fn name(&self) -> &'static str {
        "slow-paper"
    }

    async fn get_balances(&self) -> Result<Vec<Balance>> {
        self.inner.get_balances().await
    }

    async fn get_latest_orders(&self, limit: u32) -> Result<Vec<ExchangeOrder>> {
        self.inner.get_latest_orders(limit).await
    }

    async fn get_orderbook(&self, market: &MarketRule, depth: u32) -> Result<OrderBook> {
        self.inner.get_orderbook(market, depth).await
    }

    async fn place_order(&self, order: &Order) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let placed = self.inner.place_order(order).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        placed
    }

    async fn cancel_order(&self, order: &ExchangeOrder) -> Result<()> {
        self.inner.cancel_order(order).await
    }

    async fn cancel_market_orders(&self, market: &MarketRule) -> Result<()> {
        self.inner.cancel_market_orders(market).await
    }
}

struct Engine {
    exchange: Arc<PaperExchange>,
    store: Arc<MemoryStore>,
    scheduler: Arc<TradeScheduler>,
    service: Arc<TradeService>,
    reconciler: ReconciliationLoop,
}

fn btc_registry() -> Arc<MarketRegistry> {
    Arc::new(
        MarketRegistry::new(vec![MarketRule::new(
            100004,
            "BTCUSDC",
            dec!(0.1),
            dec!(0.00001),
        )])
        .unwrap(),
    )
}

fn engine() -> Engine {
    let registry = btc_registry();
    let exchange = Arc::new(PaperExchange::new(registry.clone()));
    assemble(registry, exchange.clone(), exchange)
}

/// Wire the engine around `gateway`; `exchange` is the paper book behind it
fn assemble(
    registry: Arc<MarketRegistry>,
    exchange: Arc<PaperExchange>,
    gateway: Arc<dyn ExchangeGateway>,
) -> Engine {
    let store = Arc::new(MemoryStore::new());
    let factory = StrategyFactory::new(gateway.clone(), store.clone(), registry);
    let scheduler = Arc::new(TradeScheduler::new(
        &SchedulerConfig {
            max_workers: 4,
            tick_interval_ms: 10,
        },
        factory.clone(),
        store.clone(),
    ));
    let service = Arc::new(
        TradeService::new(store.clone(), gateway.clone(), factory)
            .with_scheduler(scheduler.clone()),
    );
    let reconciler = ReconciliationLoop::new(
        gateway,
        store.clone(),
        scheduler.clone(),
        ReconciliationConfig {
            interval_ms: 10,
            latest_orders_limit: 500,
            missing_threshold: 3,
            pending_timeout_secs: 60,
        },
    );
    Engine {
        exchange,
        store,
        scheduler,
        service,
        reconciler,
    }
}

fn twap_buy(quantity: rust_decimal::Decimal, frequency: u64) -> NewTrade {
    NewTrade {
        symbol: "BTCUSDC".to_string(),
        side: "buy".to_string(),
        total_quantity: quantity,
        limit_price: dec!(50000),
        strategy: "twap".to_string(),
        strategy_params: serde_json::json!({"frequency": frequency, "total_duration": 1}),
    }
}

/// Poll until `placed` reaches `count` or give up after two seconds
async fn wait_for_placements(exchange: &PaperExchange, count: u64) {
    for _ in 0..200 {
        if exchange.stats().placed >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} placements, saw {}",
        count,
        exchange.stats().placed
    );
}

#[tokio::test]
async fn concurrent_admission_starts_one_slot() {
    let engine = engine();
    let id = engine
        .service
        .create_trade(twap_buy(dec!(1), 60))
        .await
        .unwrap();
    let trade = engine.store.get_trade(&id).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let scheduler = engine.scheduler.clone();
        let trade = trade.clone();
        handles.push(tokio::spawn(async move { scheduler.admit(&trade).await }));
    }

    let mut started = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() == AdmitOutcome::Started {
            started += 1;
        }
    }

    assert_eq!(started, 1);
    assert_eq!(engine.scheduler.running_ids().await, vec![id]);

    wait_for_placements(&engine.exchange, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.exchange.stats().placed, 1);

    engine.scheduler.retire_all().await;
}

#[tokio::test]
async fn pending_trade_is_activated_and_sliced() {
    let engine = engine();
    let id = engine
        .service
        .create_trade(twap_buy(dec!(1), 60))
        .await
        .unwrap();

    let report = engine.reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.trades_admitted, 1);
    wait_for_placements(&engine.exchange, 1).await;

    assert_eq!(
        engine.store.get_trade(&id).await.unwrap().status,
        TradeStatus::Active
    );

    let orders = engine.store.list_orders_for_trade(&id).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].quantity, dec!(0.01666));
    assert_eq!(orders[0].price, dec!(50000));
    assert!(orders[0].post_only);

    let resting = engine.exchange.live_orders().await;
    assert_eq!(resting.len(), 1);
    assert_eq!(resting[0].client_order_id, orders[0].client_order_id);

    // A second pass finds the slot already running
    let report = engine.reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.trades_admitted, 0);
    assert_eq!(
        engine.store.list_orders_for_trade(&id).await.unwrap()[0].status,
        OrderStatus::Open
    );

    engine.scheduler.retire_all().await;
}

#[tokio::test]
async fn pause_and_resume_keep_prior_slices() {
    let engine = engine();
    let id = engine
        .service
        .create_trade(twap_buy(dec!(1), 60))
        .await
        .unwrap();
    engine.reconciler.reconcile_once().await.unwrap();
    wait_for_placements(&engine.exchange, 1).await;

    let paused = engine.service.pause(&id).await.unwrap();
    assert_eq!(paused.status, TradeStatus::Paused);
    assert!(!engine.scheduler.is_running(&id).await);
    assert!(engine.exchange.live_orders().await.is_empty());

    // Paused trades are not picked up again by reconciliation
    let report = engine.reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.trades_admitted, 0);
    assert_eq!(report.orders_updated, 1);
    let orders = engine.store.list_orders_for_trade(&id).await.unwrap();
    assert_eq!(orders[0].status, OrderStatus::Cancelled);

    let resumed = engine.service.resume(&id).await.unwrap();
    assert_eq!(resumed.status, TradeStatus::Active);
    assert!(engine.scheduler.is_running(&id).await);

    // The earlier slice still counts, so nothing new goes out inside the interval
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.exchange.stats().placed, 1);
    assert_eq!(engine.store.list_orders_for_trade(&id).await.unwrap().len(), 1);

    let stopped = engine.service.cancel(&id).await.unwrap();
    assert_eq!(stopped.status, TradeStatus::Stopped);
    assert!(!engine.scheduler.is_running(&id).await);
    assert!(engine.service.resume(&id).await.is_err());
}

#[tokio::test]
async fn reconciled_fill_shows_up_in_stats() {
    let engine = engine();
    // Two half-hour intervals: the first slice is half the trade
    let id = engine
        .service
        .create_trade(twap_buy(dec!(0.02), 1800))
        .await
        .unwrap();
    engine.reconciler.reconcile_once().await.unwrap();
    wait_for_placements(&engine.exchange, 1).await;

    let order = engine.store.list_orders_for_trade(&id).await.unwrap()[0].clone();
    assert_eq!(order.quantity, dec!(0.01));
    engine.exchange.fill(order.client_order_id).await.unwrap();

    let report = engine.reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.orders_updated, 1);

    let stats = engine.service.execution_stats(&id).await.unwrap();
    assert_eq!(stats.status, TradeStatus::Active);
    assert_eq!(stats.total_executed_quantity, dec!(0.01));
    assert_eq!(stats.execution_progress, dec!(50));
    assert_eq!(stats.average_execution_price, dec!(50000));
    assert_eq!(stats.price_improvement_percent, dec!(0));
    assert_eq!(stats.total_execution_value, dec!(500));
    assert_eq!(stats.total_fees, dec!(0.25));
    assert_eq!(stats.orders_statistics.filled, 1);

    let info = engine.service.trade_info(&id).await.unwrap();
    assert_eq!(info.orders_count, 1);
    assert_eq!(info.orders[0].status, OrderStatus::Filled);
    assert!(info.orders[0].filled_at.is_some());

    let summaries = engine.service.list_summaries().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].progress, dec!(50));

    engine.scheduler.retire_all().await;
}

#[tokio::test]
async fn resume_without_reconciliation_does_not_resend() {
    let engine = engine();
    let id = engine
        .service
        .create_trade(twap_buy(dec!(1), 60))
        .await
        .unwrap();
    engine.reconciler.reconcile_once().await.unwrap();
    wait_for_placements(&engine.exchange, 1).await;

    engine.service.pause(&id).await.unwrap();
    engine.service.resume(&id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.exchange.stats().placed, 1);
    let orders = engine.store.list_orders_for_trade(&id).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].quantity, dec!(0.01666));

    engine.scheduler.retire_all().await;
}

#[tokio::test]
async fn resume_during_slow_placement_keeps_one_slot() {
    let registry = btc_registry();
    let exchange = Arc::new(PaperExchange::new(registry.clone()));
    let slow = Arc::new(SlowExchange {
        inner: exchange.clone(),
        delay: Duration::from_millis(300),
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
    });
    let engine = assemble(registry, exchange, slow.clone());

    let id = engine
        .service
        .create_trade(twap_buy(dec!(1), 60))
        .await
        .unwrap();
    engine.reconciler.reconcile_once().await.unwrap();
    for _ in 0..200 {
        if slow.in_flight.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(slow.in_flight.load(Ordering::SeqCst), 1);

    // Pause lands mid-placement, resume follows before the old slot has exited
    let pausing = {
        let service = engine.service.clone();
        let id = id.clone();
        tokio::spawn(async move { service.pause(&id).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    let resumed = engine.service.resume(&id).await.unwrap();
    assert_eq!(resumed.status, TradeStatus::Active);
    assert_eq!(pausing.await.unwrap().unwrap().status, TradeStatus::Paused);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(slow.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(engine.exchange.stats().placed, 1);
    assert_eq!(engine.store.list_orders_for_trade(&id).await.unwrap().len(), 1);
    assert_eq!(engine.scheduler.running_ids().await, vec![id]);

    engine.scheduler.retire_all().await;
}
