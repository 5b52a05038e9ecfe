use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;

use tranche::adapters::PaperExchange;
use tranche::api::{create_router, AppState};
use tranche::config::SchedulerConfig;
use tranche::domain::{MarketRule, Order, OrderStatus, TradeStatus};
use tranche::exchange::ExchangeGateway;
use tranche::store::{MemoryStore, TradeStore};
use tranche::strategy::StrategyFactory;
use tranche::{MarketRegistry, TradeScheduler, TradeService};

struct TestContext {
    app: Router,
    store: Arc<MemoryStore>,
    market: MarketRule,
}

impl TestContext {
    fn new() -> Self {
        let market = MarketRule::new(100004, "BTCUSDC", dec!(0.1), dec!(0.00001));
        let registry = Arc::new(MarketRegistry::new(vec![market.clone()]).unwrap());
        let exchange = Arc::new(PaperExchange::new(registry.clone()));
        let store = Arc::new(MemoryStore::new());
        let factory = StrategyFactory::new(exchange.clone(), store.clone(), registry);
        let scheduler = Arc::new(TradeScheduler::new(
            &SchedulerConfig::default(),
            factory.clone(),
            store.clone(),
        ));
        let service = Arc::new(
            TradeService::new(store.clone(), exchange.clone(), factory)
                .with_scheduler(scheduler.clone()),
        );
        let state = AppState::new(service, exchange.name()).with_scheduler(scheduler);

        Self {
            app: create_router(state),
            store,
            market,
        }
    }

    async fn create_trade(&self) -> String {
        let (status, body) = send_json(
            &self.app,
            Method::POST,
            "/trades",
            Some(json!({
                "symbol": "BTCUSDC",
                "side": "buy",
                "total_quantity": "1",
                "limit_price": "50000",
                "strategy": "twap",
                "strategy_params": {"frequency": 60, "total_duration": 1}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["trade_id"].as_str().unwrap().to_string()
    }
}

async fn send_json(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request_builder = Request::builder().method(method).uri(uri);
    let request = if let Some(payload) = body {
        request_builder
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .expect("failed to build json request")
    } else {
        request_builder
            .body(Body::empty())
            .expect("failed to build empty request")
    };

    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router request failed");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    (status, body)
}

/// Decimals travel as strings
fn decimal(value: &Value) -> Decimal {
    value.as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn create_then_fetch_trade() {
    let ctx = TestContext::new();
    let id = ctx.create_trade().await;

    let (status, body) = send_json(&ctx.app, Method::GET, &format!("/trades/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["trade_id"], id.as_str());
    assert_eq!(body["status"], "pending");
    assert_eq!(body["side"], "buy");
    assert_eq!(body["strategy"], "twap");
    assert_eq!(body["orders_count"], 0);
    assert_eq!(body["strategy_params"]["frequency"], 60);

    let (status, body) = send_json(&ctx.app, Method::GET, "/trades", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["trade_id"], id.as_str());
}

#[tokio::test]
async fn missing_trade_is_404() {
    let ctx = TestContext::new();

    for uri in ["/trades/unknown", "/trades/unknown/stats"] {
        let (status, body) = send_json(&ctx.app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert!(body["error"].as_str().unwrap().contains("unknown"));
    }

    let (status, _) = send_json(&ctx.app, Method::POST, "/trades/unknown/pause", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn pausing_pending_trade_reports_actual_status() {
    let ctx = TestContext::new();
    let id = ctx.create_trade().await;

    let (status, body) =
        send_json(&ctx.app, Method::POST, &format!("/trades/{id}/pause"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "pending");

    let (status, body) =
        send_json(&ctx.app, Method::POST, &format!("/trades/{id}/resume"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "pending");

    let trade = ctx.store.get_trade(&id).await.unwrap();
    assert_eq!(trade.status, TradeStatus::Pending);
}

#[tokio::test]
async fn cancel_active_trade() {
    let ctx = TestContext::new();
    let id = ctx.create_trade().await;
    ctx.store
        .transition_trade(&id, TradeStatus::Pending, TradeStatus::Active)
        .await
        .unwrap();

    let (status, body) =
        send_json(&ctx.app, Method::POST, &format!("/trades/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopped");
    assert_eq!(body["trade_id"], id.as_str());

    // Stopped is terminal
    let (status, body) =
        send_json(&ctx.app, Method::POST, &format!("/trades/{id}/resume"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "stopped");
}

#[tokio::test]
async fn stats_for_half_filled_trade() {
    let ctx = TestContext::new();
    let id = ctx.create_trade().await;
    let trade = ctx.store.get_trade(&id).await.unwrap();

    for price in [dec!(49000), dec!(49500)] {
        let mut order =
            Order::limit_slice(&trade, &ctx.market, price, dec!(0.25), trade.timestamp);
        ctx.store.add_order(&order).await.unwrap();
        order.status = OrderStatus::Filled;
        order.base_amount = Some(dec!(0.25));
        order.quote_amount = Some(dec!(0.25) * price);
        order.fee_amount = Some(dec!(1));
        order.filled_at = Some(order.created_at + 30_000_000_000);
        ctx.store.update_order(&order).await.unwrap();
    }

    let (status, body) =
        send_json(&ctx.app, Method::GET, &format!("/trades/{id}/stats"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&body["execution_progress"]), dec!(50));
    assert_eq!(decimal(&body["total_executed_quantity"]), dec!(0.5));
    assert_eq!(decimal(&body["average_execution_price"]), dec!(49250));
    assert_eq!(decimal(&body["price_improvement_percent"]), dec!(1.5));
    assert_eq!(body["execution_time_seconds"], 30.0);
    assert_eq!(body["orders_statistics"]["total"], 2);
    assert_eq!(body["orders_statistics"]["filled"], 2);
}

#[tokio::test]
async fn rejects_invalid_trade_requests() {
    let ctx = TestContext::new();

    let (status, body) = send_json(
        &ctx.app,
        Method::POST,
        "/trades",
        Some(json!({
            "symbol": "DOGEUSDC",
            "side": "buy",
            "total_quantity": "1",
            "limit_price": "1",
            "strategy": "twap",
            "strategy_params": {"frequency": 60, "total_duration": 1}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("DOGEUSDC"));

    let (status, _) = send_json(
        &ctx.app,
        Method::POST,
        "/trades",
        Some(json!({
            "symbol": "BTCUSDC",
            "side": "hold",
            "total_quantity": "1",
            "limit_price": "50000",
            "strategy": "twap"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Missing fields never reach the service
    let (status, _) = send_json(
        &ctx.app,
        Method::POST,
        "/trades",
        Some(json!({"symbol": "BTCUSDC"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, body) = send_json(&ctx.app, Method::GET, "/trades", None).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn health_and_strategies() {
    let ctx = TestContext::new();

    let (status, body) = send_json(&ctx.app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["gateway"], "paper");
    assert_eq!(body["running_trades"], 0);

    let (status, body) = send_json(&ctx.app, Method::GET, "/strategies", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s["name"] == "twap"));
}
