//! Cube exchange REST adapter.
//!
//! Prices and quantities cross the wire as integer multiples of the market's
//! tick sizes. Transient failures (network errors, 5xx, 429) are retried with
//! exponential backoff; any other non-success status is a rejection.

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use super::cube_auth::CubeCredentials;
use crate::domain::{
    Balance, BookLevel, ExchangeOrder, FilledTotal, MarketRule, Order, OrderBook, OrderStatus,
    OrderType, TimeInForce, TradeSide,
};
use crate::error::{Result, TrancheError};
use crate::exchange::ExchangeGateway;
use crate::markets::MarketRegistry;

pub const DEFAULT_CUBE_API_BASE: &str = "https://api.cube.exchange/os/v0";

const DEFAULT_MAX_RETRIES: u32 = 3;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OrdersPayload {
    Wrapped { result: OrdersResult },
    Bare(Vec<CubeOrder>),
}

#[derive(Debug, Deserialize)]
struct OrdersResult {
    orders: Vec<CubeOrder>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireSide {
    Code(u8),
    Name(String),
}

impl WireSide {
    fn to_side(&self) -> Option<TradeSide> {
        match self {
            WireSide::Code(0) => Some(TradeSide::Buy),
            WireSide::Code(1) => Some(TradeSide::Sell),
            WireSide::Code(_) => None,
            WireSide::Name(name) => TradeSide::try_from(name.as_str()).ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFilledTotal {
    #[serde(alias = "base_amount")]
    base_amount: Decimal,
    #[serde(alias = "quote_amount")]
    quote_amount: Decimal,
    #[serde(alias = "fee_amount")]
    fee_amount: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CubeOrder {
    #[serde(alias = "client_order_id")]
    client_order_id: u64,
    #[serde(default, alias = "order_id", alias = "exchangeOrderId")]
    order_id: Option<u64>,
    #[serde(alias = "market_id")]
    market_id: i64,
    side: WireSide,
    #[serde(default)]
    price: Option<u64>,
    #[serde(default)]
    quantity: Option<u64>,
    status: String,
    #[serde(alias = "created_at")]
    created_at: i64,
    #[serde(default, alias = "modified_at")]
    modified_at: Option<i64>,
    #[serde(default, alias = "canceled_at")]
    canceled_at: Option<i64>,
    #[serde(default, alias = "filled_at")]
    filled_at: Option<i64>,
    #[serde(default, alias = "filled_total")]
    filled_total: Option<WireFilledTotal>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookPayload {
    result: BookResult,
}

#[derive(Debug, Default, Deserialize)]
struct BookResult {
    #[serde(default)]
    bids: Vec<BookLevel>,
    #[serde(default)]
    asks: Vec<BookLevel>,
}

fn time_in_force_code(tif: TimeInForce) -> u8 {
    match tif {
        TimeInForce::IOC => 0,
        TimeInForce::GTC => 1,
        TimeInForce::FOK => 2,
    }
}

fn order_type_code(order_type: OrderType) -> u8 {
    match order_type {
        OrderType::Limit => 0,
        OrderType::MarketLimit => 1,
        OrderType::MarketWithProtection => 2,
    }
}

fn side_code(side: TradeSide) -> u8 {
    match side {
        TradeSide::Buy => 0,
        TradeSide::Sell => 1,
    }
}

// ============================================================================
// Client
// ============================================================================

#[derive(Clone)]
pub struct CubeClient {
    http: Client,
    base_url: String,
    credentials: CubeCredentials,
    subaccount_id: u64,
    registry: Arc<MarketRegistry>,
    max_retries: u32,
}

impl CubeClient {
    pub fn new(
        base_url: &str,
        credentials: CubeCredentials,
        subaccount_id: u64,
        registry: Arc<MarketRegistry>,
    ) -> Result<Self> {
        Ok(Self {
            http: Self::build_http(Duration::from_secs(10))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            subaccount_id,
            registry,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = Self::build_http(timeout)?;
        Ok(self)
    }

    fn build_http(timeout: Duration) -> Result<Client> {
        Client::builder()
            .user_agent("tranche/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| TrancheError::Internal(format!("failed to build HTTP client: {}", e)))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Verify the API key is accepted
    pub async fn check_api_key(&self) -> Result<()> {
        self.request_json(Method::GET, "/users/check", None, None, 0)
            .await
            .map(|_| ())
    }

    fn request_id() -> u64 {
        rand::thread_rng().gen()
    }

    /// Send a signed request, retrying transient failures
    async fn request_json(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(&str, String)]>,
        body: Option<Value>,
        max_retries: u32,
    ) -> Result<Value> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.try_request(method.clone(), path, query, body.as_ref()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempts <= max_retries => {
                    warn!(
                        "{} {} attempt {} failed: {}. Retrying...",
                        method, path, attempts, e
                    );

                    // Exponential backoff
                    let delay = Duration::from_millis(100 * (1 << attempts.min(10)));
                    sleep(delay).await;
                }
                Err(TrancheError::Http(e)) => {
                    return Err(TrancheError::Gateway {
                        status: e.status().map(|s| s.as_u16()),
                        message: format!("{} {} failed after {} attempts: {}", method, path, attempts, e),
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Single request attempt
    async fn try_request(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(&str, String)]>,
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .request(method.clone(), &url)
            .headers(self.credentials.headers()?);

        if let Some(query) = query {
            req = req.query(query);
        }

        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TrancheError::Gateway {
                status: Some(status.as_u16()),
                message: format!("{} {}: {}", method, path, text),
            });
        }

        if !status.is_success() {
            return Err(TrancheError::GatewayRejected {
                status: status.as_u16(),
                message: format!("{} {}: {}", method, path, text),
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        let value: Value = serde_json::from_str(&text)?;
        if let Some(rejection) = value.pointer("/result/Rej") {
            return Err(TrancheError::GatewayRejected {
                status: status.as_u16(),
                message: rejection.to_string(),
            });
        }
        Ok(value)
    }

    fn to_exchange_order(&self, raw: CubeOrder) -> Option<ExchangeOrder> {
        let Some(market) = self.registry.by_market_id(raw.market_id) else {
            debug!("Skipping order on unknown market {}", raw.market_id);
            return None;
        };
        let Some(side) = raw.side.to_side() else {
            warn!("Skipping order {} with unknown side", raw.client_order_id);
            return None;
        };
        let status = match OrderStatus::try_from(raw.status.as_str()) {
            Ok(status) => status,
            Err(e) => {
                warn!("Skipping order {}: {}", raw.client_order_id, e);
                return None;
            }
        };

        Some(ExchangeOrder {
            client_order_id: raw.client_order_id,
            exchange_order_id: raw.order_id,
            market_id: raw.market_id,
            side,
            price: raw
                .price
                .map(|p| market.price_from_ticks(p))
                .unwrap_or_default(),
            quantity: raw
                .quantity
                .map(|q| market.quantity_from_ticks(q))
                .unwrap_or_default(),
            status,
            created_at: raw.created_at,
            modified_at: raw.modified_at,
            canceled_at: raw.canceled_at,
            filled_at: raw.filled_at,
            filled: raw.filled_total.map(|f| FilledTotal {
                base_amount: f.base_amount,
                quote_amount: f.quote_amount,
                fee_amount: f.fee_amount,
            }),
            reason: raw.reason,
        })
    }

    fn parse_orders(&self, value: Value) -> Result<Vec<ExchangeOrder>> {
        let orders = match serde_json::from_value::<OrdersPayload>(value)? {
            OrdersPayload::Wrapped { result } => result.orders,
            OrdersPayload::Bare(orders) => orders,
        };
        Ok(orders
            .into_iter()
            .filter_map(|o| self.to_exchange_order(o))
            .collect())
    }

    fn order_body(&self, order: &Order, market: &MarketRule) -> Result<Value> {
        let price = market.price_ticks(order.price).ok_or_else(|| {
            TrancheError::Validation(format!("price {} is not representable", order.price))
        })?;
        let quantity = market.quantity_ticks(order.quantity).ok_or_else(|| {
            TrancheError::Validation(format!("quantity {} is not representable", order.quantity))
        })?;

        Ok(json!({
            "clientOrderId": order.client_order_id,
            "requestId": Self::request_id(),
            "marketId": market.market_id,
            "price": price,
            "quantity": quantity,
            "side": side_code(order.side),
            "timeInForce": time_in_force_code(order.time_in_force),
            "orderType": order_type_code(order.order_type),
            "subaccountId": self.subaccount_id,
            "selfTradePrevention": 0,
            "postOnly": order.post_only,
            "cancelOnDisconnect": false,
        }))
    }

    fn parse_balances(value: &Value) -> Vec<Balance> {
        let mut out = Vec::new();
        collect_balances(value, &mut out);
        out
    }
}

/// Walk the positions payload and pick up every object that looks like an
/// asset position
fn collect_balances(value: &Value, out: &mut Vec<Balance>) {
    match value {
        Value::Object(map) => {
            if let Some(asset_id) = map.get("assetId").and_then(Value::as_i64) {
                let total = map
                    .get("total")
                    .or_else(|| map.get("amount"))
                    .and_then(parse_decimalish)
                    .unwrap_or_default();
                let available = map
                    .get("available")
                    .and_then(parse_decimalish)
                    .unwrap_or(total);
                out.push(Balance {
                    asset_id,
                    symbol: map
                        .get("symbol")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    total,
                    available,
                });
                return;
            }
            for child in map.values() {
                collect_balances(child, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_balances(item, out);
            }
        }
        _ => {}
    }
}

fn parse_decimalish(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str_exact(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str_exact(&n.to_string()).ok(),
        _ => None,
    }
}

#[async_trait]
impl ExchangeGateway for CubeClient {
    fn name(&self) -> &'static str {
        "cube"
    }

    #[instrument(skip(self))]
    async fn get_balances(&self) -> Result<Vec<Balance>> {
        let query = [("subaccountId", self.subaccount_id.to_string())];
        let value = self
            .request_json(Method::GET, "/positions", Some(&query), None, self.max_retries)
            .await?;
        Ok(Self::parse_balances(&value))
    }

    #[instrument(skip(self))]
    async fn get_latest_orders(&self, limit: u32) -> Result<Vec<ExchangeOrder>> {
        let path = format!("/users/subaccount/{}/orders", self.subaccount_id);
        let query = [("limit", limit.to_string())];
        let value = self
            .request_json(Method::GET, &path, Some(&query), None, self.max_retries)
            .await?;
        self.parse_orders(value)
    }

    #[instrument(skip(self, market), fields(symbol = %market.symbol))]
    async fn get_orderbook(&self, market: &MarketRule, depth: u32) -> Result<OrderBook> {
        let path = format!("/parsed/book/{}/snapshot", market.symbol);
        let query = [("depth", depth.to_string())];
        let value = self
            .request_json(Method::GET, &path, Some(&query), None, self.max_retries)
            .await?;
        let payload: BookPayload = serde_json::from_value(value)?;

        let mut book = OrderBook {
            market_id: market.market_id,
            bids: payload.result.bids,
            asks: payload.result.asks,
        };
        book.bids.sort_by(|a, b| b.price.cmp(&a.price));
        book.asks.sort_by(|a, b| a.price.cmp(&b.price));
        Ok(book)
    }

    #[instrument(skip(self, order), fields(client_order_id = order.client_order_id))]
    async fn place_order(&self, order: &Order) -> Result<()> {
        let market = self.registry.lookup(&order.symbol)?;
        let body = self.order_body(order, market)?;
        self.request_json(Method::POST, "/order", None, Some(body), self.max_retries)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, order), fields(client_order_id = order.client_order_id))]
    async fn cancel_order(&self, order: &ExchangeOrder) -> Result<()> {
        let body = json!({
            "subaccountId": self.subaccount_id,
            "requestId": Self::request_id(),
            "clientOrderId": order.client_order_id,
            "marketId": order.market_id,
        });
        self.request_json(Method::DELETE, "/order", None, Some(body), self.max_retries)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, market), fields(symbol = %market.symbol))]
    async fn cancel_market_orders(&self, market: &MarketRule) -> Result<()> {
        let body = json!({
            "subaccountId": self.subaccount_id,
            "requestId": Self::request_id(),
            "marketId": market.market_id,
        });
        self.request_json(Method::DELETE, "/orders", None, Some(body), self.max_retries)
            .await?;
        Ok(())
    }
}
