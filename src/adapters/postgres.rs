use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};

use crate::domain::{Order, OrderStatus, OrderType, TimeInForce, Trade, TradeSide, TradeStatus};
use crate::error::{Result, TrancheError};
use crate::store::TradeStore;

/// Postgres error codes the store maps to domain errors
const FOREIGN_KEY_VIOLATION: &str = "23503";
const UNIQUE_VIOLATION: &str = "23505";

const TRADE_COLUMNS: &str = "id, symbol, side, total_quantity, limit_price, strategy, \
     strategy_params, created_at, status";

const ORDER_COLUMNS: &str = "id, client_order_id, exchange_order_id, trade_id, symbol, \
     market_id, side, price, quantity, status, order_type, time_in_force, post_only, \
     created_at, modified_at, canceled_at, filled_at, base_amount, quote_amount, \
     fee_amount, reason";

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn fetch_orders(&self, filter: &str, arg: Option<&str>) -> Result<Vec<Order>> {
        let sql = format!(
            "SELECT {} FROM orders WHERE {} ORDER BY created_at ASC, client_order_id ASC",
            ORDER_COLUMNS, filter
        );
        let mut query = sqlx::query(&sql);
        if let Some(arg) = arg {
            query = query.bind(arg);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(order_from_row).collect()
    }
}

// ==================== Row mapping ====================

/// Client and exchange ids are u64 on the wire; BIGINT keeps the bit pattern
fn to_db_id(id: u64) -> i64 {
    id as i64
}

fn from_db_id(id: i64) -> u64 {
    id as u64
}

fn decode_err(column: &str, e: String) -> TrancheError {
    TrancheError::Internal(format!("bad {} in database row: {}", column, e))
}

fn trade_from_row(row: &PgRow) -> Result<Trade> {
    let side: String = row.get("side");
    let status: String = row.get("status");
    Ok(Trade {
        id: row.get("id"),
        symbol: row.get("symbol"),
        side: TradeSide::try_from(side.as_str()).map_err(|e| decode_err("side", e))?,
        total_quantity: row.get("total_quantity"),
        limit_price: row.get("limit_price"),
        strategy: row.get("strategy"),
        strategy_params: row.get("strategy_params"),
        timestamp: row.get::<DateTime<Utc>, _>("created_at"),
        status: TradeStatus::try_from(status.as_str()).map_err(|e| decode_err("status", e))?,
    })
}

fn order_from_row(row: &PgRow) -> Result<Order> {
    let side: String = row.get("side");
    let status: String = row.get("status");
    let order_type: String = row.get("order_type");
    let time_in_force: String = row.get("time_in_force");
    Ok(Order {
        id: row.get("id"),
        client_order_id: from_db_id(row.get("client_order_id")),
        exchange_order_id: row
            .get::<Option<i64>, _>("exchange_order_id")
            .map(from_db_id),
        trade_id: row.get("trade_id"),
        symbol: row.get("symbol"),
        market_id: row.get("market_id"),
        side: TradeSide::try_from(side.as_str()).map_err(|e| decode_err("side", e))?,
        price: row.get("price"),
        quantity: row.get("quantity"),
        status: OrderStatus::try_from(status.as_str()).map_err(|e| decode_err("status", e))?,
        order_type: OrderType::try_from(order_type.as_str())
            .map_err(|e| decode_err("order_type", e))?,
        time_in_force: TimeInForce::try_from(time_in_force.as_str())
            .map_err(|e| decode_err("time_in_force", e))?,
        post_only: row.get("post_only"),
        created_at: row.get("created_at"),
        modified_at: row.get("modified_at"),
        canceled_at: row.get("canceled_at"),
        filled_at: row.get("filled_at"),
        base_amount: row.get::<Option<Decimal>, _>("base_amount"),
        quote_amount: row.get::<Option<Decimal>, _>("quote_amount"),
        fee_amount: row.get::<Option<Decimal>, _>("fee_amount"),
        reason: row.get("reason"),
    })
}

fn has_code(err: &sqlx::Error, code: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(code),
        _ => false,
    }
}

#[async_trait]
impl TradeStore for PostgresStore {
    #[instrument(skip(self))]
    async fn get_active_trades(&self) -> Result<Vec<Trade>> {
        let sql = format!(
            "SELECT {} FROM trades WHERE status IN ('active', 'pending') ORDER BY created_at ASC",
            TRADE_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(trade_from_row).collect()
    }

    async fn get_live_orders(&self) -> Result<Vec<Order>> {
        self.fetch_orders("status IN ('open', 'partially_filled')", None)
            .await
    }

    async fn get_pending_orders(&self) -> Result<Vec<Order>> {
        self.fetch_orders("status = 'pending'", None).await
    }

    #[instrument(skip(self, order), fields(client_order_id = order.client_order_id))]
    async fn add_order(&self, order: &Order) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO orders (
                id, client_order_id, exchange_order_id, trade_id, symbol, market_id, side,
                price, quantity, status, order_type, time_in_force, post_only, created_at,
                modified_at, canceled_at, filled_at, base_amount, quote_amount, fee_amount,
                reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21)
            ON CONFLICT (client_order_id) DO NOTHING
            "#,
        )
        .bind(&order.id)
        .bind(to_db_id(order.client_order_id))
        .bind(order.exchange_order_id.map(to_db_id))
        .bind(&order.trade_id)
        .bind(&order.symbol)
        .bind(order.market_id)
        .bind(order.side.as_str())
        .bind(order.price)
        .bind(order.quantity)
        .bind(order.status.as_str())
        .bind(order.order_type.as_str())
        .bind(order.time_in_force.as_str())
        .bind(order.post_only)
        .bind(order.created_at)
        .bind(order.modified_at)
        .bind(order.canceled_at)
        .bind(order.filled_at)
        .bind(order.base_amount)
        .bind(order.quote_amount)
        .bind(order.fee_amount)
        .bind(&order.reason)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => {
                if done.rows_affected() == 0 {
                    debug!("Order already stored");
                }
                Ok(())
            }
            Err(e) if has_code(&e, FOREIGN_KEY_VIOLATION) => {
                Err(TrancheError::trade_not_found(&order.trade_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, order), fields(client_order_id = order.client_order_id))]
    async fn update_order(&self, order: &Order) -> Result<()> {
        let done = sqlx::query(
            r#"
            UPDATE orders SET
                exchange_order_id = $2,
                price = $3,
                quantity = $4,
                status = $5,
                modified_at = $6,
                canceled_at = $7,
                filled_at = $8,
                base_amount = $9,
                quote_amount = $10,
                fee_amount = $11,
                reason = $12,
                updated_at = NOW()
            WHERE client_order_id = $1
            "#,
        )
        .bind(to_db_id(order.client_order_id))
        .bind(order.exchange_order_id.map(to_db_id))
        .bind(order.price)
        .bind(order.quantity)
        .bind(order.status.as_str())
        .bind(order.modified_at)
        .bind(order.canceled_at)
        .bind(order.filled_at)
        .bind(order.base_amount)
        .bind(order.quote_amount)
        .bind(order.fee_amount)
        .bind(&order.reason)
        .execute(&self.pool)
        .await?;

        if done.rows_affected() == 0 {
            return Err(TrancheError::order_not_found(order.client_order_id));
        }
        Ok(())
    }

    #[instrument(skip(self, trade), fields(trade_id = %trade.id))]
    async fn update_trade(&self, trade: &Trade) -> Result<()> {
        let done = sqlx::query(
            r#"
            UPDATE trades SET
                symbol = $2,
                side = $3,
                total_quantity = $4,
                limit_price = $5,
                strategy = $6,
                strategy_params = $7,
                status = $8,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.total_quantity)
        .bind(trade.limit_price)
        .bind(&trade.strategy)
        .bind(&trade.strategy_params)
        .bind(trade.status.as_str())
        .execute(&self.pool)
        .await?;

        if done.rows_affected() == 0 {
            return Err(TrancheError::trade_not_found(&trade.id));
        }
        Ok(())
    }

    async fn get_trade(&self, trade_id: &str) -> Result<Trade> {
        let sql = format!("SELECT {} FROM trades WHERE id = $1", TRADE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(trade_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => trade_from_row(&row),
            None => Err(TrancheError::trade_not_found(trade_id)),
        }
    }

    async fn list_orders_for_trade(&self, trade_id: &str) -> Result<Vec<Order>> {
        self.fetch_orders("trade_id = $1", Some(trade_id)).await
    }

    #[instrument(skip(self, trade), fields(trade_id = %trade.id))]
    async fn insert_trade(&self, trade: &Trade) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades (id, symbol, side, total_quantity, limit_price, strategy,
                                strategy_params, created_at, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.total_quantity)
        .bind(trade.limit_price)
        .bind(&trade.strategy)
        .bind(&trade.strategy_params)
        .bind(trade.timestamp)
        .bind(trade.status.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if has_code(&e, UNIQUE_VIOLATION) => Err(TrancheError::Validation(format!(
                "trade {} already exists",
                trade.id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_trades(&self) -> Result<Vec<Trade>> {
        let sql = format!(
            "SELECT {} FROM trades ORDER BY created_at DESC",
            TRADE_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(trade_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn transition_trade(
        &self,
        trade_id: &str,
        from: TradeStatus,
        to: TradeStatus,
    ) -> Result<Trade> {
        if !from.can_transition_to(to) {
            let current = self.get_trade(trade_id).await?;
            return Err(TrancheError::InvalidState {
                trade_id: trade_id.to_string(),
                from: current.status,
                to,
            });
        }

        let sql = format!(
            "UPDATE trades SET status = $3, updated_at = NOW() \
             WHERE id = $1 AND status = $2 RETURNING {}",
            TRADE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(trade_id)
            .bind(from.as_str())
            .bind(to.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => trade_from_row(&row),
            None => {
                // Lost the race or wrong starting status; report what is there now
                let current = self.get_trade(trade_id).await?;
                Err(TrancheError::InvalidState {
                    trade_id: trade_id.to_string(),
                    from: current.status,
                    to,
                })
            }
        }
    }
}
