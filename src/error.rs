use thiserror::Error;

use crate::domain::TradeStatus;

/// Main error type for the execution engine
#[derive(Error, Debug)]
pub enum TrancheError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Lookup errors
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    // Lifecycle errors
    #[error("Trade {trade_id} cannot move from {from} to {to}")]
    InvalidState {
        trade_id: String,
        from: TradeStatus,
        to: TradeStatus,
    },

    // Exchange errors
    #[error("Exchange unavailable (status {status:?}): {message}")]
    Gateway {
        status: Option<u16>,
        message: String,
    },

    #[error("Exchange rejected request (status {status}): {message}")]
    GatewayRejected { status: u16, message: String },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Crypto/signing errors
    #[error("Signature error: {0}")]
    Signature(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl TrancheError {
    pub fn trade_not_found(id: impl Into<String>) -> Self {
        TrancheError::NotFound {
            entity: "Trade",
            id: id.into(),
        }
    }

    pub fn market_not_found(symbol: impl Into<String>) -> Self {
        TrancheError::NotFound {
            entity: "Market",
            id: symbol.into(),
        }
    }

    pub fn order_not_found(client_order_id: u64) -> Self {
        TrancheError::NotFound {
            entity: "Order",
            id: client_order_id.to_string(),
        }
    }

    /// Whether a retry of the same request may succeed.
    ///
    /// Network failures and exchange-side 5xx/429 responses are transient;
    /// rejections, lookups and validation failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            TrancheError::Gateway { .. } => true,
            TrancheError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().map_or(false, |s| s.is_server_error())
            }
            TrancheError::Database(sqlx::Error::PoolTimedOut)
            | TrancheError::Database(sqlx::Error::Io(_)) => true,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TrancheError::NotFound { .. })
    }
}

/// Result type alias for TrancheError
pub type Result<T> = std::result::Result<T, TrancheError>;
