pub mod adapters;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod markets;
pub mod reconciliation;
pub mod scheduler;
pub mod services;
pub mod store;
pub mod strategy;

pub use config::AppConfig;
pub use error::{Result, TrancheError};
pub use markets::MarketRegistry;
pub use reconciliation::{ReconciliationLoop, ReconciliationReport};
pub use scheduler::{AdmitOutcome, TradeScheduler};
pub use services::TradeService;
