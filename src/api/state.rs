use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::scheduler::TradeScheduler;
use crate::services::TradeService;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TradeService>,

    /// Present when the process runs strategies, absent for a read-only API
    pub scheduler: Option<Arc<TradeScheduler>>,

    /// Name of the exchange gateway in use
    pub gateway: &'static str,

    /// Application start time
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(service: Arc<TradeService>, gateway: &'static str) -> Self {
        Self {
            service,
            scheduler: None,
            gateway,
            start_time: Utc::now(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<TradeScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}
