//! Core strategy traits and types
//!
//! Defines the common interface that all execution strategies implement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::Result;

/// What the slot should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Sleep, then tick again
    Continue,
    /// Tear the slot down; the trade is no longer active
    Stop,
}

/// Per-trade decision logic, driven by the scheduler one tick at a time
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Identifier of the owning trade
    fn trade_id(&self) -> &str;

    /// Strategy name as stored on the trade
    fn name(&self) -> &str;

    /// Quantity still to be distributed
    fn remaining_quantity(&self) -> Decimal;

    /// Restore working state from previously stored orders before the first tick
    async fn prepare(&mut self) -> Result<()>;

    /// Run one tick of the strategy
    async fn process_interval(&mut self, now: DateTime<Utc>) -> Result<TickOutcome>;

    /// Cancel all live orders on the trade's market
    async fn pause(&mut self) -> Result<()>;

    /// Pause, then mark the trade completed
    async fn stop(&mut self) -> Result<()>;

    /// Called once after the slot was cancelled from outside.
    ///
    /// If the trade has left ACTIVE in the meantime, its live orders are pulled.
    async fn wind_down(&mut self) -> Result<()>;
}
