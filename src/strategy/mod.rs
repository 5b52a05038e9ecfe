//! Strategy module
//!
//! Per-trade execution logic. A strategy is built once per trade from the
//! trade's stored parameters and then ticked by the scheduler until it
//! reports `Stop` or its slot is retired.

// =============================================================================
// Strategy trait and core types
// =============================================================================

pub mod traits;
pub mod params;
pub mod factory;

// =============================================================================
// Strategies
// =============================================================================

pub mod twap;

pub use factory::{StrategyFactory, StrategyInfo};
pub use params::{StrategyParams, TwapParams};
pub use traits::{Strategy, TickOutcome};
pub use twap::TwapStrategy;
