//! Typed strategy parameters.
//!
//! Trades carry their parameters as an untyped JSON object. They are decoded
//! once, when the strategy is built, so a malformed trade fails before its
//! slot ever ticks.

use chrono::Duration;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrancheError};

pub const TWAP: &str = "twap";

/// One day between slices at most
const MAX_FREQUENCY_SECS: i64 = 86_400;
/// One year of slicing at most
const MAX_TOTAL_DURATION_HOURS: i64 = 8_760;

/// Parameters of the time-weighted slicing strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwapParams {
    /// Seconds between slices
    pub frequency: Decimal,
    /// Hours across which the full quantity is distributed
    pub total_duration: Decimal,
}

impl TwapParams {
    pub fn validate(&self) -> Result<()> {
        if self.frequency <= Decimal::ZERO {
            return Err(TrancheError::Validation(
                "twap frequency must be positive".to_string(),
            ));
        }
        if self.total_duration <= Decimal::ZERO {
            return Err(TrancheError::Validation(
                "twap total_duration must be positive".to_string(),
            ));
        }
        if self.frequency > Decimal::from(MAX_FREQUENCY_SECS) {
            return Err(TrancheError::Validation(format!(
                "twap frequency may not exceed {MAX_FREQUENCY_SECS} seconds"
            )));
        }
        if self.total_duration > Decimal::from(MAX_TOTAL_DURATION_HOURS) {
            return Err(TrancheError::Validation(format!(
                "twap total_duration may not exceed {MAX_TOTAL_DURATION_HOURS} hours"
            )));
        }
        Ok(())
    }

    pub fn frequency(&self) -> Duration {
        millis(self.frequency, 1_000)
    }

    pub fn total_duration(&self) -> Duration {
        millis(self.total_duration, 3_600_000)
    }
}

/// Saturates instead of overflowing; `validate` keeps real inputs far below that
fn millis(value: Decimal, per_unit: i64) -> Duration {
    let ms = value
        .checked_mul(Decimal::from(per_unit))
        .and_then(|ms| ms.trunc().to_i64())
        .unwrap_or(i64::MAX / 1_000_000);
    Duration::milliseconds(ms)
}

/// Parameters for each supported strategy, keyed by strategy name
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyParams {
    Twap(TwapParams),
}

impl StrategyParams {
    /// Decode the raw parameter object for `strategy`
    pub fn decode(strategy: &str, raw: &serde_json::Value) -> Result<Self> {
        match strategy.to_ascii_lowercase().as_str() {
            TWAP => {
                let params: TwapParams = serde_json::from_value(raw.clone()).map_err(|e| {
                    TrancheError::Validation(format!("invalid twap parameters: {e}"))
                })?;
                params.validate()?;
                Ok(StrategyParams::Twap(params))
            }
            other => Err(TrancheError::NotFound {
                entity: "Strategy",
                id: other.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyParams::Twap(_) => TWAP,
        }
    }
}
