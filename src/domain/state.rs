use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    /// Created, not yet picked up by the scheduler
    Pending,
    /// Strategy tick loop running
    Active,
    /// Halted by the user, resumable
    Paused,
    /// Cancelled by the user
    Stopped,
    /// Strategy distributed the full (or effectively full) quantity
    Completed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Active => "active",
            TradeStatus::Paused => "paused",
            TradeStatus::Stopped => "stopped",
            TradeStatus::Completed => "completed",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: TradeStatus) -> bool {
        use TradeStatus::*;

        match (self, target) {
            // Scheduler admits it
            (Pending, Active) => true,

            // From Active
            (Active, Paused) => true,    // User pause
            (Active, Stopped) => true,   // User cancel
            (Active, Completed) => true, // Strategy self-terminates

            // Only an explicit resume leaves Paused
            (Paused, Active) => true,

            // All other transitions are invalid
            _ => false,
        }
    }

    /// Get valid next states from current state
    pub fn valid_transitions(&self) -> Vec<TradeStatus> {
        use TradeStatus::*;

        match self {
            Pending => vec![Active],
            Active => vec![Paused, Stopped, Completed],
            Paused => vec![Active],
            Stopped | Completed => vec![],
        }
    }

    /// Whether the scheduler should keep (or start) a control loop for the trade
    pub fn is_schedulable(&self) -> bool {
        matches!(self, TradeStatus::Pending | TradeStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeStatus::Stopped | TradeStatus::Completed)
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TradeStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TradeStatus::Pending),
            "active" => Ok(TradeStatus::Active),
            "paused" => Ok(TradeStatus::Paused),
            "stopped" => Ok(TradeStatus::Stopped),
            "completed" => Ok(TradeStatus::Completed),
            _ => Err(format!("Unknown trade status: {}", s)),
        }
    }
}
