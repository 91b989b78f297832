//! Decision and adjustment types shared across the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wheel_core::AlertPriority;
use wheel_ib::Position;

/// What a decision does to a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionAction {
    /// Delta breached: roll down/out to a safer strike.
    RollDefensive,
    /// Expiry near: roll to the next cycle at the same strike.
    RollTime,
    /// Profit captured early: roll to a fresh strike.
    RollPosition,
    ClosePosition,
    Open,
    /// Manual review. Emitted when a rule cannot be evaluated.
    Evaluate,
    EvaluateShares,
    SellCoveredCall,
}

impl DecisionAction {
    pub fn is_roll(self) -> bool {
        matches!(self, Self::RollDefensive | Self::RollTime | Self::RollPosition)
    }

    /// Actions the coordinator can carry out on its own.
    pub fn is_executable(self) -> bool {
        self.is_roll() || matches!(self, Self::ClosePosition | Self::Open | Self::SellCoveredCall)
    }
}

impl std::fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RollDefensive => "ROLL_DEFENSIVE",
            Self::RollTime => "ROLL_TIME",
            Self::RollPosition => "ROLL_POSITION",
            Self::ClosePosition => "CLOSE_POSITION",
            Self::Open => "OPEN",
            Self::Evaluate => "EVALUATE",
            Self::EvaluateShares => "EVALUATE_SHARES",
            Self::SellCoveredCall => "SELL_COVERED_CALL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionPriority {
    Routine,
    Important,
    Critical,
}

impl DecisionPriority {
    /// Only important and critical decisions are executed automatically.
    pub fn auto_executes(self) -> bool {
        self >= Self::Important
    }

    pub fn alert_priority(self) -> AlertPriority {
        match self {
            Self::Routine => AlertPriority::Info,
            Self::Important => AlertPriority::Important,
            Self::Critical => AlertPriority::Critical,
        }
    }
}

impl std::fmt::Display for DecisionPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Routine => write!(f, "routine"),
            Self::Important => write!(f, "important"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionResult {
    Success,
    Failed,
    /// Close leg of a roll filled, open leg did not.
    Partial,
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
            Self::Partial => write!(f, "PARTIAL"),
        }
    }
}

/// Decision lifecycle. `Executed` is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending,
    Executed {
        result: ExecutionResult,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    /// The position or contract acted on, e.g. `XYZ 2026-11-20 50P`.
    pub subject: String,
    pub action: DecisionAction,
    pub reason: String,
    pub priority: DecisionPriority,
    pub status: DecisionStatus,
    pub notes: Vec<String>,
}

impl Decision {
    pub fn is_executed(&self) -> bool {
        matches!(self.status, DecisionStatus::Executed { .. })
    }

    pub fn result(&self) -> Option<ExecutionResult> {
        match self.status {
            DecisionStatus::Executed { result, .. } => Some(result),
            DecisionStatus::Pending => None,
        }
    }
}

/// A proposed action on an existing position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub position: Position,
    pub action: DecisionAction,
    pub priority: DecisionPriority,
    pub reason: String,
}

impl Adjustment {
    pub fn symbol(&self) -> &str {
        &self.position.symbol
    }
}
