//! Error types for order execution and the decision budget.

use rust_decimal::Decimal;
use thiserror::Error;

use wheel_core::{BrokerError, DataUnavailable};

/// The daily decision cap is already used up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("daily decision limit reached: {executed}/{max} executed")]
pub struct BudgetExceeded {
    pub executed: usize,
    pub max: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    /// Submission attempted outside the configured trading windows.
    #[error("outside trading window (exchange time {local})")]
    WindowClosed {
        /// Exchange-local timestamp of the attempt.
        local: String,
    },

    #[error(transparent)]
    BudgetExceeded(#[from] BudgetExceeded),

    /// Broker refused the order. Not retried within the pass.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// Smart fill exhausted its attempts.
    #[error("no fill for {instrument} after {attempts} attempts")]
    NoFill {
        instrument: String,
        attempts: u32,
    },

    /// Roll abandoned before any order because it would not collect a credit.
    #[error("roll abandoned: net credit {net_credit} is not positive")]
    DebitRoll { net_credit: Decimal },

    #[error(transparent)]
    DataUnavailable(#[from] DataUnavailable),

    /// A computed value violated a hard precondition. Halts the pass.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl ExecutionError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Invariant(_))
    }
}

impl From<BrokerError> for ExecutionError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Unavailable(e) => Self::DataUnavailable(e),
            BrokerError::Rejected(reason) => Self::OrderRejected(reason),
            BrokerError::UnknownOrder(id) => Self::OrderRejected(format!("broker lost order {id}")),
        }
    }
}
