//! Risk and decision engine for the options wheel strategy.
//!
//! Runs as a long-lived service that:
//! - Screens cash-secured put entries against volatility, liquidity,
//!   valuation, sector and earnings criteria
//! - Rolls or closes short options on delta, time and profit rules
//! - Halts entries on drawdown (circuit breaker) and de-risks on market
//!   crises (Black Swan protocol)
//! - Sizes positions by regime, win streak and recovery stage
//! - Executes through a smart-fill coordinator inside trading windows,
//!   capped by a daily decision budget
//!
//! All rules are deterministic and fail closed on missing data.

pub mod adjustments;
pub mod alerts;
pub mod allocation;
pub mod black_swan;
pub mod circuit_breaker;
pub mod correlation;
pub mod decisions;
pub mod entry;
pub mod error;
pub mod execution_quality;
pub mod executor;
pub mod performance;
pub mod regime;
pub mod reporting;
pub mod scanner;
pub mod service;
pub mod types;
pub mod valuation;
pub mod volatility;
pub mod win_streak;

pub use alerts::AlertDispatcher;
pub use black_swan::{BlackSwanPhase, BlackSwanState};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState};
pub use decisions::{DecisionCounter, DecisionSummary};
pub use entry::{EntryRequest, EntryVerdict};
pub use error::ExecutionError;
pub use execution_quality::ExecutionQualitySummary;
pub use executor::OrderCoordinator;
pub use performance::{PerformanceMetrics, PerformanceTracker, TradeCategory, TradeRecord};
pub use regime::MarketRegime;
pub use reporting::{DashboardSnapshot, JsonFileSink, ReportingSink, TracingSink};
pub use scanner::Opportunity;
pub use service::{AfternoonReport, EngineState, MorningReport, RiskReport, WheelEngine};
pub use types::{Adjustment, Decision, DecisionAction, DecisionPriority, DecisionStatus, ExecutionResult};
