//! Account-level circuit breaker.
//!
//! Halts new entries for a fixed cooldown when the account:
//! - draws down too far from its peak
//! - loses too much over the trailing window
//! - strings together too many losing days
//!
//! Rolls and closes on existing positions continue while the breaker is
//! open. Re-arming is purely time-based: once tripped, the breaker stays open
//! until `cooldown_days` have elapsed, no matter how the account recovers.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use wheel_core::{CircuitBreakerConfig, RiskThresholds};

// =============================================================================
// Inputs and state
// =============================================================================

/// Account figures the breaker evaluates, as of one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerInputs {
    pub account_value: Decimal,
    /// Highest account value since the last baseline reset.
    pub peak_value: Decimal,
    /// Sum of daily P&L over the trailing window.
    pub trailing_pnl: Decimal,
    pub consecutive_losing_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TripReason {
    Drawdown { drawdown: Decimal },
    TrailingLoss { loss_pct: Decimal },
    LosingStreak { days: u32 },
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hundred = Decimal::from(100);
        match self {
            Self::Drawdown { drawdown } => {
                write!(f, "drawdown {:.1}% from peak", drawdown * hundred)
            }
            Self::TrailingLoss { loss_pct } => {
                write!(f, "trailing loss {:.1}% of account", loss_pct * hundred)
            }
            Self::LosingStreak { days } => write!(f, "{days} consecutive losing days"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub active: bool,
    pub reason: Option<TripReason>,
    pub activated_at: Option<DateTime<Utc>>,
    pub reactivate_at: Option<DateTime<Utc>>,
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum BreakerTransition {
    Tripped(TripReason),
    /// Cooldown elapsed. Callers reset the drawdown baseline.
    Rearmed,
    Unchanged,
}

/// Returned by `can_trade` while the breaker is open.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("circuit breaker open ({reason}) until {until}")]
pub struct CircuitBreakerOpen {
    pub reason: String,
    pub until: DateTime<Utc>,
}

// =============================================================================
// Circuit Breaker
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitBreakerState,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitBreakerState::default(),
        }
    }

    pub fn state(&self) -> &CircuitBreakerState {
        &self.state
    }

    /// Swaps in reloaded settings. An open breaker keeps its reactivation time.
    pub fn set_config(&mut self, config: CircuitBreakerConfig) {
        self.config = config;
    }

    /// Whether the breaker is open at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.state.active && self.state.reactivate_at.is_some_and(|until| now < until)
    }

    /// Checks whether new entries are allowed.
    ///
    /// # Errors
    ///
    /// Returns `CircuitBreakerOpen` while the cooldown is running.
    pub fn can_trade(&self, now: DateTime<Utc>) -> Result<(), CircuitBreakerOpen> {
        match (self.is_active(now), self.state.reactivate_at) {
            (true, Some(until)) => Err(CircuitBreakerOpen {
                reason: self
                    .state
                    .reason
                    .as_ref()
                    .map_or_else(String::new, ToString::to_string),
                until,
            }),
            _ => Ok(()),
        }
    }

    /// Re-arms after the cooldown, or trips if a condition holds.
    ///
    /// While open, conditions are not re-evaluated and the cooldown is never
    /// extended.
    pub fn evaluate(
        &mut self,
        inputs: &BreakerInputs,
        thresholds: &RiskThresholds,
        now: DateTime<Utc>,
    ) -> BreakerTransition {
        if self.state.active {
            if self.is_active(now) {
                return BreakerTransition::Unchanged;
            }
            info!(
                reason = ?self.state.reason,
                "Circuit breaker cooldown elapsed, entries re-enabled"
            );
            self.state = CircuitBreakerState::default();
            return BreakerTransition::Rearmed;
        }

        let Some(reason) = Self::check_conditions(inputs, thresholds) else {
            return BreakerTransition::Unchanged;
        };

        let until = now + Duration::days(self.config.cooldown_days);
        warn!(%reason, %until, "Circuit breaker tripped");
        self.state = CircuitBreakerState {
            active: true,
            reason: Some(reason.clone()),
            activated_at: Some(now),
            reactivate_at: Some(until),
        };
        BreakerTransition::Tripped(reason)
    }

    /// First condition that holds, checked in order drawdown, trailing loss,
    /// losing streak.
    pub fn check_conditions(inputs: &BreakerInputs, thresholds: &RiskThresholds) -> Option<TripReason> {
        if inputs.peak_value > Decimal::ZERO {
            let drawdown = (inputs.peak_value - inputs.account_value) / inputs.peak_value;
            if drawdown >= thresholds.drawdown_stop {
                return Some(TripReason::Drawdown { drawdown });
            }
        }

        if inputs.account_value > Decimal::ZERO {
            let loss_pct = -inputs.trailing_pnl / inputs.account_value;
            if loss_pct >= thresholds.weekly_drawdown_stop {
                return Some(TripReason::TrailingLoss { loss_pct });
            }
        }

        if thresholds.consecutive_loss_days > 0
            && inputs.consecutive_losing_days >= thresholds.consecutive_loss_days
        {
            return Some(TripReason::LosingStreak {
                days: inputs.consecutive_losing_days,
            });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 13, 15, 0, 0).unwrap()
    }

    fn healthy() -> BreakerInputs {
        BreakerInputs {
            account_value: dec!(100000),
            peak_value: dec!(105000),
            trailing_pnl: dec!(-2000),
            consecutive_losing_days: 1,
        }
    }

    #[test]
    fn healthy_account_stays_closed() {
        let mut cb = CircuitBreaker::default();
        let t = RiskThresholds::default();
        assert_eq!(cb.evaluate(&healthy(), &t, now()), BreakerTransition::Unchanged);
        assert!(cb.can_trade(now()).is_ok());
    }

    #[test]
    fn drawdown_at_threshold_trips() {
        let mut cb = CircuitBreaker::default();
        let t = RiskThresholds::default();
        let inputs = BreakerInputs {
            account_value: dec!(80000),
            peak_value: dec!(100000),
            ..healthy()
        };
        let transition = cb.evaluate(&inputs, &t, now());
        assert_eq!(
            transition,
            BreakerTransition::Tripped(TripReason::Drawdown { drawdown: dec!(0.2) })
        );
        assert!(cb.can_trade(now()).is_err());
    }

    #[test]
    fn trailing_loss_trips() {
        let t = RiskThresholds::default();
        let inputs = BreakerInputs {
            trailing_pnl: dec!(-10000),
            ..healthy()
        };
        assert!(matches!(
            CircuitBreaker::check_conditions(&inputs, &t),
            Some(TripReason::TrailingLoss { .. })
        ));
    }

    #[test]
    fn losing_streak_trips() {
        let t = RiskThresholds::default();
        let inputs = BreakerInputs {
            consecutive_losing_days: 3,
            ..healthy()
        };
        assert_eq!(
            CircuitBreaker::check_conditions(&inputs, &t),
            Some(TripReason::LosingStreak { days: 3 })
        );
    }

    #[test]
    fn stays_open_for_exactly_the_cooldown() {
        let mut cb = CircuitBreaker::default();
        let t = RiskThresholds::default();
        let bad = BreakerInputs {
            consecutive_losing_days: 4,
            ..healthy()
        };
        cb.evaluate(&bad, &t, now());

        // Recovery inside the cooldown does not re-arm, and further losses do not extend it.
        let day6 = now() + Duration::days(6);
        assert_eq!(cb.evaluate(&healthy(), &t, day6), BreakerTransition::Unchanged);
        assert_eq!(cb.evaluate(&bad, &t, day6), BreakerTransition::Unchanged);
        assert!(cb.is_active(day6 + Duration::hours(23)));
        assert_eq!(cb.state().reactivate_at, Some(now() + Duration::days(7)));

        let day7 = now() + Duration::days(7);
        assert!(!cb.is_active(day7));
        assert_eq!(cb.evaluate(&bad, &t, day7), BreakerTransition::Rearmed);
        assert!(cb.can_trade(day7).is_ok());
    }

    #[test]
    fn open_error_names_reason() {
        let mut cb = CircuitBreaker::default();
        let t = RiskThresholds::default();
        cb.evaluate(
            &BreakerInputs {
                consecutive_losing_days: 3,
                ..healthy()
            },
            &t,
            now(),
        );
        let err = cb.can_trade(now()).unwrap_err();
        assert!(err.to_string().contains("3 consecutive losing days"));
    }
}
