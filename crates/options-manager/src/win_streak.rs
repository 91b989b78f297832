//! Win-streak sizing.
//!
//! Long streaks breed overconfidence. Size is cut as the streak grows and
//! restored on the first loss.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use wheel_core::{RiskThresholds, WinStreakConfig};
use wheel_ib::Position;

/// Streak length from which risk-creep checks run.
const CREEP_CHECK_AT: u32 = 5;
/// Average DTE below this during a streak suggests reaching for premium.
const CREEP_MIN_AVG_DTE: f64 = 25.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinStreak {
    pub consecutive_wins: u32,
    pub multiplier: Decimal,
}

impl Default for WinStreak {
    fn default() -> Self {
        Self {
            consecutive_wins: 0,
            multiplier: Decimal::ONE,
        }
    }
}

impl WinStreak {
    /// Records one closed trade and returns the new multiplier.
    pub fn record(&mut self, profitable: bool, config: &WinStreakConfig) -> Decimal {
        if !profitable {
            if self.consecutive_wins > 0 {
                info!(streak = self.consecutive_wins, "Win streak reset by loss");
            }
            *self = Self::default();
            return self.multiplier;
        }

        self.consecutive_wins += 1;
        let multiplier = if self.consecutive_wins >= config.halve_at {
            config.halved_multiplier
        } else if self.consecutive_wins >= config.reduce_at {
            config.reduced_multiplier
        } else {
            Decimal::ONE
        };
        if multiplier != self.multiplier {
            warn!(
                streak = self.consecutive_wins,
                multiplier = %multiplier,
                "Win streak sizing adjusted"
            );
        }
        self.multiplier = multiplier;
        multiplier
    }

    /// Warnings that the book is drifting riskier during a streak: shorter
    /// expiries or positions crowding the size limit.
    pub fn risk_creep_warnings(
        &self,
        positions: &[Position],
        account_value: Decimal,
        today: NaiveDate,
        thresholds: &RiskThresholds,
    ) -> Vec<String> {
        if self.consecutive_wins < CREEP_CHECK_AT {
            return Vec::new();
        }
        let shorts: Vec<&Position> = positions.iter().filter(|p| p.kind.is_short_option()).collect();
        if shorts.is_empty() {
            return Vec::new();
        }

        let mut warnings = Vec::new();

        let dtes: Vec<i64> = shorts.iter().filter_map(|p| p.days_to_expiry(today)).collect();
        if !dtes.is_empty() {
            let avg_dte = dtes.iter().sum::<i64>() as f64 / dtes.len() as f64;
            if avg_dte < CREEP_MIN_AVG_DTE {
                warnings.push(format!(
                    "Average DTE {avg_dte:.0} during a {}-win streak; expiries are getting shorter",
                    self.consecutive_wins
                ));
            }
        }

        if account_value > Decimal::ZERO {
            let notionals: Vec<Decimal> = shorts
                .iter()
                .filter_map(|p| p.strike.map(|s| s * Decimal::from(100) * Decimal::from(p.quantity.unsigned_abs())))
                .collect();
            if !notionals.is_empty() {
                let avg_pct = notionals.iter().sum::<Decimal>() / Decimal::from(notionals.len()) / account_value;
                let ceiling = thresholds.max_position_pct * Decimal::new(9, 1);
                if avg_pct > ceiling {
                    warnings.push(format!(
                        "Average position {:.1}% of account is near the {:.0}% limit",
                        avg_pct * Decimal::from(100),
                        thresholds.max_position_pct * Decimal::from(100)
                    ));
                }
            }
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wheel_ib::InstrumentKind;

    fn streak_of(n: u32) -> WinStreak {
        let config = WinStreakConfig::default();
        let mut s = WinStreak::default();
        for _ in 0..n {
            s.record(true, &config);
        }
        s
    }

    #[test]
    fn multiplier_steps_down_with_streak() {
        assert_eq!(streak_of(7).multiplier, Decimal::ONE);
        assert_eq!(streak_of(8).multiplier, dec!(0.75));
        assert_eq!(streak_of(9).multiplier, dec!(0.75));
        assert_eq!(streak_of(10).multiplier, dec!(0.50));
        assert_eq!(streak_of(14).multiplier, dec!(0.50));
    }

    #[test]
    fn loss_resets_in_same_call() {
        let mut s = streak_of(11);
        let m = s.record(false, &WinStreakConfig::default());
        assert_eq!(m, Decimal::ONE);
        assert_eq!(s.consecutive_wins, 0);
        assert_eq!(s.multiplier, Decimal::ONE);
    }

    fn short_put(dte: i64, strike: Decimal) -> Position {
        let today = NaiveDate::from_ymd_opt(2026, 10, 13).unwrap();
        Position {
            symbol: "AAPL".to_string(),
            kind: InstrumentKind::ShortPut,
            strike: Some(strike),
            expiry: Some(today + chrono::Duration::days(dte)),
            quantity: -1,
            avg_cost: dec!(150),
            market_value: dec!(-100),
            unrealized_pnl: dec!(50),
        }
    }

    #[test]
    fn creep_warnings_only_during_streak() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 13).unwrap();
        let t = RiskThresholds::default();
        let positions = vec![short_put(10, dec!(95)), short_put(12, dec!(95))];

        assert!(streak_of(4)
            .risk_creep_warnings(&positions, dec!(100000), today, &t)
            .is_empty());

        let warnings = streak_of(6).risk_creep_warnings(&positions, dec!(100000), today, &t);
        assert_eq!(warnings.len(), 2, "{warnings:?}");
        assert!(warnings[0].contains("Average DTE 11"));
    }
}
