//! Market regime classification and position sizing.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use wheel_core::RiskThresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketRegime {
    Bull,
    Neutral,
    Bear,
}

impl MarketRegime {
    /// BULL: price > SMA50 > SMA200 and VIX < 20.
    /// BEAR: price < SMA50 < SMA200 and VIX > 25.
    pub fn classify(price: Decimal, sma50: Decimal, sma200: Decimal, vix: f64) -> Self {
        if price > sma50 && sma50 > sma200 && vix < 20.0 {
            Self::Bull
        } else if price < sma50 && sma50 < sma200 && vix > 25.0 {
            Self::Bear
        } else {
            Self::Neutral
        }
    }

    /// Absolute short-put delta range to target.
    pub fn delta_range(self) -> (f64, f64) {
        match self {
            Self::Bull => (0.30, 0.40),
            Self::Neutral => (0.25, 0.30),
            Self::Bear => (0.15, 0.25),
        }
    }
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bull => write!(f, "BULL"),
            Self::Neutral => write!(f, "NEUTRAL"),
            Self::Bear => write!(f, "BEAR"),
        }
    }
}

/// Simple moving average of the last `n` closes.
pub fn sma(closes: &[Decimal], n: usize) -> Option<Decimal> {
    if n == 0 || closes.len() < n {
        return None;
    }
    let sum: Decimal = closes[closes.len() - n..].iter().sum();
    Some(sum / Decimal::from(n))
}

/// Multipliers applied on top of the base contract count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingContext {
    pub regime: MarketRegime,
    pub win_streak_multiplier: Decimal,
    pub black_swan_multiplier: Decimal,
}

/// Number of contracts for a short put at `strike`.
///
/// Starts from `account * max_position_pct / (strike * 100)` and applies the
/// bear, win-streak and Black Swan multipliers in turn, truncating to whole
/// contracts after each step. Never below one.
pub fn position_size(
    account_value: Decimal,
    strike: Decimal,
    ctx: &SizingContext,
    thresholds: &RiskThresholds,
) -> u32 {
    if strike <= Decimal::ZERO {
        return 1;
    }
    let mut contracts = (account_value * thresholds.max_position_pct / (strike * Decimal::from(100))).trunc();
    if ctx.regime == MarketRegime::Bear {
        contracts = (contracts * thresholds.bear_size_multiplier).trunc();
    }
    contracts = (contracts * ctx.win_streak_multiplier).trunc();
    contracts = (contracts * ctx.black_swan_multiplier).trunc();

    contracts.to_u32().unwrap_or(0).max(1)
}
