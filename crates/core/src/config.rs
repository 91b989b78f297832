//! Application configuration and the risk threshold registry.
//!
//! Every numeric limit the engine enforces lives here. A value is immutable
//! for the duration of a pass; only a config reload swaps it.

use chrono::{NaiveTime, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::sector::Sector;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub risk: RiskThresholds,
    pub circuit_breaker: CircuitBreakerConfig,
    pub black_swan: BlackSwanConfig,
    pub execution: ExecutionConfig,
    pub decisions: DecisionConfig,
    pub win_streak: WinStreakConfig,
    pub market: MarketConfig,
    pub scanner: ScannerConfig,
    pub service: ServiceConfig,
}

impl AppConfig {
    /// Rejects limits that would make the rule set meaningless.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first out-of-range field.
    pub fn validate(&self) -> anyhow::Result<()> {
        let r = &self.risk;
        for (name, value) in [
            ("risk.max_position_pct", r.max_position_pct),
            ("risk.max_sector_pct", r.max_sector_pct),
            ("risk.drawdown_stop", r.drawdown_stop),
            ("risk.weekly_drawdown_stop", r.weekly_drawdown_stop),
            ("risk.profit_target", r.profit_target),
            ("risk.profit_roll", r.profit_roll),
            ("risk.shares_stop_loss_pct", r.shares_stop_loss_pct),
            ("risk.bear_size_multiplier", r.bear_size_multiplier),
            ("black_swan.cash_target_pct", self.black_swan.cash_target_pct),
            ("black_swan.protective_stop_pct", self.black_swan.protective_stop_pct),
        ] {
            if value <= Decimal::ZERO || value > Decimal::ONE {
                anyhow::bail!("{name} must be in (0, 1], got {value}");
            }
        }
        if r.sector_cap_floor <= Decimal::ZERO {
            anyhow::bail!("risk.sector_cap_floor must be positive");
        }
        if r.sector_cap_tiers.windows(2).any(|w| w[0].vix_below >= w[1].vix_below) {
            anyhow::bail!("risk.sector_cap_tiers must be sorted by ascending vix_below");
        }
        if self.decisions.max_daily_decisions == 0 {
            anyhow::bail!("decisions.max_daily_decisions must be at least 1");
        }
        if self.execution.max_attempts == 0 {
            anyhow::bail!("execution.max_attempts must be at least 1");
        }
        if self.execution.price_increment <= Decimal::ZERO {
            anyhow::bail!("execution.price_increment must be positive");
        }
        if self.black_swan.stage_multipliers.len() != 4 {
            anyhow::bail!("black_swan.stage_multipliers must list exactly 4 stages");
        }
        if self.market.sector_etfs.len() < 2 {
            anyhow::bail!("market.sector_etfs needs at least two symbols for correlation");
        }
        Ok(())
    }
}

/// Static numeric limits consulted by every rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    /// Max notional of one position as a fraction of account value.
    pub max_position_pct: Decimal,
    /// Base per-sector share of the account used when diversifying scans.
    pub max_sector_pct: Decimal,
    /// Drawdown from peak that trips the circuit breaker.
    pub drawdown_stop: Decimal,
    /// Trailing-window loss (fraction of account) that trips the circuit breaker.
    pub weekly_drawdown_stop: Decimal,
    /// Consecutive losing days that trip the circuit breaker.
    pub consecutive_loss_days: u32,
    /// Minimum IV rank (percent) for a new entry.
    pub iv_rank_min: f64,
    /// Minimum implied volatility (percent) for a new entry.
    pub iv_min: f64,
    /// Minimum average daily share volume.
    pub min_avg_volume: u64,
    /// Covered-call profit capture ratio.
    pub profit_target: Decimal,
    /// Short-put profit ratio that triggers a profit roll.
    pub profit_roll: Decimal,
    /// A profit roll needs more than this many days left.
    pub profit_roll_min_dte: i64,
    /// Days to expiry at or below which a time roll is due.
    pub roll_dte: i64,
    /// Absolute delta above which a defensive roll is due.
    pub roll_delta_threshold: f64,
    /// Absolute delta targeted by a defensive roll.
    pub defensive_roll_delta: f64,
    /// Entries are refused this many days (or fewer) before earnings.
    pub earnings_buffer_days: i64,
    /// Assigned shares below cost basis by this fraction get flagged.
    pub shares_stop_loss_pct: Decimal,
    /// Average sector correlation above this is a crisis warning.
    pub correlation_threshold: f64,
    /// Average sector correlation above this triggers the Black Swan protocol.
    pub correlation_extreme: f64,
    /// Consecutive wins at which new entries pause.
    pub win_streak_caution: u32,
    /// Position size multiplier applied in a bear regime.
    pub bear_size_multiplier: Decimal,
    /// VIX-scaled sector caps, ascending by `vix_below`.
    pub sector_cap_tiers: Vec<VixTier>,
    /// Sector cap once VIX is above every tier.
    pub sector_cap_floor: Decimal,
}

/// Sector cap that applies while VIX is strictly below `vix_below`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VixTier {
    pub vix_below: f64,
    pub cap: Decimal,
}

impl RiskThresholds {
    /// Sector exposure cap for the given VIX level.
    ///
    /// A VIX exactly on a tier boundary falls to the stricter tier.
    pub fn sector_cap(&self, vix: f64) -> Decimal {
        self.sector_cap_tiers
            .iter()
            .find(|tier| vix < tier.vix_below)
            .map_or(self.sector_cap_floor, |tier| tier.cap)
    }
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            max_position_pct: dec!(0.10),
            max_sector_pct: dec!(0.20),
            drawdown_stop: dec!(0.20),
            weekly_drawdown_stop: dec!(0.10),
            consecutive_loss_days: 3,
            iv_rank_min: 50.0,
            iv_min: 20.0,
            min_avg_volume: 1_000_000,
            profit_target: dec!(0.50),
            profit_roll: dec!(0.80),
            profit_roll_min_dte: 7,
            roll_dte: 21,
            roll_delta_threshold: 0.50,
            defensive_roll_delta: 0.30,
            earnings_buffer_days: 7,
            shares_stop_loss_pct: dec!(0.10),
            correlation_threshold: 0.80,
            correlation_extreme: 0.90,
            win_streak_caution: 10,
            bear_size_multiplier: dec!(0.75),
            sector_cap_tiers: vec![
                VixTier { vix_below: 20.0, cap: dec!(0.25) },
                VixTier { vix_below: 30.0, cap: dec!(0.20) },
                VixTier { vix_below: 40.0, cap: dec!(0.15) },
            ],
            sector_cap_floor: dec!(0.10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Days the breaker stays open once tripped.
    pub cooldown_days: i64,
    /// Sessions summed for the trailing-loss check.
    pub trailing_days: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            cooldown_days: 7,
            trailing_days: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlackSwanConfig {
    /// VIX strictly above this activates the protocol.
    pub vix_trigger: f64,
    /// Index daily change strictly below this activates the protocol.
    pub market_drop_trigger: f64,
    /// Option positions with fewer days left are closed on activation.
    pub near_term_dte: i64,
    /// Protective stops sit this fraction below the current price.
    pub protective_stop_pct: Decimal,
    /// Cash share of the account the protocol raises.
    pub cash_target_pct: Decimal,
    /// Sectors liquidated first when raising cash.
    pub priority_sectors: Vec<Sector>,
    /// Recovery needs VIX below this level...
    pub recovery_vix: f64,
    /// ...on at least this many of the trailing sessions.
    pub recovery_vix_days: usize,
    /// Positive-breadth sessions required for recovery.
    pub recovery_breadth_days: usize,
    /// Trailing sessions examined for recovery.
    pub recovery_window: usize,
    /// Size multipliers for recovery stages 1 through 4.
    pub stage_multipliers: Vec<Decimal>,
}

impl Default for BlackSwanConfig {
    fn default() -> Self {
        Self {
            vix_trigger: 50.0,
            market_drop_trigger: -0.20,
            near_term_dte: 14,
            protective_stop_pct: dec!(0.07),
            cash_target_pct: dec!(0.30),
            priority_sectors: vec![Sector::Technology, Sector::Financials],
            recovery_vix: 40.0,
            recovery_vix_days: 3,
            recovery_breadth_days: 2,
            recovery_window: 5,
            stage_multipliers: vec![dec!(0.25), dec!(0.50), dec!(0.75), dec!(1.00)],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Seconds to wait on each limit order before repricing.
    pub fill_wait_secs: u64,
    /// Price step toward the passive side per attempt.
    pub price_increment: Decimal,
    pub max_attempts: u32,
    /// IANA zone of the exchange, e.g. `America/New_York`.
    pub timezone: String,
    pub trading_days: Vec<Weekday>,
    pub windows: Vec<TradingWindow>,
    /// Days added to an expiry when looking for the next roll cycle.
    pub roll_cycle_days: i64,
}

/// Inclusive local-time window in which orders may be submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TradingWindow {
    fn at(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start: NaiveTime::from_hms_opt(start_hour, 0, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(end_hour, 0, 0).unwrap_or_default(),
        }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            fill_wait_secs: 120,
            price_increment: dec!(0.05),
            max_attempts: 3,
            timezone: "America/New_York".to_string(),
            trading_days: vec![Weekday::Tue, Weekday::Wed, Weekday::Thu],
            windows: vec![TradingWindow::at(10, 11), TradingWindow::at(14, 15)],
            roll_cycle_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub max_daily_decisions: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            max_daily_decisions: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WinStreakConfig {
    /// Wins at which size drops to `reduced_multiplier`.
    pub reduce_at: u32,
    pub reduced_multiplier: Decimal,
    /// Wins at which size drops to `halved_multiplier`.
    pub halve_at: u32,
    pub halved_multiplier: Decimal,
}

impl Default for WinStreakConfig {
    fn default() -> Self {
        Self {
            reduce_at: 8,
            reduced_multiplier: dec!(0.75),
            halve_at: 10,
            halved_multiplier: dec!(0.50),
        }
    }
}

/// Reference symbols used for regime, correlation and crisis checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub vix_symbol: String,
    pub index_symbol: String,
    pub sector_etfs: Vec<String>,
    /// Sessions of returns used for the cross-sector correlation.
    pub correlation_lookback: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            vix_symbol: "VIX".to_string(),
            index_symbol: "SPY".to_string(),
            sector_etfs: ["XLF", "XLK", "XLV", "XLY", "XLP", "XLU", "XLE", "XLB"]
                .into_iter()
                .map(String::from)
                .collect(),
            correlation_lookback: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub watchlist: Vec<String>,
    pub target_dte: i64,
    pub min_annual_return: Decimal,
    pub max_opportunities: usize,
    /// Moneyness band used when a chain carries no delta.
    pub min_moneyness: Decimal,
    pub max_moneyness: Decimal,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            watchlist: ["AAPL", "MSFT", "JPM", "JNJ", "HD", "CAT", "KO", "XOM"]
                .into_iter()
                .map(String::from)
                .collect(),
            target_dte: 30,
            min_annual_return: dec!(0.20),
            max_opportunities: 5,
            min_moneyness: dec!(0.85),
            max_moneyness: dec!(0.95),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub poll_interval_secs: u64,
    /// Open approved scanner candidates during the afternoon check-in.
    pub auto_open_entries: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            auto_open_entries: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn sector_cap_boundaries_fall_to_stricter_tier() {
        let t = RiskThresholds::default();
        assert_eq!(t.sector_cap(19.99), dec!(0.25));
        assert_eq!(t.sector_cap(20.0), dec!(0.20));
        assert_eq!(t.sector_cap(29.99), dec!(0.20));
        assert_eq!(t.sector_cap(30.0), dec!(0.15));
        assert_eq!(t.sector_cap(40.0), dec!(0.10));
        assert_eq!(t.sector_cap(85.0), dec!(0.10));
    }

    #[test]
    fn validate_rejects_zero_budget() {
        let mut config = AppConfig::default();
        config.decisions.max_daily_decisions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unsorted_tiers() {
        let mut config = AppConfig::default();
        config.risk.sector_cap_tiers.reverse();
        assert!(config.validate().is_err());
    }

    #[test]
    fn trading_window_is_inclusive() {
        let window = TradingWindow::at(10, 11);
        assert!(window.contains(NaiveTime::from_hms_opt(10, 0, 0).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(11, 0, 0).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(11, 0, 1).unwrap()));
    }
}
