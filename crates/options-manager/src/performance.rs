//! Trade results, daily P&L and performance metrics.
//!
//! Also the source of the circuit breaker's account history: peak value,
//! trailing daily P&L and the current losing-day streak.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::circuit_breaker::BreakerInputs;
use crate::regime::MarketRegime;
use crate::volatility::TRADING_DAYS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeCategory {
    /// Cash-secured put
    Csp,
    /// Covered call
    Cc,
    Roll,
    Close,
    Other,
}

/// One closed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub category: TradeCategory,
    pub pnl: Decimal,
    pub regime: MarketRegime,
    /// Rule that triggered the trade, e.g. `ROLL_TIME`.
    pub rule: String,
    pub closed: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPnl {
    pub date: NaiveDate,
    pub pnl: Decimal,
    /// Account value at the end of the day.
    pub account_value: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributionStats {
    pub trades: usize,
    pub wins: usize,
    pub total_pnl: Decimal,
}

impl AttributionStats {
    fn add(&mut self, pnl: Decimal) {
        self.trades += 1;
        if pnl > Decimal::ZERO {
            self.wins += 1;
        }
        self.total_pnl += pnl;
    }

    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            return 0.0;
        }
        self.wins as f64 / self.trades as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Fractional change since tracking began.
    pub total_return: Decimal,
    pub total_trades: usize,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: Decimal,
    pub max_consecutive_wins: usize,
    pub best_day: Option<Decimal>,
    pub worst_day: Option<Decimal>,
    pub avg_day: Option<Decimal>,
    pub by_category: BTreeMap<TradeCategory, AttributionStats>,
    pub by_regime: BTreeMap<MarketRegime, AttributionStats>,
    pub by_rule: BTreeMap<String, AttributionStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceTracker {
    starting_value: Decimal,
    peak: Decimal,
    trades: Vec<TradeRecord>,
    days: BTreeMap<NaiveDate, DailyPnl>,
    /// Days on or before this date are excluded from breaker history.
    window_reset: Option<NaiveDate>,
}

impl PerformanceTracker {
    pub fn new(starting_value: Decimal) -> Self {
        Self {
            starting_value,
            peak: starting_value,
            trades: Vec::new(),
            days: BTreeMap::new(),
            window_reset: None,
        }
    }

    pub fn peak(&self) -> Decimal {
        self.peak
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn record_trade(&mut self, trade: TradeRecord) {
        info!(
            symbol = %trade.symbol,
            category = ?trade.category,
            pnl = %trade.pnl,
            rule = %trade.rule,
            "Trade result recorded"
        );
        self.trades.push(trade);
    }

    /// Marks the account value for `date`. A second mark on the same day
    /// replaces the first.
    pub fn record_day(&mut self, date: NaiveDate, account_value: Decimal) {
        let previous = self
            .days
            .range(..date)
            .next_back()
            .map_or(self.starting_value, |(_, d)| d.account_value);
        self.days.insert(
            date,
            DailyPnl {
                date,
                pnl: account_value - previous,
                account_value,
            },
        );
        if account_value > self.peak {
            self.peak = account_value;
        }
    }

    /// Restarts the breaker history after a cooldown: the peak becomes the
    /// current value and earlier days stop counting.
    pub fn reset_baseline(&mut self, account_value: Decimal, today: NaiveDate) {
        info!(%account_value, %today, "Drawdown baseline reset");
        self.peak = account_value;
        self.window_reset = Some(today);
    }

    fn breaker_days(&self) -> impl DoubleEndedIterator<Item = &DailyPnl> + '_ {
        let reset = self.window_reset;
        self.days
            .values()
            .filter(move |d| reset.map_or(true, |r| d.date > r))
    }

    /// Breaker inputs as of `account_value`.
    pub fn breaker_inputs(&self, account_value: Decimal, trailing_days: usize) -> BreakerInputs {
        let trailing_pnl = self.breaker_days().rev().take(trailing_days).map(|d| d.pnl).sum();
        let consecutive_losing_days = self
            .breaker_days()
            .rev()
            .take_while(|d| d.pnl < Decimal::ZERO)
            .count();
        BreakerInputs {
            account_value,
            peak_value: self.peak.max(account_value),
            trailing_pnl,
            consecutive_losing_days: u32::try_from(consecutive_losing_days).unwrap_or(u32::MAX),
        }
    }

    /// Realized P&L of trades closed within `from..=to`.
    pub fn realized_pnl(&self, from: NaiveDate, to: NaiveDate) -> Decimal {
        self.trades
            .iter()
            .filter(|t| t.closed >= from && t.closed <= to)
            .map(|t| t.pnl)
            .sum()
    }

    pub fn metrics(&self, account_value: Decimal) -> PerformanceMetrics {
        let mut out = PerformanceMetrics {
            total_trades: self.trades.len(),
            ..PerformanceMetrics::default()
        };
        if self.starting_value > Decimal::ZERO {
            out.total_return = (account_value - self.starting_value) / self.starting_value;
        }

        let mut streak = 0;
        let mut wins = 0;
        for t in &self.trades {
            out.by_category.entry(t.category).or_default().add(t.pnl);
            out.by_regime.entry(t.regime).or_default().add(t.pnl);
            out.by_rule.entry(t.rule.clone()).or_default().add(t.pnl);
            if t.pnl > Decimal::ZERO {
                wins += 1;
                streak += 1;
                out.max_consecutive_wins = out.max_consecutive_wins.max(streak);
            } else {
                streak = 0;
            }
        }
        if !self.trades.is_empty() {
            out.win_rate = wins as f64 / self.trades.len() as f64;
        }

        let pnls: Vec<Decimal> = self.days.values().map(|d| d.pnl).collect();
        out.best_day = pnls.iter().max().copied();
        out.worst_day = pnls.iter().min().copied();
        if !pnls.is_empty() {
            out.avg_day = Some(pnls.iter().sum::<Decimal>() / Decimal::from(pnls.len()));
        }

        let returns = self.daily_returns();
        out.sharpe_ratio = sharpe(&returns);
        out.sortino_ratio = sortino(&returns);
        out.max_drawdown = self.max_drawdown();
        out
    }

    fn daily_returns(&self) -> Vec<f64> {
        let mut previous = self.starting_value;
        let mut out = Vec::with_capacity(self.days.len());
        for d in self.days.values() {
            if previous > Decimal::ZERO {
                out.push((d.pnl / previous).to_f64().unwrap_or(0.0));
            }
            previous = d.account_value;
        }
        out
    }

    fn max_drawdown(&self) -> Decimal {
        let mut max_drawdown = Decimal::ZERO;
        let mut peak = self.starting_value;
        for d in self.days.values() {
            if d.account_value > peak {
                peak = d.account_value;
            }
            if peak > Decimal::ZERO {
                let drawdown = (peak - d.account_value) / peak;
                if drawdown > max_drawdown {
                    max_drawdown = drawdown;
                }
            }
        }
        max_drawdown
    }
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Annualized Sharpe ratio of daily returns, zero rate.
fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let m = mean(returns);
    let var = returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / returns.len() as f64;
    let sd = var.sqrt();
    if sd > 0.0 {
        m / sd * (TRADING_DAYS as f64).sqrt()
    } else {
        0.0
    }
}

/// Annualized Sortino ratio: only losing days count toward deviation.
fn sortino(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let m = mean(returns);
    let downside = returns.iter().map(|r| r.min(0.0).powi(2)).sum::<f64>() / returns.len() as f64;
    let dd = downside.sqrt();
    if dd > 0.0 {
        m / dd * (TRADING_DAYS as f64).sqrt()
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 1).unwrap() + Duration::days(n)
    }

    fn trade(category: TradeCategory, pnl: Decimal, regime: MarketRegime) -> TradeRecord {
        TradeRecord {
            symbol: "AAPL".to_string(),
            category,
            pnl,
            regime,
            rule: "PROFIT_TARGET".to_string(),
            closed: day(0),
        }
    }

    #[test]
    fn daily_pnl_chains_from_previous_close() {
        let mut p = PerformanceTracker::new(dec!(100000));
        p.record_day(day(0), dec!(101000));
        p.record_day(day(1), dec!(99500));
        // remark replaces
        p.record_day(day(1), dec!(99000));

        let inputs = p.breaker_inputs(dec!(99000), 5);
        assert_eq!(inputs.peak_value, dec!(101000));
        assert_eq!(inputs.trailing_pnl, dec!(-1000));
        assert_eq!(inputs.consecutive_losing_days, 1);
    }

    #[test]
    fn losing_streak_counts_from_latest_day() {
        let mut p = PerformanceTracker::new(dec!(100000));
        for (i, value) in [dec!(99000), dec!(99500), dec!(99000), dec!(98000), dec!(97000)]
            .into_iter()
            .enumerate()
        {
            p.record_day(day(i as i64), value);
        }
        let inputs = p.breaker_inputs(dec!(97000), 5);
        assert_eq!(inputs.consecutive_losing_days, 3);
        assert_eq!(inputs.trailing_pnl, dec!(-3000));
    }

    #[test]
    fn baseline_reset_clears_breaker_history() {
        let mut p = PerformanceTracker::new(dec!(100000));
        p.record_day(day(0), dec!(80000));
        p.reset_baseline(dec!(80000), day(0));

        let inputs = p.breaker_inputs(dec!(80000), 5);
        assert_eq!(inputs.peak_value, dec!(80000));
        assert_eq!(inputs.trailing_pnl, dec!(0));
        assert_eq!(inputs.consecutive_losing_days, 0);
    }

    #[test]
    fn attribution_and_streaks() {
        let mut p = PerformanceTracker::new(dec!(100000));
        p.record_trade(trade(TradeCategory::Csp, dec!(200), MarketRegime::Bull));
        p.record_trade(trade(TradeCategory::Csp, dec!(150), MarketRegime::Bull));
        p.record_trade(trade(TradeCategory::Roll, dec!(-80), MarketRegime::Bear));
        p.record_trade(trade(TradeCategory::Cc, dec!(90), MarketRegime::Neutral));

        let m = p.metrics(dec!(100360));
        assert_eq!(m.total_trades, 4);
        assert!((m.win_rate - 0.75).abs() < 1e-12);
        assert_eq!(m.max_consecutive_wins, 2);
        assert_eq!(m.by_category[&TradeCategory::Csp].total_pnl, dec!(350));
        assert_eq!(m.by_regime[&MarketRegime::Bear].wins, 0);
        assert_eq!(m.by_rule["PROFIT_TARGET"].trades, 4);
        assert_eq!(m.total_return, dec!(0.0036));
    }

    #[test]
    fn day_stats_and_drawdown() {
        let mut p = PerformanceTracker::new(dec!(100000));
        p.record_day(day(0), dec!(102000));
        p.record_day(day(1), dec!(96900));
        p.record_day(day(2), dec!(98000));

        let m = p.metrics(dec!(98000));
        assert_eq!(m.best_day, Some(dec!(2000)));
        assert_eq!(m.worst_day, Some(dec!(-5100)));
        assert_eq!(m.max_drawdown, dec!(0.05));
        assert!(m.sortino_ratio.is_finite());
    }

    #[test]
    fn realized_pnl_by_range() {
        let mut p = PerformanceTracker::new(dec!(100000));
        let mut t = trade(TradeCategory::Csp, dec!(100), MarketRegime::Bull);
        p.record_trade(t.clone());
        t.closed = day(10);
        t.pnl = dec!(50);
        p.record_trade(t);
        assert_eq!(p.realized_pnl(day(0), day(5)), dec!(100));
        assert_eq!(p.realized_pnl(day(0), day(10)), dec!(150));
    }
}
