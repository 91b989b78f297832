//! Options chain snapshots and strike/expiry selection.

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{OptionRight, OptionsContract, TopOfBook};

/// One row of an options chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEntry {
    pub expiry: NaiveDate,
    pub right: OptionRight,
    pub strike: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last_price: Decimal,
    /// Implied volatility as a fraction (0.25 = 25%).
    pub implied_vol: f64,
    /// Provider delta. Chains without greeks leave this empty.
    #[serde(default)]
    pub delta: Option<f64>,
    #[serde(default)]
    pub volume: u64,
    #[serde(default)]
    pub open_interest: u64,
}

impl ChainEntry {
    pub fn contract(&self, symbol: &str) -> OptionsContract {
        OptionsContract::new(symbol, self.expiry, self.strike, self.right)
    }

    pub fn book(&self) -> TopOfBook {
        TopOfBook {
            bid: self.bid,
            ask: self.ask,
        }
    }
}

/// Options chain for a single underlying and expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionsChain {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub entries: Vec<ChainEntry>,
}

impl OptionsChain {
    pub fn side(&self, right: OptionRight) -> impl Iterator<Item = &ChainEntry> {
        self.entries.iter().filter(move |e| e.right == right)
    }

    /// Listed strike of `right` nearest to `target`. Ties go to the lower strike.
    pub fn nearest_strike(&self, right: OptionRight, target: Decimal) -> Option<&ChainEntry> {
        self.side(right)
            .min_by_key(|e| ((e.strike - target).abs(), e.strike))
    }

    /// Entry whose absolute delta is closest to `target_abs_delta`.
    ///
    /// Entries without a provider delta are never picked.
    pub fn closest_by_delta(&self, right: OptionRight, target_abs_delta: f64) -> Option<&ChainEntry> {
        self.side(right)
            .filter_map(|e| e.delta.map(|d| ((d.abs() - target_abs_delta).abs(), e)))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, e)| e)
    }

    pub fn find(&self, right: OptionRight, strike: Decimal) -> Option<&ChainEntry> {
        self.side(right).find(|e| e.strike == strike)
    }
}

/// Expiration closest to `target`. Ties go to the earlier date.
pub fn nearest_expiry(expirations: &[NaiveDate], target: NaiveDate) -> Option<NaiveDate> {
    expirations
        .iter()
        .copied()
        .min_by_key(|d| ((*d - target).num_days().abs(), *d))
}

/// Next roll cycle: the listed expiration after `current` closest to
/// `current + cycle_days`.
pub fn next_cycle_expiry(
    expirations: &[NaiveDate],
    current: NaiveDate,
    cycle_days: i64,
) -> Option<NaiveDate> {
    let later: Vec<NaiveDate> = expirations.iter().copied().filter(|d| *d > current).collect();
    nearest_expiry(&later, current + Duration::days(cycle_days))
}
