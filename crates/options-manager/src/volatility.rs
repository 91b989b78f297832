//! Implied volatility level and IV rank.

use chrono::{Duration, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use wheel_core::DataUnavailable;
use wheel_ib::options_chain::nearest_expiry;
use wheel_ib::{MarketDataGateway, OptionRight};

/// Sessions in a trading year.
pub const TRADING_DAYS: usize = 252;
/// Rolling window for realized volatility samples.
const VOL_WINDOW: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IvMetrics {
    /// ATM implied volatility, percent.
    pub current_iv: f64,
    /// Share of the past year's realized-vol samples below `current_iv`, 0..=100.
    pub iv_rank: f64,
}

/// Annualized standard deviation of log returns, percent.
pub fn realized_vol(closes: &[f64]) -> Option<f64> {
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect();
    if returns.len() < 2 {
        return None;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(var.sqrt() * (TRADING_DAYS as f64).sqrt() * 100.0)
}

/// Percent rank of `current_iv` among rolling realized-vol samples.
pub fn iv_rank(current_iv: f64, closes: &[f64]) -> Option<f64> {
    if closes.len() <= VOL_WINDOW + 1 {
        return None;
    }
    let samples: Vec<f64> = closes
        .windows(VOL_WINDOW + 1)
        .filter_map(realized_vol)
        .collect();
    if samples.is_empty() {
        return None;
    }
    let below = samples.iter().filter(|v| **v < current_iv).count();
    Some(below as f64 / samples.len() as f64 * 100.0)
}

/// Fetches the ATM put IV nearest `target_dte` and ranks it against a year
/// of realized volatility.
///
/// # Errors
///
/// Returns `DataUnavailable` if the chain, history, or a usable IV is missing.
pub async fn iv_metrics(
    market: &dyn MarketDataGateway,
    symbol: &str,
    spot: Decimal,
    today: NaiveDate,
    target_dte: i64,
) -> Result<IvMetrics, DataUnavailable> {
    let expirations = market.expirations(symbol).await?;
    let expiry = nearest_expiry(&expirations, today + Duration::days(target_dte))
        .ok_or_else(|| DataUnavailable::new("implied volatility", "no expirations").for_subject(symbol))?;
    let chain = market.option_chain(symbol, expiry).await?;
    let atm = chain
        .nearest_strike(OptionRight::Put, spot)
        .ok_or_else(|| DataUnavailable::new("implied volatility", "no puts listed").for_subject(symbol))?;
    if atm.implied_vol <= 0.0 {
        return Err(DataUnavailable::new("implied volatility", "provider IV is zero").for_subject(symbol));
    }
    let current_iv = atm.implied_vol * 100.0;

    let closes: Vec<f64> = market
        .historical_closes(symbol, TRADING_DAYS)
        .await?
        .iter()
        .filter_map(ToPrimitive::to_f64)
        .collect();
    let iv_rank = iv_rank(current_iv, &closes).ok_or_else(|| {
        DataUnavailable::new("IV rank", format!("only {} closes of history", closes.len())).for_subject(symbol)
    })?;

    Ok(IvMetrics { current_iv, iv_rank })
}
