//! Cross-sector correlation monitoring.
//!
//! When sector ETFs start moving together, diversification stops protecting
//! the book. Average pairwise correlation above `correlation_threshold` is a
//! crisis warning; above `correlation_extreme` it triggers the Black Swan
//! protocol.

use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use wheel_core::{DataUnavailable, RiskThresholds};
use wheel_ib::MarketDataGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationLevel {
    Normal,
    Crisis,
    Extreme,
}

impl CorrelationLevel {
    pub fn classify(avg_correlation: f64, thresholds: &RiskThresholds) -> Self {
        if avg_correlation > thresholds.correlation_extreme {
            Self::Extreme
        } else if avg_correlation > thresholds.correlation_threshold {
            Self::Crisis
        } else {
            Self::Normal
        }
    }
}

/// Simple daily returns.
pub fn daily_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

/// Pearson correlation of two equally long series. Degenerate input yields 0.
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return 0.0;
    }

    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;

    for (xi, yi) in x.iter().zip(y.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        covariance += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denominator = (var_x * var_y).sqrt();
    if denominator < f64::EPSILON {
        return 0.0;
    }

    covariance / denominator
}

/// Mean of all pairwise correlations. `None` with fewer than two series.
///
/// Series of different lengths are aligned on their most recent values.
pub fn average_pairwise_correlation(series: &[Vec<f64>]) -> Option<f64> {
    let len = series.iter().map(Vec::len).min()?;
    if series.len() < 2 || len < 2 {
        return None;
    }
    let tails: Vec<&[f64]> = series.iter().map(|s| &s[s.len() - len..]).collect();

    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..tails.len() {
        for j in (i + 1)..tails.len() {
            total += pearson_correlation(tails[i], tails[j]);
            pairs += 1;
        }
    }
    Some(total / pairs as f64)
}

/// Average pairwise correlation of daily returns across `etfs` over the
/// last `lookback` sessions.
///
/// # Errors
///
/// Any missing history is `DataUnavailable`; correlation over a partial
/// basket would understate concentration.
pub async fn sector_correlation(
    market: &dyn MarketDataGateway,
    etfs: &[String],
    lookback: usize,
) -> Result<f64, DataUnavailable> {
    let mut series = Vec::with_capacity(etfs.len());
    for etf in etfs {
        let closes: Vec<f64> = market
            .historical_closes(etf, lookback + 1)
            .await?
            .iter()
            .filter_map(ToPrimitive::to_f64)
            .collect();
        series.push(daily_returns(&closes));
    }
    average_pairwise_correlation(&series)
        .ok_or_else(|| DataUnavailable::new("sector correlation", "not enough return history"))
}
