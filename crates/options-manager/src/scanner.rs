//! Cash-secured put opportunity scanner.
//!
//! Picks puts in the regime's delta band from the expiry nearest the target
//! DTE, ranks them by annualized premium, then spreads them across sectors.
//! Entry criteria are applied afterwards by the engine.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use wheel_core::{DataUnavailable, ScannerConfig, Sector};
use wheel_ib::options_chain::nearest_expiry;
use wheel_ib::{Instrument, MarketDataGateway, OptionRight, OptionsChain, TopOfBook};

use crate::allocation::SectorMonitor;
use crate::entry::EntryVerdict;
use crate::regime::MarketRegime;

const LIQUIDITY_CAP: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: String,
    pub sector: Sector,
    pub spot: Decimal,
    pub strike: Decimal,
    pub expiry: NaiveDate,
    pub dte: i64,
    pub premium: Decimal,
    pub delta: Option<f64>,
    /// Implied volatility, percent.
    pub iv: f64,
    pub annual_return: f64,
    pub liquidity_score: f64,
    /// Entry screen result, filled in once checked.
    pub verdict: Option<EntryVerdict>,
}

impl Opportunity {
    pub fn notional(&self) -> Decimal {
        self.strike * Decimal::from(100)
    }

    pub fn is_approved(&self) -> bool {
        self.verdict.as_ref().is_some_and(|v| v.approved)
    }
}

/// Premium over strike, annualized.
pub fn annualized_return(premium: Decimal, strike: Decimal, dte: i64) -> f64 {
    if strike <= Decimal::ZERO || dte <= 0 {
        return 0.0;
    }
    let ratio = (premium / strike).to_f64().unwrap_or(0.0);
    ratio * 365.0 / dte as f64
}

/// Volume-weighted, spread-penalized liquidity, capped at 10,000.
pub fn liquidity_score(average_volume: u64, book: TopOfBook) -> f64 {
    let (Some(bid), Some(ask)) = (book.bid.to_f64(), book.ask.to_f64()) else {
        return 0.0;
    };
    if bid <= 0.0 || ask <= 0.0 {
        return 0.0;
    }
    let mut spread_pct = (ask - bid) / ((ask + bid) / 2.0);
    if spread_pct <= 0.0 {
        spread_pct = 0.001;
    }
    let volume = average_volume as f64;
    let oi_proxy = (volume / 100.0).min(1000.0);
    (volume * oi_proxy / (spread_pct * 10_000.0)).min(LIQUIDITY_CAP)
}

/// A put that passed the delta and return screens.
#[derive(Debug, Clone, PartialEq)]
pub struct PutCandidate {
    pub strike: Decimal,
    pub premium: Decimal,
    pub delta: Option<f64>,
    /// Implied volatility, percent.
    pub iv: f64,
    pub annual_return: f64,
}

/// Puts on `chain` worth selling at `spot`.
///
/// Uses the provider delta when the chain carries one, otherwise falls back
/// to the configured moneyness band.
pub fn select_puts(
    chain: &OptionsChain,
    spot: Decimal,
    today: NaiveDate,
    regime: MarketRegime,
    config: &ScannerConfig,
) -> Vec<PutCandidate> {
    let dte = (chain.expiry - today).num_days();
    let (lo, hi) = regime.delta_range();
    let min_return = config.min_annual_return.to_f64().unwrap_or(0.0);
    let mut out = Vec::new();
    for put in chain.side(OptionRight::Put) {
        let in_band = match put.delta {
            Some(delta) => (lo..=hi).contains(&delta.abs()),
            None if spot > Decimal::ZERO => {
                (config.min_moneyness..=config.max_moneyness).contains(&(put.strike / spot))
            }
            None => false,
        };
        if !in_band || put.last_price <= Decimal::ZERO {
            continue;
        }
        let annual_return = annualized_return(put.last_price, put.strike, dte);
        if annual_return >= min_return {
            out.push(PutCandidate {
                strike: put.strike,
                premium: put.last_price,
                delta: put.delta,
                iv: put.implied_vol * 100.0,
                annual_return,
            });
        }
    }
    out
}

/// Keeps the best candidates while no sector goes past `max_sector_pct` of
/// the account and the list stays within `max_total`.
pub fn diversify(
    mut candidates: Vec<Opportunity>,
    account_value: Decimal,
    max_sector_pct: Decimal,
    max_total: usize,
) -> Vec<Opportunity> {
    candidates.sort_by(|a, b| b.annual_return.total_cmp(&a.annual_return));
    let cap = account_value * max_sector_pct;
    let mut used: BTreeMap<Sector, Decimal> = BTreeMap::new();
    let mut out = Vec::new();
    for opp in candidates {
        if out.len() >= max_total {
            break;
        }
        let current = used.get(&opp.sector).copied().unwrap_or_default();
        if current + opp.notional() > cap {
            debug!(symbol = %opp.symbol, sector = %opp.sector, "Skipped for sector diversification");
            continue;
        }
        used.insert(opp.sector, current + opp.notional());
        out.push(opp);
    }
    out
}

/// Candidates for one symbol.
///
/// # Errors
///
/// `DataUnavailable` if quote, profile or chain data is missing.
pub async fn scan_symbol(
    market: &dyn MarketDataGateway,
    sectors: &SectorMonitor,
    symbol: &str,
    today: NaiveDate,
    regime: MarketRegime,
    config: &ScannerConfig,
) -> Result<Vec<Opportunity>, DataUnavailable> {
    let spot = market.quote(symbol).await?;
    let sector = sectors.sector_of(market, symbol).await?;
    let profile = market.symbol_profile(symbol).await?;
    let book = market.top_of_book(&Instrument::stock(symbol)).await?;
    let liquidity = liquidity_score(profile.average_volume, book);

    let expirations = market.expirations(symbol).await?;
    let expiry = nearest_expiry(&expirations, today + Duration::days(config.target_dte))
        .ok_or_else(|| DataUnavailable::new("expirations", "none listed").for_subject(symbol))?;
    let chain = market.option_chain(symbol, expiry).await?;
    let dte = (expiry - today).num_days();

    Ok(select_puts(&chain, spot, today, regime, config)
        .into_iter()
        .map(|c| Opportunity {
            symbol: symbol.to_string(),
            sector,
            spot,
            strike: c.strike,
            expiry,
            dte,
            premium: c.premium,
            delta: c.delta,
            iv: c.iv,
            annual_return: c.annual_return,
            liquidity_score: liquidity,
            verdict: None,
        })
        .collect())
}

/// Scans the watchlist. Symbols with missing data are skipped.
pub async fn scan_watchlist(
    market: &dyn MarketDataGateway,
    sectors: &SectorMonitor,
    today: NaiveDate,
    regime: MarketRegime,
    account_value: Decimal,
    max_sector_pct: Decimal,
    config: &ScannerConfig,
) -> Vec<Opportunity> {
    let mut all = Vec::new();
    for symbol in &config.watchlist {
        match scan_symbol(market, sectors, symbol, today, regime, config).await {
            Ok(found) => all.extend(found),
            Err(e) => warn!(%symbol, error = %e, "Skipping symbol in scan"),
        }
    }
    diversify(all, account_value, max_sector_pct, config.max_opportunities)
}
