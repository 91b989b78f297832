//! Market data gateway: quotes, chains, history and fundamentals.
//!
//! Every call returns `DataUnavailable` rather than a guessed value when the
//! provider cannot answer.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use wheel_core::{DataUnavailable, Sector};

use crate::options_chain::OptionsChain;
use crate::types::{Instrument, OptionGreeks, OptionsContract, TopOfBook};

/// Fundamental ratios used by sector valuation rules. Any may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuationRatios {
    pub pe: Option<f64>,
    pub peg: Option<f64>,
    pub price_to_sales: Option<f64>,
    pub price_to_book: Option<f64>,
    pub ev_to_ebitda: Option<f64>,
    /// Free cash flow yield as a fraction (0.05 = 5%).
    pub fcf_yield: Option<f64>,
}

/// Static facts about an underlying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolProfile {
    pub sector: Sector,
    pub average_volume: u64,
    #[serde(default)]
    pub ratios: ValuationRatios,
}

#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Last traded price of a stock, ETF or index.
    async fn quote(&self, symbol: &str) -> Result<Decimal, DataUnavailable>;

    async fn top_of_book(&self, instrument: &Instrument) -> Result<TopOfBook, DataUnavailable>;

    /// Listed option expirations, ascending.
    async fn expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, DataUnavailable>;

    async fn option_chain(
        &self,
        symbol: &str,
        expiry: NaiveDate,
    ) -> Result<OptionsChain, DataUnavailable>;

    /// Live greeks for one contract.
    async fn option_greeks(
        &self,
        contract: &OptionsContract,
    ) -> Result<OptionGreeks, DataUnavailable>;

    /// Daily closes, oldest first, at most `sessions` long.
    async fn historical_closes(
        &self,
        symbol: &str,
        sessions: usize,
    ) -> Result<Vec<Decimal>, DataUnavailable>;

    /// `Ok(None)` means no earnings are scheduled.
    async fn next_earnings_date(&self, symbol: &str) -> Result<Option<NaiveDate>, DataUnavailable>;

    async fn symbol_profile(&self, symbol: &str) -> Result<SymbolProfile, DataUnavailable>;
}
