//! Sector exposure and allocation enforcement.
//!
//! Exposure is recomputed from broker positions every time it is needed;
//! only the symbol-to-sector lookup is cached.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use wheel_core::{DataUnavailable, Sector};
use wheel_ib::{InstrumentKind, MarketDataGateway, Position};

/// Capital at risk for one position: assignment notional for short puts,
/// market value for shares, nothing otherwise.
pub fn exposure(position: &Position) -> Decimal {
    match position.kind {
        InstrumentKind::ShortPut => position.assignment_notional(),
        InstrumentKind::Equity => position.market_value.abs(),
        _ => Decimal::ZERO,
    }
}

/// Total exposure per sector.
///
/// Positions whose symbol is missing from `sectors` are counted as `Unknown`.
pub fn sector_exposures(
    positions: &[Position],
    sectors: &HashMap<String, Sector>,
) -> BTreeMap<Sector, Decimal> {
    let mut out = BTreeMap::new();
    for pos in positions {
        let value = exposure(pos);
        if value.is_zero() {
            continue;
        }
        let sector = sectors.get(&pos.symbol).copied().unwrap_or(Sector::Unknown);
        *out.entry(sector).or_insert(Decimal::ZERO) += value;
    }
    out
}

/// Each sector's exposure as a fraction of account value.
pub fn sector_allocations(
    exposures: &BTreeMap<Sector, Decimal>,
    account_value: Decimal,
) -> BTreeMap<Sector, Decimal> {
    if account_value <= Decimal::ZERO {
        return BTreeMap::new();
    }
    exposures
        .iter()
        .map(|(sector, value)| (*sector, value / account_value))
        .collect()
}

/// Check if adding `new_exposure` to a sector keeps it within `max_pct`.
pub fn check_allocation(
    new_exposure: Decimal,
    current_sector_exposure: Decimal,
    account_value: Decimal,
    max_pct: Decimal,
) -> AllocationCheck {
    if account_value <= Decimal::ZERO {
        return AllocationCheck::Rejected {
            current_pct: Decimal::ZERO,
            would_be_pct: Decimal::ZERO,
            max_pct,
        };
    }
    let max_allowed = account_value * max_pct;
    let after_trade = current_sector_exposure + new_exposure;

    if after_trade > max_allowed {
        AllocationCheck::Rejected {
            current_pct: current_sector_exposure / account_value,
            would_be_pct: after_trade / account_value,
            max_pct,
        }
    } else {
        AllocationCheck::Approved {
            remaining_capacity: max_allowed - after_trade,
            would_be_pct: after_trade / account_value,
        }
    }
}

/// Result of an allocation check. Percentages are fractions of the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AllocationCheck {
    Approved {
        remaining_capacity: Decimal,
        would_be_pct: Decimal,
    },
    Rejected {
        current_pct: Decimal,
        would_be_pct: Decimal,
        max_pct: Decimal,
    },
}

impl AllocationCheck {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}

/// Resolves and caches the sector of each symbol.
#[derive(Default)]
pub struct SectorMonitor {
    cache: RwLock<HashMap<String, Sector>>,
}

impl SectorMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sector of `symbol`, from cache or the market data profile.
    ///
    /// # Errors
    ///
    /// Returns `DataUnavailable` if the profile cannot be fetched.
    pub async fn sector_of(
        &self,
        market: &dyn MarketDataGateway,
        symbol: &str,
    ) -> Result<Sector, DataUnavailable> {
        let cached = self.cache.read().get(symbol).copied();
        if let Some(sector) = cached {
            return Ok(sector);
        }
        let sector = market.symbol_profile(symbol).await?.sector;
        self.cache.write().insert(symbol.to_string(), sector);
        Ok(sector)
    }

    /// Sectors for every distinct symbol held.
    ///
    /// # Errors
    ///
    /// Fails if any symbol cannot be resolved, since a partial map would
    /// understate exposure.
    pub async fn sectors_for(
        &self,
        market: &dyn MarketDataGateway,
        positions: &[Position],
    ) -> Result<HashMap<String, Sector>, DataUnavailable> {
        let mut out = HashMap::new();
        for pos in positions {
            if !out.contains_key(&pos.symbol) {
                let sector = self.sector_of(market, &pos.symbol).await?;
                out.insert(pos.symbol.clone(), sector);
            }
        }
        Ok(out)
    }
}
