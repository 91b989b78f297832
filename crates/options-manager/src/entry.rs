//! Entry criteria for new cash-secured puts.
//!
//! Every rule runs on every call and appends its own issue; a candidate is
//! approved only with zero issues. Inputs arrive pre-fetched so the rule set
//! stays a pure function. A missing input becomes an issue, never a pass.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use wheel_core::{DataUnavailable, RiskThresholds};
use wheel_ib::SymbolProfile;

use crate::valuation::ValuationRule;
use crate::volatility::IvMetrics;

#[derive(Debug, Clone, PartialEq)]
pub struct EntryRequest {
    pub symbol: String,
    pub strike: Decimal,
    pub contracts: u32,
}

impl EntryRequest {
    pub fn new(symbol: impl Into<String>, strike: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            strike,
            contracts: 1,
        }
    }

    #[must_use]
    pub fn with_contracts(mut self, contracts: u32) -> Self {
        self.contracts = contracts.max(1);
        self
    }

    /// Cash needed if assigned.
    pub fn notional(&self) -> Decimal {
        self.strike * Decimal::from(100) * Decimal::from(self.contracts)
    }
}

/// Engine state consulted by the gating rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RiskGates {
    pub black_swan_blocks_entries: bool,
    pub circuit_breaker_active: bool,
    pub consecutive_wins: u32,
}

/// Everything the rules read, each fetched independently.
#[derive(Debug, Clone)]
pub struct EntryInputs {
    pub today: NaiveDate,
    pub account_value: Result<Decimal, DataUnavailable>,
    pub spot: Result<Decimal, DataUnavailable>,
    pub iv: Result<IvMetrics, DataUnavailable>,
    pub profile: Result<SymbolProfile, DataUnavailable>,
    /// Existing exposure in the candidate's sector.
    pub sector_exposure: Result<Decimal, DataUnavailable>,
    pub vix: Result<f64, DataUnavailable>,
    pub next_earnings: Result<Option<NaiveDate>, DataUnavailable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryVerdict {
    pub symbol: String,
    pub strike: Decimal,
    pub approved: bool,
    pub issues: Vec<String>,
}

/// Runs every entry rule.
pub fn evaluate_entry(
    request: &EntryRequest,
    inputs: &EntryInputs,
    gates: RiskGates,
    thresholds: &RiskThresholds,
) -> EntryVerdict {
    let mut issues = Vec::new();
    let hundred = Decimal::from(100);

    if gates.black_swan_blocks_entries {
        issues.push("Black Swan protocol active: new entries blocked".to_string());
    }

    match &inputs.iv {
        Ok(iv) => {
            if iv.iv_rank < thresholds.iv_rank_min {
                issues.push(format!("IV rank {:.1} < {:.0}", iv.iv_rank, thresholds.iv_rank_min));
            }
            if iv.current_iv < thresholds.iv_min {
                issues.push(format!("IV {:.1}% < {:.0}%", iv.current_iv, thresholds.iv_min));
            }
        }
        Err(e) => issues.push(e.to_string()),
    }

    match (&inputs.profile, &inputs.spot) {
        (Ok(profile), Ok(spot)) => {
            if profile.average_volume < thresholds.min_avg_volume {
                issues.push(format!(
                    "Average volume {} < {}",
                    profile.average_volume, thresholds.min_avg_volume
                ));
            }
            if let Err(detail) =
                ValuationRule::for_sector(profile.sector).evaluate(&profile.ratios, request.strike, *spot)
            {
                issues.push(format!("{} valuation: {detail}", profile.sector));
            }
        }
        (Err(e), _) | (_, Err(e)) => issues.push(e.to_string()),
    }

    let notional = request.notional();
    match &inputs.account_value {
        Ok(account) => {
            let max = account * thresholds.max_position_pct;
            if notional > max {
                issues.push(format!(
                    "Position ${notional:.0} exceeds {:.0}% limit (${max:.0})",
                    thresholds.max_position_pct * hundred
                ));
            }

            match (&inputs.sector_exposure, &inputs.vix) {
                (Ok(existing), Ok(vix)) if *account > Decimal::ZERO => {
                    let cap = thresholds.sector_cap(*vix);
                    let projected = (existing + notional) / account;
                    if projected > cap {
                        issues.push(format!(
                            "Sector exposure {:.1}% would exceed {:.0}% cap at VIX {vix:.1}",
                            projected * hundred,
                            cap * hundred
                        ));
                    }
                }
                (Ok(_), Ok(_)) => issues.push("Account value is not positive".to_string()),
                (Err(e), _) | (_, Err(e)) => issues.push(e.to_string()),
            }
        }
        Err(e) => issues.push(e.to_string()),
    }

    match &inputs.next_earnings {
        Ok(Some(date)) => {
            let days = (*date - inputs.today).num_days();
            if (0..=thresholds.earnings_buffer_days).contains(&days) {
                issues.push(format!("Earnings in {days} days"));
            }
        }
        Ok(None) => {}
        Err(e) => issues.push(e.to_string()),
    }

    if gates.circuit_breaker_active {
        issues.push("Circuit breaker active: new entries halted".to_string());
    }

    if gates.consecutive_wins >= thresholds.win_streak_caution {
        issues.push(format!(
            "Win streak of {} reached caution level {}",
            gates.consecutive_wins, thresholds.win_streak_caution
        ));
    }

    EntryVerdict {
        symbol: request.symbol.clone(),
        strike: request.strike,
        approved: issues.is_empty(),
        issues,
    }
}
