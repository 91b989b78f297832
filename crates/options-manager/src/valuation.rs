//! Sector-specific valuation gates.
//!
//! Each sector judges "fair value" by different ratios. Some ratios are
//! scaled by `strike / spot` to estimate the multiple we would effectively
//! pay if assigned at the strike.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use wheel_core::Sector;
use wheel_ib::ValuationRatios;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuationRule {
    Technology,
    Financials,
    Healthcare,
    ConsumerCyclical,
    Industrials,
    /// Fallback for every other sector.
    Default,
}

impl ValuationRule {
    pub fn for_sector(sector: Sector) -> Self {
        match sector {
            Sector::Technology => Self::Technology,
            Sector::Financials => Self::Financials,
            Sector::Healthcare => Self::Healthcare,
            Sector::ConsumerCyclical => Self::ConsumerCyclical,
            Sector::Industrials => Self::Industrials,
            _ => Self::Default,
        }
    }

    /// `Ok` if the candidate passes, otherwise the issue text.
    ///
    /// A missing ratio fails the branch that needs it.
    pub fn evaluate(
        self,
        ratios: &ValuationRatios,
        strike: Decimal,
        spot: Decimal,
    ) -> Result<(), String> {
        let Some(implied) = (spot > Decimal::ZERO)
            .then(|| (strike / spot).to_f64())
            .flatten()
        else {
            return Err("spot price must be positive".to_string());
        };
        let scaled = |r: Option<f64>| r.map(|v| v * implied);

        let (passed, detail) = match self {
            Self::Technology => {
                let ps = scaled(ratios.price_to_sales);
                (
                    positive_below(ratios.peg, 1.5) || positive_below(ps, 5.0),
                    format!("PEG {} / implied P/S {} (need PEG < 1.5 or P/S < 5)", show(ratios.peg), show(ps)),
                )
            }
            Self::Financials => {
                let pb = scaled(ratios.price_to_book);
                (
                    positive_below(pb, 1.5) || positive_below(ratios.pe, 15.0),
                    format!("implied P/B {} / P/E {} (need P/B < 1.5 or P/E < 15)", show(pb), show(ratios.pe)),
                )
            }
            Self::Healthcare => (
                positive_below(ratios.pe, 30.0) || positive_below(ratios.price_to_sales, 10.0),
                format!(
                    "P/E {} / P/S {} (need P/E < 30 or P/S < 10)",
                    show(ratios.pe),
                    show(ratios.price_to_sales)
                ),
            ),
            Self::ConsumerCyclical => (
                ratios.fcf_yield.is_some_and(|y| y >= 0.05) || positive_below(ratios.pe, 20.0),
                format!(
                    "FCF yield {} / P/E {} (need FCF yield >= 5% or P/E < 20)",
                    show(ratios.fcf_yield),
                    show(ratios.pe)
                ),
            ),
            Self::Industrials => {
                let ev = scaled(ratios.ev_to_ebitda);
                (
                    positive_below(ev, 12.0),
                    format!("implied EV/EBITDA {} (need < 12)", show(ev)),
                )
            }
            Self::Default => (
                positive_below(ratios.pe, 25.0),
                format!("P/E {} (need < 25)", show(ratios.pe)),
            ),
        };

        if passed {
            Ok(())
        } else {
            Err(detail)
        }
    }
}

fn positive_below(value: Option<f64>, max: f64) -> bool {
    matches!(value, Some(v) if v > 0.0 && v < max)
}

fn show(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}"))
}
