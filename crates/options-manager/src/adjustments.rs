//! Roll and close rules for open positions.
//!
//! Short options are checked in strict priority order and only the first
//! matching rule produces an adjustment. Evaluation is a pure function of the
//! snapshot, so re-running a pass yields the same result.

use std::collections::HashSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use wheel_core::RiskThresholds;
use wheel_ib::{InstrumentKind, Position};

use crate::types::{Adjustment, DecisionAction, DecisionPriority};

/// A position plus the live figures its rules need.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSnapshot {
    pub position: Position,
    /// Live delta for options. `None` when the provider could not supply it.
    pub delta: Option<f64>,
    /// Underlying price for stock positions.
    pub price: Option<Decimal>,
}

/// Check roll/close rules against a short option. Returns the first match.
pub fn check_short_option(
    pos: &Position,
    delta: Option<f64>,
    today: NaiveDate,
    thresholds: &RiskThresholds,
) -> Option<Adjustment> {
    if !pos.kind.is_short_option() {
        return None;
    }
    let make = |action, priority, reason: String| Adjustment {
        position: pos.clone(),
        action,
        priority,
        reason,
    };

    // 1. Defensive roll. Without a live delta this rule cannot be ruled out,
    //    so the position goes to review instead of falling through.
    let Some(delta) = delta else {
        tracing::warn!(position = %pos.label(), "Delta unavailable, flagging for review");
        return Some(make(
            DecisionAction::Evaluate,
            DecisionPriority::Critical,
            "Delta unavailable; defensive roll check could not run".to_string(),
        ));
    };
    if delta.abs() > thresholds.roll_delta_threshold {
        return Some(make(
            DecisionAction::RollDefensive,
            DecisionPriority::Critical,
            format!("Delta {:.2} beyond {:.2}", delta.abs(), thresholds.roll_delta_threshold),
        ));
    }

    let dte = pos.days_to_expiry(today)?;

    // 2. Time roll
    if dte <= thresholds.roll_dte {
        return Some(make(
            DecisionAction::RollTime,
            DecisionPriority::Important,
            format!("{dte} DTE, at or inside {} day roll window", thresholds.roll_dte),
        ));
    }

    let pnl = pos.pnl_ratio();
    let pct = pnl * Decimal::from(100);
    match pos.kind {
        // 3. Profit roll on puts
        InstrumentKind::ShortPut if pnl >= thresholds.profit_roll && dte > thresholds.profit_roll_min_dte => {
            Some(make(
                DecisionAction::RollPosition,
                DecisionPriority::Routine,
                format!("Captured {pct:.1}% of premium with {dte} DTE left"),
            ))
        }
        // 4. Profit target on calls
        InstrumentKind::ShortCall if pnl >= thresholds.profit_target => Some(make(
            DecisionAction::ClosePosition,
            DecisionPriority::Important,
            format!("Profit target hit: {pct:.1}%"),
        )),
        _ => None,
    }
}

/// Check share rules. Both may apply to the same position.
pub fn check_shares(
    pos: &Position,
    price: Option<Decimal>,
    has_short_call: bool,
    thresholds: &RiskThresholds,
) -> Vec<Adjustment> {
    if pos.kind != InstrumentKind::Equity {
        return Vec::new();
    }
    let mut out = Vec::new();

    match price {
        Some(price) => {
            let stop = pos.avg_cost * (Decimal::ONE - thresholds.shares_stop_loss_pct);
            if price < stop {
                out.push(Adjustment {
                    position: pos.clone(),
                    action: DecisionAction::EvaluateShares,
                    priority: DecisionPriority::Critical,
                    reason: format!("Share price {price:.2} below stop {stop:.2}"),
                });
            }
        }
        None => out.push(Adjustment {
            position: pos.clone(),
            action: DecisionAction::Evaluate,
            priority: DecisionPriority::Critical,
            reason: "Share price unavailable; stop check could not run".to_string(),
        }),
    }

    if pos.quantity >= 100 && !has_short_call {
        out.push(Adjustment {
            position: pos.clone(),
            action: DecisionAction::SellCoveredCall,
            priority: DecisionPriority::Important,
            reason: "Shares without covered call".to_string(),
        });
    }
    out
}

/// Runs every rule over a snapshot. Critical adjustments sort first.
pub fn scan(snapshots: &[PositionSnapshot], today: NaiveDate, thresholds: &RiskThresholds) -> Vec<Adjustment> {
    let covered: HashSet<&str> = snapshots
        .iter()
        .filter(|s| s.position.kind == InstrumentKind::ShortCall)
        .map(|s| s.position.symbol.as_str())
        .collect();

    let mut out = Vec::new();
    for snap in snapshots {
        let pos = &snap.position;
        if pos.kind.is_short_option() {
            out.extend(check_short_option(pos, snap.delta, today, thresholds));
        } else if pos.kind == InstrumentKind::Equity {
            out.extend(check_shares(pos, snap.price, covered.contains(pos.symbol.as_str()), thresholds));
        }
    }
    out.sort_by(|a, b| b.priority.cmp(&a.priority));
    out
}
