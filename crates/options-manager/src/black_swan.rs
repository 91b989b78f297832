//! Black Swan crisis protocol.
//!
//! Phases: `Inactive -> Active -> Recovery(1) -> Recovery(2) -> Recovery(3)
//! -> Inactive`. While `Active` the protocol blocks entries and de-risks the
//! book; recovery stages allow entries at a reduced size multiplier. The
//! phase moves at most one recovery step per trading day, since the recovery
//! evidence is built from daily closes. A new trigger during recovery sends
//! the protocol back to `Active`.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use wheel_core::{BlackSwanConfig, RiskThresholds, Sector};
use wheel_ib::{AccountSummary, InstrumentKind, Position};

use crate::regime::sma;
use crate::types::{Adjustment, DecisionAction, DecisionPriority};

/// Stage at which the protocol deactivates.
const FINAL_STAGE: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum BlackSwanPhase {
    Inactive,
    Active,
    Recovery { stage: u8 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrisisTrigger {
    Vix { level: f64 },
    Correlation { average: f64 },
    MarketDrop { change: f64 },
}

impl std::fmt::Display for CrisisTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vix { level } => write!(f, "VIX at {level:.1}"),
            Self::Correlation { average } => write!(f, "sector correlation at {average:.2}"),
            Self::MarketDrop { change } => write!(f, "market down {:.1}% in a day", change * 100.0),
        }
    }
}

/// Crisis readings for one pass. Missing readings cannot trigger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrisisReadings {
    pub vix: Option<f64>,
    pub avg_correlation: Option<f64>,
    /// Index change over the last session, as a fraction.
    pub index_daily_change: Option<f64>,
}

/// Market history for the recovery check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReadings {
    /// Trailing VIX closes, oldest first.
    pub vix_closes: Vec<f64>,
    /// Trailing index closes, oldest first.
    pub index_closes: Vec<Decimal>,
    pub index_price: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlackSwanTransition {
    Activated(CrisisTrigger),
    /// A trigger fired again during recovery.
    Reactivated(CrisisTrigger),
    Advanced { stage: u8 },
    Deactivated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlackSwanState {
    pub phase: BlackSwanPhase,
    pub activated_at: Option<DateTime<Utc>>,
    pub trigger: Option<CrisisTrigger>,
    /// Trading day of the last activation or recovery step.
    #[serde(default)]
    pub last_step: Option<NaiveDate>,
}

impl Default for BlackSwanState {
    fn default() -> Self {
        Self {
            phase: BlackSwanPhase::Inactive,
            activated_at: None,
            trigger: None,
            last_step: None,
        }
    }
}

impl BlackSwanState {
    pub fn blocks_entries(&self) -> bool {
        self.phase == BlackSwanPhase::Active
    }

    pub fn is_engaged(&self) -> bool {
        self.phase != BlackSwanPhase::Inactive
    }

    /// Global position-size multiplier for the current phase.
    pub fn size_multiplier(&self, config: &BlackSwanConfig) -> Decimal {
        match self.phase {
            BlackSwanPhase::Inactive => Decimal::ONE,
            BlackSwanPhase::Active => Decimal::ZERO,
            BlackSwanPhase::Recovery { stage } => config
                .stage_multipliers
                .get(usize::from(stage.saturating_sub(1)))
                .copied()
                .unwrap_or(Decimal::ONE),
        }
    }

    /// Advances the state machine by at most one step. Recovery steps need
    /// `today` to be a later trading day than the previous step.
    pub fn evaluate(
        &mut self,
        trigger: Option<CrisisTrigger>,
        recovery_ok: bool,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> BlackSwanTransition {
        let stepped_today = self.last_step.is_some_and(|d| d >= today);
        match (self.phase, trigger) {
            (BlackSwanPhase::Inactive, Some(trigger)) => {
                warn!(%trigger, "Black Swan protocol activated");
                self.activate(trigger.clone(), now, today);
                BlackSwanTransition::Activated(trigger)
            }
            (BlackSwanPhase::Recovery { stage }, Some(trigger)) => {
                warn!(%trigger, stage, "Crisis trigger during recovery, protocol re-activated");
                self.activate(trigger.clone(), now, today);
                BlackSwanTransition::Reactivated(trigger)
            }
            (BlackSwanPhase::Active, Some(_)) | (BlackSwanPhase::Inactive, None) => {
                BlackSwanTransition::Unchanged
            }
            (_, None) if !recovery_ok => BlackSwanTransition::Unchanged,
            (_, None) if stepped_today => {
                debug!(phase = ?self.phase, %today, "Recovery already stepped today");
                BlackSwanTransition::Unchanged
            }
            (BlackSwanPhase::Active, None) => {
                self.last_step = Some(today);
                self.phase = BlackSwanPhase::Recovery { stage: 1 };
                info!(stage = 1, "Black Swan recovery started");
                BlackSwanTransition::Advanced { stage: 1 }
            }
            (BlackSwanPhase::Recovery { stage }, None) => {
                let next = stage + 1;
                if next >= FINAL_STAGE {
                    info!("Black Swan protocol deactivated, full sizing restored");
                    *self = Self::default();
                    BlackSwanTransition::Deactivated
                } else {
                    info!(stage = next, "Black Swan recovery advanced");
                    self.last_step = Some(today);
                    self.phase = BlackSwanPhase::Recovery { stage: next };
                    BlackSwanTransition::Advanced { stage: next }
                }
            }
        }
    }

    fn activate(&mut self, trigger: CrisisTrigger, now: DateTime<Utc>, today: NaiveDate) {
        self.phase = BlackSwanPhase::Active;
        self.activated_at = Some(now);
        self.trigger = Some(trigger);
        self.last_step = Some(today);
    }
}

/// First crisis trigger present in `readings`, checked VIX, correlation,
/// market drop.
pub fn check_triggers(
    readings: &CrisisReadings,
    config: &BlackSwanConfig,
    thresholds: &RiskThresholds,
) -> Option<CrisisTrigger> {
    if let Some(level) = readings.vix.filter(|v| *v > config.vix_trigger) {
        return Some(CrisisTrigger::Vix { level });
    }
    if let Some(average) = readings
        .avg_correlation
        .filter(|c| *c > thresholds.correlation_extreme)
    {
        return Some(CrisisTrigger::Correlation { average });
    }
    readings
        .index_daily_change
        .filter(|c| *c < config.market_drop_trigger)
        .map(|change| CrisisTrigger::MarketDrop { change })
}

/// Recovery needs, over the trailing window: VIX below `recovery_vix` on
/// enough sessions, the index above its moving average, and enough
/// up days.
pub fn recovery_conditions_met(readings: &RecoveryReadings, config: &BlackSwanConfig) -> bool {
    let window = config.recovery_window;
    if readings.vix_closes.len() < window || readings.index_closes.len() < window + 1 {
        return false;
    }

    let calm_days = readings.vix_closes[readings.vix_closes.len() - window..]
        .iter()
        .filter(|v| **v < config.recovery_vix)
        .count();

    let Some(ma) = sma(&readings.index_closes, window) else {
        return false;
    };

    let tail = &readings.index_closes[readings.index_closes.len() - window - 1..];
    let up_days = tail.windows(2).filter(|w| w[1] > w[0]).count();

    calm_days >= config.recovery_vix_days
        && readings.index_price > ma
        && up_days >= config.recovery_breadth_days
}

/// Protective stop recorded for a stock position. Not submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectiveStop {
    pub symbol: String,
    pub shares: i64,
    pub current_price: Decimal,
    pub stop_price: Decimal,
}

/// Actions the protocol takes while `Active`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeRiskPlan {
    pub closes: Vec<Adjustment>,
    pub stops: Vec<ProtectiveStop>,
    /// Cash still missing versus the target after the planned closes.
    pub remaining_shortfall: Decimal,
}

/// Estimated cash a close frees: market value for stock and long options,
/// premium received for short options.
fn estimated_value(pos: &Position) -> Decimal {
    match pos.kind {
        InstrumentKind::Equity | InstrumentKind::LongCall | InstrumentKind::LongPut => {
            pos.market_value.abs()
        }
        InstrumentKind::ShortCall | InstrumentKind::ShortPut => pos.cost_basis(),
    }
}

/// Builds the de-risking plan from live positions.
///
/// Derived purely from the snapshot, so re-running it on a later pass only
/// picks up what is still open. Without an account summary the near-term
/// closes and stops are still planned; only the cash-target step is skipped.
pub fn plan_de_risk(
    positions: &[Position],
    sectors: &HashMap<String, Sector>,
    prices: &HashMap<String, Decimal>,
    account: Option<&AccountSummary>,
    today: NaiveDate,
    config: &BlackSwanConfig,
) -> DeRiskPlan {
    let mut plan = DeRiskPlan::default();
    let mut closing = vec![false; positions.len()];

    for (i, pos) in positions.iter().enumerate() {
        if let Some(dte) = pos.days_to_expiry(today).filter(|d| pos.kind.is_option() && *d < config.near_term_dte) {
            closing[i] = true;
            plan.closes.push(Adjustment {
                position: pos.clone(),
                action: DecisionAction::ClosePosition,
                priority: DecisionPriority::Critical,
                reason: format!("Black Swan: {dte} DTE option closed"),
            });
        }
    }

    for pos in positions.iter().filter(|p| p.kind == InstrumentKind::Equity) {
        if let Some(price) = prices.get(&pos.symbol) {
            let stop_price = (price * (Decimal::ONE - config.protective_stop_pct)).round_dp(2);
            plan.stops.push(ProtectiveStop {
                symbol: pos.symbol.clone(),
                shares: pos.quantity,
                current_price: *price,
                stop_price,
            });
        }
    }

    let Some(account) = account else {
        return plan;
    };
    let target = account.net_liquidation * config.cash_target_pct;
    let mut shortfall = target - account.total_cash;
    if shortfall > Decimal::ZERO {
        let rank = |pos: &Position| {
            let sector = sectors.get(&pos.symbol).copied().unwrap_or(Sector::Unknown);
            config
                .priority_sectors
                .iter()
                .position(|s| *s == sector)
                .unwrap_or(config.priority_sectors.len())
        };
        let mut order: Vec<usize> = (0..positions.len()).filter(|i| !closing[*i]).collect();
        order.sort_by_key(|i| rank(&positions[*i]));

        for i in order {
            if shortfall <= Decimal::ZERO {
                break;
            }
            let pos = &positions[i];
            let value = estimated_value(pos);
            if value.is_zero() {
                continue;
            }
            shortfall -= value;
            plan.closes.push(Adjustment {
                position: pos.clone(),
                action: DecisionAction::ClosePosition,
                priority: DecisionPriority::Critical,
                reason: format!(
                    "Black Swan: raising cash to {:.0}% of account",
                    (config.cash_target_pct * Decimal::from(100)).to_f64().unwrap_or_default()
                ),
            });
        }
    }
    plan.remaining_shortfall = shortfall.max(Decimal::ZERO);
    plan
}
