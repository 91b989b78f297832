//! The wheel engine: sole owner of the risk state, driven by the morning
//! routine, the afternoon check-in and the monitoring loop.
//!
//! Every pass snapshots the config, locks the state for its whole duration
//! and re-evaluates the Black Swan protocol and circuit breaker before any
//! rule runs. Gateway failures become warnings or `EVALUATE` decisions; only
//! an `Invariant` error ends a pass early.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use wheel_core::{Alert, AlertPriority, AppConfig, DataUnavailable, Sector};
use wheel_ib::{
    AccountSummary, BrokerageGateway, InstrumentKind, MarketDataGateway, OptionRight, OptionsContract, Position,
};

use crate::adjustments::{self, PositionSnapshot};
use crate::alerts::AlertDispatcher;
use crate::allocation::{sector_allocations, sector_exposures, SectorMonitor};
use crate::black_swan::{
    check_triggers, plan_de_risk, recovery_conditions_met, BlackSwanState, BlackSwanTransition, CrisisReadings,
    ProtectiveStop, RecoveryReadings,
};
use crate::circuit_breaker::{BreakerTransition, CircuitBreaker};
use crate::correlation::{sector_correlation, CorrelationLevel};
use crate::decisions::{DecisionCounter, DecisionDraft, DecisionSummary};
use crate::entry::{evaluate_entry, EntryInputs, EntryRequest, EntryVerdict, RiskGates};
use crate::error::ExecutionError;
use crate::executor::{exchange_date, plan_covered_call, FillReport, OrderCoordinator};
use crate::performance::{PerformanceTracker, TradeCategory, TradeRecord};
use crate::regime::{position_size, sma, MarketRegime, SizingContext};
use crate::reporting::{DashboardSnapshot, ReportingSink, RiskSnapshot, TracingSink};
use crate::scanner::{scan_watchlist, Opportunity};
use crate::types::{Adjustment, DecisionAction, DecisionPriority, ExecutionResult};
use crate::volatility::iv_metrics;
use crate::win_streak::WinStreak;

/// Closes fetched for the regime moving averages.
const REGIME_HISTORY: usize = 200;
/// Alerts included in each dashboard snapshot.
const DASHBOARD_ALERTS: usize = 20;

// =============================================================================
// State
// =============================================================================

/// Everything the engine remembers between passes.
pub struct EngineState {
    pub circuit_breaker: CircuitBreaker,
    pub black_swan: BlackSwanState,
    pub win_streak: WinStreak,
    pub decisions: DecisionCounter,
    pub performance: PerformanceTracker,
    /// Last classified regime, kept when a later pass cannot classify.
    pub regime: Option<MarketRegime>,
    /// Opportunities from the latest morning scan.
    pub opportunities: Vec<Opportunity>,
    alerted: HashSet<String>,
    alerted_on: NaiveDate,
}

impl EngineState {
    pub fn new(config: &AppConfig, starting_value: Decimal, today: NaiveDate) -> Self {
        Self {
            circuit_breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            black_swan: BlackSwanState::default(),
            win_streak: WinStreak::default(),
            decisions: DecisionCounter::new(config.decisions.max_daily_decisions, today),
            performance: PerformanceTracker::new(starting_value),
            regime: None,
            opportunities: Vec::new(),
            alerted: HashSet::new(),
            alerted_on: today,
        }
    }

    fn entry_gates(&self, now: DateTime<Utc>) -> RiskGates {
        RiskGates {
            black_swan_blocks_entries: self.black_swan.blocks_entries(),
            circuit_breaker_active: self.circuit_breaker.is_active(now),
            consecutive_wins: self.win_streak.consecutive_wins,
        }
    }

    /// True the first time `key` is seen on `today`.
    fn first_alert(&mut self, key: String, today: NaiveDate) -> bool {
        if self.alerted_on != today {
            self.alerted.clear();
            self.alerted_on = today;
        }
        self.alerted.insert(key)
    }
}

// =============================================================================
// Pass reports
// =============================================================================

/// A Black Swan close submitted during a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForcedClose {
    pub position: String,
    pub reason: String,
    pub result: ExecutionResult,
    pub note: Option<String>,
}

/// Outcome of the shared risk evaluation every routine starts with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub account: Option<AccountSummary>,
    pub positions: Vec<Position>,
    /// Rule output for open positions, critical first.
    pub adjustments: Vec<Adjustment>,
    /// Black Swan closes planned this pass.
    pub de_risk_closes: Vec<Adjustment>,
    pub forced_closes: Vec<ForcedClose>,
    pub protective_stops: Vec<ProtectiveStop>,
    pub regime: Option<MarketRegime>,
    pub vix: Option<f64>,
    pub avg_correlation: Option<f64>,
    pub sector_allocations: BTreeMap<Sector, Decimal>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorningReport {
    pub risk: RiskReport,
    /// Ids of decisions recorded this pass.
    pub recorded: Vec<u64>,
    pub opportunities: Vec<Opportunity>,
}

/// What happened to one decision during the afternoon check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Executed { result: ExecutionResult, note: Option<String> },
    /// Left pending; retried on a later pass.
    Deferred { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub decision_id: u64,
    pub symbol: String,
    pub action: DecisionAction,
    pub outcome: DecisionOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AfternoonReport {
    pub risk: RiskReport,
    pub executions: Vec<ExecutionRecord>,
    /// Decisions that qualified but found no budget left.
    pub over_budget: Vec<String>,
}

// =============================================================================
// Engine
// =============================================================================

struct MarketReadings {
    vix: Option<f64>,
    avg_correlation: Option<f64>,
    index_price: Option<Decimal>,
    index_daily_change: Option<f64>,
    regime: Option<MarketRegime>,
}

/// Realized result of one executed adjustment.
struct Execution {
    result: ExecutionResult,
    note: Option<String>,
    /// Realized P&L; `None` when the execution opened a position.
    pnl: Option<Decimal>,
}

fn available<T>(result: Result<T, DataUnavailable>, warnings: &mut Vec<String>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Market data unavailable");
            warnings.push(e.to_string());
            None
        }
    }
}

/// Realized P&L of closing `position` with `fill`.
fn realized_pnl(position: &Position, fill: &FillReport) -> Decimal {
    if position.quantity < 0 {
        position.cost_basis() + fill.net_cash()
    } else {
        fill.net_cash() - position.cost_basis()
    }
}

fn trade_category(position: &Position, action: DecisionAction) -> TradeCategory {
    if action.is_roll() {
        return TradeCategory::Roll;
    }
    match position.kind {
        InstrumentKind::ShortPut => TradeCategory::Csp,
        InstrumentKind::ShortCall => TradeCategory::Cc,
        InstrumentKind::Equity => TradeCategory::Close,
        InstrumentKind::LongPut | InstrumentKind::LongCall => TradeCategory::Other,
    }
}

pub struct WheelEngine {
    market: Arc<dyn MarketDataGateway>,
    broker: Arc<dyn BrokerageGateway>,
    coordinator: OrderCoordinator,
    config: watch::Receiver<AppConfig>,
    sectors: SectorMonitor,
    alerts: AlertDispatcher,
    sink: Arc<dyn ReportingSink>,
    state: Mutex<EngineState>,
}

impl WheelEngine {
    /// Builds an engine with logging alert channels and a tracing sink.
    pub fn new(
        market: Arc<dyn MarketDataGateway>,
        broker: Arc<dyn BrokerageGateway>,
        config: watch::Receiver<AppConfig>,
        starting_value: Decimal,
        today: NaiveDate,
    ) -> Self {
        let state = EngineState::new(&config.borrow(), starting_value, today);
        Self {
            coordinator: OrderCoordinator::new(market.clone(), broker.clone()),
            market,
            broker,
            config,
            sectors: SectorMonitor::new(),
            alerts: AlertDispatcher::logging(),
            sink: Arc::new(TracingSink),
            state: Mutex::new(state),
        }
    }

    #[must_use]
    pub fn with_alerts(mut self, alerts: AlertDispatcher) -> Self {
        self.alerts = alerts;
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ReportingSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn alerts(&self) -> &AlertDispatcher {
        &self.alerts
    }

    /// Runs `f` against the current state.
    pub async fn inspect<R>(&self, f: impl FnOnce(&EngineState) -> R) -> R {
        f(&*self.state.lock().await)
    }

    /// Snapshots the config and pushes the parts the state caches.
    async fn begin_pass(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(AppConfig, NaiveDate, tokio::sync::MutexGuard<'_, EngineState>), ExecutionError> {
        let config = self.config.borrow().clone();
        let today = exchange_date(now, &config.execution)?;
        let mut state = self.state.lock().await;
        state.circuit_breaker.set_config(config.circuit_breaker.clone());
        state.decisions.set_max_daily(config.decisions.max_daily_decisions);
        state.decisions.roll_day(today);
        Ok((config, today, state))
    }

    // -------------------------------------------------------------------------
    // Entry check
    // -------------------------------------------------------------------------

    /// Screens a prospective cash-secured put against every entry criterion.
    ///
    /// # Errors
    ///
    /// Only `Invariant` (an unusable exchange timezone). Missing data shows up
    /// as issues on a rejected verdict.
    pub async fn check_entry(
        &self,
        request: &EntryRequest,
        now: DateTime<Utc>,
    ) -> Result<EntryVerdict, ExecutionError> {
        let (config, today, state) = self.begin_pass(now).await?;
        let gates = state.entry_gates(now);
        drop(state);
        Ok(self.screen_entry(request, gates, &config, today).await)
    }

    async fn entry_inputs(&self, request: &EntryRequest, config: &AppConfig, today: NaiveDate) -> EntryInputs {
        let market = self.market.as_ref();
        let spot = market.quote(&request.symbol).await;
        let iv = match &spot {
            Ok(spot) => iv_metrics(market, &request.symbol, *spot, today, config.scanner.target_dte).await,
            Err(e) => Err(e.clone()),
        };
        let sector_exposure = self.sector_exposure_for(&request.symbol).await;
        let vix = market
            .quote(&config.market.vix_symbol)
            .await
            .and_then(|v| v.to_f64().ok_or_else(|| DataUnavailable::new("VIX", "not representable")));

        EntryInputs {
            today,
            account_value: self.broker.account_value().await,
            spot,
            iv,
            profile: market.symbol_profile(&request.symbol).await,
            sector_exposure,
            vix,
            next_earnings: market.next_earnings_date(&request.symbol).await,
        }
    }

    /// Current exposure in the sector `symbol` belongs to.
    async fn sector_exposure_for(&self, symbol: &str) -> Result<Decimal, DataUnavailable> {
        let market = self.market.as_ref();
        let sector = self.sectors.sector_of(market, symbol).await?;
        let positions = self.broker.positions().await?;
        let map = self.sectors.sectors_for(market, &positions).await?;
        Ok(sector_exposures(&positions, &map)
            .get(&sector)
            .copied()
            .unwrap_or_default())
    }

    async fn screen_entry(
        &self,
        request: &EntryRequest,
        gates: RiskGates,
        config: &AppConfig,
        today: NaiveDate,
    ) -> EntryVerdict {
        let inputs = self.entry_inputs(request, config, today).await;
        let verdict = evaluate_entry(request, &inputs, gates, &config.risk);
        if verdict.approved {
            info!(symbol = %verdict.symbol, strike = %verdict.strike, "Entry approved");
        } else {
            info!(
                symbol = %verdict.symbol,
                strike = %verdict.strike,
                issues = ?verdict.issues,
                "Entry rejected"
            );
        }
        verdict
    }

    // -------------------------------------------------------------------------
    // Risk evaluation
    // -------------------------------------------------------------------------

    async fn read_market(&self, config: &AppConfig, warnings: &mut Vec<String>) -> MarketReadings {
        let market = self.market.as_ref();
        let mc = &config.market;

        let vix = available(market.quote(&mc.vix_symbol).await, warnings).and_then(|v| v.to_f64());
        let avg_correlation = available(
            sector_correlation(market, &mc.sector_etfs, mc.correlation_lookback).await,
            warnings,
        );
        let index_price = available(market.quote(&mc.index_symbol).await, warnings);
        let index_closes = available(market.historical_closes(&mc.index_symbol, REGIME_HISTORY).await, warnings)
            .unwrap_or_default();

        let index_daily_change = match (index_price, index_closes.last().copied()) {
            (Some(price), Some(prev)) if prev > Decimal::ZERO => ((price - prev) / prev).to_f64(),
            _ => None,
        };

        let regime = match (index_price, sma(&index_closes, 50), sma(&index_closes, 200), vix) {
            (Some(price), Some(sma50), Some(sma200), Some(vix)) => {
                Some(MarketRegime::classify(price, sma50, sma200, vix))
            }
            _ => {
                debug!(closes = index_closes.len(), "Not enough data to classify regime");
                None
            }
        };

        MarketReadings {
            vix,
            avg_correlation,
            index_price,
            index_daily_change,
            regime,
        }
    }

    async fn recovery_readings(&self, config: &AppConfig, index_price: Option<Decimal>) -> Option<RecoveryReadings> {
        let market = self.market.as_ref();
        let window = config.black_swan.recovery_window;
        let vix_closes = market
            .historical_closes(&config.market.vix_symbol, window)
            .await
            .ok()?
            .iter()
            .filter_map(ToPrimitive::to_f64)
            .collect();
        let index_closes = market
            .historical_closes(&config.market.index_symbol, window + 1)
            .await
            .ok()?;
        Some(RecoveryReadings {
            vix_closes,
            index_closes,
            index_price: index_price?,
        })
    }

    async fn snapshot_positions(&self, positions: &[Position]) -> Vec<PositionSnapshot> {
        let mut out = Vec::with_capacity(positions.len());
        for pos in positions {
            let mut snap = PositionSnapshot {
                position: pos.clone(),
                delta: None,
                price: None,
            };
            if pos.kind.is_option() {
                if let Some(contract) = pos.contract() {
                    match self.market.option_greeks(&contract).await {
                        Ok(greeks) => snap.delta = Some(greeks.delta),
                        Err(e) => warn!(position = %pos.label(), error = %e, "No delta for position"),
                    }
                }
            } else {
                match self.market.quote(&pos.symbol).await {
                    Ok(price) => snap.price = Some(price),
                    Err(e) => warn!(symbol = %pos.symbol, error = %e, "No price for shares"),
                }
            }
            out.push(snap);
        }
        out
    }

    fn on_black_swan(&self, transition: &BlackSwanTransition, state: &BlackSwanState) {
        let alert = match transition {
            BlackSwanTransition::Activated(trigger) => Alert::critical(
                "Black Swan protocol activated",
                format!("{trigger}: entries halted, near-term options closing"),
            ),
            BlackSwanTransition::Reactivated(trigger) => Alert::critical(
                "Black Swan protocol re-activated",
                format!("{trigger} during recovery"),
            ),
            BlackSwanTransition::Advanced { stage } => Alert::important(
                "Black Swan recovery",
                format!("Stage {stage}: entries resume at reduced size"),
            ),
            BlackSwanTransition::Deactivated => {
                Alert::info("Black Swan protocol deactivated", "Full position sizing restored")
            }
            BlackSwanTransition::Unchanged => return,
        };
        debug!(phase = ?state.phase, "Black Swan transition");
        self.alerts.dispatch(alert);
    }

    /// Runs the protocol and breaker state machines, then every position rule.
    async fn evaluate_risk(
        &self,
        state: &mut EngineState,
        config: &AppConfig,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<RiskReport, ExecutionError> {
        let mut report = RiskReport::default();
        let readings = self.read_market(config, &mut report.warnings).await;
        report.vix = readings.vix;
        report.avg_correlation = readings.avg_correlation;
        if readings.regime.is_some() {
            state.regime = readings.regime;
        }
        report.regime = state.regime;

        if let Some(avg) = readings.avg_correlation {
            if CorrelationLevel::classify(avg, &config.risk) != CorrelationLevel::Normal {
                let message = format!("Average sector correlation {avg:.2}, diversification is failing");
                warn!(avg_correlation = avg, "Correlation crisis warning");
                report.warnings.push(message.clone());
                if state.first_alert("correlation".to_string(), today) {
                    self.alerts.dispatch(Alert::important("Correlation crisis", message));
                }
            }
        }

        // Black Swan protocol
        let trigger = check_triggers(
            &CrisisReadings {
                vix: readings.vix,
                avg_correlation: readings.avg_correlation,
                index_daily_change: readings.index_daily_change,
            },
            &config.black_swan,
            &config.risk,
        );
        let recovery_ok = if trigger.is_none() && state.black_swan.is_engaged() {
            match self.recovery_readings(config, readings.index_price).await {
                Some(r) => recovery_conditions_met(&r, &config.black_swan),
                None => false,
            }
        } else {
            false
        };
        let transition = state.black_swan.evaluate(trigger, recovery_ok, now, today);
        self.on_black_swan(&transition, &state.black_swan);

        // Account and circuit breaker
        let account = available(self.broker.account_summary().await, &mut report.warnings);
        if let Some(account) = &account {
            let value = account.net_liquidation;
            state.performance.record_day(today, value);
            let inputs = state
                .performance
                .breaker_inputs(value, config.circuit_breaker.trailing_days);
            match state.circuit_breaker.evaluate(&inputs, &config.risk, now) {
                BreakerTransition::Tripped(reason) => {
                    self.alerts.dispatch(Alert::critical(
                        "Circuit breaker tripped",
                        format!("{reason}: new entries halted"),
                    ));
                }
                BreakerTransition::Rearmed => {
                    state.performance.reset_baseline(value, today);
                    self.alerts
                        .dispatch(Alert::info("Circuit breaker re-armed", "Entries re-enabled"));
                }
                BreakerTransition::Unchanged => {}
            }
        } else {
            report.warnings.push("Circuit breaker not evaluated: account value unavailable".to_string());
        }

        let positions = match self.broker.positions().await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "Failed to fetch positions");
                report.warnings.push(e.to_string());
                report.account = account;
                return Ok(report);
            }
        };

        let snapshots = self.snapshot_positions(&positions).await;
        report.adjustments = adjustments::scan(&snapshots, today, &config.risk);

        let sector_map = available(
            self.sectors.sectors_for(self.market.as_ref(), &positions).await,
            &mut report.warnings,
        );
        if let (Some(map), Some(account)) = (&sector_map, &account) {
            report.sector_allocations =
                sector_allocations(&sector_exposures(&positions, map), account.net_liquidation);
        }

        if let Some(account) = &account {
            report.warnings.extend(state.win_streak.risk_creep_warnings(
                &positions,
                account.net_liquidation,
                today,
                &config.risk,
            ));
        }

        if state.black_swan.blocks_entries() {
            let prices: HashMap<String, Decimal> = snapshots
                .iter()
                .filter_map(|s| s.price.map(|p| (s.position.symbol.clone(), p)))
                .collect();
            let no_sectors = HashMap::new();
            let plan = plan_de_risk(
                &positions,
                sector_map.as_ref().unwrap_or(&no_sectors),
                &prices,
                account.as_ref(),
                today,
                &config.black_swan,
            );
            if account.is_none() {
                report
                    .warnings
                    .push("Black Swan cash target not evaluated: account value unavailable".to_string());
            } else if plan.remaining_shortfall > Decimal::ZERO {
                report.warnings.push(format!(
                    "Black Swan cash target short by ${:.0} after planned closes",
                    plan.remaining_shortfall
                ));
            }
            report.protective_stops = plan.stops;
            report.forced_closes = self.execute_forced_closes(state, &plan.closes, config, now, today).await?;
            report.de_risk_closes = plan.closes;
        }

        report.account = account;
        report.positions = positions;
        Ok(report)
    }

    /// Black Swan closes go straight to the coordinator without using the
    /// decision budget. The trading window still applies.
    async fn execute_forced_closes(
        &self,
        state: &mut EngineState,
        closes: &[Adjustment],
        config: &AppConfig,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<Vec<ForcedClose>, ExecutionError> {
        let mut out = Vec::with_capacity(closes.len());
        for adj in closes {
            let label = adj.position.label();
            let regime = state.regime.unwrap_or(MarketRegime::Neutral);
            let (result, note) = match self.coordinator.close_position(&adj.position, &config.execution, now).await {
                Ok(fill) => {
                    let pnl = realized_pnl(&adj.position, &fill);
                    self.record_trade_locked(
                        state,
                        TradeRecord {
                            symbol: adj.position.symbol.clone(),
                            category: trade_category(&adj.position, adj.action),
                            pnl,
                            regime,
                            rule: "BLACK_SWAN".to_string(),
                            closed: today,
                        },
                        config,
                    );
                    (ExecutionResult::Success, None)
                }
                Err(ExecutionError::Invariant(msg)) => return Err(ExecutionError::Invariant(msg)),
                Err(e) => {
                    warn!(position = %label, error = %e, "Black Swan close not completed");
                    (ExecutionResult::Failed, Some(e.to_string()))
                }
            };
            out.push(ForcedClose {
                position: label,
                reason: adj.reason.clone(),
                result,
                note,
            });
        }
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Trade results
    // -------------------------------------------------------------------------

    fn record_trade_locked(&self, state: &mut EngineState, trade: TradeRecord, config: &AppConfig) {
        let multiplier = state.win_streak.record(trade.pnl > Decimal::ZERO, &config.win_streak);
        if state.win_streak.consecutive_wins >= config.risk.win_streak_caution
            && state.first_alert("win-streak".to_string(), trade.closed)
        {
            self.alerts.dispatch(Alert::important(
                "Win streak caution",
                format!(
                    "{} wins in a row, size multiplier {multiplier}",
                    state.win_streak.consecutive_wins
                ),
            ));
        }
        state.performance.record_trade(trade);
    }

    /// Feeds a closed trade into the win streak and performance history.
    pub async fn record_trade_result(&self, trade: TradeRecord) {
        let config = self.config.borrow().clone();
        let mut state = self.state.lock().await;
        self.record_trade_locked(&mut state, trade, &config);
    }

    // -------------------------------------------------------------------------
    // Routines
    // -------------------------------------------------------------------------

    fn alert_adjustments(&self, state: &mut EngineState, adjustments: &[Adjustment], today: NaiveDate) {
        for adj in adjustments.iter().filter(|a| a.priority >= DecisionPriority::Important) {
            if state.first_alert(format!("{}:{}", adj.position.label(), adj.action), today) {
                self.alerts.dispatch(Alert::new(
                    adj.priority.alert_priority(),
                    format!("{} {}", adj.action, adj.position.label()),
                    adj.reason.clone(),
                ));
            }
        }
    }

    /// Pending decision for the adjustment and whether it was just recorded.
    ///
    /// Decisions are keyed by the position acted on, so two contracts on one
    /// symbol get their own. `None` once the action on that position
    /// succeeded today; a failed attempt gets a fresh decision.
    fn decision_for(
        state: &mut EngineState,
        adj: &Adjustment,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Option<(u64, bool)> {
        state.decisions.roll_day(today);
        let subject = adj.position.label();
        match state.decisions.latest_for(&subject, adj.action).map(|d| (d.id, d.result())) {
            Some((id, None)) => Some((id, false)),
            Some((id, Some(ExecutionResult::Success | ExecutionResult::Partial))) => {
                debug!(id, %subject, action = %adj.action, "Already executed today");
                None
            }
            Some((_, Some(ExecutionResult::Failed))) | None => {
                Some((state.decisions.record(DecisionDraft::from(adj), now, today), true))
            }
        }
    }

    /// Risk pass, decisions for every adjustment, then a scan for new puts
    /// screened against the entry criteria.
    ///
    /// # Errors
    ///
    /// Only `Invariant`.
    pub async fn morning_routine(&self, now: DateTime<Utc>) -> Result<MorningReport, ExecutionError> {
        let (config, today, mut state) = self.begin_pass(now).await?;
        info!(%today, "Morning routine started");
        let risk = self.evaluate_risk(&mut state, &config, now, today).await?;

        let mut recorded = Vec::new();
        for adj in &risk.adjustments {
            if let Some((id, true)) = Self::decision_for(&mut state, adj, now, today) {
                recorded.push(id);
            }
        }
        self.alert_adjustments(&mut state, &risk.adjustments, today);

        let gates = state.entry_gates(now);
        let mut opportunities = Vec::new();
        if gates.black_swan_blocks_entries || gates.circuit_breaker_active {
            info!(
                black_swan = gates.black_swan_blocks_entries,
                circuit_breaker = gates.circuit_breaker_active,
                "Entries halted, scan skipped"
            );
        } else if let Some(account) = &risk.account {
            let regime = state.regime.unwrap_or(MarketRegime::Neutral);
            opportunities = scan_watchlist(
                self.market.as_ref(),
                &self.sectors,
                today,
                regime,
                account.net_liquidation,
                config.risk.max_sector_pct,
                &config.scanner,
            )
            .await;
            for opp in &mut opportunities {
                let request = EntryRequest::new(opp.symbol.clone(), opp.strike);
                opp.verdict = Some(self.screen_entry(&request, gates, &config, today).await);
            }
            let approved = opportunities.iter().filter(|o| o.is_approved()).count();
            self.alerts.dispatch(Alert::info(
                "Morning scan",
                format!("{} opportunities, {approved} pass entry criteria", opportunities.len()),
            ));
        }
        state.opportunities = opportunities.clone();

        info!(
            adjustments = risk.adjustments.len(),
            recorded = recorded.len(),
            opportunities = opportunities.len(),
            "Morning routine complete"
        );
        self.publish(&state, &risk, now).await;
        Ok(MorningReport {
            risk,
            recorded,
            opportunities,
        })
    }

    async fn execute_adjustment(
        &self,
        adj: &Adjustment,
        config: &AppConfig,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<Execution, ExecutionError> {
        if adj.action == DecisionAction::SellCoveredCall {
            let plan =
                plan_covered_call(self.market.as_ref(), &adj.position, today, config.scanner.target_dte).await?;
            let fill = self
                .coordinator
                .sell_covered_call(&plan.contract, plan.contracts, &config.execution, now)
                .await?;
            return Ok(Execution {
                result: ExecutionResult::Success,
                note: Some(format!(
                    "sold {} {} at {}",
                    plan.contracts,
                    plan.contract.display_name(),
                    fill.price
                )),
                pnl: None,
            });
        }
        if adj.action.is_roll() {
            let report = self
                .coordinator
                .roll_position(&adj.position, adj.action, &config.execution, &config.risk, now)
                .await?;
            let note = match &report.open_error {
                Some(e) => format!("closed {}, open leg failed: {e}", report.plan.old.display_name()),
                None => format!(
                    "rolled to {} for {} credit",
                    report.plan.new.display_name(),
                    report.plan.net_credit
                ),
            };
            Ok(Execution {
                result: report.result(),
                note: Some(note),
                pnl: Some(realized_pnl(&adj.position, &report.close_fill)),
            })
        } else {
            let fill = self
                .coordinator
                .close_position(&adj.position, &config.execution, now)
                .await?;
            Ok(Execution {
                result: ExecutionResult::Success,
                note: None,
                pnl: Some(realized_pnl(&adj.position, &fill)),
            })
        }
    }

    /// Risk pass, then executes pending important and critical decisions
    /// while budget remains, most urgent first.
    ///
    /// # Errors
    ///
    /// Only `Invariant`.
    pub async fn afternoon_checkin(&self, now: DateTime<Utc>) -> Result<AfternoonReport, ExecutionError> {
        let (config, today, mut state) = self.begin_pass(now).await?;
        info!(%today, "Afternoon check-in started");
        let risk = self.evaluate_risk(&mut state, &config, now, today).await?;
        self.alert_adjustments(&mut state, &risk.adjustments, today);

        let mut executions = Vec::new();
        let mut over_budget = Vec::new();
        let force_closed: HashSet<&str> = risk
            .forced_closes
            .iter()
            .filter(|f| f.result == ExecutionResult::Success)
            .map(|f| f.position.as_str())
            .collect();
        let candidates: Vec<Adjustment> = risk
            .adjustments
            .iter()
            .filter(|a| a.priority.auto_executes() && a.action.is_executable())
            .filter(|a| !force_closed.contains(a.position.label().as_str()))
            .cloned()
            .collect();

        for adj in &candidates {
            if !state.decisions.can_make_decision(today) {
                over_budget.push(format!("{} {}", adj.action, adj.position.label()));
                continue;
            }
            let Some((id, _)) = Self::decision_for(&mut state, adj, now, today) else {
                continue;
            };

            let outcome = match self.execute_adjustment(adj, &config, now, today).await {
                Ok(exec) => {
                    if let Err(e) = state.decisions.mark_executed(id, exec.result, exec.note.clone(), now, today) {
                        error!(id, error = %e, "Could not mark decision executed");
                    }
                    if let Some(pnl) = exec.pnl {
                        let regime = state.regime.unwrap_or(MarketRegime::Neutral);
                        self.record_trade_locked(
                            &mut state,
                            TradeRecord {
                                symbol: adj.position.symbol.clone(),
                                category: trade_category(&adj.position, adj.action),
                                pnl,
                                regime,
                                rule: adj.action.to_string(),
                                closed: today,
                            },
                            &config,
                        );
                    }
                    let priority = if exec.result == ExecutionResult::Success {
                        AlertPriority::Important
                    } else {
                        AlertPriority::Critical
                    };
                    self.alerts.dispatch(Alert::new(
                        priority,
                        format!("{} {}: {}", adj.action, adj.position.label(), exec.result),
                        exec.note.clone().unwrap_or_else(|| adj.reason.clone()),
                    ));
                    DecisionOutcome::Executed {
                        result: exec.result,
                        note: exec.note,
                    }
                }
                Err(ExecutionError::Invariant(msg)) => return Err(ExecutionError::Invariant(msg)),
                Err(
                    e @ (ExecutionError::WindowClosed { .. }
                    | ExecutionError::DataUnavailable(_)
                    | ExecutionError::DebitRoll { .. }),
                ) => {
                    info!(id, error = %e, "Decision deferred");
                    state.decisions.annotate(id, e.to_string());
                    DecisionOutcome::Deferred { reason: e.to_string() }
                }
                Err(e) => {
                    warn!(id, error = %e, "Decision execution failed");
                    if let Err(mark) =
                        state.decisions.mark_executed(id, ExecutionResult::Failed, Some(e.to_string()), now, today)
                    {
                        error!(id, error = %mark, "Could not mark decision executed");
                    }
                    self.alerts.dispatch(Alert::critical(
                        format!("{} {} failed", adj.action, adj.position.label()),
                        e.to_string(),
                    ));
                    DecisionOutcome::Executed {
                        result: ExecutionResult::Failed,
                        note: Some(e.to_string()),
                    }
                }
            };
            executions.push(ExecutionRecord {
                decision_id: id,
                symbol: adj.position.symbol.clone(),
                action: adj.action,
                outcome,
            });
        }

        if config.service.auto_open_entries {
            self.open_entries(&mut state, &config, now, today, &risk, &mut executions, &mut over_budget)
                .await?;
        }

        if !over_budget.is_empty() {
            warn!(skipped = ?over_budget, "Decision budget exhausted");
        }
        info!(
            executed = executions.len(),
            over_budget = over_budget.len(),
            remaining = state.decisions.remaining(today),
            "Afternoon check-in complete"
        );
        self.publish(&state, &risk, now).await;
        Ok(AfternoonReport {
            risk,
            executions,
            over_budget,
        })
    }

    /// Sells puts for this morning's approved opportunities, re-screened
    /// and sized against the current regime, streak and protocol stage.
    #[allow(clippy::too_many_arguments)]
    async fn open_entries(
        &self,
        state: &mut EngineState,
        config: &AppConfig,
        now: DateTime<Utc>,
        today: NaiveDate,
        risk: &RiskReport,
        executions: &mut Vec<ExecutionRecord>,
        over_budget: &mut Vec<String>,
    ) -> Result<(), ExecutionError> {
        let Some(account) = &risk.account else {
            return Ok(());
        };
        let approved: Vec<Opportunity> = state.opportunities.iter().filter(|o| o.is_approved()).cloned().collect();
        for opp in approved {
            if !state.decisions.can_make_decision(today) {
                over_budget.push(format!("{} {} {}P", DecisionAction::Open, opp.symbol, opp.strike));
                continue;
            }
            let ctx = SizingContext {
                regime: state.regime.unwrap_or(MarketRegime::Neutral),
                win_streak_multiplier: state.win_streak.multiplier,
                black_swan_multiplier: state.black_swan.size_multiplier(&config.black_swan),
            };
            let contracts = position_size(account.net_liquidation, opp.strike, &ctx, &config.risk);
            let request = EntryRequest::new(opp.symbol.clone(), opp.strike).with_contracts(contracts);
            let verdict = self.screen_entry(&request, state.entry_gates(now), config, today).await;
            if !verdict.approved {
                continue;
            }

            let id = state.decisions.record(
                DecisionDraft {
                    symbol: opp.symbol.clone(),
                    subject: OptionsContract::new(&opp.symbol, opp.expiry, opp.strike, OptionRight::Put).display_name(),
                    action: DecisionAction::Open,
                    priority: DecisionPriority::Important,
                    reason: format!("{:.0}% annualized, {} DTE", opp.annual_return * 100.0, opp.dte),
                },
                now,
                today,
            );
            let outcome = match self
                .coordinator
                .sell_put(&opp.symbol, opp.expiry, opp.strike, contracts, &config.execution, now)
                .await
            {
                Ok(fill) => {
                    let note = format!("sold {contracts} at {}", fill.price);
                    if let Err(e) = state
                        .decisions
                        .mark_executed(id, ExecutionResult::Success, Some(note.clone()), now, today)
                    {
                        error!(id, error = %e, "Could not mark decision executed");
                    }
                    DecisionOutcome::Executed {
                        result: ExecutionResult::Success,
                        note: Some(note),
                    }
                }
                Err(ExecutionError::Invariant(msg)) => return Err(ExecutionError::Invariant(msg)),
                Err(e @ (ExecutionError::WindowClosed { .. } | ExecutionError::DataUnavailable(_))) => {
                    state.decisions.annotate(id, e.to_string());
                    DecisionOutcome::Deferred { reason: e.to_string() }
                }
                Err(e) => {
                    if let Err(mark) =
                        state.decisions.mark_executed(id, ExecutionResult::Failed, Some(e.to_string()), now, today)
                    {
                        error!(id, error = %mark, "Could not mark decision executed");
                    }
                    DecisionOutcome::Executed {
                        result: ExecutionResult::Failed,
                        note: Some(e.to_string()),
                    }
                }
            };
            executions.push(ExecutionRecord {
                decision_id: id,
                symbol: opp.symbol,
                action: DecisionAction::Open,
                outcome,
            });
        }
        Ok(())
    }

    /// Risk pass with alerts for urgent adjustments. Records no decisions.
    ///
    /// # Errors
    ///
    /// Only `Invariant`.
    pub async fn monitor_pass(&self, now: DateTime<Utc>) -> Result<RiskReport, ExecutionError> {
        let (config, today, mut state) = self.begin_pass(now).await?;
        let risk = self.evaluate_risk(&mut state, &config, now, today).await?;
        self.alert_adjustments(&mut state, &risk.adjustments, today);
        debug!(
            adjustments = risk.adjustments.len(),
            warnings = risk.warnings.len(),
            "Monitor pass complete"
        );
        self.publish(&state, &risk, now).await;
        Ok(risk)
    }

    // -------------------------------------------------------------------------
    // Reporting
    // -------------------------------------------------------------------------

    pub async fn decision_summary(&self) -> DecisionSummary {
        self.state.lock().await.decisions.summary()
    }

    fn dashboard(&self, state: &EngineState, risk: &RiskReport, now: DateTime<Utc>) -> DashboardSnapshot {
        let account_value = risk.account.as_ref().map(|a| a.net_liquidation);
        DashboardSnapshot {
            generated_at: now,
            account_value,
            positions: risk.positions.clone(),
            metrics: state.performance.metrics(account_value.unwrap_or_default()),
            alerts: self.alerts.recent(DASHBOARD_ALERTS),
            opportunities: state.opportunities.clone(),
            decisions: state.decisions.summary(),
            execution: self.coordinator.execution_quality(),
            risk: RiskSnapshot {
                circuit_breaker: state.circuit_breaker.state().clone(),
                black_swan: state.black_swan.clone(),
                win_streak: state.win_streak.clone(),
                regime: risk.regime,
                vix: risk.vix,
                avg_correlation: risk.avg_correlation,
                sector_allocations: risk.sector_allocations.clone(),
                protective_stops: risk.protective_stops.clone(),
                warnings: risk.warnings.clone(),
            },
        }
    }

    async fn publish(&self, state: &EngineState, risk: &RiskReport, now: DateTime<Utc>) {
        let snapshot = self.dashboard(state, risk, now);
        if let Err(e) = self.sink.publish(&snapshot).await {
            error!(error = %e, "Failed to publish dashboard snapshot");
        }
    }

    // -------------------------------------------------------------------------
    // Service loop
    // -------------------------------------------------------------------------

    /// Monitoring loop. Polls every `service.poll_interval_secs` until an
    /// invariant violation stops it.
    ///
    /// # Errors
    ///
    /// Returns the `Invariant` error that ended the loop.
    pub async fn run(&self) -> anyhow::Result<()> {
        let poll_secs = self.config.borrow().service.poll_interval_secs;
        {
            let config = self.config.borrow();
            info!(
                poll_secs,
                max_daily_decisions = config.decisions.max_daily_decisions,
                vix_trigger = config.black_swan.vix_trigger,
                drawdown_stop = %config.risk.drawdown_stop,
                timezone = %config.execution.timezone,
                "Wheel engine started"
            );
        }

        let mut interval = tokio::time::interval(Duration::from_secs(poll_secs.max(1)));
        loop {
            interval.tick().await;
            match self.monitor_pass(Utc::now()).await {
                Ok(risk) if !risk.adjustments.is_empty() => {
                    info!(count = risk.adjustments.len(), "Adjustments pending");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Monitor pass halted");
                    return Err(e.into());
                }
            }
        }
    }
}
