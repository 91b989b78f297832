//! End-to-end engine passes against the paper gateway.
//!
//! Covers:
//! - Entry screening with and without an earnings conflict
//! - Defensive roll decisions and their execution
//! - Per-position decisions and same-day retries after a failed fill
//! - Covered calls written against held shares
//! - Black Swan activation closing near-term options in the same pass
//! - Black Swan recovery pacing
//! - Circuit breaker trips blocking entries
//! - The daily decision budget

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;

use wheel_core::{AppConfig, Sector};
use wheel_ib::{
    AccountSummary, BrokerageGateway, ChainEntry, FillMode, InstrumentKind, MarketDataGateway, OptionRight,
    PaperGateway, PaperMarket, Position, SymbolProfile, ValuationRatios,
};
use wheel_options_manager::service::DecisionOutcome;
use wheel_options_manager::{BlackSwanPhase, DecisionAction, EntryRequest, ExecutionResult, WheelEngine};

// =============================================================================
// Fixture
// =============================================================================

/// Wednesday 10:30 in New York, inside the morning window.
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 14, 14, 30, 0).unwrap()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()
}

fn day(offset: i64) -> NaiveDate {
    today() + Duration::days(offset)
}

/// A year of closes: a choppy stretch, then calm, so the current IV ranks
/// above most realized-vol samples.
fn closes(start: f64) -> Vec<Decimal> {
    let mut price = start;
    (0..252)
        .map(|i| {
            let step = if i < 60 { 0.03 } else { 0.005 };
            price *= if i % 2 == 0 { 1.0 + step } else { 1.0 - step };
            Decimal::from_f64(price).unwrap().round_dp(4)
        })
        .collect()
}

fn option(
    expiry: NaiveDate,
    right: OptionRight,
    strike: Decimal,
    bid: Decimal,
    ask: Decimal,
    iv: f64,
    delta: f64,
) -> ChainEntry {
    ChainEntry {
        expiry,
        right,
        strike,
        bid,
        ask,
        last_price: (bid + ask) / dec!(2),
        implied_vol: iv,
        delta: Some(delta),
        volume: 500,
        open_interest: 5_000,
    }
}

fn short(kind: InstrumentKind, strike: Decimal, expiry: NaiveDate, avg_cost: Decimal, pnl: Decimal) -> Position {
    Position {
        symbol: "XYZ".to_string(),
        kind,
        strike: Some(strike),
        expiry: Some(expiry),
        quantity: -1,
        avg_cost,
        market_value: pnl - avg_cost,
        unrealized_pnl: pnl,
    }
}

fn market() -> PaperMarket {
    let mut m = PaperMarket {
        account: AccountSummary {
            net_liquidation: dec!(100000),
            total_cash: dec!(60000),
        },
        fill_mode: FillMode::Immediate,
        ..PaperMarket::default()
    };
    m.quotes.insert("XYZ".into(), dec!(55));
    m.quotes.insert("VIX".into(), dec!(18));
    m.history.insert("XYZ".into(), closes(55.0));
    m.profiles.insert(
        "XYZ".into(),
        SymbolProfile {
            sector: Sector::Technology,
            average_volume: 2_000_000,
            ratios: ValuationRatios {
                peg: Some(1.2),
                ..ValuationRatios::default()
            },
        },
    );
    m.earnings.insert("XYZ".into(), day(30));
    m.chains.insert(
        "XYZ".into(),
        vec![
            option(day(30), OptionRight::Put, dec!(50), dec!(1.10), dec!(1.20), 0.25, -0.25),
            option(day(30), OptionRight::Put, dec!(55), dec!(2.40), dec!(2.50), 0.25, -0.50),
        ],
    );
    m
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.scanner.watchlist = Vec::new();
    config
}

fn engine(gw: &Arc<PaperGateway>, config: AppConfig) -> (WheelEngine, watch::Sender<AppConfig>) {
    let (tx, rx) = watch::channel(config);
    let market: Arc<dyn MarketDataGateway> = gw.clone();
    let broker: Arc<dyn BrokerageGateway> = gw.clone();
    (WheelEngine::new(market, broker, rx, dec!(100000), today()), tx)
}

// =============================================================================
// Entry screening
// =============================================================================

#[tokio::test]
async fn clean_entry_is_approved() {
    let gw = Arc::new(PaperGateway::new(market()));
    let (engine, _tx) = engine(&gw, config());

    let verdict = engine
        .check_entry(&EntryRequest::new("XYZ", dec!(50)), now())
        .await
        .unwrap();

    assert!(verdict.approved, "issues: {:?}", verdict.issues);
    assert!(verdict.issues.is_empty());
}

#[tokio::test]
async fn earnings_inside_buffer_rejects_entry() {
    let gw = Arc::new(PaperGateway::new(market()));
    gw.update(|m| {
        m.earnings.insert("XYZ".into(), day(3));
    });
    let (engine, _tx) = engine(&gw, config());

    let verdict = engine
        .check_entry(&EntryRequest::new("XYZ", dec!(50)), now())
        .await
        .unwrap();

    assert!(!verdict.approved);
    assert!(verdict.issues.iter().any(|i| i.contains("Earnings in 3 days")));
}

#[tokio::test]
async fn missing_profile_fails_closed() {
    let gw = Arc::new(PaperGateway::new(market()));
    gw.update(|m| {
        m.profiles.clear();
    });
    let (engine, _tx) = engine(&gw, config());

    let verdict = engine
        .check_entry(&EntryRequest::new("XYZ", dec!(50)), now())
        .await
        .unwrap();

    assert!(!verdict.approved);
    assert!(verdict.issues.iter().any(|i| i.contains("profile unavailable")));
}

// =============================================================================
// Rolls
// =============================================================================

/// Short 50 put gone deep in the money, with a next cycle to roll into.
fn breached_put_market() -> PaperMarket {
    let mut m = market();
    m.quotes.insert("XYZ".into(), dec!(47));
    m.positions.push(short(InstrumentKind::ShortPut, dec!(50), day(25), dec!(250), dec!(-160)));
    m.chains.insert(
        "XYZ".into(),
        vec![
            option(day(25), OptionRight::Put, dec!(50), dec!(4.00), dec!(4.20), 0.40, -0.65),
            option(day(53), OptionRight::Put, dec!(45), dec!(4.30), dec!(4.50), 0.40, -0.30),
            option(day(53), OptionRight::Put, dec!(50), dec!(6.10), dec!(6.30), 0.40, -0.55),
        ],
    );
    m
}

#[tokio::test]
async fn breached_delta_records_defensive_roll() {
    let gw = Arc::new(PaperGateway::new(breached_put_market()));
    let (engine, _tx) = engine(&gw, config());

    let report = engine.morning_routine(now()).await.unwrap();

    let roll = report
        .risk
        .adjustments
        .iter()
        .find(|a| a.action == DecisionAction::RollDefensive)
        .expect("defensive roll");
    assert_eq!(roll.action.to_string(), "ROLL_DEFENSIVE");
    assert_eq!(report.recorded.len(), 1);

    let summary = engine.decision_summary().await;
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.executed, 0);
    // recording does not execute anything
    assert!(gw.submitted_orders().is_empty());
}

#[tokio::test(start_paused = true)]
async fn afternoon_executes_the_roll() {
    let gw = Arc::new(PaperGateway::new(breached_put_market()));
    let (engine, _tx) = engine(&gw, config());

    engine.morning_routine(now()).await.unwrap();
    let report = engine.afternoon_checkin(now()).await.unwrap();

    assert_eq!(report.executions.len(), 1);
    let exec = &report.executions[0];
    assert_eq!(exec.action, DecisionAction::RollDefensive);
    assert!(matches!(
        exec.outcome,
        DecisionOutcome::Executed {
            result: ExecutionResult::Success,
            ..
        }
    ));

    let positions = gw.snapshot().positions;
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].strike, Some(dec!(45)));
    assert_eq!(positions[0].expiry, Some(day(53)));

    let summary = engine.decision_summary().await;
    assert_eq!(summary.executed, 1);
    assert_eq!(summary.pending, 0);
}

#[tokio::test(start_paused = true)]
async fn closed_window_defers_execution() {
    let gw = Arc::new(PaperGateway::new(breached_put_market()));
    let (engine, _tx) = engine(&gw, config());
    // Wednesday 12:30 New York
    let lunch = Utc.with_ymd_and_hms(2026, 10, 14, 16, 30, 0).unwrap();

    let report = engine.afternoon_checkin(lunch).await.unwrap();

    assert!(matches!(report.executions[0].outcome, DecisionOutcome::Deferred { .. }));
    assert!(gw.submitted_orders().is_empty());
    let summary = engine.decision_summary().await;
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.remaining, 3);
}

#[tokio::test(start_paused = true)]
async fn budget_caps_executions() {
    let mut m = market();
    m.quotes.insert("ABC".into(), dec!(30));
    m.profiles.insert(
        "ABC".into(),
        SymbolProfile {
            sector: Sector::Industrials,
            average_volume: 3_000_000,
            ratios: ValuationRatios::default(),
        },
    );
    m.chains.insert(
        "ABC".into(),
        vec![option(day(40), OptionRight::Call, dec!(35), dec!(0.20), dec!(0.30), 0.30, 0.10)],
    );
    m.chains
        .get_mut("XYZ")
        .unwrap()
        .push(option(day(40), OptionRight::Call, dec!(60), dec!(0.40), dec!(0.50), 0.25, 0.15));
    // both calls at 60%+ of premium captured
    m.positions.push(short(InstrumentKind::ShortCall, dec!(60), day(40), dec!(150), dec!(100)));
    let mut abc = short(InstrumentKind::ShortCall, dec!(35), day(40), dec!(120), dec!(90));
    abc.symbol = "ABC".into();
    m.positions.push(abc);

    let gw = Arc::new(PaperGateway::new(m));
    let mut cfg = config();
    cfg.decisions.max_daily_decisions = 1;
    let (engine, _tx) = engine(&gw, cfg);

    let report = engine.afternoon_checkin(now()).await.unwrap();

    assert_eq!(report.executions.len(), 1);
    assert_eq!(report.over_budget.len(), 1);
    assert_eq!(gw.snapshot().positions.len(), 1);
    assert_eq!(engine.decision_summary().await.remaining, 0);
}

/// Two short calls on XYZ, both past the profit target.
fn profitable_calls_market() -> PaperMarket {
    let mut m = market();
    m.chains.get_mut("XYZ").unwrap().extend([
        option(day(40), OptionRight::Call, dec!(60), dec!(0.40), dec!(0.50), 0.25, 0.15),
        option(day(40), OptionRight::Call, dec!(65), dec!(0.15), dec!(0.25), 0.25, 0.06),
    ]);
    m.positions.push(short(InstrumentKind::ShortCall, dec!(60), day(40), dec!(150), dec!(100)));
    m.positions.push(short(InstrumentKind::ShortCall, dec!(65), day(40), dec!(90), dec!(65)));
    m
}

#[tokio::test(start_paused = true)]
async fn each_position_on_a_symbol_gets_its_own_decision() {
    let gw = Arc::new(PaperGateway::new(profitable_calls_market()));
    let (engine, _tx) = engine(&gw, config());

    let morning = engine.morning_routine(now()).await.unwrap();
    assert_eq!(morning.recorded.len(), 2);

    let report = engine.afternoon_checkin(now()).await.unwrap();

    assert_eq!(report.executions.len(), 2);
    assert_ne!(report.executions[0].decision_id, report.executions[1].decision_id);
    assert!(report.executions.iter().all(|e| matches!(
        e.outcome,
        DecisionOutcome::Executed {
            result: ExecutionResult::Success,
            ..
        }
    )));
    assert!(gw.snapshot().positions.is_empty());

    let summary = engine.decision_summary().await;
    assert_eq!(summary.total_made, 2);
    assert_eq!(summary.executed, 2);

    // nothing left to act on, and nothing re-executed
    let again = engine.afternoon_checkin(now() + Duration::minutes(10)).await.unwrap();
    assert!(again.executions.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_fill_is_retried_on_a_later_pass() {
    let mut m = profitable_calls_market();
    m.positions.pop();
    m.fill_mode = FillMode::Never;
    let gw = Arc::new(PaperGateway::new(m));
    let (engine, _tx) = engine(&gw, config());

    let first = engine.afternoon_checkin(now()).await.unwrap();
    assert_eq!(first.executions.len(), 1);
    assert!(matches!(
        first.executions[0].outcome,
        DecisionOutcome::Executed {
            result: ExecutionResult::Failed,
            ..
        }
    ));
    assert_eq!(gw.snapshot().positions.len(), 1);

    gw.update(|m| m.fill_mode = FillMode::Immediate);
    let second = engine.afternoon_checkin(now() + Duration::minutes(20)).await.unwrap();

    assert_eq!(second.executions.len(), 1);
    assert_ne!(second.executions[0].decision_id, first.executions[0].decision_id);
    assert!(matches!(
        second.executions[0].outcome,
        DecisionOutcome::Executed {
            result: ExecutionResult::Success,
            ..
        }
    ));
    assert!(gw.snapshot().positions.is_empty());

    let summary = engine.decision_summary().await;
    assert_eq!(summary.total_made, 2);
    assert_eq!(summary.executed, 2);
}

#[tokio::test(start_paused = true)]
async fn uncovered_shares_get_a_covered_call() {
    let mut m = market();
    m.positions.push(Position {
        symbol: "XYZ".to_string(),
        kind: InstrumentKind::Equity,
        strike: None,
        expiry: None,
        quantity: 200,
        avg_cost: dec!(52),
        market_value: dec!(11000),
        unrealized_pnl: dec!(600),
    });
    m.chains.get_mut("XYZ").unwrap().extend([
        option(day(30), OptionRight::Call, dec!(50), dec!(5.60), dec!(5.80), 0.25, 0.80),
        option(day(30), OptionRight::Call, dec!(55), dec!(1.60), dec!(1.70), 0.25, 0.50),
        option(day(30), OptionRight::Call, dec!(60), dec!(0.35), dec!(0.45), 0.25, 0.15),
    ]);
    let gw = Arc::new(PaperGateway::new(m));
    let (engine, _tx) = engine(&gw, config());

    let report = engine.afternoon_checkin(now()).await.unwrap();

    assert_eq!(report.executions.len(), 1);
    assert_eq!(report.executions[0].action, DecisionAction::SellCoveredCall);
    let call = gw
        .snapshot()
        .positions
        .into_iter()
        .find(|p| p.kind == InstrumentKind::ShortCall)
        .expect("covered call written");
    // lowest strike at or above the 52 cost basis, one contract per 100 shares
    assert_eq!(call.strike, Some(dec!(55)));
    assert_eq!(call.quantity, -2);
    // opening a call realizes nothing
    assert_eq!(engine.inspect(|s| s.performance.trades().len()).await, 0);
}

// =============================================================================
// Portfolio protection
// =============================================================================

#[tokio::test(start_paused = true)]
async fn vix_spike_activates_black_swan_and_closes_near_term() {
    let mut m = market();
    m.quotes.insert("VIX".into(), dec!(55));
    m.positions.push(short(InstrumentKind::ShortPut, dec!(50), day(10), dec!(120), dec!(20)));
    m.positions.push(short(InstrumentKind::ShortCall, dec!(60), day(5), dec!(80), dec!(30)));
    m.positions.push(short(InstrumentKind::ShortPut, dec!(45), day(30), dec!(90), dec!(10)));
    m.chains.insert(
        "XYZ".into(),
        vec![
            option(day(10), OptionRight::Put, dec!(50), dec!(0.95), dec!(1.05), 0.60, -0.30),
            option(day(5), OptionRight::Call, dec!(60), dec!(0.45), dec!(0.55), 0.60, 0.10),
            option(day(30), OptionRight::Put, dec!(45), dec!(0.75), dec!(0.85), 0.60, -0.15),
        ],
    );
    let gw = Arc::new(PaperGateway::new(m));
    let (engine, _tx) = engine(&gw, config());

    let risk = engine.monitor_pass(now()).await.unwrap();

    assert_eq!(engine.inspect(|s| s.black_swan.phase).await, BlackSwanPhase::Active);
    assert_eq!(risk.de_risk_closes.len(), 2);
    assert!(risk
        .de_risk_closes
        .iter()
        .all(|a| a.action == DecisionAction::ClosePosition && a.position.days_to_expiry(today()) < Some(14)));
    assert!(risk.forced_closes.iter().all(|f| f.result == ExecutionResult::Success));

    let remaining = gw.snapshot().positions;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].expiry, Some(day(30)));
    // forced closes bypass the decision budget
    assert_eq!(engine.decision_summary().await.executed, 0);

    let verdict = engine
        .check_entry(&EntryRequest::new("XYZ", dec!(50)), now())
        .await
        .unwrap();
    assert!(verdict.issues.iter().any(|i| i.contains("Black Swan")));
}

#[tokio::test]
async fn drawdown_trips_breaker_and_blocks_entries() {
    let mut m = market();
    m.account.net_liquidation = dec!(78000);
    let gw = Arc::new(PaperGateway::new(m));
    let (engine, _tx) = engine(&gw, config());

    engine.monitor_pass(now()).await.unwrap();

    assert!(engine.inspect(|s| s.circuit_breaker.is_active(now())).await);
    let verdict = engine
        .check_entry(&EntryRequest::new("XYZ", dec!(50)), now())
        .await
        .unwrap();
    assert!(!verdict.approved);
    assert!(verdict.issues.iter().any(|i| i.contains("Circuit breaker")));

    // re-armed once the cooldown has passed
    let later = now() + Duration::days(8);
    engine.monitor_pass(later).await.unwrap();
    assert!(!engine.inspect(|s| s.circuit_breaker.is_active(later)).await);
}

#[tokio::test(start_paused = true)]
async fn black_swan_closes_near_term_without_account_summary() {
    let mut m = market();
    m.quotes.insert("VIX".into(), dec!(55));
    m.unavailable.insert("ACCOUNT_SUMMARY".into());
    m.positions.push(short(InstrumentKind::ShortPut, dec!(50), day(10), dec!(120), dec!(20)));
    m.positions.push(short(InstrumentKind::ShortPut, dec!(45), day(30), dec!(90), dec!(10)));
    m.chains.insert(
        "XYZ".into(),
        vec![
            option(day(10), OptionRight::Put, dec!(50), dec!(0.95), dec!(1.05), 0.60, -0.30),
            option(day(30), OptionRight::Put, dec!(45), dec!(0.75), dec!(0.85), 0.60, -0.15),
        ],
    );
    let gw = Arc::new(PaperGateway::new(m));
    let (engine, _tx) = engine(&gw, config());

    let risk = engine.monitor_pass(now()).await.unwrap();

    assert!(risk.account.is_none());
    assert_eq!(engine.inspect(|s| s.black_swan.phase).await, BlackSwanPhase::Active);
    assert_eq!(risk.de_risk_closes.len(), 1);
    assert!(risk.forced_closes.iter().all(|f| f.result == ExecutionResult::Success));
    assert!(risk.warnings.iter().any(|w| w.contains("cash target not evaluated")));

    let remaining = gw.snapshot().positions;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].expiry, Some(day(30)));
}

#[tokio::test]
async fn black_swan_recovery_advances_once_per_day() {
    let mut m = market();
    m.quotes.insert("VIX".into(), dec!(55));
    m.quotes.insert("SPY".into(), dec!(406));
    m.history.insert("VIX".into(), vec![dec!(30), dec!(28), dec!(26), dec!(25), dec!(24)]);
    m.history.insert(
        "SPY".into(),
        vec![dec!(400), dec!(401), dec!(402), dec!(403), dec!(404), dec!(405)],
    );
    let gw = Arc::new(PaperGateway::new(m));
    let (engine, _tx) = engine(&gw, config());

    engine.monitor_pass(now()).await.unwrap();
    assert_eq!(engine.inspect(|s| s.black_swan.phase).await, BlackSwanPhase::Active);

    // calm market, but passes on the activation day leave the phase alone
    gw.update(|m| {
        m.quotes.insert("VIX".into(), dec!(30));
    });
    for minutes in [5, 10, 15, 20] {
        engine.monitor_pass(now() + Duration::minutes(minutes)).await.unwrap();
    }
    assert_eq!(engine.inspect(|s| s.black_swan.phase).await, BlackSwanPhase::Active);

    let thursday = now() + Duration::days(1);
    engine.monitor_pass(thursday).await.unwrap();
    engine.monitor_pass(thursday + Duration::minutes(5)).await.unwrap();
    assert_eq!(
        engine.inspect(|s| s.black_swan.phase).await,
        BlackSwanPhase::Recovery { stage: 1 }
    );
}
