//! Order execution coordinator.
//!
//! Every submission goes through the trading-window check first, then the
//! smart fill loop: a limit order at the far side of the book, repriced one
//! increment toward the near side after each unfilled wait.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use wheel_core::{DataUnavailable, ExecutionConfig, RiskThresholds};
use wheel_ib::options_chain::{nearest_expiry, next_cycle_expiry};
use wheel_ib::{
    BrokerageGateway, Instrument, InstrumentKind, MarketDataGateway, OptionRight, OptionsContract, OrderRequest,
    OrderSide, OrderStatus, Position,
};

use crate::error::ExecutionError;
use crate::execution_quality::{ExecutionQuality, ExecutionQualitySummary};
use crate::types::{DecisionAction, ExecutionResult};

/// How often a working order is polled during its wait.
const STATUS_POLL: std::time::Duration = std::time::Duration::from_secs(5);

// =============================================================================
// Trading window
// =============================================================================

/// Refuses submissions outside the configured days and windows, judged in
/// exchange-local time.
///
/// # Errors
///
/// `WindowClosed` outside the windows; `Invariant` if the configured
/// timezone is unknown.
pub fn check_trading_window(now: DateTime<Utc>, config: &ExecutionConfig) -> Result<(), ExecutionError> {
    let local = now.with_timezone(&exchange_tz(config)?);
    let open_day = config.trading_days.contains(&local.weekday());
    let open_time = config.windows.iter().any(|w| w.contains(local.time()));
    if open_day && open_time {
        Ok(())
    } else {
        Err(ExecutionError::WindowClosed {
            local: local.format("%a %Y-%m-%d %H:%M %Z").to_string(),
        })
    }
}

fn exchange_tz(config: &ExecutionConfig) -> Result<Tz, ExecutionError> {
    config
        .timezone
        .parse()
        .map_err(|e| ExecutionError::Invariant(format!("exchange timezone {}: {e}", config.timezone)))
}

/// Trading date at the exchange for `now`.
///
/// # Errors
///
/// `Invariant` if the configured timezone is unknown.
pub fn exchange_date(now: DateTime<Utc>, config: &ExecutionConfig) -> Result<NaiveDate, ExecutionError> {
    Ok(now.with_timezone(&exchange_tz(config)?).date_naive())
}

// =============================================================================
// Reports
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillReport {
    pub order_id: String,
    pub instrument: Instrument,
    pub side: OrderSide,
    pub quantity: u32,
    pub price: Decimal,
    /// Book mid when the order was first worked.
    pub mid: Decimal,
    pub commission: Decimal,
    pub attempts: u32,
    pub filled_at: DateTime<Utc>,
}

impl FillReport {
    /// Cash received (positive) or paid (negative), net of commission.
    pub fn net_cash(&self) -> Decimal {
        let gross = self.price * self.instrument.multiplier() * Decimal::from(self.quantity);
        match self.side {
            OrderSide::Sell => gross - self.commission,
            OrderSide::Buy => -gross - self.commission,
        }
    }
}

/// Both legs of a roll, priced before any order goes out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollPlan {
    pub action: DecisionAction,
    pub old: OptionsContract,
    pub new: OptionsContract,
    pub quantity: u32,
    pub old_bid: Decimal,
    pub new_ask: Decimal,
    /// Per-share credit: new-leg ask minus old-leg bid.
    pub net_credit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollReport {
    pub plan: RollPlan,
    pub close_fill: FillReport,
    pub open_fill: Option<FillReport>,
    /// Why the open leg did not fill, when it did not.
    pub open_error: Option<String>,
}

impl RollReport {
    pub fn result(&self) -> ExecutionResult {
        if self.open_fill.is_some() {
            ExecutionResult::Success
        } else {
            ExecutionResult::Partial
        }
    }
}

// =============================================================================
// Roll planning
// =============================================================================

/// Picks the new leg for a roll of `position` and prices both legs.
///
/// # Errors
///
/// `DataUnavailable` when the chain, a listed target strike, or a chain
/// delta for a defensive roll is missing; `Invariant` for non-roll actions
/// or positions that are not short options.
pub async fn plan_roll(
    market: &dyn MarketDataGateway,
    position: &Position,
    action: DecisionAction,
    config: &ExecutionConfig,
    thresholds: &RiskThresholds,
) -> Result<RollPlan, ExecutionError> {
    let old = position
        .contract()
        .filter(|_| position.kind.is_short_option())
        .ok_or_else(|| ExecutionError::Invariant(format!("{} is not a short option", position.label())))?;
    if !action.is_roll() {
        return Err(ExecutionError::Invariant(format!("{action} is not a roll")));
    }
    let symbol = old.symbol.as_str();
    let unavailable = |reason: String| DataUnavailable::new("roll target", reason).for_subject(old.display_name());

    let expirations = market.expirations(symbol).await?;
    let new_expiry = next_cycle_expiry(&expirations, old.expiry, config.roll_cycle_days)
        .ok_or_else(|| unavailable(format!("no expiration listed after {}", old.expiry)))?;
    let chain = market.option_chain(symbol, new_expiry).await?;

    let target = match action {
        DecisionAction::RollDefensive => chain
            .closest_by_delta(old.right, thresholds.defensive_roll_delta)
            .ok_or_else(|| unavailable("chain carries no deltas".to_string()))?,
        DecisionAction::RollTime => chain
            .find(old.right, old.strike)
            .ok_or_else(|| unavailable(format!("strike {} not listed for {new_expiry}", old.strike)))?,
        _ => {
            let factor = match old.right {
                OptionRight::Put => Decimal::new(98, 2),
                OptionRight::Call => Decimal::new(102, 2),
            };
            chain
                .nearest_strike(old.right, old.strike * factor)
                .ok_or_else(|| unavailable(format!("no strikes listed for {new_expiry}")))?
        }
    };

    let new = target.contract(symbol);
    let old_bid = market.top_of_book(&Instrument::Option(old.clone())).await?.bid;
    let new_ask = target.ask;

    Ok(RollPlan {
        action,
        quantity: u32::try_from(position.quantity.unsigned_abs())
            .map_err(|_| ExecutionError::Invariant(format!("quantity {} out of range", position.quantity)))?,
        old,
        new,
        old_bid,
        new_ask,
        net_credit: new_ask - old_bid,
    })
}

/// Call to write against held shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoveredCallPlan {
    pub contract: OptionsContract,
    pub contracts: u32,
}

/// Picks the expiry nearest `target_dte` and the lowest listed call strike
/// at or above the shares' cost basis, one contract per 100 shares.
///
/// # Errors
///
/// `DataUnavailable` when no expiry or qualifying strike is listed;
/// `Invariant` for anything but a long stock position of at least 100 shares.
pub async fn plan_covered_call(
    market: &dyn MarketDataGateway,
    position: &Position,
    today: NaiveDate,
    target_dte: i64,
) -> Result<CoveredCallPlan, ExecutionError> {
    if position.kind != InstrumentKind::Equity || position.quantity < 100 {
        return Err(ExecutionError::Invariant(format!(
            "{} cannot cover a call",
            position.label()
        )));
    }
    let contracts = u32::try_from(position.quantity / 100)
        .map_err(|_| ExecutionError::Invariant(format!("quantity {} out of range", position.quantity)))?;
    let symbol = position.symbol.as_str();
    let unavailable = |reason: String| DataUnavailable::new("covered call strike", reason).for_subject(symbol);

    let expirations = market.expirations(symbol).await?;
    let expiry = nearest_expiry(&expirations, today + Duration::days(target_dte))
        .ok_or_else(|| unavailable("no expirations listed".to_string()))?;
    let chain = market.option_chain(symbol, expiry).await?;
    let entry = chain
        .side(OptionRight::Call)
        .filter(|e| e.strike >= position.avg_cost)
        .min_by_key(|e| e.strike)
        .ok_or_else(|| unavailable(format!("no call at or above cost {} for {expiry}", position.avg_cost)))?;

    Ok(CoveredCallPlan {
        contract: entry.contract(symbol),
        contracts,
    })
}

// =============================================================================
// Coordinator
// =============================================================================

pub struct OrderCoordinator {
    market: Arc<dyn MarketDataGateway>,
    broker: Arc<dyn BrokerageGateway>,
    quality: Mutex<ExecutionQuality>,
}

impl OrderCoordinator {
    pub fn new(market: Arc<dyn MarketDataGateway>, broker: Arc<dyn BrokerageGateway>) -> Self {
        Self {
            market,
            broker,
            quality: Mutex::new(ExecutionQuality::default()),
        }
    }

    /// Fill quality of every smart-fill order worked so far.
    pub fn execution_quality(&self) -> ExecutionQualitySummary {
        self.quality.lock().summary()
    }

    /// Works a limit order from the far side of the book toward the near
    /// side, never past it.
    ///
    /// # Errors
    ///
    /// `NoFill` after `max_attempts` unfilled orders, `OrderRejected` on the
    /// first broker rejection, `DataUnavailable` if the book is missing.
    pub async fn smart_fill(
        &self,
        instrument: &Instrument,
        side: OrderSide,
        quantity: u32,
        config: &ExecutionConfig,
    ) -> Result<FillReport, ExecutionError> {
        let book = self.market.top_of_book(instrument).await?;
        let (mut price, stop, step) = match side {
            OrderSide::Sell => (book.ask, book.bid, -config.price_increment),
            OrderSide::Buy => (book.bid, book.ask, config.price_increment),
        };
        let wait = std::time::Duration::from_secs(config.fill_wait_secs);

        for attempt in 1..=config.max_attempts {
            let request = OrderRequest {
                instrument: instrument.clone(),
                side,
                quantity,
                limit_price: price,
            };
            let handle = self.broker.place_order(&request).await?;
            info!(
                order_id = handle.order_id,
                instrument = %instrument.display_name(),
                %side,
                quantity,
                limit = %price,
                attempt,
                "Limit order placed"
            );

            let deadline = Instant::now() + wait;
            loop {
                if let OrderStatus::Filled { avg_price, commission } = self.broker.order_status(&handle).await? {
                    info!(order_id = handle.order_id, price = %avg_price, attempt, "Order filled");
                    return Ok(self.filled(FillReport {
                        order_id: handle.order_id,
                        instrument: instrument.clone(),
                        side,
                        quantity,
                        price: avg_price,
                        mid: book.mid(),
                        commission,
                        attempts: attempt,
                        filled_at: Utc::now(),
                    }));
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                sleep(STATUS_POLL.min(deadline - now)).await;
            }

            self.broker.cancel_order(&handle).await?;
            // A fill can land between the last poll and the cancel.
            if let OrderStatus::Filled { avg_price, commission } = self.broker.order_status(&handle).await? {
                return Ok(self.filled(FillReport {
                    order_id: handle.order_id,
                    instrument: instrument.clone(),
                    side,
                    quantity,
                    price: avg_price,
                    mid: book.mid(),
                    commission,
                    attempts: attempt,
                    filled_at: Utc::now(),
                }));
            }

            price = match side {
                OrderSide::Sell => (price + step).max(stop),
                OrderSide::Buy => (price + step).min(stop),
            };
        }

        warn!(
            instrument = %instrument.display_name(),
            attempts = config.max_attempts,
            "Smart fill exhausted"
        );
        self.quality.lock().record_unfilled();
        Err(ExecutionError::NoFill {
            instrument: instrument.display_name(),
            attempts: config.max_attempts,
        })
    }

    fn filled(&self, fill: FillReport) -> FillReport {
        self.quality.lock().record_fill(&fill);
        fill
    }

    /// Flattens a position: buys back shorts, sells longs and shares.
    ///
    /// # Errors
    ///
    /// `WindowClosed` before any broker call outside trading hours, plus any
    /// smart fill error.
    pub async fn close_position(
        &self,
        position: &Position,
        config: &ExecutionConfig,
        now: DateTime<Utc>,
    ) -> Result<FillReport, ExecutionError> {
        check_trading_window(now, config)?;
        let instrument = position
            .instrument()
            .ok_or_else(|| ExecutionError::Invariant(format!("{} has no tradable contract", position.label())))?;
        let side = if position.quantity < 0 {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };
        let quantity = u32::try_from(position.quantity.unsigned_abs())
            .map_err(|_| ExecutionError::Invariant(format!("quantity {} out of range", position.quantity)))?;
        if quantity == 0 {
            return Err(ExecutionError::Invariant(format!("{} is already flat", position.label())));
        }
        self.smart_fill(&instrument, side, quantity, config).await
    }

    /// Close-then-open roll.
    ///
    /// Abandoned before any order if it would not collect a credit. Once the
    /// close leg fills there is no rollback: an unfilled open leg is reported
    /// as a partial roll.
    ///
    /// # Errors
    ///
    /// `WindowClosed`, `DebitRoll`, planning errors, or any error on the
    /// close leg.
    pub async fn roll_position(
        &self,
        position: &Position,
        action: DecisionAction,
        config: &ExecutionConfig,
        thresholds: &RiskThresholds,
        now: DateTime<Utc>,
    ) -> Result<RollReport, ExecutionError> {
        check_trading_window(now, config)?;
        let plan = plan_roll(self.market.as_ref(), position, action, config, thresholds).await?;
        if plan.net_credit <= Decimal::ZERO {
            warn!(
                old = %plan.old.display_name(),
                new = %plan.new.display_name(),
                net_credit = %plan.net_credit,
                "Roll abandoned, would pay a debit"
            );
            return Err(ExecutionError::DebitRoll {
                net_credit: plan.net_credit,
            });
        }
        info!(
            old = %plan.old.display_name(),
            new = %plan.new.display_name(),
            net_credit = %plan.net_credit,
            "Rolling position"
        );

        let close_fill = self
            .smart_fill(&Instrument::Option(plan.old.clone()), OrderSide::Buy, plan.quantity, config)
            .await?;

        match self
            .smart_fill(&Instrument::Option(plan.new.clone()), OrderSide::Sell, plan.quantity, config)
            .await
        {
            Ok(open_fill) => Ok(RollReport {
                plan,
                close_fill,
                open_fill: Some(open_fill),
                open_error: None,
            }),
            Err(e) => {
                warn!(
                    new = %plan.new.display_name(),
                    error = %e,
                    "Roll open leg failed after close filled, position left flat"
                );
                Ok(RollReport {
                    plan,
                    close_fill,
                    open_fill: None,
                    open_error: Some(e.to_string()),
                })
            }
        }
    }

    /// Sells a cash-secured put. Entry criteria are checked by the caller.
    ///
    /// # Errors
    ///
    /// `WindowClosed` outside trading hours, plus any smart fill error.
    pub async fn sell_put(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        strike: Decimal,
        contracts: u32,
        config: &ExecutionConfig,
        now: DateTime<Utc>,
    ) -> Result<FillReport, ExecutionError> {
        check_trading_window(now, config)?;
        let contract = OptionsContract::new(symbol, expiry, strike, OptionRight::Put);
        self.smart_fill(&Instrument::Option(contract), OrderSide::Sell, contracts, config)
            .await
    }

    /// Sells calls against shares already held.
    ///
    /// # Errors
    ///
    /// `WindowClosed` outside trading hours, `OrderRejected` before any
    /// order when the account holds fewer than 100 shares per contract, plus
    /// any smart fill error.
    pub async fn sell_covered_call(
        &self,
        contract: &OptionsContract,
        contracts: u32,
        config: &ExecutionConfig,
        now: DateTime<Utc>,
    ) -> Result<FillReport, ExecutionError> {
        check_trading_window(now, config)?;
        if contract.right != OptionRight::Call || contracts == 0 {
            return Err(ExecutionError::Invariant(format!(
                "{contracts}x {} is not a covered call",
                contract.display_name()
            )));
        }
        let held: i64 = self
            .broker
            .positions()
            .await?
            .iter()
            .filter(|p| p.kind == InstrumentKind::Equity && p.symbol.eq_ignore_ascii_case(&contract.symbol))
            .map(|p| p.quantity)
            .sum();
        let needed = i64::from(contracts) * 100;
        if held < needed {
            warn!(symbol = %contract.symbol, held, needed, "Insufficient shares for covered call");
            return Err(ExecutionError::OrderRejected(format!(
                "{} covered call needs {needed} shares, {held} held",
                contract.symbol
            )));
        }
        self.smart_fill(&Instrument::Option(contract.clone()), OrderSide::Sell, contracts, config)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use wheel_ib::{AccountSummary, ChainEntry, FillMode, InstrumentKind, PaperGateway, PaperMarket};

    fn old_expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 11, 20).unwrap()
    }

    fn new_expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 12, 18).unwrap()
    }

    fn put(expiry: NaiveDate, strike: Decimal, bid: Decimal, ask: Decimal, delta: Option<f64>) -> ChainEntry {
        ChainEntry {
            expiry,
            right: OptionRight::Put,
            strike,
            bid,
            ask,
            last_price: bid,
            implied_vol: 0.30,
            delta,
            volume: 500,
            open_interest: 1000,
        }
    }

    fn short_put() -> Position {
        Position {
            symbol: "AAPL".to_string(),
            kind: InstrumentKind::ShortPut,
            strike: Some(dec!(100)),
            expiry: Some(old_expiry()),
            quantity: -2,
            avg_cost: dec!(300),
            market_value: dec!(-400),
            unrealized_pnl: dec!(-100),
        }
    }

    fn paper(fill_mode: FillMode) -> Arc<PaperGateway> {
        let mut m = PaperMarket::default();
        m.quotes.insert("AAPL".into(), dec!(98));
        m.chains.insert(
            "AAPL".into(),
            vec![
                put(old_expiry(), dec!(100), dec!(2.00), dec!(2.10), Some(-0.55)),
                put(new_expiry(), dec!(90), dec!(1.50), dec!(1.60), Some(-0.22)),
                put(new_expiry(), dec!(95), dec!(2.80), dec!(2.90), Some(-0.31)),
                put(new_expiry(), dec!(100), dec!(4.40), dec!(4.60), Some(-0.52)),
            ],
        );
        m.positions.push(short_put());
        m.account = AccountSummary {
            net_liquidation: dec!(100000),
            total_cash: dec!(50000),
        };
        m.fill_mode = fill_mode;
        Arc::new(PaperGateway::new(m))
    }

    fn coordinator(gw: &Arc<PaperGateway>) -> OrderCoordinator {
        OrderCoordinator::new(gw.clone(), gw.clone())
    }

    /// Wednesday 10:30 New York.
    fn open_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 14, 30, 0).unwrap()
    }

    #[test]
    fn window_respects_exchange_time() {
        let config = ExecutionConfig::default();
        assert!(check_trading_window(open_time(), &config).is_ok());

        // Wednesday 12:30 New York
        let lunch = Utc.with_ymd_and_hms(2026, 10, 14, 16, 30, 0).unwrap();
        assert!(matches!(
            check_trading_window(lunch, &config),
            Err(ExecutionError::WindowClosed { .. })
        ));

        // Monday 10:30 New York
        let monday = Utc.with_ymd_and_hms(2026, 10, 12, 14, 30, 0).unwrap();
        assert!(check_trading_window(monday, &config).is_err());

        // 15:00 is inclusive
        let close = Utc.with_ymd_and_hms(2026, 10, 14, 19, 0, 0).unwrap();
        assert!(check_trading_window(close, &config).is_ok());
    }

    #[test]
    fn exchange_date_uses_local_calendar() {
        // 01:30 UTC Thursday is still Wednesday evening in New York
        let late = Utc.with_ymd_and_hms(2026, 10, 15, 1, 30, 0).unwrap();
        assert_eq!(
            exchange_date(late, &ExecutionConfig::default()).unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()
        );
    }

    #[test]
    fn unknown_timezone_is_invariant() {
        let config = ExecutionConfig {
            timezone: "Mars/Olympus".to_string(),
            ..ExecutionConfig::default()
        };
        assert!(matches!(
            check_trading_window(open_time(), &config),
            Err(ExecutionError::Invariant(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn smart_fill_walks_down_to_mid() {
        let gw = paper(FillMode::AtMid);
        let contract = OptionsContract::new("AAPL", new_expiry(), dec!(95), OptionRight::Put);
        let fill = coordinator(&gw)
            .smart_fill(&Instrument::Option(contract), OrderSide::Sell, 1, &ExecutionConfig::default())
            .await
            .unwrap();

        // 2.90 rests, 2.85 fills at the 2.85 mid
        assert_eq!(fill.attempts, 2);
        assert_eq!(fill.price, dec!(2.85));
        assert_eq!(fill.mid, dec!(2.85));
        let prices: Vec<_> = gw.submitted_orders().iter().map(|o| o.limit_price).collect();
        assert_eq!(prices, vec![dec!(2.90), dec!(2.85)]);
    }

    #[tokio::test(start_paused = true)]
    async fn coordinator_tracks_fill_quality() {
        let gw = paper(FillMode::AtMid);
        let coordinator = coordinator(&gw);
        let filled = OptionsContract::new("AAPL", new_expiry(), dec!(95), OptionRight::Put);
        coordinator
            .smart_fill(&Instrument::Option(filled), OrderSide::Sell, 1, &ExecutionConfig::default())
            .await
            .unwrap();

        // one attempt at 1.60 never reaches the 1.55 mid
        let config = ExecutionConfig {
            max_attempts: 1,
            ..ExecutionConfig::default()
        };
        let unfilled = OptionsContract::new("AAPL", new_expiry(), dec!(90), OptionRight::Put);
        coordinator
            .smart_fill(&Instrument::Option(unfilled), OrderSide::Sell, 1, &config)
            .await
            .unwrap_err();

        let quality = coordinator.execution_quality();
        assert_eq!(quality.orders, 2);
        assert_eq!(quality.filled, 1);
        assert_eq!(quality.fill_rate, 0.5);
        assert_eq!(quality.avg_attempts, 2.0);
        assert_eq!(quality.at_mid, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn smart_fill_never_crosses_the_bid() {
        let gw = paper(FillMode::Never);
        let contract = OptionsContract::new("AAPL", new_expiry(), dec!(90), OptionRight::Put);
        let config = ExecutionConfig {
            max_attempts: 4,
            ..ExecutionConfig::default()
        };
        let err = coordinator(&gw)
            .smart_fill(&Instrument::Option(contract), OrderSide::Sell, 1, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::NoFill { attempts: 4, .. }));
        assert!(err.is_recoverable());

        let prices: Vec<_> = gw.submitted_orders().iter().map(|o| o.limit_price).collect();
        assert_eq!(prices, vec![dec!(1.60), dec!(1.55), dec!(1.50), dec!(1.50)]);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_is_not_retried() {
        let gw = paper(FillMode::AtMid);
        gw.update(|m| m.reject_orders = Some("insufficient margin".into()));
        let err = coordinator(&gw)
            .sell_put("AAPL", new_expiry(), dec!(95), 1, &ExecutionConfig::default(), open_time())
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::OrderRejected("insufficient margin".into()));
        assert!(gw.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn closed_window_refuses_before_broker() {
        let gw = paper(FillMode::Immediate);
        let saturday = Utc.with_ymd_and_hms(2026, 10, 17, 14, 30, 0).unwrap();
        let err = coordinator(&gw)
            .close_position(&short_put(), &ExecutionConfig::default(), saturday)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::WindowClosed { .. }));
        assert!(gw.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn defensive_roll_targets_thirty_delta() {
        let gw = paper(FillMode::Immediate);
        let plan = plan_roll(
            gw.as_ref(),
            &short_put(),
            DecisionAction::RollDefensive,
            &ExecutionConfig::default(),
            &RiskThresholds::default(),
        )
        .await
        .unwrap();
        assert_eq!(plan.new.expiry, new_expiry());
        assert_eq!(plan.new.strike, dec!(95));
        assert_eq!(plan.net_credit, dec!(0.90));
        assert_eq!(plan.quantity, 2);
    }

    #[tokio::test]
    async fn profit_roll_snaps_to_listed_strike() {
        let gw = paper(FillMode::Immediate);
        let plan = plan_roll(
            gw.as_ref(),
            &short_put(),
            DecisionAction::RollPosition,
            &ExecutionConfig::default(),
            &RiskThresholds::default(),
        )
        .await
        .unwrap();
        // 100 * 0.98 = 98 -> 100 is nearest
        assert_eq!(plan.new.strike, dec!(100));
    }

    #[tokio::test]
    async fn defensive_roll_without_chain_delta_is_unavailable() {
        let gw = paper(FillMode::Immediate);
        gw.update(|m| {
            for e in m.chains.get_mut("AAPL").unwrap() {
                e.delta = None;
            }
        });
        let err = plan_roll(
            gw.as_ref(),
            &short_put(),
            DecisionAction::RollDefensive,
            &ExecutionConfig::default(),
            &RiskThresholds::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExecutionError::DataUnavailable(_)));
    }

    #[tokio::test]
    async fn debit_roll_is_abandoned_before_orders() {
        let gw = paper(FillMode::Immediate);
        gw.update(|m| {
            for e in m.chains.get_mut("AAPL").unwrap() {
                if e.expiry == new_expiry() {
                    e.bid = dec!(0.90);
                    e.ask = dec!(1.00);
                }
            }
        });
        let err = coordinator(&gw)
            .roll_position(
                &short_put(),
                DecisionAction::RollTime,
                &ExecutionConfig::default(),
                &RiskThresholds::default(),
                open_time(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::DebitRoll { net_credit: dec!(-1.00) });
        assert!(gw.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn time_roll_closes_then_opens() {
        let gw = paper(FillMode::Immediate);
        let report = coordinator(&gw)
            .roll_position(
                &short_put(),
                DecisionAction::RollTime,
                &ExecutionConfig::default(),
                &RiskThresholds::default(),
                open_time(),
            )
            .await
            .unwrap();
        assert_eq!(report.result(), ExecutionResult::Success);

        let orders = gw.submitted_orders();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].side, OrderSide::Buy);
        assert_eq!(orders[1].side, OrderSide::Sell);

        let positions = gw.snapshot().positions;
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].expiry, Some(new_expiry()));
        assert_eq!(positions[0].quantity, -2);
    }

    #[tokio::test(start_paused = true)]
    async fn unfilled_open_leg_is_partial() {
        let gw = paper(FillMode::AtMid);
        let config = ExecutionConfig {
            max_attempts: 2,
            ..ExecutionConfig::default()
        };
        // Close buys 2.00 then 2.05 (mid). Open sells 4.60 then 4.55, never
        // reaching the 4.50 mid.
        let report = coordinator(&gw)
            .roll_position(
                &short_put(),
                DecisionAction::RollTime,
                &config,
                &RiskThresholds::default(),
                open_time(),
            )
            .await
            .unwrap();
        assert_eq!(report.result(), ExecutionResult::Partial);
        assert_eq!(report.close_fill.price, dec!(2.05));
        assert!(report.open_error.unwrap().contains("no fill"));
        assert!(gw.snapshot().positions.is_empty());
    }

    #[test]
    fn net_cash_includes_multiplier_and_commission() {
        let fill = FillReport {
            order_id: "1".into(),
            instrument: Instrument::Option(OptionsContract::new("AAPL", new_expiry(), dec!(95), OptionRight::Put)),
            side: OrderSide::Sell,
            quantity: 2,
            price: dec!(2.85),
            mid: dec!(2.85),
            commission: dec!(1.30),
            attempts: 1,
            filled_at: open_time(),
        };
        assert_eq!(fill.net_cash(), dec!(568.70));
    }

    fn shares(quantity: i64) -> Position {
        Position {
            symbol: "AAPL".to_string(),
            kind: InstrumentKind::Equity,
            strike: None,
            expiry: None,
            quantity,
            avg_cost: dec!(97),
            market_value: dec!(98) * Decimal::from(quantity),
            unrealized_pnl: Decimal::from(quantity),
        }
    }

    fn call(strike: Decimal, bid: Decimal, ask: Decimal, delta: f64) -> ChainEntry {
        ChainEntry {
            right: OptionRight::Call,
            ..put(old_expiry(), strike, bid, ask, Some(delta))
        }
    }

    /// 250 AAPL shares at 97 with calls listed on the November expiry.
    fn covered_paper() -> Arc<PaperGateway> {
        let gw = paper(FillMode::Immediate);
        gw.update(|m| {
            m.positions = vec![shares(250)];
            let chain = m.chains.get_mut("AAPL").unwrap();
            chain.push(call(dec!(95), dec!(4.10), dec!(4.30), 0.62));
            chain.push(call(dec!(100), dec!(1.20), dec!(1.30), 0.38));
            chain.push(call(dec!(105), dec!(0.40), dec!(0.50), 0.15));
        });
        gw
    }

    #[tokio::test]
    async fn covered_call_strike_sits_above_cost_basis() {
        let gw = covered_paper();
        let plan = plan_covered_call(gw.as_ref(), &shares(250), open_time().date_naive(), 30)
            .await
            .unwrap();
        assert_eq!(plan.contract.expiry, old_expiry());
        assert_eq!(plan.contract.strike, dec!(100));
        assert_eq!(plan.contract.right, OptionRight::Call);
        // 250 shares cover two contracts
        assert_eq!(plan.contracts, 2);

        let err = plan_covered_call(gw.as_ref(), &shares(60), open_time().date_naive(), 30)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Invariant(_)));
    }

    #[tokio::test]
    async fn covered_call_sells_against_held_shares() {
        let gw = covered_paper();
        let contract = OptionsContract::new("AAPL", old_expiry(), dec!(100), OptionRight::Call);
        let fill = coordinator(&gw)
            .sell_covered_call(&contract, 2, &ExecutionConfig::default(), open_time())
            .await
            .unwrap();
        assert_eq!(fill.side, OrderSide::Sell);
        assert_eq!(fill.quantity, 2);

        let positions = gw.snapshot().positions;
        assert!(positions
            .iter()
            .any(|p| p.kind == InstrumentKind::ShortCall && p.quantity == -2 && p.strike == Some(dec!(100))));
    }

    #[tokio::test]
    async fn covered_call_without_enough_shares_is_rejected() {
        let gw = covered_paper();
        let contract = OptionsContract::new("AAPL", old_expiry(), dec!(100), OptionRight::Call);
        let err = coordinator(&gw)
            .sell_covered_call(&contract, 3, &ExecutionConfig::default(), open_time())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::OrderRejected(ref msg) if msg.contains("300 shares, 250 held")));
        assert!(gw.submitted_orders().is_empty());
    }
}
