//! Paper trading gateway.
//!
//! An in-memory market and account that implements both gateway traits.
//! Limit orders fill against the mid of the book (or not at all, depending
//! on `FillMode`), and fills update positions and cash. Used for dry runs
//! and for exercising the engine end to end.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use wheel_core::{BrokerError, DataUnavailable};

use crate::broker::BrokerageGateway;
use crate::market_data::{MarketDataGateway, SymbolProfile};
use crate::options_chain::{ChainEntry, OptionsChain};
use crate::types::{
    AccountSummary, Fill, Instrument, InstrumentKind, OptionGreeks, OptionsContract, OrderHandle,
    OrderRequest, OrderSide, OrderStatus, Position, TopOfBook,
};

/// Per-contract commission charged on option fills.
const OPTION_COMMISSION: Decimal = dec!(0.65);

/// How the paper broker decides whether a limit order fills.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// Sells fill at or below the mid, buys at or above it.
    #[default]
    AtMid,
    /// Every order fills at its limit.
    Immediate,
    /// Orders rest forever.
    Never,
}

/// Market and account fixture backing the paper gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperMarket {
    /// Last price per symbol, including VIX and ETFs.
    pub quotes: HashMap<String, Decimal>,
    /// Optional stock books; symbols without one trade at the last price.
    pub books: HashMap<String, TopOfBook>,
    /// Daily closes, oldest first.
    pub history: HashMap<String, Vec<Decimal>>,
    pub chains: HashMap<String, Vec<ChainEntry>>,
    pub earnings: HashMap<String, NaiveDate>,
    pub profiles: HashMap<String, SymbolProfile>,
    pub positions: Vec<Position>,
    pub account: AccountSummary,
    /// Symbols whose data requests fail. `ACCOUNT` fails both brokerage
    /// reads; `ACCOUNT_SUMMARY` or `POSITIONS` fails just one.
    pub unavailable: HashSet<String>,
    pub fill_mode: FillMode,
    /// When set, every order is rejected with this reason.
    pub reject_orders: Option<String>,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    request: OrderRequest,
    status: OrderStatus,
}

#[derive(Debug, Default)]
struct PaperState {
    market: PaperMarket,
    orders: HashMap<String, PaperOrder>,
    order_log: Vec<String>,
    next_order_id: u64,
}

pub struct PaperGateway {
    state: RwLock<PaperState>,
}

impl PaperGateway {
    pub fn new(market: PaperMarket) -> Self {
        Self {
            state: RwLock::new(PaperState {
                market,
                ..PaperState::default()
            }),
        }
    }

    /// Loads a `PaperMarket` fixture from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading paper market {}", path.display()))?;
        let market: PaperMarket = serde_json::from_str(&raw)
            .with_context(|| format!("parsing paper market {}", path.display()))?;
        Ok(Self::new(market))
    }

    /// Mutates the fixture in place, e.g. to move VIX between passes.
    pub fn update(&self, f: impl FnOnce(&mut PaperMarket)) {
        f(&mut self.state.write().market);
    }

    pub fn snapshot(&self) -> PaperMarket {
        self.state.read().market.clone()
    }

    /// Every order submitted so far, in submission order.
    pub fn submitted_orders(&self) -> Vec<OrderRequest> {
        let state = self.state.read();
        state
            .order_log
            .iter()
            .filter_map(|id| state.orders.get(id).map(|o| o.request.clone()))
            .collect()
    }

    fn check_available(market: &PaperMarket, what: &str, symbol: &str) -> Result<(), DataUnavailable> {
        if market.unavailable.contains(symbol) {
            return Err(DataUnavailable::new(what, "paper feed marked unavailable").for_subject(symbol));
        }
        Ok(())
    }

    fn chain_entry<'a>(market: &'a PaperMarket, contract: &OptionsContract) -> Option<&'a ChainEntry> {
        market.chains.get(&contract.symbol).and_then(|entries| {
            entries.iter().find(|e| {
                e.expiry == contract.expiry && e.right == contract.right && e.strike == contract.strike
            })
        })
    }

    fn book_for(market: &PaperMarket, instrument: &Instrument) -> Result<TopOfBook, DataUnavailable> {
        Self::check_available(market, "top of book", instrument.symbol())?;
        match instrument {
            Instrument::Stock { symbol } => market
                .books
                .get(symbol)
                .copied()
                .or_else(|| market.quotes.get(symbol).map(|p| TopOfBook { bid: *p, ask: *p }))
                .ok_or_else(|| DataUnavailable::new("top of book", "no quote").for_subject(symbol)),
            Instrument::Option(contract) => Self::chain_entry(market, contract)
                .map(ChainEntry::book)
                .ok_or_else(|| {
                    DataUnavailable::new("top of book", "contract not listed")
                        .for_subject(contract.display_name())
                }),
        }
    }

    fn would_fill(mode: FillMode, request: &OrderRequest, book: TopOfBook) -> bool {
        match mode {
            FillMode::Immediate => true,
            FillMode::Never => false,
            FillMode::AtMid => match request.side {
                OrderSide::Sell => request.limit_price <= book.mid(),
                OrderSide::Buy => request.limit_price >= book.mid(),
            },
        }
    }

    /// Applies a fill to positions and cash.
    fn apply_fill(market: &mut PaperMarket, fill: &Fill) {
        let multiplier = fill.instrument.multiplier();
        let qty = i64::from(fill.quantity) * fill.side.sign();
        let notional = fill.price * Decimal::from(fill.quantity) * multiplier;
        match fill.side {
            OrderSide::Buy => market.account.total_cash -= notional + fill.commission,
            OrderSide::Sell => market.account.total_cash += notional - fill.commission,
        }

        let matches = |p: &Position| match &fill.instrument {
            Instrument::Stock { symbol } => p.kind == InstrumentKind::Equity && &p.symbol == symbol,
            Instrument::Option(c) => p.contract().as_ref() == Some(c),
        };

        if let Some(idx) = market.positions.iter().position(|p| matches(p)) {
            let pos = &mut market.positions[idx];
            pos.quantity += qty;
            if pos.quantity == 0 {
                market.positions.remove(idx);
            } else {
                pos.market_value = fill.price * multiplier * Decimal::from(pos.quantity);
                pos.unrealized_pnl = pos.market_value
                    - pos.avg_cost * Decimal::from(pos.quantity);
            }
            return;
        }

        let (kind, strike, expiry) = match &fill.instrument {
            Instrument::Stock { .. } => (InstrumentKind::Equity, None, None),
            Instrument::Option(c) => (
                InstrumentKind::for_option(c.right, qty),
                Some(c.strike),
                Some(c.expiry),
            ),
        };
        market.positions.push(Position {
            symbol: fill.instrument.symbol().to_string(),
            kind,
            strike,
            expiry,
            quantity: qty,
            avg_cost: fill.price * multiplier,
            market_value: fill.price * multiplier * Decimal::from(qty),
            unrealized_pnl: Decimal::ZERO,
        });
    }
}

#[async_trait]
impl MarketDataGateway for PaperGateway {
    async fn quote(&self, symbol: &str) -> Result<Decimal, DataUnavailable> {
        let state = self.state.read();
        Self::check_available(&state.market, "quote", symbol)?;
        state
            .market
            .quotes
            .get(symbol)
            .copied()
            .ok_or_else(|| DataUnavailable::new("quote", "no quote").for_subject(symbol))
    }

    async fn top_of_book(&self, instrument: &Instrument) -> Result<TopOfBook, DataUnavailable> {
        Self::book_for(&self.state.read().market, instrument)
    }

    async fn expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, DataUnavailable> {
        let state = self.state.read();
        Self::check_available(&state.market, "expirations", symbol)?;
        let entries = state
            .market
            .chains
            .get(symbol)
            .ok_or_else(|| DataUnavailable::new("expirations", "no listed options").for_subject(symbol))?;
        let unique: BTreeSet<NaiveDate> = entries.iter().map(|e| e.expiry).collect();
        Ok(unique.into_iter().collect())
    }

    async fn option_chain(&self, symbol: &str, expiry: NaiveDate) -> Result<OptionsChain, DataUnavailable> {
        let state = self.state.read();
        Self::check_available(&state.market, "option chain", symbol)?;
        let entries: Vec<ChainEntry> = state
            .market
            .chains
            .get(symbol)
            .map(|all| all.iter().filter(|e| e.expiry == expiry).cloned().collect())
            .unwrap_or_default();
        if entries.is_empty() {
            return Err(DataUnavailable::new("option chain", format!("nothing listed for {expiry}"))
                .for_subject(symbol));
        }
        Ok(OptionsChain {
            underlying: symbol.to_string(),
            expiry,
            entries,
        })
    }

    async fn option_greeks(&self, contract: &OptionsContract) -> Result<OptionGreeks, DataUnavailable> {
        let state = self.state.read();
        Self::check_available(&state.market, "greeks", &contract.symbol)?;
        Self::chain_entry(&state.market, contract)
            .and_then(|e| e.delta)
            .map(|delta| OptionGreeks {
                delta,
                ..OptionGreeks::default()
            })
            .ok_or_else(|| {
                DataUnavailable::new("greeks", "no delta published").for_subject(contract.display_name())
            })
    }

    async fn historical_closes(&self, symbol: &str, sessions: usize) -> Result<Vec<Decimal>, DataUnavailable> {
        let state = self.state.read();
        Self::check_available(&state.market, "price history", symbol)?;
        let closes = state
            .market
            .history
            .get(symbol)
            .ok_or_else(|| DataUnavailable::new("price history", "no history").for_subject(symbol))?;
        let start = closes.len().saturating_sub(sessions);
        Ok(closes[start..].to_vec())
    }

    async fn next_earnings_date(&self, symbol: &str) -> Result<Option<NaiveDate>, DataUnavailable> {
        let state = self.state.read();
        Self::check_available(&state.market, "earnings calendar", symbol)?;
        Ok(state.market.earnings.get(symbol).copied())
    }

    async fn symbol_profile(&self, symbol: &str) -> Result<SymbolProfile, DataUnavailable> {
        let state = self.state.read();
        Self::check_available(&state.market, "profile", symbol)?;
        state
            .market
            .profiles
            .get(symbol)
            .cloned()
            .ok_or_else(|| DataUnavailable::new("profile", "unknown symbol").for_subject(symbol))
    }
}

#[async_trait]
impl BrokerageGateway for PaperGateway {
    async fn positions(&self) -> Result<Vec<Position>, DataUnavailable> {
        let state = self.state.read();
        Self::check_available(&state.market, "positions", "ACCOUNT")?;
        Self::check_available(&state.market, "positions", "POSITIONS")?;
        Ok(state.market.positions.clone())
    }

    async fn account_summary(&self) -> Result<AccountSummary, DataUnavailable> {
        let state = self.state.read();
        Self::check_available(&state.market, "account summary", "ACCOUNT")?;
        Self::check_available(&state.market, "account summary", "ACCOUNT_SUMMARY")?;
        Ok(state.market.account.clone())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderHandle, BrokerError> {
        let mut state = self.state.write();
        if let Some(reason) = &state.market.reject_orders {
            return Err(BrokerError::Rejected(reason.clone()));
        }
        if order.quantity == 0 {
            return Err(BrokerError::Rejected("quantity must be positive".to_string()));
        }
        let book = Self::book_for(&state.market, &order.instrument)?;

        state.next_order_id += 1;
        let order_id = format!("PAPER-{}", state.next_order_id);

        let status = if Self::would_fill(state.market.fill_mode, order, book) {
            let commission = match order.instrument {
                Instrument::Option(_) => OPTION_COMMISSION * Decimal::from(order.quantity),
                Instrument::Stock { .. } => Decimal::ZERO,
            };
            let fill = Fill {
                order_id: order_id.clone(),
                instrument: order.instrument.clone(),
                side: order.side,
                quantity: order.quantity,
                price: order.limit_price,
                commission,
                filled_at: Utc::now(),
            };
            Self::apply_fill(&mut state.market, &fill);
            info!(
                order_id = fill.order_id,
                instrument = %fill.instrument.display_name(),
                side = %fill.side,
                price = %fill.price,
                quantity = fill.quantity,
                "Paper fill simulated"
            );
            OrderStatus::Filled {
                avg_price: fill.price,
                commission,
            }
        } else {
            OrderStatus::Working
        };

        state.orders.insert(
            order_id.clone(),
            PaperOrder {
                request: order.clone(),
                status,
            },
        );
        state.order_log.push(order_id.clone());
        Ok(OrderHandle { order_id })
    }

    async fn order_status(&self, handle: &OrderHandle) -> Result<OrderStatus, BrokerError> {
        self.state
            .read()
            .orders
            .get(&handle.order_id)
            .map(|o| o.status.clone())
            .ok_or_else(|| BrokerError::UnknownOrder(handle.order_id.clone()))
    }

    async fn cancel_order(&self, handle: &OrderHandle) -> Result<(), BrokerError> {
        let mut state = self.state.write();
        let order = state
            .orders
            .get_mut(&handle.order_id)
            .ok_or_else(|| BrokerError::UnknownOrder(handle.order_id.clone()))?;
        if order.status == OrderStatus::Working {
            order.status = OrderStatus::Cancelled;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OptionRight;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 11, 20).unwrap()
    }

    fn market() -> PaperMarket {
        let mut m = PaperMarket::default();
        m.quotes.insert("AAPL".into(), dec!(100));
        m.account = AccountSummary {
            net_liquidation: dec!(100000),
            total_cash: dec!(50000),
        };
        m.chains.insert(
            "AAPL".into(),
            vec![ChainEntry {
                expiry: expiry(),
                right: OptionRight::Put,
                strike: dec!(95),
                bid: dec!(2.00),
                ask: dec!(2.20),
                last_price: dec!(2.10),
                implied_vol: 0.32,
                delta: Some(-0.28),
                volume: 1200,
                open_interest: 5000,
            }],
        );
        m
    }

    fn sell_put(limit: Decimal) -> OrderRequest {
        OrderRequest {
            instrument: Instrument::Option(OptionsContract::new("AAPL", expiry(), dec!(95), OptionRight::Put)),
            side: OrderSide::Sell,
            quantity: 1,
            limit_price: limit,
        }
    }

    #[tokio::test]
    async fn sell_above_mid_rests_then_cancels() {
        let gw = PaperGateway::new(market());
        let handle = gw.place_order(&sell_put(dec!(2.20))).await.unwrap();
        assert_eq!(gw.order_status(&handle).await.unwrap(), OrderStatus::Working);
        gw.cancel_order(&handle).await.unwrap();
        assert_eq!(gw.order_status(&handle).await.unwrap(), OrderStatus::Cancelled);
        assert!(gw.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sell_at_mid_opens_short_put_and_credits_cash() {
        let gw = PaperGateway::new(market());
        let handle = gw.place_order(&sell_put(dec!(2.10))).await.unwrap();
        assert!(matches!(gw.order_status(&handle).await.unwrap(), OrderStatus::Filled { .. }));

        let positions = gw.positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].kind, InstrumentKind::ShortPut);
        assert_eq!(positions[0].quantity, -1);

        let cash = gw.account_summary().await.unwrap().total_cash;
        assert_eq!(cash, dec!(50000) + dec!(210) - dec!(0.65));
    }

    #[tokio::test]
    async fn buying_back_removes_position() {
        let gw = PaperGateway::new(market());
        gw.update(|m| m.fill_mode = FillMode::Immediate);
        gw.place_order(&sell_put(dec!(2.10))).await.unwrap();
        let mut close = sell_put(dec!(2.00));
        close.side = OrderSide::Buy;
        gw.place_order(&close).await.unwrap();
        assert!(gw.positions().await.unwrap().is_empty());
        assert_eq!(gw.submitted_orders().len(), 2);
    }

    #[tokio::test]
    async fn unavailable_symbol_fails_every_data_call() {
        let gw = PaperGateway::new(market());
        gw.update(|m| {
            m.unavailable.insert("AAPL".into());
        });
        assert!(gw.quote("AAPL").await.is_err());
        assert!(gw.expirations("AAPL").await.is_err());
        assert!(gw.next_earnings_date("AAPL").await.is_err());
    }

    #[tokio::test]
    async fn account_summary_can_fail_alone() {
        let gw = PaperGateway::new(market());
        gw.update(|m| {
            m.unavailable.insert("ACCOUNT_SUMMARY".into());
        });
        assert!(gw.account_summary().await.is_err());
        assert!(gw.positions().await.is_ok());

        gw.update(|m| {
            m.unavailable.clear();
            m.unavailable.insert("ACCOUNT".into());
        });
        assert!(gw.account_summary().await.is_err());
        assert!(gw.positions().await.is_err());
    }

    #[tokio::test]
    async fn rejection_is_reported() {
        let gw = PaperGateway::new(market());
        gw.update(|m| m.reject_orders = Some("margin".into()));
        let err = gw.place_order(&sell_put(dec!(2.10))).await.unwrap_err();
        assert_eq!(err, BrokerError::Rejected("margin".into()));
    }

    #[tokio::test]
    async fn missing_earnings_means_none_scheduled() {
        let gw = PaperGateway::new(market());
        assert_eq!(gw.next_earnings_date("AAPL").await.unwrap(), None);
    }
}
