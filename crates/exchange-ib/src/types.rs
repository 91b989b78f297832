//! Broker-side types: contracts, positions, orders.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Options contract right (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionRight {
    Call,
    Put,
}

impl std::fmt::Display for OptionRight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "C"),
            Self::Put => write!(f, "P"),
        }
    }
}

/// An options contract specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionsContract {
    pub symbol: String,
    pub expiry: NaiveDate,
    pub strike: Decimal,
    pub right: OptionRight,
    /// Exchange routing (e.g., "SMART", "CBOE").
    pub exchange: String,
    /// Contract multiplier (100 for standard US equity options).
    pub multiplier: Decimal,
}

impl OptionsContract {
    /// Create a new standard US equity options contract.
    pub fn new(symbol: &str, expiry: NaiveDate, strike: Decimal, right: OptionRight) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            expiry,
            strike,
            right,
            exchange: "SMART".to_string(),
            multiplier: Decimal::from(100),
        }
    }

    /// Human-readable contract description (e.g., "NVDA 140C 2026-03-20").
    pub fn display_name(&self) -> String {
        format!("{} {}{} {}", self.symbol, self.strike.normalize(), self.right, self.expiry)
    }
}

/// Anything an order can be placed for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Instrument {
    Stock { symbol: String },
    Option(OptionsContract),
}

impl Instrument {
    pub fn stock(symbol: &str) -> Self {
        Self::Stock {
            symbol: symbol.to_uppercase(),
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Self::Stock { symbol } => symbol,
            Self::Option(contract) => &contract.symbol,
        }
    }

    /// Units per quantity: 1 for shares, the contract multiplier for options.
    pub fn multiplier(&self) -> Decimal {
        match self {
            Self::Stock { .. } => Decimal::ONE,
            Self::Option(contract) => contract.multiplier,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Self::Stock { symbol } => symbol.clone(),
            Self::Option(contract) => contract.display_name(),
        }
    }
}

/// Option greeks snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionGreeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
}

/// Best bid and offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopOfBook {
    pub bid: Decimal,
    pub ask: Decimal,
}

impl TopOfBook {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

/// What a position holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Equity,
    ShortPut,
    ShortCall,
    LongPut,
    LongCall,
}

impl InstrumentKind {
    pub fn is_option(self) -> bool {
        !matches!(self, Self::Equity)
    }

    pub fn is_short_option(self) -> bool {
        matches!(self, Self::ShortPut | Self::ShortCall)
    }

    pub fn right(self) -> Option<OptionRight> {
        match self {
            Self::Equity => None,
            Self::ShortPut | Self::LongPut => Some(OptionRight::Put),
            Self::ShortCall | Self::LongCall => Some(OptionRight::Call),
        }
    }

    /// Kind of an option position given its right and signed quantity.
    pub fn for_option(right: OptionRight, quantity: i64) -> Self {
        match (right, quantity < 0) {
            (OptionRight::Put, true) => Self::ShortPut,
            (OptionRight::Put, false) => Self::LongPut,
            (OptionRight::Call, true) => Self::ShortCall,
            (OptionRight::Call, false) => Self::LongCall,
        }
    }
}

/// A broker position snapshot.
///
/// `avg_cost` is per unit as the broker reports it (per share for stock,
/// per contract including the multiplier for options), so
/// `avg_cost * |quantity|` is the cost basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub kind: InstrumentKind,
    #[serde(default)]
    pub strike: Option<Decimal>,
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    /// Signed: negative for short positions.
    pub quantity: i64,
    pub avg_cost: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
}

impl Position {
    /// The option contract this position holds, if it is an option.
    pub fn contract(&self) -> Option<OptionsContract> {
        let right = self.kind.right()?;
        Some(OptionsContract::new(&self.symbol, self.expiry?, self.strike?, right))
    }

    pub fn instrument(&self) -> Option<Instrument> {
        if self.kind.is_option() {
            self.contract().map(Instrument::Option)
        } else {
            Some(Instrument::stock(&self.symbol))
        }
    }

    pub fn days_to_expiry(&self, today: NaiveDate) -> Option<i64> {
        self.expiry.map(|expiry| (expiry - today).num_days())
    }

    pub fn cost_basis(&self) -> Decimal {
        (self.avg_cost * Decimal::from(self.quantity)).abs()
    }

    /// Unrealized P&L as a fraction of cost basis.
    pub fn pnl_ratio(&self) -> Decimal {
        let basis = self.cost_basis();
        if basis.is_zero() {
            return Decimal::ZERO;
        }
        self.unrealized_pnl / basis
    }

    /// Short-put notional at assignment: strike x 100 x contracts.
    pub fn assignment_notional(&self) -> Decimal {
        match (self.kind, self.strike) {
            (InstrumentKind::ShortPut, Some(strike)) => {
                strike * Decimal::from(100) * Decimal::from(self.quantity.unsigned_abs())
            }
            _ => Decimal::ZERO,
        }
    }

    pub fn label(&self) -> String {
        match self.contract() {
            Some(contract) => contract.display_name(),
            None => format!("{} x{}", self.symbol, self.quantity),
        }
    }
}

/// Account balances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub net_liquidation: Decimal,
    pub total_cash: Decimal,
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Signed quantity delta of a fill on this side.
    pub fn sign(self) -> i64 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// A limit order to place via the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument: Instrument,
    pub side: OrderSide,
    pub quantity: u32,
    pub limit_price: Decimal,
}

/// Broker-assigned identifier of a submitted order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderHandle {
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderStatus {
    Working,
    Filled { avg_price: Decimal, commission: Decimal },
    Cancelled,
}

/// A confirmed fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub instrument: Instrument,
    pub side: OrderSide,
    pub quantity: u32,
    pub price: Decimal,
    pub commission: Decimal,
    pub filled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn short_put(qty: i64, avg_cost: Decimal, pnl: Decimal) -> Position {
        Position {
            symbol: "AAPL".to_string(),
            kind: InstrumentKind::ShortPut,
            strike: Some(dec!(150)),
            expiry: NaiveDate::from_ymd_opt(2026, 11, 20),
            quantity: qty,
            avg_cost,
            market_value: dec!(0),
            unrealized_pnl: pnl,
        }
    }

    #[test]
    fn pnl_ratio_uses_absolute_cost_basis() {
        let pos = short_put(-2, dec!(250), dec!(400));
        assert_eq!(pos.cost_basis(), dec!(500));
        assert_eq!(pos.pnl_ratio(), dec!(0.8));
    }

    #[test]
    fn pnl_ratio_zero_basis_is_zero() {
        let pos = short_put(-1, dec!(0), dec!(50));
        assert_eq!(pos.pnl_ratio(), Decimal::ZERO);
    }

    #[test]
    fn contract_round_trips_position_fields() {
        let pos = short_put(-1, dec!(200), dec!(0));
        let contract = pos.contract().unwrap();
        assert_eq!(contract.right, OptionRight::Put);
        assert_eq!(contract.display_name(), "AAPL 150P 2026-11-20");
    }

    #[test]
    fn assignment_notional_only_for_short_puts() {
        assert_eq!(short_put(-3, dec!(200), dec!(0)).assignment_notional(), dec!(45000));
        let mut call = short_put(-1, dec!(200), dec!(0));
        call.kind = InstrumentKind::ShortCall;
        assert_eq!(call.assignment_notional(), Decimal::ZERO);
    }

    #[test]
    fn kind_from_signed_quantity() {
        assert_eq!(InstrumentKind::for_option(OptionRight::Put, -1), InstrumentKind::ShortPut);
        assert_eq!(InstrumentKind::for_option(OptionRight::Call, 2), InstrumentKind::LongCall);
    }
}
