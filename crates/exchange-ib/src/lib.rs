//! Brokerage and market data gateways for the wheel engine.
//!
//! Defines the collaborator traits the engine talks to, the broker-side
//! types that cross them, and an in-memory paper gateway implementing both.

pub mod broker;
pub mod market_data;
pub mod options_chain;
pub mod paper;
pub mod types;

pub use broker::BrokerageGateway;
pub use market_data::{MarketDataGateway, SymbolProfile, ValuationRatios};
pub use options_chain::{ChainEntry, OptionsChain};
pub use paper::{FillMode, PaperGateway, PaperMarket};
pub use types::{
    AccountSummary, Fill, Instrument, InstrumentKind, OptionGreeks, OptionRight, OptionsContract,
    OrderHandle, OrderRequest, OrderSide, OrderStatus, Position, TopOfBook,
};
