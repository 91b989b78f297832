//! Brokerage gateway: positions, balances and order routing.

use async_trait::async_trait;
use rust_decimal::Decimal;

use wheel_core::{BrokerError, DataUnavailable};

use crate::types::{AccountSummary, OrderHandle, OrderRequest, OrderStatus, Position};

#[async_trait]
pub trait BrokerageGateway: Send + Sync {
    async fn positions(&self) -> Result<Vec<Position>, DataUnavailable>;

    async fn account_summary(&self) -> Result<AccountSummary, DataUnavailable>;

    /// Net liquidation value.
    async fn account_value(&self) -> Result<Decimal, DataUnavailable> {
        Ok(self.account_summary().await?.net_liquidation)
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderHandle, BrokerError>;

    async fn order_status(&self, handle: &OrderHandle) -> Result<OrderStatus, BrokerError>;

    async fn cancel_order(&self, handle: &OrderHandle) -> Result<(), BrokerError>;
}
