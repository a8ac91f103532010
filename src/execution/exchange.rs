use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;
use crate::execution::portfolio::ExchangePosition;
use crate::models::{Candle, Order, OrderIntent, Timeframe};

/// Free quote balance and held positions as the exchange sees them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalances {
    pub cash: f64,
    pub positions: Vec<ExchangePosition>,
}

/// Boundary to a trading venue
///
/// Orders are addressed by the caller's `client_order_id`, so a request can
/// be looked up after a lost acknowledgement.
#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &str;

    async fn place_order(&self, intent: &OrderIntent) -> Result<Order, ExecutionError>;

    /// `None` when the exchange has never seen this client order id
    async fn get_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<Order>, ExecutionError>;

    /// Cancel whatever is left of an order and return its final state
    async fn cancel_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Order, ExecutionError>;

    async fn open_orders(&self, symbol: &str) -> Result<Vec<Order>, ExecutionError>;

    async fn balances(&self) -> Result<AccountBalances, ExecutionError>;

    /// Most recent `limit` closed candles, oldest first
    async fn recent_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExecutionError>;
}
