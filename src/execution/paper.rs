use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::ExecutionError;
use crate::execution::exchange::{AccountBalances, Exchange};
use crate::execution::portfolio::ExchangePosition;
use crate::models::{Candle, Order, OrderAmount, OrderIntent, OrderStatus, Side, Timeframe};

#[derive(Debug, Default)]
struct PaperState {
    cash: f64,
    /// symbol -> (quantity, average entry)
    holdings: HashMap<String, (f64, f64)>,
    prices: HashMap<String, f64>,
    candles: HashMap<String, Vec<Candle>>,
    orders: HashMap<String, Order>,
    /// client order id -> polls left before the order reports filled
    pending: HashMap<String, u32>,
    failures: VecDeque<ExecutionError>,
    drop_next_ack: bool,
    reject_cancels: bool,
    fill_delay: u32,
    partial_fill: Option<f64>,
}

/// In-memory exchange for dry runs and tests
///
/// Market orders fill at the last price set for the symbol. Failures can be
/// injected to exercise retry and reconciliation paths.
pub struct PaperExchange {
    commission_fee: f64,
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(initial_cash: f64, commission_fee: f64) -> Self {
        Self {
            commission_fee,
            state: Mutex::new(PaperState {
                cash: initial_cash,
                ..PaperState::default()
            }),
        }
    }

    pub async fn set_price(&self, symbol: &str, price: f64) {
        self.state
            .lock()
            .await
            .prices
            .insert(symbol.to_string(), price);
    }

    /// Replace the candle history; the last close becomes the fill price
    pub async fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        let mut state = self.state.lock().await;
        if let Some(last) = candles.last() {
            state.prices.insert(symbol.to_string(), last.close);
        }
        state.candles.insert(symbol.to_string(), candles);
    }

    pub async fn push_candle(&self, symbol: &str, candle: Candle) {
        let mut state = self.state.lock().await;
        state.prices.insert(symbol.to_string(), candle.close);
        state
            .candles
            .entry(symbol.to_string())
            .or_default()
            .push(candle);
    }

    /// Fail the next `place_order` call with `error`
    pub async fn inject_failure(&self, error: ExecutionError) {
        self.state.lock().await.failures.push_back(error);
    }

    /// Accept the next order but report a transient failure to the caller
    pub async fn drop_next_ack(&self) {
        self.state.lock().await.drop_next_ack = true;
    }

    /// Make every cancel request fail until switched off
    pub async fn reject_cancels(&self, reject: bool) {
        self.state.lock().await.reject_cancels = reject;
    }

    /// New orders stay pending for this many status polls
    pub async fn set_fill_delay(&self, polls: u32) {
        self.state.lock().await.fill_delay = polls;
    }

    /// New orders fill only this fraction and rest until cancelled
    pub async fn set_partial_fill(&self, fraction: Option<f64>) {
        self.state.lock().await.partial_fill = fraction.map(|f| f.clamp(0.0, 1.0));
    }

    /// Move cash outside of any order, e.g. a deposit or external withdrawal
    pub async fn adjust_cash(&self, delta: f64) {
        let mut state = self.state.lock().await;
        state.cash = (state.cash + delta).max(0.0);
    }

    pub async fn placed_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    fn execute(
        &self,
        state: &mut PaperState,
        intent: &OrderIntent,
    ) -> Result<Order, ExecutionError> {
        let price = *state
            .prices
            .get(&intent.symbol)
            .ok_or_else(|| ExecutionError::InvalidSymbol(intent.symbol.clone()))?;
        let fraction = state.partial_fill.unwrap_or(1.0);

        let (quantity, fee) = match (intent.side, intent.amount) {
            (Side::Buy, amount) => {
                let notional = match amount {
                    OrderAmount::Quote(notional) => notional,
                    OrderAmount::Base(quantity) => quantity * price * (1.0 + self.commission_fee),
                };
                if notional > state.cash + 1e-9 {
                    return Err(ExecutionError::InsufficientFunds(format!(
                        "need {:.2}, have {:.2}",
                        notional, state.cash
                    )));
                }
                let spent = notional * fraction;
                let fee = spent * self.commission_fee;
                let quantity = (spent - fee) / price;

                state.cash -= spent;
                let holding = state.holdings.entry(intent.symbol.clone()).or_insert((0.0, 0.0));
                let total = holding.0 + quantity;
                if total > 0.0 {
                    holding.1 = (holding.0 * holding.1 + quantity * price) / total;
                }
                holding.0 = total;
                (quantity, fee)
            }
            (Side::Sell, amount) => {
                let requested = match amount {
                    OrderAmount::Base(quantity) => quantity,
                    OrderAmount::Quote(notional) => notional / price,
                };
                let held = state
                    .holdings
                    .get(&intent.symbol)
                    .map(|h| h.0)
                    .unwrap_or(0.0);
                if requested > held + 1e-9 {
                    return Err(ExecutionError::InsufficientFunds(format!(
                        "sell {:.6} {} but hold {:.6}",
                        requested, intent.symbol, held
                    )));
                }
                let quantity = (requested * fraction).min(held);
                let fee = quantity * price * self.commission_fee;

                state.cash += quantity * price - fee;
                if let Some(holding) = state.holdings.get_mut(&intent.symbol) {
                    holding.0 -= quantity;
                    if holding.0 <= 1e-12 {
                        state.holdings.remove(&intent.symbol);
                    }
                }
                (quantity, fee)
            }
        };

        let status = if fraction < 1.0 {
            OrderStatus::PartiallyFilled
        } else if state.fill_delay > 0 {
            state
                .pending
                .insert(intent.client_order_id.clone(), state.fill_delay);
            OrderStatus::Pending
        } else {
            OrderStatus::Filled
        };

        Ok(Order {
            id: Uuid::new_v4().to_string(),
            client_order_id: intent.client_order_id.clone(),
            symbol: intent.symbol.clone(),
            side: intent.side,
            amount: intent.amount,
            price: intent.price,
            status,
            filled_quantity: quantity,
            avg_fill_price: price,
            fee,
            updated_at: Utc::now(),
        })
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    async fn place_order(&self, intent: &OrderIntent) -> Result<Order, ExecutionError> {
        let mut state = self.state.lock().await;

        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        if let Some(existing) = state.orders.get(&intent.client_order_id) {
            return Ok(existing.clone());
        }

        let order = self.execute(&mut state, intent)?;
        state
            .orders
            .insert(order.client_order_id.clone(), order.clone());

        if state.drop_next_ack {
            state.drop_next_ack = false;
            return Err(ExecutionError::Transient(
                "connection reset before acknowledgement".to_string(),
            ));
        }

        Ok(order)
    }

    async fn get_order(
        &self,
        _symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<Order>, ExecutionError> {
        let mut state = self.state.lock().await;

        let ready = match state.pending.get_mut(client_order_id) {
            Some(polls) => {
                *polls = polls.saturating_sub(1);
                *polls == 0
            }
            None => false,
        };
        if ready {
            state.pending.remove(client_order_id);
            if let Some(order) = state.orders.get_mut(client_order_id) {
                order.status = OrderStatus::Filled;
                order.updated_at = Utc::now();
            }
        }

        Ok(state.orders.get(client_order_id).cloned())
    }

    async fn cancel_order(
        &self,
        _symbol: &str,
        client_order_id: &str,
    ) -> Result<Order, ExecutionError> {
        let mut state = self.state.lock().await;
        if state.reject_cancels {
            return Err(ExecutionError::Transient(
                "cancel endpoint unavailable".to_string(),
            ));
        }
        state.pending.remove(client_order_id);

        let order = state
            .orders
            .get_mut(client_order_id)
            .ok_or_else(|| ExecutionError::Rejected(format!("unknown order {}", client_order_id)))?;
        if !order.status.is_terminal() {
            order.status = OrderStatus::Cancelled;
            order.updated_at = Utc::now();
        }
        Ok(order.clone())
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<Order>, ExecutionError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.symbol == symbol && !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn balances(&self) -> Result<AccountBalances, ExecutionError> {
        let state = self.state.lock().await;
        let mut positions: Vec<ExchangePosition> = state
            .holdings
            .iter()
            .map(|(symbol, (quantity, entry))| ExchangePosition {
                symbol: symbol.clone(),
                quantity: *quantity,
                entry_price: Some(*entry),
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        Ok(AccountBalances {
            cash: state.cash,
            positions,
        })
    }

    async fn recent_candles(
        &self,
        symbol: &str,
        _timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExecutionError> {
        let state = self.state.lock().await;
        let candles = state
            .candles
            .get(symbol)
            .ok_or_else(|| ExecutionError::InvalidSymbol(symbol.to_string()))?;
        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYMBOL: &str = "ETH/USDT";

    #[tokio::test]
    async fn test_round_trip_updates_balances() {
        let exchange = PaperExchange::new(1_000.0, 0.0);
        exchange.set_price(SYMBOL, 50.0).await;

        let buy = OrderIntent::market(SYMBOL, Side::Buy, OrderAmount::Quote(500.0));
        let order = exchange.place_order(&buy).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, 10.0);

        exchange.set_price(SYMBOL, 60.0).await;
        let sell = OrderIntent::market(SYMBOL, Side::Sell, OrderAmount::Base(10.0));
        exchange.place_order(&sell).await.unwrap();

        let balances = exchange.balances().await.unwrap();
        assert_eq!(balances.cash, 1_100.0);
        assert!(balances.positions.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_client_id_returns_existing() {
        let exchange = PaperExchange::new(1_000.0, 0.0);
        exchange.set_price(SYMBOL, 10.0).await;

        let intent = OrderIntent::market(SYMBOL, Side::Buy, OrderAmount::Quote(100.0));
        let first = exchange.place_order(&intent).await.unwrap();
        let second = exchange.place_order(&intent).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(exchange.balances().await.unwrap().cash, 900.0);
    }

    #[tokio::test]
    async fn test_unknown_symbol() {
        let exchange = PaperExchange::new(1_000.0, 0.0);
        let intent = OrderIntent::market("NOPE", Side::Buy, OrderAmount::Quote(100.0));
        assert!(matches!(
            exchange.place_order(&intent).await,
            Err(ExecutionError::InvalidSymbol(_))
        ));
        assert!(exchange
            .get_order("NOPE", &intent.client_order_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_pending_order_fills_after_polls() {
        let exchange = PaperExchange::new(1_000.0, 0.0);
        exchange.set_price(SYMBOL, 10.0).await;
        exchange.set_fill_delay(2).await;

        let intent = OrderIntent::market(SYMBOL, Side::Buy, OrderAmount::Quote(100.0));
        let order = exchange.place_order(&intent).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(exchange.open_orders(SYMBOL).await.unwrap().len(), 1);

        let cid = &intent.client_order_id;
        let first = exchange.get_order(SYMBOL, cid).await.unwrap().unwrap();
        assert_eq!(first.status, OrderStatus::Pending);
        let second = exchange.get_order(SYMBOL, cid).await.unwrap().unwrap();
        assert_eq!(second.status, OrderStatus::Filled);
        assert!(exchange.open_orders(SYMBOL).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_candles_returns_tail() {
        use crate::data::{MarketScenario, SyntheticDataGenerator};

        let candles = SyntheticDataGenerator::new(1).generate(MarketScenario::Sideways, 30, 3600);
        let exchange = PaperExchange::new(1_000.0, 0.0);
        exchange.set_candles(SYMBOL, candles.clone()).await;

        let tail = exchange
            .recent_candles(SYMBOL, Timeframe::H1, 10)
            .await
            .unwrap();
        assert_eq!(tail.len(), 10);
        assert_eq!(tail[9], candles[29]);
    }

    #[test]
    fn test_partial_fill_rests_until_cancelled() {
        let exchange = PaperExchange::new(1_000.0, 0.0);
        tokio_test::block_on(async {
            exchange.set_price(SYMBOL, 10.0).await;
            exchange.set_partial_fill(Some(0.4)).await;

            let intent = OrderIntent::market(SYMBOL, Side::Buy, OrderAmount::Quote(500.0));
            let order = exchange.place_order(&intent).await.unwrap();
            assert_eq!(order.status, OrderStatus::PartiallyFilled);
            assert!((order.filled_quantity - 20.0).abs() < 1e-9);

            let cancelled = exchange
                .cancel_order(SYMBOL, &intent.client_order_id)
                .await
                .unwrap();
            assert_eq!(cancelled.status, OrderStatus::Cancelled);
            assert!((exchange.balances().await.unwrap().cash - 800.0).abs() < 1e-9);
        });
    }
}
