use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::error::ExecutionError;
use crate::execution::exchange::Exchange;
use crate::models::{Order, OrderIntent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Base delay, doubled after every failed attempt
    pub backoff_ms: u64,
    pub order_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
            order_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(1u64 << exponent))
    }
}

/// Drives an order to a terminal state on a real venue
pub struct LiveExecutor {
    exchange: Arc<dyn Exchange>,
    policy: RetryPolicy,
}

impl LiveExecutor {
    pub fn new(exchange: Arc<dyn Exchange>, policy: RetryPolicy) -> Self {
        Self { exchange, policy }
    }

    pub fn exchange(&self) -> &Arc<dyn Exchange> {
        &self.exchange
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Submit with retries and wait for a terminal order
    ///
    /// Only transient failures are retried. Before every retry the exchange
    /// is asked for the client order id, so an order whose acknowledgement
    /// was lost is never placed twice.
    pub async fn submit(&self, intent: &OrderIntent) -> Result<Order, ExecutionError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.try_submit(intent, attempt > 1).await {
                Ok(order) => return self.await_terminal(order).await,
                Err(e) if e.is_retryable() => {
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        let delay = self.policy.backoff(attempt);
                        warn!(
                            "Order {} attempt {}/{} failed: {}. Retrying in {:?}",
                            intent.client_order_id, attempt, max_attempts, e, delay
                        );
                        sleep(delay).await;
                    }
                }
                Err(e) => {
                    error!("Order {} failed: {}", intent.client_order_id, e);
                    return Err(e);
                }
            }
        }

        error!(
            "Order {} failed after {} attempts: {}",
            intent.client_order_id, max_attempts, last_error
        );
        Err(ExecutionError::RetriesExhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    async fn try_submit(
        &self,
        intent: &OrderIntent,
        check_existing: bool,
    ) -> Result<Order, ExecutionError> {
        if check_existing {
            if let Some(order) = self
                .exchange
                .get_order(&intent.symbol, &intent.client_order_id)
                .await?
            {
                info!(
                    "Order {} already known to {} ({:?}), not resubmitting",
                    intent.client_order_id,
                    self.exchange.name(),
                    order.status
                );
                return Ok(order);
            }
        }

        let order = self.exchange.place_order(intent).await?;
        debug!("Order submitted: {} ({})", order.client_order_id, order.id);
        Ok(order)
    }

    async fn await_terminal(&self, order: Order) -> Result<Order, ExecutionError> {
        if order.status.is_terminal() {
            return Ok(order);
        }

        let symbol = order.symbol.clone();
        let client_order_id = order.client_order_id.clone();

        match timeout(
            self.policy.order_timeout,
            self.wait_for_fill(&symbol, &client_order_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!("Order {} timed out, cancelling remainder", client_order_id);
                match self.exchange.cancel_order(&symbol, &client_order_id).await {
                    Ok(order) if order.status.is_terminal() => Ok(order),
                    Ok(_) | Err(_) => self.final_state(&symbol, &client_order_id).await,
                }
            }
        }
    }

    async fn wait_for_fill(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Order, ExecutionError> {
        loop {
            sleep(self.policy.poll_interval).await;
            match self.exchange.get_order(symbol, client_order_id).await {
                Ok(Some(order)) if order.status.is_terminal() => return Ok(order),
                Ok(Some(order)) => {
                    debug!(
                        "Order {} still {:?} ({:.6} filled)",
                        client_order_id, order.status, order.filled_quantity
                    );
                }
                Ok(None) => {
                    return Err(ExecutionError::UnknownState {
                        client_order_id: client_order_id.to_string(),
                    })
                }
                Err(e) if e.is_retryable() => {
                    warn!("Polling order {} failed: {}", client_order_id, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn final_state(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Order, ExecutionError> {
        match self.exchange.get_order(symbol, client_order_id).await {
            Ok(Some(order)) if order.status.is_terminal() => Ok(order),
            _ => Err(ExecutionError::UnknownState {
                client_order_id: client_order_id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::paper::PaperExchange;
    use crate::models::{OrderAmount, OrderStatus, Side};

    const SYMBOL: &str = "BTC/USDT";

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_ms: 1,
            order_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
        }
    }

    async fn paper() -> Arc<PaperExchange> {
        let exchange = Arc::new(PaperExchange::new(10_000.0, 0.001));
        exchange.set_price(SYMBOL, 100.0).await;
        exchange
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            backoff_ms: 100,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let exchange = paper().await;
        exchange
            .inject_failure(ExecutionError::Transient("503".into()))
            .await;
        exchange
            .inject_failure(ExecutionError::Transient("timeout".into()))
            .await;

        let executor = LiveExecutor::new(exchange.clone(), fast_policy());
        let intent = OrderIntent::market(SYMBOL, Side::Buy, OrderAmount::Quote(1_000.0));
        let order = executor.submit(&intent).await.unwrap();

        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(exchange.placed_count().await, 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let exchange = paper().await;
        for _ in 0..3 {
            exchange
                .inject_failure(ExecutionError::Transient("503".into()))
                .await;
        }

        let executor = LiveExecutor::new(exchange.clone(), fast_policy());
        let intent = OrderIntent::market(SYMBOL, Side::Buy, OrderAmount::Quote(1_000.0));
        let err = executor.submit(&intent).await.unwrap_err();

        assert!(matches!(
            err,
            ExecutionError::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(exchange.placed_count().await, 0);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let exchange = paper().await;
        let executor = LiveExecutor::new(exchange.clone(), fast_policy());
        let intent = OrderIntent::market(SYMBOL, Side::Buy, OrderAmount::Quote(50_000.0));

        let err = executor.submit(&intent).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InsufficientFunds(_)));
    }

    #[tokio::test]
    async fn test_lost_ack_is_not_placed_twice() {
        let exchange = paper().await;
        exchange.drop_next_ack().await;

        let executor = LiveExecutor::new(exchange.clone(), fast_policy());
        let intent = OrderIntent::market(SYMBOL, Side::Buy, OrderAmount::Quote(1_000.0));
        let order = executor.submit(&intent).await.unwrap();

        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(exchange.placed_count().await, 1);
        let balances = exchange.balances().await.unwrap();
        assert!((balances.cash - 9_000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_timeout_cancels_remainder() {
        let exchange = paper().await;
        exchange.set_partial_fill(Some(0.4)).await;

        let executor = LiveExecutor::new(exchange.clone(), fast_policy());
        let intent = OrderIntent::market(SYMBOL, Side::Buy, OrderAmount::Quote(1_000.0));
        let order = executor.submit(&intent).await.unwrap();

        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(order.has_fill());
        assert!((order.filled_quantity - 400.0 * 0.999 / 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_delayed_fill_is_polled() {
        let exchange = paper().await;
        exchange.set_fill_delay(2).await;

        let executor = LiveExecutor::new(exchange.clone(), fast_policy());
        let intent = OrderIntent::market(SYMBOL, Side::Sell, OrderAmount::Base(1.0));
        // no position to sell
        assert!(executor.submit(&intent).await.is_err());

        let buy = OrderIntent::market(SYMBOL, Side::Buy, OrderAmount::Quote(500.0));
        let order = executor.submit(&buy).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
    }
}
