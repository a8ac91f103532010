use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ExecutionError;
use crate::models::{Order, OrderAmount, OrderIntent, OrderStatus, Side};

/// Fills every order immediately at the quoted price
///
/// Buys are quote-sized: the full notional leaves the account and the fee
/// comes out of it. Sells are base-sized and the fee comes out of proceeds.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    commission_fee: f64,
}

impl SimulatedExecutor {
    pub fn new(commission_fee: f64) -> Self {
        Self { commission_fee }
    }

    pub fn commission_fee(&self) -> f64 {
        self.commission_fee
    }

    pub fn submit(
        &self,
        intent: &OrderIntent,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Order, ExecutionError> {
        if !(price > 0.0 && price.is_finite()) {
            return Err(ExecutionError::Rejected(format!(
                "no valid price for {} ({})",
                intent.symbol, price
            )));
        }

        let (quantity, fee) = match (intent.side, intent.amount) {
            (Side::Buy, OrderAmount::Quote(notional)) => {
                let fee = notional * self.commission_fee;
                ((notional - fee) / price, fee)
            }
            (Side::Buy, OrderAmount::Base(quantity)) => {
                (quantity, quantity * price * self.commission_fee)
            }
            (Side::Sell, OrderAmount::Base(quantity)) => {
                (quantity, quantity * price * self.commission_fee)
            }
            (Side::Sell, OrderAmount::Quote(notional)) => {
                (notional / price, notional * self.commission_fee)
            }
        };

        if !(quantity > 0.0 && quantity.is_finite()) {
            return Err(ExecutionError::Rejected(format!(
                "order size {} is not tradable",
                quantity
            )));
        }

        Ok(Order {
            id: Uuid::new_v4().to_string(),
            client_order_id: intent.client_order_id.clone(),
            symbol: intent.symbol.clone(),
            side: intent.side,
            amount: intent.amount,
            price: intent.price,
            status: OrderStatus::Filled,
            filled_quantity: quantity,
            avg_fill_price: price,
            fee,
            updated_at: timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_buy_takes_fee_from_notional() {
        let executor = SimulatedExecutor::new(0.001);
        let intent = OrderIntent::market("BTC/USDT", Side::Buy, OrderAmount::Quote(10_000.0));
        let order = executor.submit(&intent, 100.0, Utc::now()).unwrap();

        assert_eq!(order.status, OrderStatus::Filled);
        assert!((order.fee - 10.0).abs() < 1e-12);
        assert!((order.filled_quantity - 99.9).abs() < 1e-9);
        assert!((order.filled_notional() + order.fee - 10_000.0).abs() < 1e-9);
        assert_eq!(order.client_order_id, intent.client_order_id);
    }

    #[test]
    fn test_base_sell_charges_on_proceeds() {
        let executor = SimulatedExecutor::new(0.002);
        let intent = OrderIntent::market("BTC/USDT", Side::Sell, OrderAmount::Base(2.0));
        let order = executor.submit(&intent, 50.0, Utc::now()).unwrap();

        assert_eq!(order.filled_quantity, 2.0);
        assert!((order.fee - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_bad_price() {
        let executor = SimulatedExecutor::new(0.001);
        let intent = OrderIntent::market("BTC/USDT", Side::Buy, OrderAmount::Quote(100.0));
        assert!(executor.submit(&intent, 0.0, Utc::now()).is_err());
        assert!(executor.submit(&intent, f64::NAN, Utc::now()).is_err());
    }
}
