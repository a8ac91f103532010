use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::ExecutionError;
use crate::models::{Order, Position, Side, Trade};
use crate::risk::{AccountSnapshot, TradeActivity};

/// Quantities below this are dust and close the position
const DUST: f64 = 1e-9;

/// A confirmed execution against the account
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub fee: f64,
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    /// The executed part of an order, if any
    pub fn from_order(order: &Order) -> Option<Self> {
        if !order.has_fill() {
            return None;
        }
        Some(Self {
            side: order.side,
            quantity: order.filled_quantity,
            price: order.avg_fill_price,
            fee: order.fee,
            timestamp: order.updated_at,
        })
    }
}

/// Position as reported by an exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub quantity: f64,
    pub entry_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionView {
    pub symbol: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub market_price: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
}

/// Point-in-time view of the account, for status reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cash: f64,
    pub positions: Vec<PositionView>,
    pub total_value: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_fees: f64,
}

/// Cash, open positions and the closed-trade ledger of one bot instance
#[derive(Debug, Clone)]
pub struct Portfolio {
    initial_balance: f64,
    cash_balance: f64,
    positions: HashMap<String, Position>,
    marks: HashMap<String, f64>,
    realized_pnl: f64,
    total_fees: f64,
    peak_equity: f64,
    trades: Vec<Trade>,
    fill_times: Vec<DateTime<Utc>>,
}

impl Portfolio {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            initial_balance,
            cash_balance: initial_balance,
            positions: HashMap::new(),
            marks: HashMap::new(),
            realized_pnl: 0.0,
            total_fees: 0.0,
            peak_equity: initial_balance,
            trades: Vec::new(),
            fill_times: Vec::new(),
        }
    }

    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    pub fn cash_balance(&self) -> f64 {
        self.cash_balance
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn total_fees(&self) -> f64 {
        self.total_fees
    }

    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Closed round trips, oldest first
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    fn mark(&self, position: &Position) -> f64 {
        self.marks
            .get(&position.symbol)
            .copied()
            .unwrap_or(position.entry_price)
    }

    /// Record the latest price for a symbol and update the equity peak
    pub fn mark_to_market(&mut self, symbol: &str, price: f64) {
        self.marks.insert(symbol.to_string(), price);
        let equity = self.equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.positions
            .values()
            .map(|p| p.unrealized_pnl(self.mark(p)))
            .sum()
    }

    pub fn equity(&self) -> f64 {
        self.cash_balance
            + self
                .positions
                .values()
                .map(|p| p.market_value(self.mark(p)))
                .sum::<f64>()
    }

    /// Cash plus open positions at cost
    pub fn cost_basis_equity(&self) -> f64 {
        self.cash_balance + self.positions.values().map(Position::cost_basis).sum::<f64>()
    }

    /// Apply a confirmed fill; returns the trade it closed, if any
    pub fn apply_fill(
        &mut self,
        symbol: &str,
        fill: &Fill,
    ) -> Result<Option<Trade>, ExecutionError> {
        if fill.quantity <= 0.0 || fill.price <= 0.0 {
            return Err(ExecutionError::Rejected(format!(
                "invalid fill {} @ {}",
                fill.quantity, fill.price
            )));
        }

        let trade = match fill.side {
            Side::Buy => {
                self.apply_buy(symbol, fill)?;
                None
            }
            Side::Sell => Some(self.apply_sell(symbol, fill)?),
        };

        self.total_fees += fill.fee;
        self.record_fill_time(fill.timestamp);
        self.mark_to_market(symbol, fill.price);

        Ok(trade)
    }

    fn apply_buy(&mut self, symbol: &str, fill: &Fill) -> Result<(), ExecutionError> {
        let cost = fill.quantity * fill.price + fill.fee;
        let tolerance = 1e-9 * self.cash_balance.max(1.0);
        if cost > self.cash_balance + tolerance {
            return Err(ExecutionError::InsufficientFunds(format!(
                "need {:.2}, have {:.2}",
                cost, self.cash_balance
            )));
        }
        self.cash_balance = (self.cash_balance - cost).max(0.0);

        match self.positions.get_mut(symbol) {
            Some(position) => {
                let total_cost = position.cost_basis() + fill.quantity * fill.price;
                position.quantity += fill.quantity;
                position.entry_price = total_cost / position.quantity;
                position.entry_fees += fill.fee;
            }
            None => {
                self.positions.insert(
                    symbol.to_string(),
                    Position {
                        symbol: symbol.to_string(),
                        quantity: fill.quantity,
                        entry_price: fill.price,
                        opened_at: fill.timestamp,
                        entry_fees: fill.fee,
                    },
                );
            }
        }

        tracing::debug!(
            "Bought {:.6} {} @ {:.4} (fee {:.4})",
            fill.quantity,
            symbol,
            fill.price,
            fill.fee
        );
        Ok(())
    }

    fn apply_sell(&mut self, symbol: &str, fill: &Fill) -> Result<Trade, ExecutionError> {
        let position = self.positions.get_mut(symbol).ok_or_else(|| {
            ExecutionError::Rejected(format!("no open position in {}", symbol))
        })?;

        if fill.quantity > position.quantity * (1.0 + 1e-9) + DUST {
            return Err(ExecutionError::Rejected(format!(
                "sell {:.6} exceeds position {:.6}",
                fill.quantity, position.quantity
            )));
        }

        let quantity = fill.quantity.min(position.quantity);
        let share = quantity / position.quantity;
        let entry_fee = position.entry_fees * share;
        let profit = (fill.price - position.entry_price) * quantity - entry_fee - fill.fee;

        let trade = Trade {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            entry_price: position.entry_price,
            exit_price: fill.price,
            quantity,
            profit,
            fees: entry_fee + fill.fee,
            opened_at: position.opened_at,
            closed_at: fill.timestamp,
        };

        position.quantity -= quantity;
        position.entry_fees -= entry_fee;
        if position.quantity <= DUST {
            self.positions.remove(symbol);
        }

        self.cash_balance += quantity * fill.price - fill.fee;
        self.realized_pnl += profit;
        self.trades.push(trade.clone());

        tracing::debug!(
            "Sold {:.6} {} @ {:.4}, P&L {:+.2}",
            quantity,
            symbol,
            fill.price,
            profit
        );
        Ok(trade)
    }

    /// Only fills from the newest fill's UTC day matter to the daily limit
    fn record_fill_time(&mut self, at: DateTime<Utc>) {
        self.fill_times.push(at);
        if let Some(latest) = self.fill_times.iter().max().map(|t| t.date_naive()) {
            self.fill_times.retain(|t| t.date_naive() >= latest);
        }
    }

    /// Fill count on the UTC day of `now` and the most recent fill time
    pub fn activity(&self, now: DateTime<Utc>) -> TradeActivity {
        let today = now.date_naive();
        TradeActivity {
            trades_today: self
                .fill_times
                .iter()
                .filter(|t| t.date_naive() == today)
                .count() as u32,
            last_trade_at: self.fill_times.iter().max().copied(),
        }
    }

    /// Risk-gate view of one symbol at `price`
    pub fn account_snapshot(&self, symbol: &str, price: f64) -> AccountSnapshot {
        let (position_quantity, entry_price) = self
            .positions
            .get(symbol)
            .map(|p| (p.quantity, p.entry_price))
            .unwrap_or((0.0, 0.0));

        AccountSnapshot {
            cash: self.cash_balance,
            position_quantity,
            entry_price,
            price,
            peak_equity: self.peak_equity,
        }
    }

    /// Take the current equity as the starting balance and drawdown peak
    pub fn rebase(&mut self) {
        let equity = self.equity();
        self.initial_balance = equity;
        self.peak_equity = equity;
    }

    /// Overwrite local state with what the exchange reports
    ///
    /// Returns a description of every divergence that was corrected.
    pub fn reconcile(
        &mut self,
        cash: f64,
        reported: &[ExchangePosition],
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut divergences = Vec::new();

        if (self.cash_balance - cash).abs() > 1e-6 {
            divergences.push(format!("cash {:.2} -> {:.2}", self.cash_balance, cash));
        }
        self.cash_balance = cash.max(0.0);

        let reported_symbols: Vec<&str> = reported
            .iter()
            .filter(|p| p.quantity > DUST)
            .map(|p| p.symbol.as_str())
            .collect();

        let stale: Vec<String> = self
            .positions
            .keys()
            .filter(|symbol| !reported_symbols.contains(&symbol.as_str()))
            .cloned()
            .collect();
        for symbol in stale {
            divergences.push(format!("{} position dropped (not held on exchange)", symbol));
            self.positions.remove(&symbol);
        }

        for remote in reported.iter().filter(|p| p.quantity > DUST) {
            let mark = self.marks.get(&remote.symbol).copied();
            match self.positions.get_mut(&remote.symbol) {
                Some(local) => {
                    if (local.quantity - remote.quantity).abs() > DUST {
                        divergences.push(format!(
                            "{} quantity {:.6} -> {:.6}",
                            remote.symbol, local.quantity, remote.quantity
                        ));
                        local.entry_fees *= remote.quantity / local.quantity;
                        local.quantity = remote.quantity;
                    }
                    if let Some(entry) = remote.entry_price {
                        local.entry_price = entry;
                    }
                }
                None => {
                    let entry_price = remote.entry_price.or(mark).unwrap_or(0.0);
                    divergences.push(format!(
                        "{} position {:.6} adopted from exchange",
                        remote.symbol, remote.quantity
                    ));
                    self.positions.insert(
                        remote.symbol.clone(),
                        Position {
                            symbol: remote.symbol.clone(),
                            quantity: remote.quantity,
                            entry_price,
                            opened_at: now,
                            entry_fees: 0.0,
                        },
                    );
                }
            }
        }

        let equity = self.equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }

        divergences
    }

    pub fn snapshot(&self, timestamp: DateTime<Utc>) -> PortfolioSnapshot {
        let mut positions: Vec<PositionView> = self
            .positions
            .values()
            .map(|p| {
                let market_price = self.mark(p);
                PositionView {
                    symbol: p.symbol.clone(),
                    quantity: p.quantity,
                    entry_price: p.entry_price,
                    market_price,
                    market_value: p.market_value(market_price),
                    unrealized_pnl: p.unrealized_pnl(market_price),
                }
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        PortfolioSnapshot {
            timestamp,
            cash: self.cash_balance,
            positions,
            total_value: self.equity(),
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl(),
            total_fees: self.total_fees,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    const SYMBOL: &str = "BTC/USDT";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap()
    }

    fn buy(quantity: f64, price: f64, fee: f64, at: DateTime<Utc>) -> Fill {
        Fill {
            side: Side::Buy,
            quantity,
            price,
            fee,
            timestamp: at,
        }
    }

    fn sell(quantity: f64, price: f64, fee: f64, at: DateTime<Utc>) -> Fill {
        Fill {
            side: Side::Sell,
            quantity,
            price,
            fee,
            timestamp: at,
        }
    }

    #[test]
    fn test_buy_reduces_cash_and_opens_position() {
        let mut portfolio = Portfolio::new(10_000.0);
        portfolio
            .apply_fill(SYMBOL, &buy(9.99, 1_000.0, 10.0, t0()))
            .unwrap();

        assert!(portfolio.cash_balance().abs() < 1e-9);
        let position = portfolio.position(SYMBOL).unwrap();
        assert_eq!(position.quantity, 9.99);
        assert_eq!(position.entry_price, 1_000.0);

        // cost basis plus cash equals initial minus fees
        assert!((portfolio.cost_basis_equity() - (10_000.0 - 10.0)).abs() < 1e-9);
    }

    #[test]
    fn test_buy_more_than_cash_rejected() {
        let mut portfolio = Portfolio::new(100.0);
        let result = portfolio.apply_fill(SYMBOL, &buy(1.0, 100.0, 0.1, t0()));
        assert!(matches!(result, Err(ExecutionError::InsufficientFunds(_))));
        assert_eq!(portfolio.cash_balance(), 100.0);
    }

    #[test]
    fn test_accumulation_averages_entry() {
        let mut portfolio = Portfolio::new(10_000.0);
        portfolio.apply_fill(SYMBOL, &buy(1.0, 100.0, 0.0, t0())).unwrap();
        portfolio
            .apply_fill(SYMBOL, &buy(1.0, 200.0, 0.0, t0() + Duration::hours(1)))
            .unwrap();

        let position = portfolio.position(SYMBOL).unwrap();
        assert_eq!(position.quantity, 2.0);
        assert_eq!(position.entry_price, 150.0);
        assert_eq!(position.opened_at, t0());
    }

    #[test]
    fn test_round_trip_records_trade() {
        let mut portfolio = Portfolio::new(1_000.0);
        portfolio.apply_fill(SYMBOL, &buy(10.0, 99.9, 0.1, t0())).unwrap();
        let trade = portfolio
            .apply_fill(SYMBOL, &sell(10.0, 110.0, 1.1, t0() + Duration::hours(5)))
            .unwrap()
            .unwrap();

        assert!((trade.profit - (101.0 - 0.1 - 1.1)).abs() < 1e-9);
        assert!((trade.fees - 1.2).abs() < 1e-12);
        assert_eq!(trade.opened_at, t0());
        assert!(portfolio.position(SYMBOL).is_none());
        assert_eq!(portfolio.trades().len(), 1);
        assert!((portfolio.cash_balance() - (1_000.0 + trade.profit)).abs() < 1e-9);
        assert!((portfolio.realized_pnl() - trade.profit).abs() < 1e-12);
    }

    #[test]
    fn test_partial_sell_splits_entry_fees() {
        let mut portfolio = Portfolio::new(1_000.0);
        portfolio.apply_fill(SYMBOL, &buy(4.0, 100.0, 4.0, t0())).unwrap();
        let trade = portfolio
            .apply_fill(SYMBOL, &sell(1.0, 100.0, 0.0, t0()))
            .unwrap()
            .unwrap();

        assert!((trade.profit + 1.0).abs() < 1e-12);
        assert!((portfolio.position(SYMBOL).unwrap().entry_fees - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_sell_more_than_held_rejected() {
        let mut portfolio = Portfolio::new(1_000.0);
        portfolio.apply_fill(SYMBOL, &buy(1.0, 100.0, 0.0, t0())).unwrap();
        let result = portfolio.apply_fill(SYMBOL, &sell(2.0, 100.0, 0.0, t0()));
        assert!(matches!(result, Err(ExecutionError::Rejected(_))));
    }

    #[test]
    fn test_mark_to_market_tracks_peak() {
        let mut portfolio = Portfolio::new(1_000.0);
        portfolio.apply_fill(SYMBOL, &buy(5.0, 100.0, 0.0, t0())).unwrap();
        portfolio.mark_to_market(SYMBOL, 120.0);
        portfolio.mark_to_market(SYMBOL, 90.0);

        assert_eq!(portfolio.peak_equity(), 1_100.0);
        assert_eq!(portfolio.equity(), 950.0);
        assert_eq!(portfolio.unrealized_pnl(), -50.0);

        let snapshot = portfolio.account_snapshot(SYMBOL, 90.0);
        assert!((snapshot.drawdown() - 150.0 / 1_100.0).abs() < 1e-12);
    }

    #[test]
    fn test_activity_counts_todays_fills() {
        let mut portfolio = Portfolio::new(10_000.0);
        let yesterday = t0() - Duration::days(1);
        portfolio.apply_fill(SYMBOL, &buy(1.0, 100.0, 0.0, yesterday)).unwrap();
        portfolio.apply_fill(SYMBOL, &buy(1.0, 100.0, 0.0, t0())).unwrap();
        portfolio
            .apply_fill(SYMBOL, &sell(1.0, 100.0, 0.0, t0() + Duration::minutes(30)))
            .unwrap();

        let activity = portfolio.activity(t0() + Duration::hours(1));
        assert_eq!(activity.trades_today, 2);
        assert_eq!(activity.last_trade_at, Some(t0() + Duration::minutes(30)));
    }

    #[test]
    fn test_fill_history_keeps_only_latest_day() {
        let mut portfolio = Portfolio::new(10_000.0);
        let earlier = t0() - Duration::days(2);
        portfolio.apply_fill(SYMBOL, &buy(1.0, 100.0, 0.0, earlier)).unwrap();
        assert_eq!(portfolio.activity(earlier).trades_today, 1);

        portfolio.apply_fill(SYMBOL, &buy(1.0, 100.0, 0.0, t0())).unwrap();
        assert_eq!(portfolio.fill_times.len(), 1);
        assert_eq!(portfolio.activity(earlier).trades_today, 0);

        let tomorrow = portfolio.activity(t0() + Duration::days(1));
        assert_eq!(tomorrow.trades_today, 0);
        assert_eq!(tomorrow.last_trade_at, Some(t0()));
    }

    #[test]
    fn test_rebase_resets_drawdown_baseline() {
        let mut portfolio = Portfolio::new(10_000.0);
        portfolio.reconcile(5_000.0, &[], t0());
        assert_eq!(portfolio.peak_equity(), 10_000.0);
        assert!((portfolio.account_snapshot(SYMBOL, 100.0).drawdown() - 0.5).abs() < 1e-12);

        portfolio.rebase();
        assert_eq!(portfolio.initial_balance(), 5_000.0);
        assert_eq!(portfolio.peak_equity(), 5_000.0);
        assert_eq!(portfolio.account_snapshot(SYMBOL, 100.0).drawdown(), 0.0);
    }

    #[test]
    fn test_reconcile_defers_to_exchange() {
        let mut portfolio = Portfolio::new(1_000.0);
        portfolio.apply_fill(SYMBOL, &buy(2.0, 100.0, 0.0, t0())).unwrap();
        portfolio.apply_fill("ETH/USDT", &buy(1.0, 50.0, 0.0, t0())).unwrap();

        let divergences = portfolio.reconcile(
            900.0,
            &[
                ExchangePosition {
                    symbol: SYMBOL.to_string(),
                    quantity: 1.5,
                    entry_price: None,
                },
                ExchangePosition {
                    symbol: "SOL/USDT".to_string(),
                    quantity: 3.0,
                    entry_price: Some(20.0),
                },
            ],
            t0(),
        );

        assert_eq!(portfolio.cash_balance(), 900.0);
        assert_eq!(portfolio.position(SYMBOL).unwrap().quantity, 1.5);
        assert_eq!(portfolio.position(SYMBOL).unwrap().entry_price, 100.0);
        assert!(portfolio.position("ETH/USDT").is_none());
        assert_eq!(portfolio.position("SOL/USDT").unwrap().entry_price, 20.0);
        assert_eq!(divergences.len(), 4);
    }

    #[test]
    fn test_snapshot_totals() {
        let mut portfolio = Portfolio::new(1_000.0);
        portfolio.apply_fill(SYMBOL, &buy(2.0, 100.0, 0.2, t0())).unwrap();
        portfolio.mark_to_market(SYMBOL, 110.0);

        let snapshot = portfolio.snapshot(t0());
        assert_eq!(snapshot.positions.len(), 1);
        assert!((snapshot.total_value - (799.8 + 220.0)).abs() < 1e-9);
        assert!((snapshot.unrealized_pnl - 20.0).abs() < 1e-9);
        assert!((snapshot.total_fees - 0.2).abs() < 1e-12);
    }
}
