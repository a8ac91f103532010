use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Action, OrderAmount, Side, TradeIntent};

/// Quantities below this are treated as zero
const QUANTITY_EPSILON: f64 = 1e-9;
/// Smallest order notional worth sending
const MIN_TRADE_NOTIONAL: f64 = 1e-6;

/// Per-run risk limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_position_percentage: f64,
    pub max_trade_percentage: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub max_drawdown_limit: f64,
    pub max_trades_per_day: u32,
    /// Seconds
    pub min_trade_interval: u64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_percentage: 0.20, // 20% of equity in one symbol
            max_trade_percentage: 0.05,    // 5% of equity per order
            stop_loss_pct: 0.03,           // -3% from entry
            take_profit_pct: 0.06,         // +6% from entry
            max_drawdown_limit: 0.20,      // -20% from peak
            max_trades_per_day: 10,
            min_trade_interval: 300,
        }
    }
}

impl RiskLimits {
    /// No sizing caps, no cadence limits, exits effectively disabled
    pub fn unrestricted() -> Self {
        Self {
            max_position_percentage: 1.0,
            max_trade_percentage: 1.0,
            stop_loss_pct: 1.0,
            take_profit_pct: f64::INFINITY,
            max_drawdown_limit: 1.0,
            max_trades_per_day: u32::MAX,
            min_trade_interval: 0,
        }
    }
}

/// Account state the gate decides on, for a single symbol
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountSnapshot {
    pub cash: f64,
    pub position_quantity: f64,
    pub entry_price: f64,
    pub price: f64,
    pub peak_equity: f64,
}

impl AccountSnapshot {
    pub fn position_value(&self) -> f64 {
        self.position_quantity * self.price
    }

    pub fn equity(&self) -> f64 {
        self.cash + self.position_value()
    }

    pub fn has_position(&self) -> bool {
        self.position_quantity > QUANTITY_EPSILON
    }

    pub fn unrealized_pnl_pct(&self) -> f64 {
        if !self.has_position() || self.entry_price <= 0.0 {
            return 0.0;
        }
        (self.price - self.entry_price) / self.entry_price
    }

    pub fn drawdown(&self) -> f64 {
        if self.peak_equity <= 0.0 {
            return 0.0;
        }
        ((self.peak_equity - self.equity()) / self.peak_equity).max(0.0)
    }
}

/// Fills already made, as seen by the cadence rules
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TradeActivity {
    pub trades_today: u32,
    pub last_trade_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VetoReason {
    DailyTradeLimit { count: u32, limit: u32 },
    MinTradeInterval { elapsed_secs: i64, required_secs: u64 },
    DrawdownLimit { drawdown: f64 },
    PositionLimit,
    NothingToSell,
}

impl fmt::Display for VetoReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VetoReason::DailyTradeLimit { count, limit } => {
                write!(f, "daily trade limit reached ({}/{})", count, limit)
            }
            VetoReason::MinTradeInterval {
                elapsed_secs,
                required_secs,
            } => write!(
                f,
                "last trade {}s ago (min interval {}s)",
                elapsed_secs, required_secs
            ),
            VetoReason::DrawdownLimit { drawdown } => {
                write!(f, "drawdown {:.1}% over limit, exits only", drawdown * 100.0)
            }
            VetoReason::PositionLimit => f.write_str("position already at size limit"),
            VetoReason::NothingToSell => f.write_str("no position to sell"),
        }
    }
}

/// An order the gate allows, already sized
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeOrder {
    pub side: Side,
    pub amount: OrderAmount,
    /// True when sizing rules cut the requested amount
    pub resized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskDecision {
    Hold,
    Allow(TradeOrder),
    ForceExit { reason: ExitReason, quantity: f64 },
    Veto(VetoReason),
}

impl RiskDecision {
    /// Side and amount to send, if any
    pub fn order(&self) -> Option<(Side, OrderAmount)> {
        match self {
            RiskDecision::Allow(order) => Some((order.side, order.amount)),
            RiskDecision::ForceExit { quantity, .. } => {
                Some((Side::Sell, OrderAmount::Base(*quantity)))
            }
            RiskDecision::Hold | RiskDecision::Veto(_) => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            RiskDecision::Hold => "hold".to_string(),
            RiskDecision::Allow(order) => format!("{}", order.side),
            RiskDecision::ForceExit { reason, .. } => format!("exit ({:?})", reason),
            RiskDecision::Veto(reason) => format!("veto ({})", reason),
        }
    }
}

/// Stateless gate between policy and execution
///
/// Holds only the limits. Everything else is passed in, so the same
/// instance serves training, backtests and live trading.
#[derive(Debug, Clone)]
pub struct RiskManager {
    limits: RiskLimits,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Decide what may actually be traded for `action`
    ///
    /// Stop-loss and take-profit exits come first and ignore the cadence
    /// rules. Then: daily trade count, minimum interval, drawdown lock for
    /// entries, and finally sizing.
    pub fn gate(
        &self,
        action: &Action,
        account: &AccountSnapshot,
        activity: &TradeActivity,
        now: DateTime<Utc>,
    ) -> RiskDecision {
        if let Some(reason) = self.exit_trigger(account) {
            return RiskDecision::ForceExit {
                reason,
                quantity: account.position_quantity,
            };
        }

        let intent = Self::resolve(action.intent(), account);
        if intent == TradeIntent::Hold {
            return RiskDecision::Hold;
        }

        if activity.trades_today >= self.limits.max_trades_per_day {
            return RiskDecision::Veto(VetoReason::DailyTradeLimit {
                count: activity.trades_today,
                limit: self.limits.max_trades_per_day,
            });
        }

        if let Some(last) = activity.last_trade_at {
            let elapsed_secs = (now - last).num_seconds();
            if elapsed_secs < self.limits.min_trade_interval as i64 {
                return RiskDecision::Veto(VetoReason::MinTradeInterval {
                    elapsed_secs,
                    required_secs: self.limits.min_trade_interval,
                });
            }
        }

        match intent {
            TradeIntent::Hold | TradeIntent::Target { .. } => RiskDecision::Hold,
            TradeIntent::Buy { cash_fraction } => self.size_buy(cash_fraction, account),
            TradeIntent::Sell { position_fraction } => {
                self.size_sell(position_fraction, account)
            }
        }
    }

    /// Turn a target position into the buy or sell that reaches it
    fn resolve(intent: TradeIntent, account: &AccountSnapshot) -> TradeIntent {
        let TradeIntent::Target { exposure } = intent else {
            return intent;
        };

        let gap = exposure * account.equity() - account.position_value();
        if gap.abs() < MIN_TRADE_NOTIONAL {
            TradeIntent::Hold
        } else if gap > 0.0 {
            if account.cash <= 0.0 {
                return TradeIntent::Hold;
            }
            TradeIntent::Buy {
                cash_fraction: (gap / account.cash).min(1.0),
            }
        } else {
            TradeIntent::Sell {
                position_fraction: (-gap / account.position_value()).min(1.0),
            }
        }
    }

    fn exit_trigger(&self, account: &AccountSnapshot) -> Option<ExitReason> {
        if !account.has_position() {
            return None;
        }

        let pnl_pct = account.unrealized_pnl_pct();
        if pnl_pct <= -self.limits.stop_loss_pct {
            Some(ExitReason::StopLoss)
        } else if pnl_pct >= self.limits.take_profit_pct {
            Some(ExitReason::TakeProfit)
        } else {
            None
        }
    }

    fn size_buy(&self, cash_fraction: f64, account: &AccountSnapshot) -> RiskDecision {
        let drawdown = account.drawdown();
        if drawdown >= self.limits.max_drawdown_limit {
            return RiskDecision::Veto(VetoReason::DrawdownLimit { drawdown });
        }

        let equity = account.equity();
        let requested = cash_fraction.clamp(0.0, 1.0) * account.cash;
        let position_room =
            (self.limits.max_position_percentage * equity - account.position_value()).max(0.0);
        let trade_cap = self.limits.max_trade_percentage * equity;

        let notional = requested
            .min(position_room)
            .min(trade_cap)
            .min(account.cash)
            .max(0.0);

        if notional < MIN_TRADE_NOTIONAL {
            return RiskDecision::Veto(VetoReason::PositionLimit);
        }

        RiskDecision::Allow(TradeOrder {
            side: Side::Buy,
            amount: OrderAmount::Quote(notional),
            resized: notional + QUANTITY_EPSILON < requested,
        })
    }

    fn size_sell(&self, position_fraction: f64, account: &AccountSnapshot) -> RiskDecision {
        if !account.has_position() {
            return RiskDecision::Veto(VetoReason::NothingToSell);
        }

        let requested = position_fraction.clamp(0.0, 1.0) * account.position_quantity;
        let trade_cap = if account.price > 0.0 {
            self.limits.max_trade_percentage * account.equity() / account.price
        } else {
            requested
        };
        let quantity = requested.min(trade_cap).min(account.position_quantity);

        if quantity * account.price < MIN_TRADE_NOTIONAL {
            return RiskDecision::Veto(VetoReason::NothingToSell);
        }

        RiskDecision::Allow(TradeOrder {
            side: Side::Sell,
            amount: OrderAmount::Base(quantity),
            resized: quantity + QUANTITY_EPSILON < requested,
        })
    }
}
