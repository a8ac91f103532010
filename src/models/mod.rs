use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// OHLCV candlestick
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Candle interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn as_secs(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Bars per year on a 24/7 market, used to annualize Sharpe/Sortino
    pub fn periods_per_year(&self) -> f64 {
        (365.0 * 86_400.0) / self.as_secs() as f64
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(format!("unsupported timeframe '{}'", other)),
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(value: Timeframe) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

/// The canonical enumerated action set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DiscreteAction {
    #[serde(rename = "buy_100pct")]
    Buy100 = 0,
    #[serde(rename = "buy_50pct")]
    Buy50 = 1,
    #[serde(rename = "buy_25pct")]
    Buy25 = 2,
    Hold = 3,
    #[serde(rename = "sell_25pct")]
    Sell25 = 4,
    #[serde(rename = "sell_50pct")]
    Sell50 = 5,
    #[serde(rename = "sell_100pct")]
    Sell100 = 6,
}

impl DiscreteAction {
    pub const COUNT: usize = 7;

    pub fn all() -> [DiscreteAction; Self::COUNT] {
        [
            DiscreteAction::Buy100,
            DiscreteAction::Buy50,
            DiscreteAction::Buy25,
            DiscreteAction::Hold,
            DiscreteAction::Sell25,
            DiscreteAction::Sell50,
            DiscreteAction::Sell100,
        ]
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::all().get(index).copied()
    }

    pub fn to_index(self) -> usize {
        self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            DiscreteAction::Buy100 => "buy_100pct",
            DiscreteAction::Buy50 => "buy_50pct",
            DiscreteAction::Buy25 => "buy_25pct",
            DiscreteAction::Hold => "hold",
            DiscreteAction::Sell25 => "sell_25pct",
            DiscreteAction::Sell50 => "sell_50pct",
            DiscreteAction::Sell100 => "sell_100pct",
        }
    }

    pub fn intent(&self) -> TradeIntent {
        match self {
            DiscreteAction::Buy100 => TradeIntent::Buy { cash_fraction: 1.0 },
            DiscreteAction::Buy50 => TradeIntent::Buy { cash_fraction: 0.5 },
            DiscreteAction::Buy25 => TradeIntent::Buy { cash_fraction: 0.25 },
            DiscreteAction::Hold => TradeIntent::Hold,
            DiscreteAction::Sell25 => TradeIntent::Sell { position_fraction: 0.25 },
            DiscreteAction::Sell50 => TradeIntent::Sell { position_fraction: 0.5 },
            DiscreteAction::Sell100 => TradeIntent::Sell { position_fraction: 1.0 },
        }
    }
}

/// An action chosen by a policy
///
/// `Continuous(x)` with x in [-1, 1] is a target position: hold `x` of
/// equity in the asset. The account is long-only, so `x <= 0` means flat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Action {
    Discrete(DiscreteAction),
    Continuous(f64),
}

impl Action {
    pub const HOLD: Action = Action::Discrete(DiscreteAction::Hold);

    pub fn intent(&self) -> TradeIntent {
        match self {
            Action::Discrete(action) => action.intent(),
            Action::Continuous(value) => TradeIntent::Target {
                exposure: value.clamp(0.0, 1.0),
            },
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Discrete(action) => f.write_str(action.name()),
            Action::Continuous(value) => write!(f, "continuous({:+.3})", value),
        }
    }
}

/// What an action asks the account to do, independent of its encoding
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TradeIntent {
    Hold,
    Buy { cash_fraction: f64 },
    Sell { position_fraction: f64 },
    /// Rebalance until the position is `exposure` of equity
    Target { exposure: f64 },
}

/// The set of actions a policy chooses from
///
/// The continuous variant is exposed to value-based agents as `steps` evenly
/// spaced points over `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionSpace {
    #[default]
    Discrete,
    Continuous { min: f64, max: f64, steps: usize },
}

impl ActionSpace {
    pub fn size(&self) -> usize {
        match self {
            ActionSpace::Discrete => DiscreteAction::COUNT,
            ActionSpace::Continuous { steps, .. } => (*steps).max(2),
        }
    }

    pub fn action_at(&self, index: usize) -> Option<Action> {
        match self {
            ActionSpace::Discrete => DiscreteAction::from_index(index).map(Action::Discrete),
            ActionSpace::Continuous { min, max, .. } => {
                let size = self.size();
                if index >= size {
                    return None;
                }
                let step = (max - min) / (size - 1) as f64;
                Some(Action::Continuous(min + step * index as f64))
            }
        }
    }

    /// Index of an action within this space (nearest point for continuous)
    pub fn index_of(&self, action: &Action) -> Option<usize> {
        match (self, action) {
            (ActionSpace::Discrete, Action::Discrete(a)) => Some(a.to_index()),
            (ActionSpace::Continuous { min, max, .. }, Action::Continuous(value)) => {
                let size = self.size();
                let step = (max - min) / (size - 1) as f64;
                if step <= 0.0 {
                    return Some(0);
                }
                let index = ((value.clamp(*min, *max) - min) / step).round() as usize;
                Some(index.min(size - 1))
            }
            _ => None,
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Action {
        let index = rng.gen_range(0..self.size());
        // index is always in range
        self.action_at(index).unwrap_or(Action::HOLD)
    }

    /// Leave the account as it is
    ///
    /// Continuous points are targets, so no point on the grid means "hold".
    pub fn hold(&self) -> Action {
        Action::HOLD
    }
}

/// Open holding in a symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    /// Volume-weighted average fill price, excluding fees
    pub entry_price: f64,
    pub opened_at: DateTime<Utc>,
    /// Buy-side commission not yet attributed to a closed trade
    pub entry_fees: f64,
}

impl Position {
    pub fn cost_basis(&self) -> f64 {
        self.quantity * self.entry_price
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity
    }

    pub fn unrealized_pnl_pct(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (price - self.entry_price) / self.entry_price
    }
}

/// Closed (or partially closed) round trip. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    pub id: Uuid,
    pub symbol: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    /// Net of entry and exit commission
    pub profit: f64,
    pub fees: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl Trade {
    pub fn return_pct(&self) -> f64 {
        let basis = self.entry_price * self.quantity;
        if basis <= 0.0 {
            return 0.0;
        }
        self.profit / basis
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "price", rename_all = "lowercase")]
pub enum OrderPrice {
    Market,
    Limit(f64),
}

/// Buys are sized in quote currency (fee included), sells in base quantity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OrderAmount {
    Quote(f64),
    Base(f64),
}

/// What the runner wants executed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderIntent {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub amount: OrderAmount,
    pub price: OrderPrice,
}

impl OrderIntent {
    pub fn market(symbol: &str, side: Side, amount: OrderAmount) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            amount,
            price: OrderPrice::Market,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Rejected | OrderStatus::Cancelled
        )
    }
}

/// Exchange order and its fill state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub amount: OrderAmount,
    pub price: OrderPrice,
    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub avg_fill_price: f64,
    pub fee: f64,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn has_fill(&self) -> bool {
        self.filled_quantity > 0.0
    }

    pub fn filled_notional(&self) -> f64 {
        self.filled_quantity * self.avg_fill_price
    }
}
