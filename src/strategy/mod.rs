// Decision policies: the DQN agent and rule-based baselines
pub mod buy_and_hold;
pub mod rules;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::agent::DqnAgent;
use crate::features::State;
use crate::models::{Action, Candle};
use crate::Result;

pub use buy_and_hold::BuyAndHoldStrategy;
pub use rules::{
    BollingerParams, BollingerStrategy, EmaCrossoverParams, EmaCrossoverStrategy, MacdParams,
    MacdStrategy, RsiParams, RsiStrategy,
};

/// What a policy sees at decision time
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    /// History up to and including the decision candle
    pub candles: &'a [Candle],
    pub state: &'a State,
    pub position_quantity: f64,
}

impl DecisionContext<'_> {
    pub fn has_position(&self) -> bool {
        self.position_quantity > 1e-9
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }
}

/// Maps an observation to an action
pub trait Policy: Send {
    fn name(&self) -> &str;

    fn decide(&mut self, ctx: &DecisionContext<'_>) -> Action;

    /// Candles needed before the policy gives anything but hold
    fn min_candles_required(&self) -> usize {
        1
    }
}

impl Policy for DqnAgent {
    fn name(&self) -> &str {
        "DQN"
    }

    /// Greedy; exploration only happens inside training
    fn decide(&mut self, ctx: &DecisionContext<'_>) -> Action {
        self.greedy_action(ctx.state)
    }
}

/// Strategy selection, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    Dqn { checkpoint: PathBuf },
    Rsi(RsiParams),
    EmaCrossover(EmaCrossoverParams),
    Macd(MacdParams),
    Bollinger(BollingerParams),
    BuyAndHold,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::Dqn {
            checkpoint: PathBuf::from("models/best_model.json"),
        }
    }
}

impl StrategyConfig {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyConfig::Dqn { .. } => "dqn",
            StrategyConfig::Rsi(_) => "rsi",
            StrategyConfig::EmaCrossover(_) => "ema_crossover",
            StrategyConfig::Macd(_) => "macd",
            StrategyConfig::Bollinger(_) => "bollinger",
            StrategyConfig::BuyAndHold => "buy_and_hold",
        }
    }

    /// Instantiate the policy; DQN checkpoints must match `state_size`
    pub fn build(&self, state_size: usize) -> Result<Box<dyn Policy>> {
        let policy: Box<dyn Policy> = match self {
            StrategyConfig::Dqn { checkpoint } => {
                Box::new(DqnAgent::load_for(checkpoint, state_size)?)
            }
            StrategyConfig::Rsi(params) => Box::new(RsiStrategy::new(params.clone())),
            StrategyConfig::EmaCrossover(params) => {
                Box::new(EmaCrossoverStrategy::new(params.clone()))
            }
            StrategyConfig::Macd(params) => Box::new(MacdStrategy::new(params.clone())),
            StrategyConfig::Bollinger(params) => Box::new(BollingerStrategy::new(params.clone())),
            StrategyConfig::BuyAndHold => Box::new(BuyAndHoldStrategy::new()),
        };
        Ok(policy)
    }
}
