//! Episodic market simulator
//!
//! Each step fills the risk-gated action at the current candle's close,
//! advances one candle and marks the portfolio to the new close. The reward
//! is computed from that mark-to-market equity change.

pub mod reward;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TradingError;
use crate::execution::{Fill, Portfolio, SimulatedExecutor};
use crate::features::{AccountContext, FeatureMatrix, FeaturePipeline, State};
use crate::models::{Action, Candle, OrderIntent, Trade};
use crate::risk::{RiskDecision, RiskLimits, RiskManager};
use crate::Result;

pub use reward::{RewardFunction, RewardTracker};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvConfig {
    pub symbol: String,
    pub initial_balance: f64,
    pub commission_fee: f64,
    /// Steps per episode; unbounded when `None`
    pub max_episode_length: Option<usize>,
    pub reward: RewardFunction,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC/USDT".to_string(),
            initial_balance: 10_000.0,
            commission_fee: 0.001,
            max_episode_length: None,
            reward: RewardFunction::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Ready,
    InEpisode,
    Terminated,
}

/// Diagnostics for one step
#[derive(Debug, Clone)]
pub struct StepInfo {
    pub timestamp: DateTime<Utc>,
    /// Close the action was filled at
    pub price: f64,
    pub equity: f64,
    pub decision: RiskDecision,
    pub fill: Option<Fill>,
    pub trade: Option<Trade>,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub state: State,
    pub reward: f64,
    pub done: bool,
    pub info: StepInfo,
}

/// Holds every piece of mutable episode state
pub struct MarketEnvironment {
    config: EnvConfig,
    matrix: FeatureMatrix,
    risk: RiskManager,
    executor: SimulatedExecutor,
    portfolio: Portfolio,
    reward: RewardTracker,
    status: EpisodeStatus,
    /// Index the first decision of every episode is made on
    start: usize,
    cursor: usize,
    steps: usize,
    equity_curve: Vec<(DateTime<Utc>, f64)>,
}

impl MarketEnvironment {
    /// Needs at least one candle past the first full lookback window
    pub fn new(
        candles: &[Candle],
        pipeline: &FeaturePipeline,
        config: EnvConfig,
        limits: RiskLimits,
    ) -> Result<Self> {
        let needed = pipeline.lookback_window() + 1;
        if candles.len() < needed {
            return Err(TradingError::InsufficientHistory {
                needed,
                got: candles.len(),
            });
        }

        let matrix = pipeline.build_matrix(candles);
        Ok(Self {
            executor: SimulatedExecutor::new(config.commission_fee),
            portfolio: Portfolio::new(config.initial_balance),
            reward: RewardTracker::new(config.reward),
            risk: RiskManager::new(limits),
            start: matrix.first_index(),
            cursor: matrix.first_index(),
            matrix,
            config,
            status: EpisodeStatus::Ready,
            steps: 0,
            equity_curve: Vec::new(),
        })
    }

    /// Begin episodes at `index` instead of the first full window
    ///
    /// Indicators still see every candle before `index`, so a held-out tail
    /// is scored on the same features a continuous run would produce.
    pub fn starting_at(mut self, index: usize) -> Result<Self> {
        let start = index.max(self.matrix.first_index());
        if start + 1 >= self.matrix.len() {
            return Err(TradingError::InsufficientHistory {
                needed: start + 2,
                got: self.matrix.len(),
            });
        }
        self.start = start;
        self.cursor = start;
        Ok(self)
    }

    pub fn start_index(&self) -> usize {
        self.start
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn status(&self) -> EpisodeStatus {
        self.status
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn trades(&self) -> &[Trade] {
        self.portfolio.trades()
    }

    pub fn equity_curve(&self) -> &[(DateTime<Utc>, f64)] {
        &self.equity_curve
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn candles(&self) -> &[Candle] {
        self.matrix.candles()
    }

    /// Candle the next action will be filled on
    pub fn current_candle(&self) -> &Candle {
        &self.matrix.candles()[self.cursor]
    }

    /// Candles up to and including the current one
    pub fn history(&self) -> &[Candle] {
        &self.matrix.candles()[..=self.cursor]
    }

    pub fn position_quantity(&self) -> f64 {
        self.portfolio
            .position(&self.config.symbol)
            .map(|p| p.quantity)
            .unwrap_or(0.0)
    }

    /// Steps available from a fresh reset
    pub fn max_steps(&self) -> usize {
        let available = self.matrix.len() - 1 - self.start;
        match self.config.max_episode_length {
            Some(limit) => available.min(limit),
            None => available,
        }
    }

    fn account_context(&self) -> AccountContext {
        let symbol = &self.config.symbol;
        let position_value = self
            .portfolio
            .position(symbol)
            .map(|p| p.market_value(self.current_candle().close))
            .unwrap_or(0.0);
        AccountContext::from_values(
            self.portfolio.cash_balance(),
            position_value,
            self.portfolio.unrealized_pnl(),
        )
    }

    /// Start a new episode from the start index
    pub fn reset(&mut self) -> Result<State> {
        self.portfolio = Portfolio::new(self.config.initial_balance);
        self.reward.reset();
        self.cursor = self.start;
        self.steps = 0;
        self.status = EpisodeStatus::InEpisode;

        let candle = *self.current_candle();
        self.portfolio.mark_to_market(&self.config.symbol, candle.close);
        self.equity_curve.clear();
        self.equity_curve
            .push((candle.open_time, self.portfolio.equity()));

        tracing::debug!(
            "Episode reset at {} ({} steps available)",
            candle.open_time,
            self.max_steps()
        );
        self.matrix.state_at(self.cursor, AccountContext::flat())
    }

    pub fn step(&mut self, action: &Action) -> Result<StepOutcome> {
        match self.status {
            EpisodeStatus::Ready => return Err(TradingError::EpisodeNotStarted),
            EpisodeStatus::Terminated => return Err(TradingError::EpisodeEnded),
            EpisodeStatus::InEpisode => {}
        }

        let symbol = self.config.symbol.clone();
        let candle = *self.current_candle();
        let price = candle.close;
        let now = candle.open_time;
        let equity_before = self.portfolio.equity();

        let account = self.portfolio.account_snapshot(&symbol, price);
        let activity = self.portfolio.activity(now);
        let decision = self.risk.gate(action, &account, &activity, now);

        let mut fill = None;
        let mut trade = None;
        if let Some((side, amount)) = decision.order() {
            let intent = OrderIntent::market(&symbol, side, amount);
            let order = self.executor.submit(&intent, price, now)?;
            if let Some(executed) = Fill::from_order(&order) {
                trade = self.portfolio.apply_fill(&symbol, &executed)?;
                fill = Some(executed);
            }
        }

        self.cursor += 1;
        self.steps += 1;
        let next = *self.current_candle();
        self.portfolio.mark_to_market(&symbol, next.close);
        let equity = self.portfolio.equity();
        self.equity_curve.push((next.open_time, equity));

        let step_return = if equity_before > 0.0 {
            (equity - equity_before) / equity_before
        } else {
            0.0
        };
        let reward = self.reward.reward(step_return, fill.is_some());

        let exhausted = self.cursor + 1 >= self.matrix.len();
        let truncated = self
            .config
            .max_episode_length
            .is_some_and(|limit| self.steps >= limit);
        let bankrupt = equity <= 0.0;
        let done = exhausted || truncated || bankrupt;
        if done {
            self.status = EpisodeStatus::Terminated;
            tracing::debug!(
                "Episode ended after {} steps, equity {:.2}{}",
                self.steps,
                equity,
                if bankrupt { " (bankrupt)" } else { "" }
            );
        }

        let state = self.matrix.state_at(self.cursor, self.account_context())?;
        Ok(StepOutcome {
            state,
            reward,
            done,
            info: StepInfo {
                timestamp: now,
                price,
                equity,
                decision,
                fill,
                trade,
            },
        })
    }
}
