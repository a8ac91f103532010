use serde::{Deserialize, Serialize};

use super::{DecisionContext, Policy};
use crate::indicators::{calculate_bollinger, calculate_ema, calculate_macd, calculate_rsi};
use crate::models::{Action, DiscreteAction};

const ENTER: Action = Action::Discrete(DiscreteAction::Buy100);
const EXIT: Action = Action::Discrete(DiscreteAction::Sell100);

/// Enter when flat, exit when holding, hold otherwise
fn signal(ctx: &DecisionContext<'_>, buy: bool, sell: bool) -> Action {
    match (ctx.has_position(), buy, sell) {
        (false, true, _) => ENTER,
        (true, _, true) => EXIT,
        _ => Action::HOLD,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RsiParams {
    pub period: usize,
    pub oversold: f64,
    pub overbought: f64,
}

impl Default for RsiParams {
    fn default() -> Self {
        Self {
            period: 14,
            oversold: 30.0,
            overbought: 70.0,
        }
    }
}

/// Buy oversold, sell overbought
#[derive(Debug, Clone)]
pub struct RsiStrategy {
    params: RsiParams,
}

impl RsiStrategy {
    pub fn new(params: RsiParams) -> Self {
        Self { params }
    }
}

impl Policy for RsiStrategy {
    fn name(&self) -> &str {
        "RSI"
    }

    fn decide(&mut self, ctx: &DecisionContext<'_>) -> Action {
        let Some(rsi) = calculate_rsi(&ctx.closes(), self.params.period) else {
            return Action::HOLD;
        };
        signal(ctx, rsi < self.params.oversold, rsi > self.params.overbought)
    }

    fn min_candles_required(&self) -> usize {
        self.params.period + 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmaCrossoverParams {
    pub fast: usize,
    pub slow: usize,
}

impl Default for EmaCrossoverParams {
    fn default() -> Self {
        Self { fast: 9, slow: 21 }
    }
}

/// Long while the fast EMA is above the slow one
#[derive(Debug, Clone)]
pub struct EmaCrossoverStrategy {
    params: EmaCrossoverParams,
}

impl EmaCrossoverStrategy {
    pub fn new(params: EmaCrossoverParams) -> Self {
        Self { params }
    }
}

impl Policy for EmaCrossoverStrategy {
    fn name(&self) -> &str {
        "EMA Crossover"
    }

    fn decide(&mut self, ctx: &DecisionContext<'_>) -> Action {
        let closes = ctx.closes();
        match (
            calculate_ema(&closes, self.params.fast),
            calculate_ema(&closes, self.params.slow),
        ) {
            (Some(fast), Some(slow)) => signal(ctx, fast > slow, fast < slow),
            _ => Action::HOLD,
        }
    }

    fn min_candles_required(&self) -> usize {
        self.params.slow.max(self.params.fast)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacdParams {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl Default for MacdParams {
    fn default() -> Self {
        Self {
            fast: 12,
            slow: 26,
            signal: 9,
        }
    }
}

/// Long while the MACD line is above its signal line
#[derive(Debug, Clone)]
pub struct MacdStrategy {
    params: MacdParams,
}

impl MacdStrategy {
    pub fn new(params: MacdParams) -> Self {
        Self { params }
    }
}

impl Policy for MacdStrategy {
    fn name(&self) -> &str {
        "MACD"
    }

    fn decide(&mut self, ctx: &DecisionContext<'_>) -> Action {
        let p = &self.params;
        match calculate_macd(&ctx.closes(), p.fast, p.slow, p.signal) {
            Some(macd) => signal(ctx, macd.histogram > 0.0, macd.histogram < 0.0),
            None => Action::HOLD,
        }
    }

    fn min_candles_required(&self) -> usize {
        (self.params.slow + self.params.signal).saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BollingerParams {
    pub period: usize,
    pub std_dev: f64,
}

impl Default for BollingerParams {
    fn default() -> Self {
        Self {
            period: 20,
            std_dev: 2.0,
        }
    }
}

/// Buy below the lower band, sell above the upper band
#[derive(Debug, Clone)]
pub struct BollingerStrategy {
    params: BollingerParams,
}

impl BollingerStrategy {
    pub fn new(params: BollingerParams) -> Self {
        Self { params }
    }
}

impl Policy for BollingerStrategy {
    fn name(&self) -> &str {
        "Bollinger Bands"
    }

    fn decide(&mut self, ctx: &DecisionContext<'_>) -> Action {
        let closes = ctx.closes();
        let (Some(bands), Some(&close)) = (
            calculate_bollinger(&closes, self.params.period, self.params.std_dev),
            closes.last(),
        ) else {
            return Action::HOLD;
        };
        signal(ctx, close < bands.lower, close > bands.upper)
    }

    fn min_candles_required(&self) -> usize {
        self.params.period
    }
}
