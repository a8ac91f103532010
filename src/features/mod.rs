//! Candle windows to fixed-width observations
//!
//! Indicators are computed once over the full candle history handed in and
//! then sliced per window. Training, backtest and live inference all go
//! through [`FeatureMatrix`], so the same candles always give the same state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TradingError;
use crate::indicators::{
    calculate_atr_series, calculate_bollinger_series, calculate_ema_series,
    calculate_macd_series, calculate_rsi_series, calculate_sma_series,
};
use crate::models::Candle;
use crate::Result;

/// Window-relative columns: open, high, low, close, volume
const PRICE_COLUMNS: usize = 5;
/// Per-candle columns: return, sma fast/slow, ema fast/slow, rsi, macd hist, %B, atr
const INDICATOR_COLUMNS: usize = 9;
pub const FEATURES_PER_CANDLE: usize = PRICE_COLUMNS + INDICATOR_COLUMNS;
pub const ACCOUNT_FEATURES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorSettings {
    pub sma_fast: usize,
    pub sma_slow: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_std: f64,
    pub atr_period: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            sma_fast: 10,
            sma_slow: 30,
            ema_fast: 10,
            ema_slow: 30,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_std: 2.0,
            atr_period: 14,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub lookback_window: usize,
    pub indicators: IndicatorSettings,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lookback_window: 10,
            indicators: IndicatorSettings::default(),
        }
    }
}

/// Flattened window of per-candle features, oldest candle first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Account state normalized by equity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountContext {
    pub cash_fraction: f64,
    pub position_fraction: f64,
    pub unrealized_pnl_fraction: f64,
}

impl AccountContext {
    /// All cash, no position
    pub fn flat() -> Self {
        Self {
            cash_fraction: 1.0,
            position_fraction: 0.0,
            unrealized_pnl_fraction: 0.0,
        }
    }

    pub fn from_values(cash: f64, position_value: f64, unrealized_pnl: f64) -> Self {
        let equity = cash + position_value;
        if equity <= 0.0 {
            return Self {
                cash_fraction: 0.0,
                position_fraction: 0.0,
                unrealized_pnl_fraction: 0.0,
            };
        }

        Self {
            cash_fraction: cash / equity,
            position_fraction: position_value / equity,
            unrealized_pnl_fraction: unrealized_pnl / equity,
        }
    }
}

/// Agent observation at one candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub timestamp: DateTime<Utc>,
    pub features: FeatureVector,
    pub account: AccountContext,
}

impl State {
    pub fn to_vec(&self) -> Vec<f64> {
        let mut values = Vec::with_capacity(self.features.len() + ACCOUNT_FEATURES);
        values.extend_from_slice(self.features.as_slice());
        values.push(self.account.cash_fraction);
        values.push(self.account.position_fraction);
        values.push(self.account.unrealized_pnl_fraction);
        values
    }

    pub fn dimension(&self) -> usize {
        self.features.len() + ACCOUNT_FEATURES
    }
}

/// Latest indicator readings, reported in bot status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub sma_fast: Option<f64>,
    pub sma_slow: Option<f64>,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_lower: Option<f64>,
    pub atr: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct FeaturePipeline {
    config: FeatureConfig,
}

impl FeaturePipeline {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn lookback_window(&self) -> usize {
        self.config.lookback_window
    }

    /// Length of `State::to_vec()` for this configuration
    pub fn state_size(&self) -> usize {
        self.config.lookback_window * FEATURES_PER_CANDLE + ACCOUNT_FEATURES
    }

    /// Candles before every indicator column in the newest window is populated
    pub fn warmup_candles(&self) -> usize {
        let s = &self.config.indicators;
        let longest = [
            s.sma_fast,
            s.sma_slow,
            s.ema_fast,
            s.ema_slow,
            s.rsi_period + 1,
            (s.macd_slow + s.macd_signal).saturating_sub(1),
            s.bollinger_period,
            s.atr_period + 1,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);
        longest + self.config.lookback_window.saturating_sub(1)
    }

    /// Indicator matrix over the whole history
    pub fn build_matrix(&self, candles: &[Candle]) -> FeatureMatrix {
        FeatureMatrix::build(candles, &self.config)
    }

    /// State for the last candle in `candles`
    pub fn compute_state(&self, candles: &[Candle], account: AccountContext) -> Result<State> {
        if candles.len() < self.config.lookback_window {
            return Err(TradingError::InsufficientHistory {
                needed: self.config.lookback_window,
                got: candles.len(),
            });
        }

        self.build_matrix(candles)
            .state_at(candles.len() - 1, account)
    }

    pub fn indicator_snapshot(&self, candles: &[Candle]) -> IndicatorSnapshot {
        let Some(last) = candles.last() else {
            return IndicatorSnapshot::default();
        };
        let s = &self.config.indicators;
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let latest = |series: Vec<Option<f64>>| series.last().copied().flatten();

        let macd = calculate_macd_series(&closes, s.macd_fast, s.macd_slow, s.macd_signal)
            .last()
            .copied()
            .flatten();
        let bands = calculate_bollinger_series(&closes, s.bollinger_period, s.bollinger_std)
            .last()
            .copied()
            .flatten();

        IndicatorSnapshot {
            close: last.close,
            sma_fast: latest(calculate_sma_series(&closes, s.sma_fast)),
            sma_slow: latest(calculate_sma_series(&closes, s.sma_slow)),
            ema_fast: latest(calculate_ema_series(&closes, s.ema_fast)),
            ema_slow: latest(calculate_ema_series(&closes, s.ema_slow)),
            rsi: latest(calculate_rsi_series(&closes, s.rsi_period)),
            macd: macd.map(|m| m.line),
            macd_signal: macd.map(|m| m.signal),
            bollinger_upper: bands.map(|b| b.upper),
            bollinger_lower: bands.map(|b| b.lower),
            atr: latest(calculate_atr_series(candles, s.atr_period)),
        }
    }
}

/// Precomputed per-candle indicator columns for a candle history
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    candles: Vec<Candle>,
    indicator_rows: Vec<[f64; INDICATOR_COLUMNS]>,
    lookback_window: usize,
}

impl FeatureMatrix {
    fn build(candles: &[Candle], config: &FeatureConfig) -> Self {
        let s = &config.indicators;
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let sma_fast = calculate_sma_series(&closes, s.sma_fast);
        let sma_slow = calculate_sma_series(&closes, s.sma_slow);
        let ema_fast = calculate_ema_series(&closes, s.ema_fast);
        let ema_slow = calculate_ema_series(&closes, s.ema_slow);
        let rsi = calculate_rsi_series(&closes, s.rsi_period);
        let macd = calculate_macd_series(&closes, s.macd_fast, s.macd_slow, s.macd_signal);
        let bands = calculate_bollinger_series(&closes, s.bollinger_period, s.bollinger_std);
        let atr = calculate_atr_series(candles, s.atr_period);

        let relative = |value: Option<f64>, close: f64| match value {
            Some(v) if close > 0.0 => v / close - 1.0,
            _ => 0.0,
        };

        let indicator_rows = candles
            .iter()
            .enumerate()
            .map(|(i, candle)| {
                let close = candle.close;
                let step_return = if i > 0 && closes[i - 1] > 0.0 {
                    close / closes[i - 1] - 1.0
                } else {
                    0.0
                };

                [
                    step_return,
                    relative(sma_fast[i], close),
                    relative(sma_slow[i], close),
                    relative(ema_fast[i], close),
                    relative(ema_slow[i], close),
                    rsi[i].map(|v| v / 100.0).unwrap_or(0.5),
                    match macd[i] {
                        Some(m) if close > 0.0 => m.histogram / close,
                        _ => 0.0,
                    },
                    bands[i].map(|b| b.percent_b(close)).unwrap_or(0.5),
                    match atr[i] {
                        Some(a) if close > 0.0 => a / close,
                        _ => 0.0,
                    },
                ]
                .map(finite_or_zero)
            })
            .collect();

        Self {
            candles: candles.to_vec(),
            indicator_rows,
            lookback_window: config.lookback_window,
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// First index with a full lookback window behind it
    pub fn first_index(&self) -> usize {
        self.lookback_window.saturating_sub(1)
    }

    /// State for the window ending at `index` (inclusive)
    pub fn state_at(&self, index: usize, account: AccountContext) -> Result<State> {
        let window = self.lookback_window;
        if window == 0 || index >= self.candles.len() || index + 1 < window {
            return Err(TradingError::InsufficientHistory {
                needed: window,
                got: (index + 1).min(self.candles.len()),
            });
        }

        let start = index + 1 - window;
        let candles = &self.candles[start..=index];
        let last_close = candles[window - 1].close;
        let mean_volume = candles.iter().map(|c| c.volume).sum::<f64>() / window as f64;

        let scale = |value: f64| {
            if last_close > 0.0 {
                value / last_close - 1.0
            } else {
                0.0
            }
        };

        let mut values = Vec::with_capacity(window * FEATURES_PER_CANDLE);
        for (candle, indicators) in candles.iter().zip(&self.indicator_rows[start..=index]) {
            values.push(finite_or_zero(scale(candle.open)));
            values.push(finite_or_zero(scale(candle.high)));
            values.push(finite_or_zero(scale(candle.low)));
            values.push(finite_or_zero(scale(candle.close)));
            values.push(if mean_volume > 0.0 {
                finite_or_zero(candle.volume / mean_volume - 1.0)
            } else {
                0.0
            });
            values.extend_from_slice(indicators);
        }

        Ok(State {
            timestamp: candles[window - 1].open_time,
            features: FeatureVector(values),
            account,
        })
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{MarketScenario, SyntheticDataGenerator};

    fn pipeline(lookback: usize) -> FeaturePipeline {
        FeaturePipeline::new(FeatureConfig {
            lookback_window: lookback,
            ..Default::default()
        })
    }

    #[test]
    fn test_insufficient_history() {
        let candles = SyntheticDataGenerator::new(1).generate(MarketScenario::Sideways, 5, 3600);
        let result = pipeline(10).compute_state(&candles, AccountContext::flat());
        assert!(matches!(
            result,
            Err(TradingError::InsufficientHistory { needed: 10, got: 5 })
        ));
    }

    #[test]
    fn test_state_dimension() {
        let candles = SyntheticDataGenerator::new(1).generate(MarketScenario::Uptrend, 60, 3600);
        let p = pipeline(10);
        let state = p.compute_state(&candles, AccountContext::flat()).unwrap();
        assert_eq!(state.features.len(), 10 * FEATURES_PER_CANDLE);
        assert_eq!(state.to_vec().len(), p.state_size());
        assert_eq!(state.timestamp, candles[59].open_time);
    }

    #[test]
    fn test_compute_state_is_deterministic() {
        let candles = SyntheticDataGenerator::new(9).generate(MarketScenario::Volatile, 120, 3600);
        let p = pipeline(20);
        let account = AccountContext::from_values(4000.0, 6000.0, 250.0);

        let first = p.compute_state(&candles, account).unwrap();
        let second = p.compute_state(&candles, account).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_matrix_window_matches_compute_state() {
        let candles = SyntheticDataGenerator::new(3).generate(MarketScenario::Uptrend, 100, 3600);
        let p = pipeline(10);
        let matrix = p.build_matrix(&candles);

        let from_matrix = matrix.state_at(70, AccountContext::flat()).unwrap();
        let direct = p
            .compute_state(&candles[..=70], AccountContext::flat())
            .unwrap();
        assert_eq!(from_matrix, direct);
    }

    #[test]
    fn test_last_close_column_is_zero() {
        let candles = SyntheticDataGenerator::new(5).generate(MarketScenario::Sideways, 40, 3600);
        let state = pipeline(10)
            .compute_state(&candles, AccountContext::flat())
            .unwrap();
        let last_row = &state.features.as_slice()[9 * FEATURES_PER_CANDLE..];
        assert_eq!(last_row[3], 0.0);
        assert!(state.to_vec().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_warmup_covers_slowest_indicator() {
        let p = pipeline(10);
        // MACD signal needs 26 + 9 - 1 candles, plus nine older rows in the window
        assert_eq!(p.warmup_candles(), 43);

        let candles = SyntheticDataGenerator::new(6).generate(MarketScenario::Volatile, 60, 3600);
        let oldest_row = p.warmup_candles() - p.lookback_window();
        assert!(p.indicator_snapshot(&candles[..=oldest_row]).macd_signal.is_some());
        assert!(p.indicator_snapshot(&candles[..oldest_row]).macd_signal.is_none());
    }

    #[test]
    fn test_account_context_fractions() {
        let account = AccountContext::from_values(2500.0, 7500.0, 500.0);
        assert!((account.cash_fraction - 0.25).abs() < 1e-12);
        assert!((account.position_fraction - 0.75).abs() < 1e-12);
        assert!((account.unrealized_pnl_fraction - 0.05).abs() < 1e-12);
        assert_eq!(AccountContext::from_values(0.0, 0.0, 0.0).cash_fraction, 0.0);
    }

    #[test]
    fn test_indicator_snapshot() {
        let candles = SyntheticDataGenerator::new(2).generate(MarketScenario::Uptrend, 80, 3600);
        let snapshot = pipeline(10).indicator_snapshot(&candles);
        assert_eq!(snapshot.close, candles[79].close);
        assert!(snapshot.rsi.is_some());
        assert!(snapshot.macd.is_some());
        assert!(snapshot.atr.is_some());
    }
}
