use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::{AgentConfig, EpsilonSchedule};
use crate::environment::{EnvConfig, RewardFunction};
use crate::error::TradingError;
use crate::execution::RetryPolicy;
use crate::features::{FeatureConfig, FeaturePipeline, IndicatorSettings};
use crate::live::LiveConfig;
use crate::models::{ActionSpace, Timeframe};
use crate::risk::{MaturityLevel, RiskLimits};
use crate::strategy::StrategyConfig;
use crate::training::TrainerConfig;
use crate::Result;

/// Every tunable of a bot, flat so each key maps to one env var
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    // Market
    pub symbol: String,
    pub timeframe: Timeframe,
    pub interpolate_gaps: bool,

    // Features
    pub lookback_window: usize,
    pub indicators: IndicatorSettings,

    // Risk
    pub max_position_percentage: f64,
    pub max_trade_percentage: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub max_drawdown_limit: f64,
    pub max_trades_per_day: u32,
    /// Seconds
    pub min_trade_interval: u64,
    pub maturity_level: MaturityLevel,

    // Environment
    pub initial_balance: f64,
    pub commission_fee: f64,
    pub max_episode_length: Option<usize>,
    pub reward: RewardFunction,

    // Agent
    pub strategy: StrategyConfig,
    pub action_space: ActionSpace,
    pub hidden_layers: Vec<usize>,
    pub gamma: f64,
    pub learning_rate: f64,
    pub epsilon: f64,
    pub epsilon_min: f64,
    pub epsilon_decay: f64,
    pub batch_size: usize,
    pub buffer_size: usize,
    pub seed: u64,

    // Training
    pub train_episodes: usize,
    pub model_save_frequency: usize,
    pub validation_split: f64,
    pub validation_frequency: usize,
    pub checkpoint_dir: PathBuf,
    pub max_checkpoints: usize,

    // Live
    /// Seconds between live cycles
    pub check_interval: u64,
    pub history_candles: usize,
    /// Seconds to wait for an order to reach a terminal state
    pub order_timeout: u64,
    pub max_order_attempts: u32,
    pub retry_backoff_ms: u64,
    pub exchange_url: Option<String>,
    pub exchange_api_key: Option<String>,
    pub exchange_rate_limit_per_sec: u32,
    pub redis_url: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        let limits = RiskLimits::default();
        Self {
            symbol: "BTC/USDT".to_string(),
            timeframe: Timeframe::H1,
            interpolate_gaps: false,

            lookback_window: 10,
            indicators: IndicatorSettings::default(),

            max_position_percentage: limits.max_position_percentage,
            max_trade_percentage: limits.max_trade_percentage,
            stop_loss_pct: limits.stop_loss_pct,
            take_profit_pct: limits.take_profit_pct,
            max_drawdown_limit: limits.max_drawdown_limit,
            max_trades_per_day: limits.max_trades_per_day,
            min_trade_interval: limits.min_trade_interval,
            maturity_level: MaturityLevel::default(),

            initial_balance: 10_000.0,
            commission_fee: 0.001,
            max_episode_length: None,
            reward: RewardFunction::default(),

            strategy: StrategyConfig::default(),
            action_space: ActionSpace::Discrete,
            hidden_layers: vec![128, 128, 128],
            gamma: 0.95,
            learning_rate: 0.001,
            epsilon: 1.0,
            epsilon_min: 0.01,
            epsilon_decay: 0.995,
            batch_size: 64,
            buffer_size: 10_000,
            seed: 42,

            train_episodes: 100,
            model_save_frequency: 10,
            validation_split: 0.2,
            validation_frequency: 10,
            checkpoint_dir: PathBuf::from("models"),
            max_checkpoints: 5,

            check_interval: 60,
            history_candles: 200,
            order_timeout: 30,
            max_order_attempts: 3,
            retry_backoff_ms: 500,
            exchange_url: None,
            exchange_api_key: None,
            exchange_rate_limit_per_sec: 10,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl BotConfig {
    /// Defaults, then an optional file, then `RLTRADER_*` env vars
    ///
    /// Nested keys use `__`, e.g. `RLTRADER_STRATEGY__KIND=rsi`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("RLTRADER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: BotConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        let fraction = |name: &str, value: f64, errors: &mut Vec<String>| {
            if !(value > 0.0 && value <= 1.0) {
                errors.push(format!("{} must be in (0, 1], got {}", name, value));
            }
        };
        fraction("max_position_percentage", self.max_position_percentage, &mut errors);
        fraction("max_trade_percentage", self.max_trade_percentage, &mut errors);
        fraction("stop_loss_pct", self.stop_loss_pct, &mut errors);
        fraction("max_drawdown_limit", self.max_drawdown_limit, &mut errors);

        if self.take_profit_pct <= 0.0 {
            errors.push("take_profit_pct must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.commission_fee) {
            errors.push("commission_fee must be in [0, 1)".to_string());
        }
        if self.initial_balance <= 0.0 {
            errors.push("initial_balance must be positive".to_string());
        }
        if self.lookback_window == 0 {
            errors.push("lookback_window must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            errors.push("gamma must be in [0, 1]".to_string());
        }
        if self.learning_rate <= 0.0 {
            errors.push("learning_rate must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.epsilon) || !(0.0..=self.epsilon).contains(&self.epsilon_min)
        {
            errors.push("epsilon_min must be <= epsilon, both in [0, 1]".to_string());
        }
        if !(self.epsilon_decay > 0.0 && self.epsilon_decay <= 1.0) {
            errors.push("epsilon_decay must be in (0, 1]".to_string());
        }
        if self.batch_size == 0 || self.buffer_size < self.batch_size {
            errors.push(
                "buffer_size must be at least batch_size, which must be positive".to_string(),
            );
        }
        if self.hidden_layers.iter().any(|&width| width == 0) {
            errors.push("hidden_layers must not contain zero-width layers".to_string());
        }
        if !(0.0..0.9).contains(&self.validation_split) {
            errors.push("validation_split must be in [0, 0.9)".to_string());
        }
        let warmup = FeaturePipeline::new(self.feature_config()).warmup_candles();
        if self.history_candles < warmup {
            errors.push(format!(
                "history_candles must cover the {} candle indicator warm-up",
                warmup
            ));
        }
        if self.check_interval == 0 {
            errors.push("check_interval must be at least one second".to_string());
        }
        if self.max_order_attempts == 0 {
            errors.push("max_order_attempts must be at least 1".to_string());
        }
        if self.exchange_rate_limit_per_sec == 0 {
            errors.push("exchange_rate_limit_per_sec must be positive".to_string());
        }
        if let ActionSpace::Continuous { min, max, steps } = self.action_space {
            if steps < 2 || min >= max {
                errors.push(
                    "continuous action space needs min < max and at least 2 steps".to_string(),
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TradingError::InvalidConfig(errors.join("; ")))
        }
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            max_position_percentage: self.max_position_percentage,
            max_trade_percentage: self.max_trade_percentage,
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
            max_drawdown_limit: self.max_drawdown_limit,
            max_trades_per_day: self.max_trades_per_day,
            min_trade_interval: self.min_trade_interval,
        }
    }

    pub fn feature_config(&self) -> FeatureConfig {
        FeatureConfig {
            lookback_window: self.lookback_window,
            indicators: self.indicators.clone(),
        }
    }

    pub fn env_config(&self) -> EnvConfig {
        EnvConfig {
            symbol: self.symbol.clone(),
            initial_balance: self.initial_balance,
            commission_fee: self.commission_fee,
            max_episode_length: self.max_episode_length,
            reward: self.reward,
        }
    }

    /// Target network syncs on the checkpoint cadence
    pub fn agent_config(&self, state_size: usize) -> AgentConfig {
        AgentConfig {
            state_size,
            action_space: self.action_space,
            hidden_layers: self.hidden_layers.clone(),
            gamma: self.gamma,
            learning_rate: self.learning_rate,
            epsilon: self.epsilon,
            epsilon_min: self.epsilon_min,
            epsilon_schedule: EpsilonSchedule::Exponential {
                decay: self.epsilon_decay,
            },
            batch_size: self.batch_size,
            buffer_size: self.buffer_size,
            target_sync_episodes: self.model_save_frequency.max(1),
            seed: self.seed,
        }
    }

    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            episodes: self.train_episodes,
            validation_split: self.validation_split,
            validation_frequency: self.validation_frequency,
            model_save_frequency: self.model_save_frequency,
            checkpoint_dir: self.checkpoint_dir.clone(),
            max_checkpoints: self.max_checkpoints,
            timeframe: self.timeframe,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_order_attempts,
            backoff_ms: self.retry_backoff_ms,
            order_timeout: Duration::from_secs(self.order_timeout),
            ..RetryPolicy::default()
        }
    }

    pub fn live_config(&self) -> LiveConfig {
        LiveConfig {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            check_interval: Duration::from_secs(self.check_interval),
            history_candles: self
                .history_candles
                .max(FeaturePipeline::new(self.feature_config()).warmup_candles()),
            interpolate_gaps: self.interpolate_gaps,
            maturity: self.maturity_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("rltrader_cfg_{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = BotConfig::default();
        config.validate().unwrap();
        assert_eq!(config.risk_limits(), RiskLimits::default());
        assert_eq!(config.reward, RewardFunction::RiskAdjusted { window: 20 });
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = write_temp(
            r#"
symbol = "ETH/USDT"
timeframe = "4h"
lookback_window = 20
stop_loss_pct = 0.05
maturity_level = "auto_exit"

[strategy]
kind = "rsi"
period = 7

[reward]
kind = "sharpe"
window = 30
"#,
        );

        let config = BotConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.symbol, "ETH/USDT");
        assert_eq!(config.timeframe, Timeframe::H4);
        assert_eq!(config.lookback_window, 20);
        assert_eq!(config.maturity_level, MaturityLevel::AutoExit);
        assert_eq!(config.reward, RewardFunction::Sharpe { window: 30 });
        match config.strategy {
            StrategyConfig::Rsi(params) => {
                assert_eq!(params.period, 7);
                assert_eq!(params.oversold, 30.0);
            }
            other => panic!("expected rsi, got {:?}", other),
        }
        // untouched keys keep their defaults
        assert_eq!(config.commission_fee, 0.001);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let missing = std::env::temp_dir().join("rltrader_does_not_exist.toml");
        assert!(BotConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let config = BotConfig {
            max_trade_percentage: 1.5,
            gamma: 1.2,
            buffer_size: 8,
            batch_size: 16,
            history_candles: 20,
            ..BotConfig::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_trade_percentage"));
        assert!(err.contains("gamma"));
        assert!(err.contains("buffer_size"));
        assert!(err.contains("history_candles must cover the 43 candle"));
    }

    #[test]
    fn test_derived_configs() {
        let config = BotConfig {
            model_save_frequency: 25,
            order_timeout: 5,
            ..BotConfig::default()
        };

        let agent = config.agent_config(42);
        assert_eq!(agent.state_size, 42);
        assert_eq!(agent.target_sync_episodes, 25);
        assert_eq!(agent.epsilon_schedule, EpsilonSchedule::Exponential { decay: 0.995 });

        assert_eq!(config.retry_policy().order_timeout, Duration::from_secs(5));
        assert_eq!(config.trainer_config().episodes, 100);
        assert_eq!(config.live_config().check_interval, Duration::from_secs(60));
    }
}
