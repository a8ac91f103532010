use chrono::{DateTime, Utc};

use crate::backtest::metrics::EvaluationMetrics;
use crate::environment::{EnvConfig, MarketEnvironment};
use crate::execution::PortfolioSnapshot;
use crate::features::FeaturePipeline;
use crate::models::{Candle, Timeframe, Trade};
use crate::risk::{RiskDecision, RiskLimits};
use crate::strategy::{DecisionContext, Policy};
use crate::Result;

/// Outcome of a single backtest pass
#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub strategy: String,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
    pub metrics: EvaluationMetrics,
    pub final_portfolio: PortfolioSnapshot,
    /// Actions the risk gate refused
    pub vetoes: usize,
    /// Stop-loss / take-profit exits
    pub forced_exits: usize,
}

/// Replays a policy over historical candles without exploration
///
/// Each call builds a fresh environment, so the same candles and the same
/// policy weights always produce the same ledger.
#[derive(Debug, Clone)]
pub struct BacktestRunner {
    pipeline: FeaturePipeline,
    env_config: EnvConfig,
    limits: RiskLimits,
    timeframe: Timeframe,
}

impl BacktestRunner {
    pub fn new(
        pipeline: FeaturePipeline,
        env_config: EnvConfig,
        limits: RiskLimits,
        timeframe: Timeframe,
    ) -> Self {
        Self {
            pipeline,
            env_config,
            limits,
            timeframe,
        }
    }

    pub fn pipeline(&self) -> &FeaturePipeline {
        &self.pipeline
    }

    pub fn run(&self, policy: &mut dyn Policy, candles: &[Candle]) -> Result<BacktestResult> {
        self.run_from(policy, candles, 0)
    }

    /// Trade only from `start` on; earlier candles just warm up the indicators
    pub fn run_from(
        &self,
        policy: &mut dyn Policy,
        candles: &[Candle],
        start: usize,
    ) -> Result<BacktestResult> {
        let mut env = MarketEnvironment::new(
            candles,
            &self.pipeline,
            self.env_config.clone(),
            self.limits.clone(),
        )?
        .starting_at(start)?;

        tracing::info!(
            "Starting backtest: {} with {} candles ({} steps)",
            policy.name(),
            candles.len(),
            env.max_steps()
        );

        let mut state = env.reset()?;
        let mut vetoes = 0;
        let mut forced_exits = 0;

        loop {
            let action = policy.decide(&DecisionContext {
                candles: env.history(),
                state: &state,
                position_quantity: env.position_quantity(),
            });

            let outcome = env.step(&action)?;
            match outcome.info.decision {
                RiskDecision::Veto(reason) => {
                    vetoes += 1;
                    tracing::debug!("{} vetoed at {}: {}", action, outcome.info.timestamp, reason);
                }
                RiskDecision::ForceExit { reason, .. } => {
                    forced_exits += 1;
                    tracing::debug!("Forced exit ({:?}) at {}", reason, outcome.info.timestamp);
                }
                _ => {}
            }

            state = outcome.state;
            if outcome.done {
                break;
            }
        }

        let portfolio = env.portfolio();
        let metrics = EvaluationMetrics::from_run(
            env.equity_curve(),
            portfolio.trades(),
            portfolio.total_fees(),
            self.timeframe,
        );
        let final_time = env.current_candle().open_time;

        tracing::info!(
            "Backtest complete: {} return {:+.2}%, {} trades",
            policy.name(),
            metrics.total_return * 100.0,
            metrics.total_trades
        );

        Ok(BacktestResult {
            strategy: policy.name().to_string(),
            trades: portfolio.trades().to_vec(),
            equity_curve: env.equity_curve().to_vec(),
            final_portfolio: portfolio.snapshot(final_time),
            metrics,
            vetoes,
            forced_exits,
        })
    }

    /// Run and print the boxed report
    pub fn run_and_report(
        &self,
        policy: &mut dyn Policy,
        candles: &[Candle],
    ) -> Result<BacktestResult> {
        println!("🔄 Running backtest for {} on {} candles...", policy.name(), candles.len());
        let result = self.run(policy, candles)?;

        result
            .metrics
            .print_report(&format!("{} backtest report", result.strategy));
        println!("🛑 RISK GATE");
        println!("  Vetoed Actions:        {}", result.vetoes);
        println!("  Forced Exits:          {}", result.forced_exits);

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentConfig, DqnAgent};
    use crate::data::{MarketScenario, SyntheticDataGenerator};
    use crate::features::FeatureConfig;
    use crate::strategy::{BuyAndHoldStrategy, RsiParams, RsiStrategy};

    fn runner(limits: RiskLimits) -> BacktestRunner {
        let pipeline = FeaturePipeline::new(FeatureConfig {
            lookback_window: 10,
            ..FeatureConfig::default()
        });
        BacktestRunner::new(pipeline, EnvConfig::default(), limits, Timeframe::H1)
    }

    fn candles(scenario: MarketScenario, seed: u64) -> Vec<Candle> {
        SyntheticDataGenerator::new(seed).generate(scenario, 200, 3600)
    }

    #[test]
    fn test_buy_and_hold_tracks_uptrend() {
        let runner = runner(RiskLimits::unrestricted());
        let candles = candles(MarketScenario::Uptrend, 5);
        let result = runner
            .run(&mut BuyAndHoldStrategy::new(), &candles)
            .unwrap();

        let first = candles[9].close;
        let last = candles[candles.len() - 1].close;
        let market = last / first - 1.0;
        assert!(result.final_portfolio.positions.len() == 1);
        // one entry fee of 0.1% is the only drag on the market move
        assert!((result.metrics.total_return - ((1.0 + market) * 0.999 - 1.0)).abs() < 1e-6);
        assert_eq!(result.equity_curve.len(), candles.len() - 9);
    }

    #[test]
    fn test_run_from_trades_only_the_tail() {
        let runner = runner(RiskLimits::unrestricted());
        let candles = candles(MarketScenario::Uptrend, 5);
        let result = runner
            .run_from(&mut BuyAndHoldStrategy::new(), &candles, 150)
            .unwrap();

        assert_eq!(result.equity_curve.len(), candles.len() - 150);
        assert_eq!(result.equity_curve[0].0, candles[150].open_time);
        let market = candles[candles.len() - 1].close / candles[150].close - 1.0;
        assert!((result.metrics.total_return - ((1.0 + market) * 0.999 - 1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_dqn_backtest_is_deterministic() {
        let runner = runner(RiskLimits::default());
        let candles = candles(MarketScenario::Volatile, 9);
        let config = AgentConfig {
            state_size: runner.pipeline().state_size(),
            hidden_layers: vec![16, 16],
            ..AgentConfig::default()
        };

        let mut agent = DqnAgent::new(config.clone());
        let first = runner.run(&mut agent, &candles).unwrap();
        let second = runner.run(&mut agent, &candles).unwrap();
        let third = runner.run(&mut DqnAgent::new(config), &candles).unwrap();
        assert_eq!(first.equity_curve, third.equity_curve);

        assert_eq!(first.equity_curve, second.equity_curve);
        assert_eq!(first.metrics, second.metrics);
        assert_eq!(first.trades.len(), second.trades.len());
        for (a, b) in first.trades.iter().zip(&second.trades) {
            assert_eq!(
                (a.entry_price, a.exit_price, a.quantity, a.profit, a.closed_at),
                (b.entry_price, b.exit_price, b.quantity, b.profit, b.closed_at)
            );
        }
    }

    #[test]
    fn test_rule_strategy_trades_and_counts_vetoes() {
        let limits = RiskLimits {
            max_trades_per_day: 1,
            ..RiskLimits::default()
        };
        let runner = runner(limits);
        let candles = candles(MarketScenario::Sideways, 21);
        let result = runner
            .run(&mut RsiStrategy::new(RsiParams::default()), &candles)
            .unwrap();

        assert_eq!(result.strategy, "RSI");
        assert!(result.metrics.bars > 0);
        assert!(result.metrics.max_drawdown >= 0.0);
    }
}
