use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::agent::{DqnAgent, Transition};
use crate::backtest::BacktestRunner;
use crate::environment::{EnvConfig, MarketEnvironment};
use crate::features::FeaturePipeline;
use crate::models::{Candle, Timeframe};
use crate::risk::RiskLimits;
use crate::training::checkpoint::Checkpointer;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub episodes: usize,
    /// Trailing fraction of the candles held out for validation
    pub validation_split: f64,
    /// Episodes between validation passes
    pub validation_frequency: usize,
    /// Episodes between periodic checkpoints
    pub model_save_frequency: usize,
    pub checkpoint_dir: PathBuf,
    pub max_checkpoints: usize,
    pub timeframe: Timeframe,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            episodes: 100,
            validation_split: 0.2,
            validation_frequency: 10,
            model_save_frequency: 10,
            checkpoint_dir: PathBuf::from("models"),
            max_checkpoints: 5,
            timeframe: Timeframe::H1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub episode: usize,
    pub steps: usize,
    pub total_reward: f64,
    pub final_equity: f64,
    pub trades: usize,
    pub mean_loss: Option<f64>,
    pub epsilon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub episode: usize,
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub trades: usize,
}

/// Everything a training run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub episodes: Vec<EpisodeSummary>,
    pub validations: Vec<ValidationSummary>,
    pub best_validation_return: Option<f64>,
    pub best_model: Option<PathBuf>,
    pub final_model: PathBuf,
}

/// Episodic DQN training with held-out validation
pub struct Trainer {
    pipeline: FeaturePipeline,
    env_config: EnvConfig,
    limits: RiskLimits,
    config: TrainerConfig,
    agent: DqnAgent,
}

impl Trainer {
    pub fn new(
        pipeline: FeaturePipeline,
        env_config: EnvConfig,
        limits: RiskLimits,
        config: TrainerConfig,
        agent: DqnAgent,
    ) -> Self {
        Self {
            pipeline,
            env_config,
            limits,
            config,
            agent,
        }
    }

    pub fn agent(&self) -> &DqnAgent {
        &self.agent
    }

    pub fn into_agent(self) -> DqnAgent {
        self.agent
    }

    /// Split candles into a training window and a validation start index
    ///
    /// Validation replays the full history and trades from the first
    /// held-out candle, so its indicators carry over from the training
    /// window. Returns no validation start when the held-out part is too
    /// short to step through.
    pub fn split<'a>(&self, candles: &'a [Candle]) -> (&'a [Candle], Option<usize>) {
        let split = self.config.validation_split.clamp(0.0, 0.9);
        let held_out = (candles.len() as f64 * split).round() as usize;
        if held_out == 0 {
            return (candles, None);
        }

        let boundary = candles.len() - held_out;
        if held_out < 2 || boundary <= self.pipeline.lookback_window() {
            tracing::warn!(
                "Validation window of {} candles is too short, training without validation",
                held_out
            );
            return (candles, None);
        }

        (&candles[..boundary], Some(boundary))
    }

    pub fn train(&mut self, candles: &[Candle]) -> Result<TrainingReport> {
        let (train_candles, validation_start) = self.split(candles);
        let mut env = MarketEnvironment::new(
            train_candles,
            &self.pipeline,
            self.env_config.clone(),
            self.limits.clone(),
        )?;
        let evaluator = BacktestRunner::new(
            self.pipeline.clone(),
            self.env_config.clone(),
            self.limits.clone(),
            self.config.timeframe,
        );
        let checkpointer =
            Checkpointer::new(&self.config.checkpoint_dir, self.config.max_checkpoints)?;

        tracing::info!(
            "Training for {} episodes on {} candles ({} held out)",
            self.config.episodes,
            train_candles.len(),
            validation_start.map(|start| candles.len() - start).unwrap_or(0)
        );

        let mut episodes = Vec::with_capacity(self.config.episodes);
        let mut validations = Vec::new();
        let mut best_return: Option<f64> = None;
        let mut best_model = None;

        for episode in 1..=self.config.episodes {
            let summary = self.run_episode(&mut env, episode)?;
            tracing::info!(
                "Episode {}/{}: reward {:.4}, equity {:.2}, trades {}, epsilon {:.3}",
                episode,
                self.config.episodes,
                summary.total_reward,
                summary.final_equity,
                summary.trades,
                summary.epsilon
            );
            episodes.push(summary);

            let due = |every: usize| every > 0 && episode % every == 0;

            if let Some(start) = validation_start {
                if due(self.config.validation_frequency) || episode == self.config.episodes {
                    let result = evaluator.run_from(&mut self.agent, candles, start)?;
                    let total_return = result.metrics.total_return;
                    tracing::info!(
                        "Validation after episode {}: return {:+.2}%, sharpe {:.2}, {} trades",
                        episode,
                        total_return * 100.0,
                        result.metrics.sharpe_ratio,
                        result.metrics.total_trades
                    );
                    validations.push(ValidationSummary {
                        episode,
                        total_return,
                        sharpe_ratio: result.metrics.sharpe_ratio,
                        trades: result.metrics.total_trades,
                    });

                    if best_return.map_or(true, |best| total_return > best) {
                        best_return = Some(total_return);
                        best_model = Some(checkpointer.save_best(&self.agent)?);
                        tracing::info!("New best validation return {:+.2}%", total_return * 100.0);
                    }
                }
            }

            if due(self.config.model_save_frequency) {
                checkpointer.save_episode(&self.agent, episode)?;
            }
        }

        let final_model = checkpointer.save_final(&self.agent)?;
        if best_model.is_none() {
            // no validation data: the final weights are the best we have
            best_model = Some(checkpointer.save_best(&self.agent)?);
        }

        let report = TrainingReport {
            episodes,
            validations,
            best_validation_return: best_return,
            best_model,
            final_model,
        };
        let history_path = checkpointer.dir().join("training_history.json");
        fs::write(&history_path, serde_json::to_vec_pretty(&report)?)?;
        tracing::info!("Training complete, history written to {:?}", history_path);

        Ok(report)
    }

    fn run_episode(
        &mut self,
        env: &mut MarketEnvironment,
        episode: usize,
    ) -> Result<EpisodeSummary> {
        let space = self.agent.config().action_space;
        let mut state = env.reset()?;
        let mut total_reward = 0.0;
        let mut losses = Vec::new();

        loop {
            let features = state.to_vec();
            let index = self.agent.select_index(&features, true);
            let action = space.action_at(index).unwrap_or_else(|| space.hold());

            let outcome = env.step(&action)?;
            total_reward += outcome.reward;

            self.agent.observe(Transition {
                state: features,
                action: index,
                reward: outcome.reward,
                next_state: outcome.state.to_vec(),
                done: outcome.done,
            });
            if let Some(loss) = self.agent.learn()? {
                losses.push(loss);
            }

            state = outcome.state;
            if outcome.done {
                break;
            }
        }

        self.agent.end_episode();

        let mean_loss = if losses.is_empty() {
            None
        } else {
            Some(losses.iter().sum::<f64>() / losses.len() as f64)
        };

        Ok(EpisodeSummary {
            episode,
            steps: env.steps(),
            total_reward,
            final_equity: env.portfolio().equity(),
            trades: env.trades().len(),
            mean_loss,
            epsilon: self.agent.epsilon(),
        })
    }
}
