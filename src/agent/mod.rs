//! Deep Q-learning agent
//!
//! Epsilon-greedy over a dense Q-network, uniform experience replay and a
//! hard-synced target network.
//!
//! A checkpoint is a JSON file with the config and exploration state, plus
//! one MessagePack weight record per network beside it.

pub mod exploration;
pub mod network;
pub mod replay_buffer;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::TradingError;
use crate::features::State;
use crate::models::{Action, ActionSpace};
use crate::Result;

pub use exploration::{EpsilonSchedule, Exploration};
pub use network::{QNetwork, QOptimizer};
pub use replay_buffer::{ReplayBuffer, Transition};

const CHECKPOINT_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub state_size: usize,
    pub action_space: ActionSpace,
    pub hidden_layers: Vec<usize>,
    pub gamma: f64,
    pub learning_rate: f64,
    pub epsilon: f64,
    pub epsilon_min: f64,
    pub epsilon_schedule: EpsilonSchedule,
    pub batch_size: usize,
    pub buffer_size: usize,
    /// Episodes between target network syncs
    pub target_sync_episodes: usize,
    pub seed: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            state_size: 0,
            action_space: ActionSpace::Discrete,
            hidden_layers: vec![128, 128, 128],
            gamma: 0.95,
            learning_rate: 0.001,
            epsilon: 1.0,
            epsilon_min: 0.01,
            epsilon_schedule: EpsilonSchedule::default(),
            batch_size: 64,
            buffer_size: 10_000,
            target_sync_episodes: 10,
            seed: 42,
        }
    }
}

/// Everything but the weights needed to resume an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AgentCheckpoint {
    version: u32,
    saved_at: DateTime<Utc>,
    config: AgentConfig,
    exploration: Exploration,
    episodes: usize,
    optimizer_steps: u64,
}

/// Weight record written next to the checkpoint at `path`
fn weights_path(path: &Path, network: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("agent");
    path.with_file_name(format!("{}-{}.mpk", stem, network))
}

/// The checkpoint file and both weight records
pub fn checkpoint_files(path: &Path) -> [PathBuf; 3] {
    [
        path.to_path_buf(),
        weights_path(path, "online"),
        weights_path(path, "target"),
    ]
}

pub struct DqnAgent {
    config: AgentConfig,
    online: QNetwork,
    target: QNetwork,
    optimizer: QOptimizer,
    buffer: ReplayBuffer,
    exploration: Exploration,
    rng: StdRng,
    episodes: usize,
}

impl DqnAgent {
    pub fn new(config: AgentConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let online = QNetwork::new(
            config.state_size,
            &config.hidden_layers,
            config.action_space.size(),
            &mut rng,
        );
        let target = online.clone();

        Self {
            optimizer: QOptimizer::new(config.learning_rate),
            buffer: ReplayBuffer::new(config.buffer_size),
            exploration: Exploration::new(
                config.epsilon,
                config.epsilon_min,
                config.epsilon_schedule,
            ),
            online,
            target,
            rng,
            episodes: 0,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn epsilon(&self) -> f64 {
        self.exploration.epsilon()
    }

    pub fn episodes(&self) -> usize {
        self.episodes
    }

    pub fn buffer(&self) -> &ReplayBuffer {
        &self.buffer
    }

    pub fn q_values(&self, state: &[f64]) -> Vec<f64> {
        self.online.forward(state)
    }

    pub fn target_in_sync(&self) -> bool {
        self.online.same_weights(&self.target)
    }

    /// Action index with the highest Q-value; ties go to the lowest index
    fn argmax(values: &[f64]) -> usize {
        values
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(best, best_value), (i, &v)| {
                if v > best_value {
                    (i, v)
                } else {
                    (best, best_value)
                }
            })
            .0
    }

    pub fn greedy_index(&self, state: &[f64]) -> usize {
        Self::argmax(&self.online.forward(state))
    }

    pub fn greedy_action(&self, state: &State) -> Action {
        let index = self.greedy_index(&state.to_vec());
        self.action_at(index)
    }

    fn action_at(&self, index: usize) -> Action {
        let space = self.config.action_space;
        space.action_at(index).unwrap_or_else(|| space.hold())
    }

    /// Epsilon-greedy when `explore`, greedy otherwise
    pub fn select_action(&mut self, state: &State, explore: bool) -> Action {
        let index = self.select_index(&state.to_vec(), explore);
        self.action_at(index)
    }

    pub fn select_index(&mut self, state: &[f64], explore: bool) -> usize {
        if explore && self.rng.gen::<f64>() < self.exploration.epsilon() {
            return self.rng.gen_range(0..self.config.action_space.size());
        }
        self.greedy_index(state)
    }

    /// Index of `action` in this agent's action space
    pub fn action_index(&self, action: &Action) -> Option<usize> {
        self.config.action_space.index_of(action)
    }

    pub fn observe(&mut self, transition: Transition) {
        self.buffer.push(transition);
    }

    /// One gradient step on a uniformly sampled batch
    ///
    /// `Ok(None)` while the buffer holds fewer than `batch_size` transitions.
    pub fn learn(&mut self) -> Result<Option<f64>> {
        let batch_size = self.config.batch_size;
        if batch_size == 0 || self.buffer.len() < batch_size {
            return Ok(None);
        }

        let batch = self.buffer.sample(batch_size, &mut self.rng);
        let gamma = self.config.gamma;

        let next_states: Vec<&[f64]> = batch.iter().map(|t| t.next_state.as_slice()).collect();
        let next_values = self.target.forward_batch(&next_states);
        let targets: Vec<f64> = batch
            .iter()
            .zip(&next_values)
            .map(|(t, next)| {
                if t.done {
                    t.reward
                } else {
                    let best = next.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    t.reward + gamma * best
                }
            })
            .collect();
        let states: Vec<&[f64]> = batch.iter().map(|t| t.state.as_slice()).collect();
        let actions: Vec<usize> = batch.iter().map(|t| t.action).collect();

        let loss = self
            .optimizer
            .train_batch(&mut self.online, &states, &actions, &targets);
        if !loss.is_finite() {
            tracing::error!(
                "Loss diverged to {} after {} optimizer steps",
                loss,
                self.optimizer.steps()
            );
            return Err(TradingError::NumericalDivergence { loss });
        }

        Ok(Some(loss))
    }

    /// Decay exploration and sync the target network on schedule
    pub fn end_episode(&mut self) {
        self.episodes += 1;
        self.exploration.decay();

        let every = self.config.target_sync_episodes.max(1);
        if self.episodes % every == 0 {
            self.target.copy_weights_from(&self.online);
            tracing::debug!("Target network synced at episode {}", self.episodes);
        }
    }

    pub fn save_checkpoint(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let checkpoint = AgentCheckpoint {
            version: CHECKPOINT_VERSION,
            saved_at: Utc::now(),
            config: self.config.clone(),
            exploration: self.exploration,
            episodes: self.episodes,
            optimizer_steps: self.optimizer.steps(),
        };
        self.online.save(&weights_path(path, "online"))?;
        self.target.save(&weights_path(path, "target"))?;
        fs::write(path, serde_json::to_vec_pretty(&checkpoint)?)?;

        tracing::info!("Saved checkpoint to {:?}", path);
        Ok(())
    }

    /// Restore weights, exploration state and episode count
    ///
    /// The replay buffer and Adam moments start empty.
    pub fn load_checkpoint(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| {
            TradingError::Checkpoint(format!("cannot read {}: {}", path.display(), e))
        })?;
        let checkpoint: AgentCheckpoint = serde_json::from_slice(&bytes)?;

        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(TradingError::Checkpoint(format!(
                "unsupported checkpoint version {}",
                checkpoint.version
            )));
        }
        let config = checkpoint.config;

        // build the configured shape, then read the weights into it
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut online = QNetwork::new(
            config.state_size,
            &config.hidden_layers,
            config.action_space.size(),
            &mut rng,
        );
        let mut target = online.clone();
        online.load(&weights_path(path, "online"))?;
        target.load(&weights_path(path, "target"))?;

        tracing::info!(
            "Loaded checkpoint {:?} (episode {}, epsilon {:.3}, {} optimizer steps)",
            path,
            checkpoint.episodes,
            checkpoint.exploration.epsilon(),
            checkpoint.optimizer_steps
        );

        Ok(Self {
            buffer: ReplayBuffer::new(config.buffer_size),
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(checkpoint.episodes as u64)),
            optimizer: QOptimizer::new(config.learning_rate),
            online,
            target,
            exploration: checkpoint.exploration,
            episodes: checkpoint.episodes,
            config,
        })
    }

    /// Load a checkpoint and check it fits `state_size`
    pub fn load_for(path: &Path, state_size: usize) -> Result<Self> {
        let agent = Self::load_checkpoint(path)?;
        if agent.config.state_size != state_size {
            return Err(TradingError::Checkpoint(format!(
                "checkpoint expects state size {}, features produce {}",
                agent.config.state_size, state_size
            )));
        }
        Ok(agent)
    }

    /// Override exploration, e.g. to evaluate greedily
    pub fn set_epsilon(&mut self, epsilon: f64) {
        self.exploration.set_epsilon(epsilon);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{AccountContext, FeatureConfig, FeaturePipeline};
    use crate::data::{MarketScenario, SyntheticDataGenerator};
    use crate::models::DiscreteAction;

    fn config(state_size: usize) -> AgentConfig {
        AgentConfig {
            state_size,
            hidden_layers: vec![16, 16],
            batch_size: 8,
            buffer_size: 100,
            target_sync_episodes: 2,
            ..AgentConfig::default()
        }
    }

    fn transition(state_size: usize, reward: f64, action: usize) -> Transition {
        Transition {
            state: vec![0.1; state_size],
            action,
            reward,
            next_state: vec![0.2; state_size],
            done: false,
        }
    }

    fn sample_state() -> State {
        let candles = SyntheticDataGenerator::new(4).generate(MarketScenario::Sideways, 60, 3600);
        let pipeline = FeaturePipeline::new(FeatureConfig::default());
        pipeline
            .compute_state(&candles, AccountContext::flat())
            .unwrap()
    }

    #[test]
    fn test_learn_skips_until_batch_is_available() {
        let mut agent = DqnAgent::new(config(4));
        for i in 0..7 {
            agent.observe(transition(4, 0.1, i % 7));
        }
        assert!(agent.learn().unwrap().is_none());

        agent.observe(transition(4, 0.1, 0));
        assert!(agent.learn().unwrap().is_some());
    }

    #[test]
    fn test_nan_loss_is_fatal() {
        let mut agent = DqnAgent::new(config(4));
        for _ in 0..8 {
            agent.observe(transition(4, f64::NAN, 1));
        }
        assert!(matches!(
            agent.learn(),
            Err(TradingError::NumericalDivergence { .. })
        ));
    }

    #[test]
    fn test_greedy_selection_is_deterministic() {
        let state = sample_state();
        let mut agent = DqnAgent::new(config(state.dimension()));
        let first = agent.select_action(&state, false);
        for _ in 0..10 {
            assert_eq!(agent.select_action(&state, false), first);
        }
        assert_eq!(agent.greedy_action(&state), first);
    }

    #[test]
    fn test_full_exploration_covers_action_space() {
        let state = sample_state();
        let mut agent = DqnAgent::new(config(state.dimension()));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            if let Action::Discrete(action) = agent.select_action(&state, true) {
                seen.insert(action);
            }
        }
        assert_eq!(seen.len(), DiscreteAction::COUNT);
    }

    #[test]
    fn test_end_episode_decays_and_syncs() {
        let mut agent = DqnAgent::new(config(4));
        for _ in 0..8 {
            agent.observe(transition(4, 1.0, 2));
        }
        agent.learn().unwrap();
        assert!(!agent.target_in_sync());

        let before = agent.epsilon();
        agent.end_episode();
        assert!(agent.epsilon() < before);
        assert!(!agent.target_in_sync());

        agent.end_episode();
        assert!(agent.target_in_sync());
        assert_eq!(agent.episodes(), 2);
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = std::env::temp_dir()
            .join(format!("rltrader-agent-{}", uuid::Uuid::new_v4()));
        let path = dir.join("agent.json");

        let mut agent = DqnAgent::new(config(4));
        for _ in 0..8 {
            agent.observe(transition(4, 0.5, 3));
        }
        agent.learn().unwrap();
        agent.end_episode();
        agent.save_checkpoint(&path).unwrap();
        for file in checkpoint_files(&path) {
            assert!(file.exists(), "{:?} missing", file);
        }
        assert!(dir.join("agent-online.mpk").exists());

        let restored = DqnAgent::load_checkpoint(&path).unwrap();
        let input = [0.3, 0.1, -0.2, 0.4];
        assert_eq!(restored.q_values(&input), agent.q_values(&input));
        assert_eq!(restored.epsilon(), agent.epsilon());
        assert_eq!(restored.episodes(), 1);
        assert!(restored.buffer().is_empty());

        assert!(matches!(
            DqnAgent::load_for(&path, 5),
            Err(TradingError::Checkpoint(_))
        ));

        std::fs::remove_file(dir.join("agent-target.mpk")).unwrap();
        assert!(matches!(
            DqnAgent::load_checkpoint(&path),
            Err(TradingError::Checkpoint(_))
        ));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_checkpoint() {
        let result = DqnAgent::load_checkpoint(Path::new("/nonexistent/model.json"));
        assert!(matches!(result, Err(TradingError::Checkpoint(_))));
    }
}
