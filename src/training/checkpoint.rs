//! Rotating on-disk agent checkpoints
//!
//! Periodic checkpoints are named `{prefix}_ep{episode:06}.json` and only the
//! newest `max_checkpoints` are kept. `best_model.json` and
//! `final_model.json` live in the same directory and are never rotated.
//! Each checkpoint carries its two `.mpk` weight records along with it.

use std::fs;
use std::path::{Path, PathBuf};

use crate::agent::{checkpoint_files, DqnAgent};
use crate::Result;

pub const BEST_MODEL_FILE: &str = "best_model.json";
pub const FINAL_MODEL_FILE: &str = "final_model.json";

pub struct Checkpointer {
    checkpoint_dir: PathBuf,
    max_checkpoints: usize,
    prefix: String,
}

impl Checkpointer {
    pub fn new<P: AsRef<Path>>(checkpoint_dir: P, max_checkpoints: usize) -> Result<Self> {
        let checkpoint_dir = checkpoint_dir.as_ref().to_path_buf();
        fs::create_dir_all(&checkpoint_dir)?;

        Ok(Self {
            checkpoint_dir,
            max_checkpoints: max_checkpoints.max(1),
            prefix: "dqn".to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn episode_path(&self, episode: usize) -> PathBuf {
        self.checkpoint_dir
            .join(format!("{}.json", episode_name(&self.prefix, episode)))
    }

    pub fn best_path(&self) -> PathBuf {
        self.checkpoint_dir.join(BEST_MODEL_FILE)
    }

    pub fn final_path(&self) -> PathBuf {
        self.checkpoint_dir.join(FINAL_MODEL_FILE)
    }

    /// Save a periodic checkpoint and drop the oldest beyond the limit
    pub fn save_episode(&self, agent: &DqnAgent, episode: usize) -> Result<PathBuf> {
        let path = self.episode_path(episode);
        agent.save_checkpoint(&path)?;
        self.cleanup_old_checkpoints();
        Ok(path)
    }

    pub fn save_best(&self, agent: &DqnAgent) -> Result<PathBuf> {
        let path = self.best_path();
        agent.save_checkpoint(&path)?;
        Ok(path)
    }

    pub fn save_final(&self, agent: &DqnAgent) -> Result<PathBuf> {
        let path = self.final_path();
        agent.save_checkpoint(&path)?;
        Ok(path)
    }

    /// Periodic checkpoint names, oldest first
    pub fn list_checkpoints(&self) -> Vec<String> {
        let marker = format!("{}_ep", self.prefix);
        let mut names: Vec<String> = fs::read_dir(&self.checkpoint_dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
                    .filter(|name| name.starts_with(&marker) && name.ends_with(".json"))
                    .map(|name| name.trim_end_matches(".json").to_string())
                    .collect()
            })
            .unwrap_or_default();

        // zero-padded episode numbers sort lexically
        names.sort();
        names
    }

    pub fn latest_checkpoint(&self) -> Option<PathBuf> {
        self.list_checkpoints()
            .pop()
            .map(|name| self.checkpoint_dir.join(format!("{}.json", name)))
    }

    fn cleanup_old_checkpoints(&self) {
        let checkpoints = self.list_checkpoints();
        if checkpoints.len() <= self.max_checkpoints {
            return;
        }

        let to_remove = checkpoints.len() - self.max_checkpoints;
        for name in checkpoints.into_iter().take(to_remove) {
            let path = self.checkpoint_dir.join(format!("{}.json", name));
            for file in checkpoint_files(&path) {
                if let Err(e) = fs::remove_file(&file) {
                    tracing::warn!("Failed to remove old checkpoint {:?}: {}", file, e);
                }
            }
            tracing::debug!("Removed old checkpoint: {}", name);
        }
    }
}

pub fn episode_name(prefix: &str, episode: usize) -> String {
    format!("{}_ep{:06}", prefix, episode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use std::env::temp_dir;

    fn scratch(name: &str) -> PathBuf {
        let dir = temp_dir().join(format!("rltrader_{}_{}", name, uuid::Uuid::new_v4()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn agent() -> DqnAgent {
        DqnAgent::new(AgentConfig {
            state_size: 4,
            hidden_layers: vec![8],
            ..AgentConfig::default()
        })
    }

    #[test]
    fn test_episode_name() {
        assert_eq!(episode_name("dqn", 100), "dqn_ep000100");
    }

    #[test]
    fn test_rotation_keeps_latest() {
        let dir = scratch("rotation");
        let checkpointer = Checkpointer::new(&dir, 2).unwrap();
        let agent = agent();

        for episode in [10, 20, 30, 40] {
            checkpointer.save_episode(&agent, episode).unwrap();
        }
        checkpointer.save_best(&agent).unwrap();

        assert_eq!(
            checkpointer.list_checkpoints(),
            vec!["dqn_ep000030".to_string(), "dqn_ep000040".to_string()]
        );
        assert_eq!(checkpointer.latest_checkpoint(), Some(checkpointer.episode_path(40)));
        assert!(checkpointer.best_path().exists());
        assert!(!dir.join("dqn_ep000010-online.mpk").exists());
        assert!(!dir.join("dqn_ep000020-target.mpk").exists());
        assert!(dir.join("dqn_ep000040-online.mpk").exists());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_saved_checkpoint_loads() {
        let dir = scratch("load");
        let checkpointer = Checkpointer::new(&dir, 3).unwrap();
        let agent = agent();
        let path = checkpointer.save_final(&agent).unwrap();

        let restored = DqnAgent::load_for(&path, 4).unwrap();
        let input = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(agent.q_values(&input), restored.q_values(&input));

        fs::remove_dir_all(&dir).ok();
    }
}
