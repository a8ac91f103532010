// DQN training loop and checkpoint management
pub mod checkpoint;
pub mod trainer;

pub use checkpoint::{Checkpointer, BEST_MODEL_FILE, FINAL_MODEL_FILE};
pub use trainer::{EpisodeSummary, Trainer, TrainerConfig, TrainingReport, ValidationSummary};
