// Scheduled live trading against an exchange
pub mod runner;
pub mod status;

pub use runner::{CycleOutcome, LiveConfig, LiveControl, LiveRunner};
pub use status::{BotState, BotStatus, StatusHandle};
