use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

use crate::execution::PortfolioSnapshot;
use crate::features::IndicatorSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotState {
    Running,
    /// Waiting for an operator to resume after an execution failure
    Paused,
    Stopped,
}

/// Latest observable state of a live bot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStatus {
    pub is_running: bool,
    pub state: BotState,
    pub last_update: Option<DateTime<Utc>>,
    /// Last action and what the risk gate made of it
    pub signal: Option<String>,
    pub indicators: IndicatorSnapshot,
    pub portfolio: Option<PortfolioSnapshot>,
    pub last_error: Option<String>,
}

impl Default for BotStatus {
    fn default() -> Self {
        Self {
            is_running: false,
            state: BotState::Stopped,
            last_update: None,
            signal: None,
            indicators: IndicatorSnapshot::default(),
            portfolio: None,
            last_error: None,
        }
    }
}

/// Shared read handle to a bot's status
#[derive(Debug, Clone, Default)]
pub struct StatusHandle(Arc<RwLock<BotStatus>>);

impl StatusHandle {
    pub fn get(&self) -> BotStatus {
        match self.0.read() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut BotStatus)) {
        let mut guard = match self.0.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
    }
}
