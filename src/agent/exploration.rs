use serde::{Deserialize, Serialize};

/// Per-episode epsilon decay toward a floor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EpsilonSchedule {
    /// epsilon *= decay
    Exponential { decay: f64 },
    /// Straight line from the starting epsilon to the floor over `episodes`
    Linear { episodes: usize },
}

impl Default for EpsilonSchedule {
    fn default() -> Self {
        EpsilonSchedule::Exponential { decay: 0.995 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Exploration {
    start: f64,
    min: f64,
    schedule: EpsilonSchedule,
    epsilon: f64,
}

impl Exploration {
    pub fn new(start: f64, min: f64, schedule: EpsilonSchedule) -> Self {
        let start = start.clamp(0.0, 1.0);
        let min = min.clamp(0.0, start);
        Self {
            start,
            min,
            schedule,
            epsilon: start,
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    /// Decay once; never increases and never drops below the floor
    pub fn decay(&mut self) {
        let next = match self.schedule {
            EpsilonSchedule::Exponential { decay } => self.epsilon * decay.clamp(0.0, 1.0),
            EpsilonSchedule::Linear { episodes } => {
                let step = (self.start - self.min) / episodes.max(1) as f64;
                self.epsilon - step
            }
        };
        self.epsilon = next.max(self.min).min(self.epsilon);
    }

    pub(crate) fn set_epsilon(&mut self, epsilon: f64) {
        self.epsilon = epsilon.clamp(self.min, self.start.max(self.min));
    }
}
