use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Penalty for trading on two consecutive steps
pub const CHURN_PENALTY: f64 = 0.0005;
/// Bounds on the trailing Sharpe multiplier so the reward stays increasing in the step return
const SHARPE_CLAMP: (f64, f64) = (-0.5, 2.0);

/// How a step's equity change is turned into a reward
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewardFunction {
    /// Step equity return
    Return,
    /// Step return standardized by the trailing window's mean and deviation
    Sharpe { window: usize },
    /// Step return scaled by (1 + trailing Sharpe), minus a churn penalty
    RiskAdjusted { window: usize },
}

impl Default for RewardFunction {
    fn default() -> Self {
        RewardFunction::RiskAdjusted { window: 20 }
    }
}

/// Mean and population standard deviation
pub(crate) fn mean_std(values: impl ExactSizeIterator<Item = f64> + Clone) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    let variance = values.map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    (mean, variance.sqrt())
}

/// Per-episode reward state
#[derive(Debug, Clone)]
pub struct RewardTracker {
    function: RewardFunction,
    returns: VecDeque<f64>,
    traded_last_step: bool,
}

impl RewardTracker {
    pub fn new(function: RewardFunction) -> Self {
        Self {
            function,
            returns: VecDeque::new(),
            traded_last_step: false,
        }
    }

    pub fn function(&self) -> RewardFunction {
        self.function
    }

    pub fn reset(&mut self) {
        self.returns.clear();
        self.traded_last_step = false;
    }

    /// Sharpe of the trailing window, 0 on fewer than two samples or zero variance
    fn trailing_sharpe(&self) -> Option<(f64, f64)> {
        if self.returns.len() < 2 {
            return None;
        }
        let (mean, std) = mean_std(self.returns.iter().copied());
        if std <= 1e-12 {
            return None;
        }
        Some((mean, std))
    }

    pub fn reward(&mut self, step_return: f64, traded: bool) -> f64 {
        let reward = match self.function {
            RewardFunction::Return => step_return,
            RewardFunction::Sharpe { .. } => match self.trailing_sharpe() {
                Some((mean, std)) => (step_return - mean) / std,
                None => 0.0,
            },
            RewardFunction::RiskAdjusted { .. } => {
                let sharpe = self
                    .trailing_sharpe()
                    .map(|(mean, std)| mean / std)
                    .unwrap_or(0.0)
                    .clamp(SHARPE_CLAMP.0, SHARPE_CLAMP.1);
                let churn = if traded && self.traded_last_step {
                    CHURN_PENALTY
                } else {
                    0.0
                };
                step_return * (1.0 + sharpe) - churn
            }
        };

        let window = match self.function {
            RewardFunction::Return => 0,
            RewardFunction::Sharpe { window } | RewardFunction::RiskAdjusted { window } => window,
        };
        if window > 0 {
            self.returns.push_back(step_return);
            while self.returns.len() > window {
                self.returns.pop_front();
            }
        }
        self.traded_last_step = traded;

        if reward.is_finite() {
            reward
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_reward_is_step_return() {
        let mut tracker = RewardTracker::new(RewardFunction::Return);
        assert_eq!(tracker.reward(0.01, true), 0.01);
        assert_eq!(tracker.reward(-0.02, true), -0.02);
    }

    #[test]
    fn test_sharpe_zero_on_zero_variance() {
        let mut tracker = RewardTracker::new(RewardFunction::Sharpe { window: 5 });
        for _ in 0..5 {
            tracker.reward(0.01, false);
        }
        assert_eq!(tracker.reward(0.05, false), 0.0);
    }

    #[test]
    fn test_sharpe_standardizes_against_window() {
        let mut tracker = RewardTracker::new(RewardFunction::Sharpe { window: 4 });
        for r in [0.01, -0.01, 0.01, -0.01] {
            tracker.reward(r, false);
        }
        // window mean 0, std 0.01
        assert!((tracker.reward(0.02, false) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_risk_adjusted_is_increasing_in_return() {
        let warm = [0.01, 0.02, -0.005, 0.015];
        let rewards: Vec<f64> = [-0.05, -0.01, 0.0, 0.01, 0.05]
            .iter()
            .map(|&r| {
                let mut tracker = RewardTracker::new(RewardFunction::RiskAdjusted { window: 10 });
                for w in warm {
                    tracker.reward(w, false);
                }
                tracker.reward(r, false)
            })
            .collect();

        assert!(rewards.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_churn_penalty_on_consecutive_trades() {
        let mut tracker = RewardTracker::new(RewardFunction::RiskAdjusted { window: 10 });
        assert_eq!(tracker.reward(0.0, true), 0.0);
        assert_eq!(tracker.reward(0.0, true), -CHURN_PENALTY);
        assert_eq!(tracker.reward(0.0, false), 0.0);
    }

    #[test]
    fn test_window_is_bounded_and_reset_clears() {
        let mut tracker = RewardTracker::new(RewardFunction::Sharpe { window: 3 });
        for r in [0.1, 0.2, 0.3, 0.4, 0.5] {
            tracker.reward(r, false);
        }
        assert_eq!(tracker.returns.len(), 3);
        tracker.reset();
        assert!(tracker.returns.is_empty());
    }

    #[test]
    fn test_mean_std() {
        let (mean, std) = mean_std([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].into_iter());
        assert_eq!(mean, 5.0);
        assert_eq!(std, 2.0);
    }
}
