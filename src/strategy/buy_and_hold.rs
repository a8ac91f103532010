use super::{DecisionContext, Policy};
use crate::models::{Action, DiscreteAction};

/// Baseline: buy with everything the risk limits allow and never sell
///
/// Keeps asking to buy while flat or under-sized; the risk gate caps the
/// position. Stop-loss and take-profit exits still apply.
#[derive(Debug, Clone, Default)]
pub struct BuyAndHoldStrategy;

impl BuyAndHoldStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Policy for BuyAndHoldStrategy {
    fn name(&self) -> &str {
        "BuyAndHold"
    }

    fn decide(&mut self, ctx: &DecisionContext<'_>) -> Action {
        if ctx.state.account.cash_fraction > 1e-6 {
            Action::Discrete(DiscreteAction::Buy100)
        } else {
            Action::HOLD
        }
    }
}
