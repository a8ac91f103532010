use serde::{Deserialize, Serialize};

use super::manager::RiskDecision;
use crate::models::Side;

/// How much the bot may do on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MaturityLevel {
    /// Decide and report, never place orders
    AnalysisOnly,
    /// Only reduce exposure: forced exits and sells
    AutoExit,
    /// Trade both ways
    #[default]
    FullAuto,
}

impl MaturityLevel {
    pub fn permits(&self, decision: &RiskDecision) -> bool {
        match (self, decision) {
            (_, RiskDecision::Hold | RiskDecision::Veto(_)) => true,
            (MaturityLevel::AnalysisOnly, _) => false,
            (MaturityLevel::AutoExit, RiskDecision::ForceExit { .. }) => true,
            (MaturityLevel::AutoExit, RiskDecision::Allow(order)) => order.side == Side::Sell,
            (MaturityLevel::FullAuto, _) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderAmount;
    use crate::risk::{ExitReason, TradeOrder};

    fn allow(side: Side) -> RiskDecision {
        RiskDecision::Allow(TradeOrder {
            side,
            amount: OrderAmount::Base(1.0),
            resized: false,
        })
    }

    #[test]
    fn test_analysis_only_never_trades() {
        let level = MaturityLevel::AnalysisOnly;
        assert!(!level.permits(&allow(Side::Buy)));
        assert!(!level.permits(&RiskDecision::ForceExit {
            reason: ExitReason::StopLoss,
            quantity: 1.0
        }));
        assert!(level.permits(&RiskDecision::Hold));
    }

    #[test]
    fn test_auto_exit_only_reduces() {
        let level = MaturityLevel::AutoExit;
        assert!(!level.permits(&allow(Side::Buy)));
        assert!(level.permits(&allow(Side::Sell)));
        assert!(level.permits(&RiskDecision::ForceExit {
            reason: ExitReason::TakeProfit,
            quantity: 1.0
        }));
    }

    #[test]
    fn test_full_auto_permits_all() {
        assert!(MaturityLevel::FullAuto.permits(&allow(Side::Buy)));
    }
}
