// Risk management: trade gating, sizing and forced exits
pub mod manager;
pub mod maturity;

pub use manager::{
    AccountSnapshot, ExitReason, RiskDecision, RiskLimits, RiskManager, TradeActivity,
    TradeOrder, VetoReason,
};
pub use maturity::MaturityLevel;
