// Core modules
pub mod agent;
pub mod backtest;
pub mod config;
pub mod data;
pub mod environment;
pub mod error;
pub mod execution;
pub mod features;
pub mod indicators;
pub mod live;
pub mod models;
pub mod risk;
pub mod strategy;
pub mod training;

// Re-export commonly used types
pub use error::{ExecutionError, TradingError};
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, TradingError>;
