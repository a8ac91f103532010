pub mod metrics;
pub mod runner;
pub mod sweep;

pub use metrics::EvaluationMetrics;
pub use runner::{BacktestResult, BacktestRunner};
pub use sweep::{default_grid, print_sweep_table, rank_by_sharpe, run_sweep, SweepEntry};
