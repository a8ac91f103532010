//! Parallel parameter sweeps over rule strategies
//!
//! Every run owns its environment and policy; workers share only the
//! read-only candles and runner configuration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

use crate::backtest::metrics::EvaluationMetrics;
use crate::backtest::runner::BacktestRunner;
use crate::error::TradingError;
use crate::models::Candle;
use crate::strategy::{
    BollingerParams, EmaCrossoverParams, MacdParams, RsiParams, StrategyConfig,
};
use crate::Result;

#[derive(Debug, Clone)]
pub struct SweepEntry {
    pub config: StrategyConfig,
    pub metrics: EvaluationMetrics,
}

/// Default grids, one per rule strategy family
pub fn default_grid() -> Vec<StrategyConfig> {
    let mut grid = Vec::new();

    for period in [7, 14, 21] {
        for (oversold, overbought) in [(25.0, 75.0), (30.0, 70.0), (35.0, 65.0)] {
            grid.push(StrategyConfig::Rsi(RsiParams {
                period,
                oversold,
                overbought,
            }));
        }
    }
    for (fast, slow) in [(5, 20), (9, 21), (12, 26), (20, 50)] {
        grid.push(StrategyConfig::EmaCrossover(EmaCrossoverParams { fast, slow }));
    }
    for (fast, slow, signal) in [(8, 17, 9), (12, 26, 9)] {
        grid.push(StrategyConfig::Macd(MacdParams { fast, slow, signal }));
    }
    for period in [14, 20] {
        for std_dev in [1.5, 2.0, 2.5] {
            grid.push(StrategyConfig::Bollinger(BollingerParams { period, std_dev }));
        }
    }
    grid.push(StrategyConfig::BuyAndHold);
    grid
}

/// Backtest every config on `workers` threads; results keep input order
pub fn run_sweep(
    runner: &BacktestRunner,
    candles: &[Candle],
    configs: &[StrategyConfig],
    workers: usize,
) -> Result<Vec<SweepEntry>> {
    if configs.is_empty() {
        return Ok(Vec::new());
    }

    let worker_count = workers.max(1).min(configs.len());
    let state_size = runner.pipeline().state_size();
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<(usize, Result<EvaluationMetrics>)>();

    tracing::info!(
        "Sweeping {} configurations on {} workers",
        configs.len(),
        worker_count
    );

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let tx = tx.clone();
            let next = &next;
            scope.spawn(move || loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                let Some(config) = configs.get(index) else {
                    break;
                };

                let outcome = config
                    .build(state_size)
                    .and_then(|mut policy| runner.run(policy.as_mut(), candles))
                    .map(|result| result.metrics);
                if tx.send((index, outcome)).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);

    let mut slots: Vec<Option<EvaluationMetrics>> = vec![None; configs.len()];
    for (index, outcome) in rx {
        slots[index] = Some(outcome?);
    }

    configs
        .iter()
        .zip(slots)
        .map(|(config, metrics)| {
            metrics
                .map(|metrics| SweepEntry {
                    config: config.clone(),
                    metrics,
                })
                .ok_or_else(|| {
                    TradingError::InvalidConfig(format!(
                        "sweep run for {} did not finish",
                        config.name()
                    ))
                })
        })
        .collect()
}

/// Highest Sharpe first
pub fn rank_by_sharpe(entries: &mut [SweepEntry]) {
    entries.sort_by(|a, b| b.metrics.sharpe_ratio.total_cmp(&a.metrics.sharpe_ratio));
}

pub fn print_sweep_table(entries: &[SweepEntry]) {
    println!("Strategy                                 | Return % | Sharpe | Trades | Win Rate");
    println!("-----------------------------------------|----------|--------|--------|---------");
    for entry in entries {
        let label = serde_json::to_string(&entry.config)
            .unwrap_or_else(|_| entry.config.name().to_string());
        println!(
            "{:<40} | {:>+8.2} | {:>6.2} | {:>6} | {:>7.1}%",
            label,
            entry.metrics.total_return * 100.0,
            entry.metrics.sharpe_ratio,
            entry.metrics.total_trades,
            entry.metrics.win_rate * 100.0
        );
    }
}
