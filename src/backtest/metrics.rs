use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::environment::reward::mean_std;
use crate::models::{Timeframe, Trade};

/// Performance summary of one evaluation run
///
/// Ratios are fractions (0.05 = 5%). Sharpe and Sortino are computed from
/// per-bar equity returns and annualized with the candle timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub initial_equity: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,

    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    /// Gross wins / gross losses; infinite with wins and no losses
    pub profit_factor: f64,

    pub total_commission: f64,
    pub bars: usize,
}

impl EvaluationMetrics {
    pub fn from_run(
        equity_curve: &[(DateTime<Utc>, f64)],
        trades: &[Trade],
        total_commission: f64,
        timeframe: Timeframe,
    ) -> Self {
        let initial_equity = equity_curve.first().map(|(_, e)| *e).unwrap_or(0.0);
        let final_equity = equity_curve.last().map(|(_, e)| *e).unwrap_or(initial_equity);
        let total_return = if initial_equity > 0.0 {
            (final_equity - initial_equity) / initial_equity
        } else {
            0.0
        };

        let returns = bar_returns(equity_curve);
        let annualization = timeframe.periods_per_year().sqrt();

        let winners: Vec<f64> = trades.iter().map(|t| t.profit).filter(|p| *p > 0.0).collect();
        let losers: Vec<f64> = trades
            .iter()
            .map(|t| t.profit)
            .filter(|p| *p <= 0.0)
            .map(f64::abs)
            .collect();
        let gross_win: f64 = winners.iter().sum();
        let gross_loss: f64 = losers.iter().sum();

        let profit_factor = if gross_loss > 0.0 {
            gross_win / gross_loss
        } else if gross_win > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        Self {
            initial_equity,
            final_equity,
            total_return,
            sharpe_ratio: sharpe(&returns) * annualization,
            sortino_ratio: sortino(&returns) * annualization,
            max_drawdown: max_drawdown(equity_curve.iter().map(|(_, e)| *e)),
            total_trades: trades.len(),
            winning_trades: winners.len(),
            losing_trades: losers.len(),
            win_rate: if trades.is_empty() {
                0.0
            } else {
                winners.len() as f64 / trades.len() as f64
            },
            avg_win: average(&winners),
            avg_loss: average(&losers),
            profit_factor,
            total_commission,
            bars: returns.len(),
        }
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self, title: &str) {
        let rule = "═".repeat(56);
        println!("\n╔{}╗", rule);
        println!("║{:^56}║", title.to_uppercase());
        println!("╚{}╝\n", rule);

        println!("📊 P&L SUMMARY");
        println!("  Initial Equity:        ${:.2}", self.initial_equity);
        println!("  Final Equity:          ${:.2}", self.final_equity);
        println!("  Total Return:          {:+.2}%", self.total_return * 100.0);
        println!("  Commission Paid:       ${:.2}", self.total_commission);

        println!("\n📈 TRADE STATISTICS");
        println!("  Total Trades:          {}", self.total_trades);
        println!(
            "  Winning Trades:        {} ({:.1}%)",
            self.winning_trades,
            self.win_rate * 100.0
        );
        println!("  Losing Trades:         {}", self.losing_trades);

        if self.total_trades > 0 {
            println!("\n💰 WIN/LOSS ANALYSIS");
            println!("  Average Win:           ${:.2}", self.avg_win);
            println!("  Average Loss:          ${:.2}", self.avg_loss);
            println!("  Profit Factor:         {:.2}", self.profit_factor);
        }

        println!("\n⚠️  RISK METRICS");
        println!("  Max Drawdown:          {:.2}%", self.max_drawdown * 100.0);
        println!("  Sharpe Ratio:          {:.2}", self.sharpe_ratio);
        println!("  Sortino Ratio:         {:.2}", self.sortino_ratio);
        println!("  Bars Evaluated:        {}", self.bars);

        println!("\n{}\n", rule);
    }
}

fn bar_returns(equity_curve: &[(DateTime<Utc>, f64)]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|pair| {
            let (prev, next) = (pair[0].1, pair[1].1);
            if prev > 0.0 {
                next / prev - 1.0
            } else {
                0.0
            }
        })
        .collect()
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Per-bar Sharpe with a zero risk-free rate
fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let (mean, std) = mean_std(returns.iter().copied());
    if std > 0.0 {
        mean / std
    } else {
        0.0
    }
}

/// Per-bar Sortino: mean over downside deviation
fn sortino(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = average(returns);
    let downside =
        (returns.iter().map(|r| r.min(0.0).powi(2)).sum::<f64>() / returns.len() as f64).sqrt();

    if downside > 0.0 {
        mean / downside
    } else if mean > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

/// Largest peak-to-trough decline as a fraction of the peak
pub fn max_drawdown(equity: impl IntoIterator<Item = f64>) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for value in equity {
        peak = peak.max(value);
        if peak > 0.0 {
            worst = worst.max((peak - value) / peak);
        }
    }
    worst
}
