use crate::models::Candle;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MarketScenario {
    /// Steady uptrend with noise
    Uptrend,
    /// Steady downtrend with noise
    Downtrend,
    /// Mean-reverting chop around the base price
    Sideways,
    /// Large random swings (±5% per candle)
    Volatile,
    /// Random walk with a missing candle every 50 bars
    WithGaps,
    /// Growth, a 25% crash, then a partial recovery
    CrashRecovery,
}

/// Seeded price generator for backtests and training runs
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
    base_volume: f64,
    start_time: DateTime<Utc>,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 150.0,
            base_volume: 1_000_000.0,
            start_time: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }

    pub fn with_base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn base_price(&self) -> f64 {
        self.base_price
    }

    /// Generate `num_candles` candles spaced `interval_secs` apart
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        num_candles: usize,
        interval_secs: i64,
    ) -> Vec<Candle> {
        let mut candles = Vec::with_capacity(num_candles);
        let mut price = self.base_price;
        let mut slot: i64 = 0;

        for i in 0..num_candles {
            if scenario == MarketScenario::WithGaps && i % 50 == 49 {
                slot += 1;
            }

            price = self.next_price(scenario, price, i, num_candles);
            let open_time = self.start_time + Duration::seconds(slot * interval_secs);
            candles.push(self.create_candle(price, open_time));
            slot += 1;
        }

        candles
    }

    fn next_price(&mut self, scenario: MarketScenario, price: f64, i: usize, n: usize) -> f64 {
        let next = match scenario {
            MarketScenario::Uptrend => price * (1.0 + 0.002 + self.rng.gen_range(-0.001..0.001)),
            MarketScenario::Downtrend => {
                price * (1.0 - 0.002 + self.rng.gen_range(-0.001..0.001))
            }
            MarketScenario::Sideways => {
                let reversion = (self.base_price - price) * 0.1;
                price + reversion + price * self.rng.gen_range(-0.01..0.01)
            }
            MarketScenario::Volatile => {
                (price * (1.0 + self.rng.gen_range(-0.05..0.05))).max(self.base_price * 0.5)
            }
            MarketScenario::WithGaps => price * (1.0 + self.rng.gen_range(-0.01..0.01)),
            MarketScenario::CrashRecovery => {
                let third = (n / 3).max(1) as f64;
                let drift = if i < n / 3 {
                    0.002
                } else if i < 2 * n / 3 {
                    -0.25 / third
                } else {
                    0.1 / third
                };
                price * (1.0 + drift + self.rng.gen_range(-0.005..0.005))
            }
        };

        next.max(0.01)
    }

    /// Bar around `close` with up to 0.2% wicks; open stays inside the range
    fn create_candle(&mut self, close: f64, open_time: DateTime<Utc>) -> Candle {
        const WICK: f64 = 0.002;

        let high = close * (1.0 + self.rng.gen_range(0.0..WICK));
        let low = close * (1.0 - self.rng.gen_range(0.0..WICK));
        let open = (close * (1.0 + self.rng.gen_range(-WICK..WICK))).clamp(low, high);
        let volume = self.base_volume * self.rng.gen_range(0.7..1.3);

        Candle {
            open_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closes(scenario: MarketScenario, n: usize) -> Vec<f64> {
        SyntheticDataGenerator::new(42)
            .generate(scenario, n, 300)
            .iter()
            .map(|c| c.close)
            .collect()
    }

    #[test]
    fn test_trends_move_in_their_direction() {
        let up = closes(MarketScenario::Uptrend, 500);
        let down = closes(MarketScenario::Downtrend, 500);
        assert_eq!(up.len(), 500);
        assert!(up[499] > up[0] * 1.5);
        assert!(down[499] < down[0] * 0.7);
    }

    #[test]
    fn test_generate_sideways() {
        let base = SyntheticDataGenerator::new(42).base_price();
        assert!(closes(MarketScenario::Sideways, 500)
            .iter()
            .all(|close| (close / base - 1.0).abs() < 0.1));
    }

    #[test]
    fn test_generate_with_gaps() {
        let mut gen = SyntheticDataGenerator::new(42);
        let candles = gen.generate(MarketScenario::WithGaps, 100, 300);

        assert_eq!(candles.len(), 100);
        let has_gap = candles
            .windows(2)
            .any(|w| (w[1].open_time - w[0].open_time).num_seconds() > 300);
        assert!(has_gap);
    }

    #[test]
    fn test_crash_recovery_draws_down() {
        let mut gen = SyntheticDataGenerator::new(42);
        let candles = gen.generate(MarketScenario::CrashRecovery, 300, 3600);

        let peak = candles.iter().map(|c| c.close).fold(f64::MIN, f64::max);
        let trough = candles[100..].iter().map(|c| c.close).fold(f64::MAX, f64::min);
        assert!((peak - trough) / peak > 0.15);
    }

    #[test]
    fn test_same_seed_same_candles() {
        let a = SyntheticDataGenerator::new(7).generate(MarketScenario::Volatile, 50, 60);
        let b = SyntheticDataGenerator::new(7).generate(MarketScenario::Volatile, 50, 60);
        assert_eq!(a, b);
    }

    #[test]
    fn test_ohlc_consistency() {
        let candles = SyntheticDataGenerator::new(3).generate(MarketScenario::Volatile, 100, 300);
        assert!(candles.iter().all(|c| {
            c.low <= c.open.min(c.close) && c.high >= c.open.max(c.close) && c.low > 0.0
        }));
    }
}
