/// Bollinger bands for one bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub middle: f64,
    pub upper: f64,
    pub lower: f64,
}

impl BollingerBands {
    /// Position of `price` within the bands (0 = lower, 1 = upper)
    pub fn percent_b(&self, price: f64) -> f64 {
        let width = self.upper - self.lower;
        if width <= 0.0 {
            return 0.5;
        }
        (price - self.lower) / width
    }

    /// Band width relative to the middle band
    pub fn bandwidth(&self) -> f64 {
        if self.middle == 0.0 {
            return 0.0;
        }
        (self.upper - self.lower) / self.middle
    }
}

/// Bands over the last `period` prices using population standard deviation
pub fn calculate_bollinger(prices: &[f64], period: usize, num_std: f64) -> Option<BollingerBands> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let window = &prices[prices.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    Some(BollingerBands {
        middle,
        upper: middle + num_std * std_dev,
        lower: middle - num_std * std_dev,
    })
}

pub fn calculate_bollinger_series(
    prices: &[f64],
    period: usize,
    num_std: f64,
) -> Vec<Option<BollingerBands>> {
    (0..prices.len())
        .map(|i| calculate_bollinger(&prices[..=i], period, num_std))
        .collect()
}
