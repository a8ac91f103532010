use super::moving_average::calculate_ema_series;

/// MACD line, signal line and histogram for one bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Latest MACD over the whole slice
pub fn calculate_macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    calculate_macd_series(prices, fast, slow, signal)
        .last()
        .copied()
        .flatten()
}

/// MACD aligned with `prices`
///
/// The signal EMA is seeded once the MACD line exists, so the first value
/// appears at index `slow + signal - 2`.
pub fn calculate_macd_series(
    prices: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Vec<Option<Macd>> {
    let mut series = vec![None; prices.len()];
    if fast == 0 || slow <= fast || signal == 0 {
        return series;
    }

    let fast_ema = calculate_ema_series(prices, fast);
    let slow_ema = calculate_ema_series(prices, slow);

    let start = slow - 1;
    if prices.len() <= start {
        return series;
    }

    let line: Vec<f64> = (start..prices.len())
        .filter_map(|i| Some(fast_ema[i]? - slow_ema[i]?))
        .collect();
    let signal_line = calculate_ema_series(&line, signal);

    for (offset, value) in signal_line.iter().enumerate() {
        if let Some(signal_value) = value {
            series[start + offset] = Some(Macd {
                line: line[offset],
                signal: *signal_value,
                histogram: line[offset] - signal_value,
            });
        }
    }

    series
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macd_insufficient_data() {
        let prices = vec![100.0; 30];
        assert!(calculate_macd(&prices, 12, 26, 9).is_none());
    }

    #[test]
    fn test_macd_first_value_index() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let series = calculate_macd_series(&prices, 12, 26, 9);
        assert!(series[32].is_none());
        assert!(series[33].is_some());
    }

    #[test]
    fn test_macd_positive_in_uptrend() {
        let prices: Vec<f64> = (0..80).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let macd = calculate_macd(&prices, 12, 26, 9).unwrap();
        assert!(macd.line > 0.0);
        assert!((macd.histogram - (macd.line - macd.signal)).abs() < 1e-12);
    }

    #[test]
    fn test_macd_flat_is_zero() {
        let prices = vec![50.0; 60];
        let macd = calculate_macd(&prices, 12, 26, 9).unwrap();
        assert!(macd.line.abs() < 1e-12);
        assert!(macd.histogram.abs() < 1e-12);
    }
}
