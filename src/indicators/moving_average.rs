/// Calculate Simple Moving Average (SMA) of the last `period` prices
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Rolling SMA aligned with `prices`
pub fn calculate_sma_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut series = vec![None; prices.len()];
    if period == 0 || prices.len() < period {
        return series;
    }

    let mut sum: f64 = prices[..period].iter().sum();
    series[period - 1] = Some(sum / period as f64);
    for i in period..prices.len() {
        sum += prices[i] - prices[i - period];
        series[i] = Some(sum / period as f64);
    }

    series
}

/// Calculate Exponential Moving Average (EMA) over the whole slice
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    calculate_ema_series(prices, period).last().copied().flatten()
}

/// EMA aligned with `prices`, seeded with the SMA of the first `period` values
///
/// The recursion runs from the start of the slice, so callers that want
/// warm-up-free values must pass the full history rather than a window.
pub fn calculate_ema_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut series = vec![None; prices.len()];
    if period == 0 || prices.len() < period {
        return series;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = prices[..period].iter().sum::<f64>() / period as f64;
    series[period - 1] = Some(ema);

    for i in period..prices.len() {
        ema = (prices[i] - ema) * multiplier + ema;
        series[i] = Some(ema);
    }

    series
}
