//! Average true range with Wilder smoothing
//!
//! A bar's true range also covers the gap from the previous close. The first
//! ATR is the plain mean of `period` true ranges.
use crate::models::Candle;

/// Latest ATR over the whole slice, or None if insufficient data
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    calculate_atr_series(candles, period).last().copied().flatten()
}

/// ATR aligned with `candles`; first value at index `period`
pub fn calculate_atr_series(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut series = vec![None; candles.len()];
    if period == 0 || candles.len() < period + 1 {
        return series;
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|pair| {
            let (prev, current) = (&pair[0], &pair[1]);
            (current.high - current.low)
                .max((current.high - prev.close).abs())
                .max((current.low - prev.close).abs())
        })
        .collect();

    let mut atr = true_ranges[..period].iter().sum::<f64>() / period as f64;
    series[period] = Some(atr);

    for i in period..true_ranges.len() {
        atr = (atr * (period as f64 - 1.0) + true_ranges[i]) / period as f64;
        series[i + 1] = Some(atr);
    }

    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn create_test_candles(bars: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        bars
            .iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Candle {
                open_time: start + Duration::hours(i as i64),
                open,
                high,
                low,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_constant_range() {
        let candles = create_test_candles(&[(100.0, 101.0, 99.0, 100.0); 15]);
        let atr = calculate_atr(&candles, 14);

        assert!((atr.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_gaps_count_toward_true_range() {
        // each bar gaps 10 above the previous close with a 2 point range
        let bars: Vec<(f64, f64, f64, f64)> = (0..6)
            .map(|i| {
                let base = 100.0 + 10.0 * i as f64;
                (base, base + 1.0, base - 1.0, base)
            })
            .collect();
        let candles = create_test_candles(&bars);

        let atr = calculate_atr(&candles, 3).unwrap();
        assert!((atr - 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_insufficient_data() {
        let candles = create_test_candles(&[(100.0, 101.0, 99.0, 100.0); 2]);
        assert!(calculate_atr(&candles, 14).is_none());
    }

    #[test]
    fn test_atr_series_alignment() {
        let candles = create_test_candles(&[(100.0, 105.0, 95.0, 100.0); 20]);
        let series = calculate_atr_series(&candles, 14);

        assert_eq!(series.len(), 20);
        assert!(series[13].is_none());
        assert_eq!(series.iter().filter(|v| v.is_some()).count(), 6);
    }
}
