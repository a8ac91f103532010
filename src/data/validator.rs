use chrono::{Duration, Utc};

use crate::error::TradingError;
use crate::models::{Candle, Timeframe};
use crate::Result;

/// Validates OHLC candle data for sanity and correctness
#[derive(Debug, Default, Clone, Copy)]
pub struct CandleValidator;

impl CandleValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a candle for correctness
    pub fn validate(&self, candle: &Candle) -> Result<()> {
        self.validate_prices(candle)?;
        self.validate_timestamp(candle)?;
        self.validate_ohlc_relationship(candle)?;
        Ok(())
    }

    /// Validate that all prices are positive and finite
    fn validate_prices(&self, candle: &Candle) -> Result<()> {
        for (name, value) in [
            ("open", candle.open),
            ("high", candle.high),
            ("low", candle.low),
            ("close", candle.close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(candle, format!("invalid {} price: {}", name, value)));
            }
        }
        // Volume can be 0.0 (interpolated bars)
        if !candle.volume.is_finite() || candle.volume < 0.0 {
            return Err(invalid(candle, format!("invalid volume: {}", candle.volume)));
        }
        Ok(())
    }

    /// Validate that timestamp is not in the future
    fn validate_timestamp(&self, candle: &Candle) -> Result<()> {
        let now = Utc::now();
        if candle.open_time > now {
            return Err(invalid(
                candle,
                format!("timestamp is in the future (now: {})", now),
            ));
        }
        Ok(())
    }

    /// Validate OHLC relationships (high >= low, etc.)
    fn validate_ohlc_relationship(&self, candle: &Candle) -> Result<()> {
        if candle.high < candle.low {
            return Err(invalid(
                candle,
                format!("high ({}) is less than low ({})", candle.high, candle.low),
            ));
        }
        if candle.high < candle.open.max(candle.close) {
            return Err(invalid(
                candle,
                format!("high ({}) is below open/close", candle.high),
            ));
        }
        if candle.low > candle.open.min(candle.close) {
            return Err(invalid(
                candle,
                format!("low ({}) is above open/close", candle.low),
            ));
        }
        Ok(())
    }
}

fn invalid(candle: &Candle, reason: String) -> TradingError {
    TradingError::InvalidCandle {
        timestamp: candle.open_time,
        reason,
    }
}

/// Check candles are valid, strictly time-ordered and gap-free
///
/// A gap is any spacing above 1.5x the timeframe interval.
pub fn validate_series(candles: &[Candle], timeframe: Timeframe) -> Result<()> {
    let validator = CandleValidator::new();
    for candle in candles {
        validator.validate(candle)?;
    }

    let expected_secs = timeframe.as_secs();
    let max_gap_secs = expected_secs + expected_secs / 2;

    for window in candles.windows(2) {
        let diff = (window[1].open_time - window[0].open_time).num_seconds();
        if diff <= 0 {
            return Err(invalid(
                &window[1],
                "candles are not strictly increasing in time".to_string(),
            ));
        }
        if diff > max_gap_secs {
            return Err(TradingError::DataGap {
                from: window[0].open_time,
                to: window[1].open_time,
                gap_secs: diff,
                expected_secs,
            });
        }
    }

    Ok(())
}

/// Insert flat bars (previous close, zero volume) for every missing interval
pub fn fill_gaps(candles: &[Candle], timeframe: Timeframe) -> Vec<Candle> {
    let step = Duration::seconds(timeframe.as_secs());
    let max_gap_secs = timeframe.as_secs() + timeframe.as_secs() / 2;
    let mut filled = Vec::with_capacity(candles.len());

    for (i, candle) in candles.iter().enumerate() {
        if i > 0 {
            let prev = candles[i - 1];
            if (candle.open_time - prev.open_time).num_seconds() > max_gap_secs {
                let mut open_time = prev.open_time + step;
                while (candle.open_time - open_time).num_seconds() * 2 >= timeframe.as_secs() {
                    filled.push(Candle {
                        open_time,
                        open: prev.close,
                        high: prev.close,
                        low: prev.close,
                        close: prev.close,
                        volume: 0.0,
                    });
                    open_time += step;
                }
            }
        }
        filled.push(*candle);
    }

    filled
}

/// Validate a historical series, optionally interpolating gaps first
pub fn prepare_candles(
    candles: Vec<Candle>,
    timeframe: Timeframe,
    interpolate_gaps: bool,
) -> Result<Vec<Candle>> {
    if !interpolate_gaps {
        validate_series(&candles, timeframe)?;
        return Ok(candles);
    }

    let filled = fill_gaps(&candles, timeframe);
    if filled.len() != candles.len() {
        tracing::warn!(
            "Interpolated {} missing {} candles",
            filled.len() - candles.len(),
            timeframe
        );
    }
    validate_series(&filled, timeframe)?;
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{MarketScenario, SyntheticDataGenerator};

    fn make_valid_candle() -> Candle {
        Candle {
            open_time: Utc::now() - Duration::hours(1),
            open: 100.0,
            high: 102.0,
            low: 99.0,
            close: 101.0,
            volume: 1000000.0,
        }
    }

    #[test]
    fn test_valid_candle() {
        assert!(CandleValidator::new().validate(&make_valid_candle()).is_ok());
    }

    #[test]
    fn test_negative_price_rejected() {
        let mut candle = make_valid_candle();
        candle.low = -1.0;
        let err = CandleValidator::new().validate(&candle).unwrap_err();
        assert!(err.to_string().contains("invalid low price"));
    }

    #[test]
    fn test_high_below_close_rejected() {
        let mut candle = make_valid_candle();
        candle.high = 100.5;
        assert!(CandleValidator::new().validate(&candle).is_err());
    }

    #[test]
    fn test_future_candle_rejected() {
        let mut candle = make_valid_candle();
        candle.open_time = Utc::now() + Duration::hours(2);
        assert!(CandleValidator::new().validate(&candle).is_err());
    }

    #[test]
    fn test_series_gap_detected() {
        let candles = SyntheticDataGenerator::new(42).generate(MarketScenario::WithGaps, 100, 300);
        let result = validate_series(&candles, Timeframe::M5);
        assert!(matches!(
            result,
            Err(TradingError::DataGap {
                gap_secs: 600,
                expected_secs: 300,
                ..
            })
        ));
    }

    #[test]
    fn test_series_out_of_order() {
        let mut candles =
            SyntheticDataGenerator::new(42).generate(MarketScenario::Uptrend, 10, 300);
        candles.swap(3, 4);
        let err = validate_series(&candles, Timeframe::M5).unwrap_err();
        assert!(err.to_string().contains("strictly increasing"));
    }

    #[test]
    fn test_interpolation_fills_gaps() {
        let candles = SyntheticDataGenerator::new(42).generate(MarketScenario::WithGaps, 100, 300);
        let prepared = prepare_candles(candles.clone(), Timeframe::M5, true).unwrap();

        assert_eq!(prepared.len(), 102);
        let inserted = prepared
            .iter()
            .find(|c| c.volume == 0.0)
            .expect("flat bar inserted");
        assert_eq!(inserted.open, inserted.close);
        assert!(validate_series(&prepared, Timeframe::M5).is_ok());
    }

    #[test]
    fn test_no_interpolation_fails_on_gap() {
        let candles = SyntheticDataGenerator::new(42).generate(MarketScenario::WithGaps, 100, 300);
        assert!(prepare_candles(candles, Timeframe::M5, false).is_err());
    }
}
