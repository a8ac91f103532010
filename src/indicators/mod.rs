// Technical indicators
// Scalar helpers return the latest value; *_series helpers return one entry
// per input bar (None during warm-up) so callers can index by candle.

pub mod atr;
pub mod bollinger;
pub mod macd;
pub mod moving_average;
pub mod rsi;

pub use atr::{calculate_atr, calculate_atr_series};
pub use bollinger::{calculate_bollinger, calculate_bollinger_series, BollingerBands};
pub use macd::{calculate_macd, calculate_macd_series, Macd};
pub use moving_average::{calculate_ema, calculate_ema_series, calculate_sma, calculate_sma_series};
pub use rsi::{calculate_rsi, calculate_rsi_series};
