// Market data: validation, caching, storage and synthetic generation
pub mod candle_cache;
pub mod store;
pub mod synthetic;
pub mod validator;

pub use candle_cache::CandleCache;
pub use store::RedisCandleStore;
pub use synthetic::{MarketScenario, SyntheticDataGenerator};
pub use validator::{fill_gaps, prepare_candles, validate_series, CandleValidator};
