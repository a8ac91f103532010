use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by the trading engine
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("insufficient history: need {needed} candles, got {got}")]
    InsufficientHistory { needed: usize, got: usize },

    #[error("data gap detected between {from} and {to}: {gap_secs}s (expected {expected_secs}s)")]
    DataGap {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        gap_secs: i64,
        expected_secs: i64,
    },

    #[error("invalid candle at {timestamp}: {reason}")]
    InvalidCandle {
        timestamp: DateTime<Utc>,
        reason: String,
    },

    #[error("step called before reset")]
    EpisodeNotStarted,

    #[error("step called after the episode terminated")]
    EpisodeEnded,

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("numerical divergence during learning (loss = {loss})")]
    NumericalDivergence { loss: f64 },

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("candle cache error: {0}")]
    Cache(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures at the exchange boundary
///
/// Only `Transient` is retried. Everything else is surfaced to the runner
/// immediately.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    #[error("transient exchange failure: {0}")]
    Transient(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("order {client_order_id} is in an unknown state")]
    UnknownState { client_order_id: String },
}

impl ExecutionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionError::Transient(_))
    }
}
