// Order execution: simulated fills, exchange boundary and account ledger
pub mod exchange;
pub mod live;
pub mod paper;
pub mod portfolio;
pub mod rest;
pub mod simulated;

pub use exchange::{AccountBalances, Exchange};
pub use live::{LiveExecutor, RetryPolicy};
pub use paper::PaperExchange;
pub use portfolio::{ExchangePosition, Fill, Portfolio, PortfolioSnapshot, PositionView};
pub use rest::RestExchangeClient;
pub use simulated::SimulatedExecutor;
