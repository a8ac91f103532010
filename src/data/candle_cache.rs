use crate::models::Candle;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

/// Thread-safe rolling cache of recent candles per symbol
///
/// Clones share the same storage. Readers never block each other.
#[derive(Clone)]
pub struct CandleCache {
    data: Arc<RwLock<HashMap<String, VecDeque<Candle>>>>,
    max_candles: usize,
}

impl CandleCache {
    pub fn new(max_candles: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            max_candles,
        }
    }

    /// Merge freshly fetched candles into the cache
    ///
    /// A candle with the same open time as the newest cached one replaces it
    /// (the exchange keeps updating the current bar). Older candles are ignored.
    /// Returns the number of candles appended.
    pub fn merge(&self, symbol: &str, candles: &[Candle]) -> Result<usize, String> {
        let mut data = self.data.write().map_err(|e| e.to_string())?;
        let series = data.entry(symbol.to_string()).or_default();
        let mut appended = 0;

        for candle in candles {
            match series.back_mut() {
                Some(last) if candle.open_time == last.open_time => *last = *candle,
                Some(last) if candle.open_time < last.open_time => {}
                _ => {
                    series.push_back(*candle);
                    appended += 1;
                }
            }
        }

        while series.len() > self.max_candles {
            series.pop_front();
        }

        Ok(appended)
    }

    /// Get all candles for a symbol, oldest first
    pub fn get_candles(&self, symbol: &str) -> Result<Vec<Candle>, String> {
        let data = self.data.read().map_err(|e| e.to_string())?;
        Ok(data
            .get(symbol)
            .map(|deque| deque.iter().copied().collect())
            .unwrap_or_default())
    }

    /// Get the N most recent candles for a symbol
    pub fn get_recent_candles(&self, symbol: &str, n: usize) -> Result<Vec<Candle>, String> {
        let data = self.data.read().map_err(|e| e.to_string())?;
        Ok(data
            .get(symbol)
            .map(|deque| deque.iter().skip(deque.len().saturating_sub(n)).copied().collect())
            .unwrap_or_default())
    }

    pub fn latest_price(&self, symbol: &str) -> Result<Option<f64>, String> {
        let data = self.data.read().map_err(|e| e.to_string())?;
        Ok(data.get(symbol).and_then(|d| d.back()).map(|c| c.close))
    }

    pub fn candle_count(&self, symbol: &str) -> Result<usize, String> {
        let data = self.data.read().map_err(|e| e.to_string())?;
        Ok(data.get(symbol).map(|d| d.len()).unwrap_or(0))
    }

    pub fn clear_symbol(&self, symbol: &str) -> Result<(), String> {
        let mut data = self.data.write().map_err(|e| e.to_string())?;
        data.remove(symbol);
        Ok(())
    }
}
