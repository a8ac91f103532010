use crate::models::{Candle, Timeframe};
use crate::Result;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

/// Historical candle store backed by Redis sorted sets
///
/// Key: `candles:{symbol}:{timeframe}`, score: open time in seconds,
/// member: the candle as JSON.
pub struct RedisCandleStore {
    conn: ConnectionManager,
}

impl RedisCandleStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| {
                redis::RedisError::from((
                    redis::ErrorKind::IoError,
                    "Redis connection timeout after 5 seconds",
                ))
            })??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    fn key(symbol: &str, timeframe: Timeframe) -> String {
        format!("candles:{}:{}", symbol, timeframe)
    }

    /// Save candles, replacing any stored bar with the same open time
    pub async fn save_candles(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<()> {
        let key = Self::key(symbol, timeframe);

        for candle in candles {
            let score = candle.open_time.timestamp();
            let value = serde_json::to_string(candle)?;

            self.conn
                .zrembyscore::<_, _, _, ()>(&key, score, score)
                .await?;
            self.conn.zadd::<_, _, _, ()>(&key, value, score).await?;
        }

        tracing::debug!("Saved {} {} candles for {}", candles.len(), timeframe, symbol);

        Ok(())
    }

    /// Load candles with `from <= open_time <= to`, oldest first
    pub async fn load_range(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let key = Self::key(symbol, timeframe);
        let results: Vec<String> = self
            .conn
            .zrangebyscore(&key, from.timestamp(), to.timestamp())
            .await?;

        let candles = results
            .iter()
            .map(|json| serde_json::from_str::<Candle>(json))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::info!(
            "Loaded {} {} candles for {} from Redis",
            candles.len(),
            timeframe,
            symbol
        );

        Ok(candles)
    }

    pub async fn count(&mut self, symbol: &str, timeframe: Timeframe) -> Result<usize> {
        let count: usize = self.conn.zcard(Self::key(symbol, timeframe)).await?;
        Ok(count)
    }

    /// Remove candles older than `before`
    pub async fn prune_before(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        before: DateTime<Utc>,
    ) -> Result<usize> {
        let removed: usize = self
            .conn
            .zrembyscore(Self::key(symbol, timeframe), "-inf", before.timestamp() - 1)
            .await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn candle(hours_ago: i64, price: f64) -> Candle {
        let now = Utc::now();
        Candle {
            open_time: now - ChronoDuration::hours(hours_ago),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: price * 1000.0,
        }
    }

    #[test]
    fn test_key_format() {
        assert_eq!(
            RedisCandleStore::key("BTC/USDT", Timeframe::H1),
            "candles:BTC/USDT:1h"
        );
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_save_and_load_range() {
        let mut store = RedisCandleStore::new("redis://127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis");
        let symbol = "TEST_RANGE";
        let _ = store.prune_before(symbol, Timeframe::H1, Utc::now()).await;

        let candles = vec![candle(48, 100.0), candle(12, 101.0), candle(1, 102.0)];
        store.save_candles(symbol, Timeframe::H1, &candles).await.unwrap();

        let loaded = store
            .load_range(
                symbol,
                Timeframe::H1,
                Utc::now() - ChronoDuration::hours(24),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].close, 101.0);
        assert_eq!(loaded[1].close, 102.0);

        let _ = store.prune_before(symbol, Timeframe::H1, Utc::now()).await;
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_save_replaces_same_bar() {
        let mut store = RedisCandleStore::new("redis://127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis");
        let symbol = "TEST_REPLACE";
        let _ = store.prune_before(symbol, Timeframe::H1, Utc::now()).await;

        let mut bar = candle(2, 100.0);
        store.save_candles(symbol, Timeframe::H1, &[bar]).await.unwrap();
        bar.close = 105.0;
        store.save_candles(symbol, Timeframe::H1, &[bar]).await.unwrap();

        assert_eq!(store.count(symbol, Timeframe::H1).await.unwrap(), 1);
        let _ = store.prune_before(symbol, Timeframe::H1, Utc::now()).await;
    }
}
