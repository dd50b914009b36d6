use async_trait::async_trait;

use crate::{Candle, RelayEvent, RelayThread, Result};

/// Source of 1-minute candles.
///
/// `TwelveDataClient` implements this against the REST API. Implementations
/// return `Error::QuotaExhausted` when the provider's credits are spent; every
/// other error is treated as a transient "no new candles" by the scheduler.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Whether the provider can serve this normalized symbol at all.
    fn supports(&self, symbol: &str) -> bool;

    /// Candles with `open_time >= since`, oldest first, up to now.
    async fn candles_since(&self, symbol: &str, since: i64) -> Result<Vec<Candle>>;

    /// Candles with `since <= open_time < until`, oldest first.
    async fn candles_between(&self, symbol: &str, since: i64, until: i64) -> Result<Vec<Candle>> {
        let mut candles = self.candles_since(symbol, since).await?;
        candles.retain(|c| c.open_time < until);
        Ok(candles)
    }

    /// Longest span in seconds one request returns in full. Longer ranges
    /// must be split, or the provider silently drops their oldest candles.
    fn max_span_secs(&self) -> i64 {
        i64::MAX
    }
}

/// Output boundary for announcements.
///
/// Only the relay hub holds sinks. A sink that posts the event somewhere
/// addressable (a chat message) returns the reference so follow-ups can be
/// threaded under it.
#[async_trait]
pub trait RelaySink: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(
        &self,
        event: &RelayEvent,
        thread: Option<RelayThread>,
    ) -> Result<Option<RelayThread>>;
}
