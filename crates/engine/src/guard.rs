use tracing::{debug, info};

use common::{Candle, PriceProvider, Result, Signal};
use evaluator::evaluate;

/// Result of re-checking a provisional stop-loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopVerdict {
    /// No take-profit was ever reached: the stop stands.
    Confirmed,
    /// The full history reached `hits` levels before any stop.
    Overridden { hits: u8 },
}

/// Replay the whole history of `signal` from its anchor, starting at zero hits.
///
/// A stop seen in a narrow window may hide an earlier take-profit that the
/// window never covered. Any level reached in the full replay overrides it.
pub async fn confirm_stop(
    provider: &dyn PriceProvider,
    signal: &Signal,
    tolerance: f64,
    now: i64,
) -> Result<StopVerdict> {
    let candles = full_history(provider, &signal.symbol, signal.anchor_ts, now).await?;
    let full = evaluate(&signal.levels(), tolerance, &candles, 0);

    if full.hits >= 1 {
        info!(
            signal_id = signal.id,
            symbol = %signal.symbol,
            hits = full.hits,
            "Stop-loss overridden by full-history recompute"
        );
        Ok(StopVerdict::Overridden { hits: full.hits })
    } else {
        Ok(StopVerdict::Confirmed)
    }
}

/// Every candle from `since` up to `now`, fetched in spans the provider
/// returns without truncation.
async fn full_history(
    provider: &dyn PriceProvider,
    symbol: &str,
    since: i64,
    now: i64,
) -> Result<Vec<Candle>> {
    let span = provider.max_span_secs().max(60);
    let mut candles = Vec::new();
    let mut start = since;
    while now - start > span {
        let until = start + span;
        candles.extend(provider.candles_between(symbol, start, until).await?);
        start = until;
    }
    candles.extend(provider.candles_since(symbol, start).await?);

    candles.sort_by_key(|c| c.open_time);
    candles.dedup_by_key(|c| c.open_time);
    debug!(symbol, since, count = candles.len(), "Full history loaded");
    Ok(candles)
}
