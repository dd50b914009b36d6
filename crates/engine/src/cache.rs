use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, warn};

use common::time::CANDLE_SECS;
use common::{Candle, Error, PriceProvider, Result, Signal};

/// Open time of the first candle relevant to `signal` in this cycle.
///
/// The candle that was still forming at the previous check is read again;
/// nothing before the anchor is ever considered.
pub fn window_start(signal: &Signal) -> i64 {
    signal
        .anchor_ts
        .max(signal.last_check_ts - CANDLE_SECS + 1)
}

/// Candles fetched once per distinct symbol for one evaluation cycle.
#[derive(Debug, Default)]
pub struct CandleBatch {
    candles: HashMap<String, Vec<Candle>>,
    fetches: usize,
}

impl CandleBatch {
    /// Fetch every supported symbol among `signals` exactly once, from the
    /// earliest window start any of its signals needs.
    ///
    /// Up to `concurrency` requests run at once, each holding its slot for
    /// `delay` after completing. A transient failure leaves that symbol with
    /// no candles; quota exhaustion fails the whole batch.
    pub async fn fetch(
        provider: &dyn PriceProvider,
        signals: &[Signal],
        concurrency: usize,
        delay: Duration,
    ) -> Result<Self> {
        let mut since_by_symbol: BTreeMap<&str, i64> = BTreeMap::new();
        for signal in signals {
            if !provider.supports(&signal.symbol) {
                continue;
            }
            let start = window_start(signal);
            since_by_symbol
                .entry(signal.symbol.as_str())
                .and_modify(|since| *since = (*since).min(start))
                .or_insert(start);
        }

        // Owned symbols: a closure over borrowed items makes the caller's
        // future fail rustc's `Send` check when it is spawned.
        let since_by_symbol: Vec<(String, i64)> = since_by_symbol
            .into_iter()
            .map(|(symbol, since)| (symbol.to_string(), since))
            .collect();
        let results: Vec<(String, Result<Vec<Candle>>)> = stream::iter(since_by_symbol)
            .map(|(symbol, since)| async move {
                let result = provider.candles_since(&symbol, since).await;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                (symbol, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut batch = CandleBatch {
            fetches: results.len(),
            ..Default::default()
        };
        let mut exhausted = false;
        for (symbol, result) in results {
            match result {
                Ok(candles) => {
                    debug!(symbol, count = candles.len(), "Candles cached");
                    batch.candles.insert(symbol.to_string(), candles);
                }
                Err(e) if e.is_quota_exhausted() => exhausted = true,
                Err(e) => {
                    warn!(symbol, error = %e, "Candle fetch failed, treating as no new candles");
                    batch.candles.insert(symbol.to_string(), Vec::new());
                }
            }
        }

        if exhausted {
            return Err(Error::QuotaExhausted);
        }
        Ok(batch)
    }

    pub fn fetches(&self) -> usize {
        self.fetches
    }

    /// The candles relevant to `signal`, oldest first. Empty for symbols that
    /// were not fetched.
    pub fn window_for(&self, signal: &Signal) -> &[Candle] {
        let Some(candles) = self.candles.get(&signal.symbol) else {
            return &[];
        };
        let start = window_start(signal);
        let first = candles.partition_point(|c| c.open_time < start);
        &candles[first..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{candle, signal, ScriptedProvider};

    const NOW: i64 = 1_705_312_800;

    #[tokio::test]
    async fn one_fetch_per_distinct_symbol() {
        let provider = ScriptedProvider::default()
            .with_candles("EURUSD", vec![candle(NOW - 120, 1.0, 1.0)])
            .with_candles("XAUUSD", vec![]);
        let signals = vec![
            signal(1, "EURUSD", NOW - 600),
            signal(2, "EURUSD", NOW - 300),
            signal(3, "XAUUSD", NOW - 300),
            signal(4, "EURUSD", NOW - 900),
            signal(5, "US30", NOW - 900),
        ];

        let batch = CandleBatch::fetch(&provider, &signals, 4, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(batch.fetches(), 2);
        let calls = provider.calls();
        assert_eq!(calls.len(), 2);
        let eur_since = calls.iter().find(|(s, _)| s == "EURUSD").unwrap().1;
        assert_eq!(eur_since, window_start(&signals[3]), "earliest window wins");
        assert!(batch.window_for(&signals[4]).is_empty());
    }

    #[tokio::test]
    async fn quota_exhaustion_fails_the_batch() {
        let provider = ScriptedProvider::default().exhausted();
        let signals = vec![signal(1, "EURUSD", NOW - 600)];
        let err = CandleBatch::fetch(&provider, &signals, 1, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(err.is_quota_exhausted());
    }

    #[tokio::test]
    async fn transient_failure_yields_empty_window() {
        let provider = ScriptedProvider::default().failing("EURUSD");
        let signals = vec![signal(1, "EURUSD", NOW - 600)];
        let batch = CandleBatch::fetch(&provider, &signals, 1, Duration::ZERO)
            .await
            .unwrap();
        assert!(batch.window_for(&signals[0]).is_empty());
    }

    #[tokio::test]
    async fn window_rereads_one_candle_and_respects_anchor() {
        let candles: Vec<Candle> = (0..10)
            .map(|i| candle(NOW - 600 + i * 60, 1.0, 1.0))
            .collect();
        let provider = ScriptedProvider::default().with_candles("EURUSD", candles);

        let mut s = signal(1, "EURUSD", NOW - 700);
        let batch = CandleBatch::fetch(&provider, &[s.clone()], 1, Duration::ZERO)
            .await
            .unwrap();

        // Fresh signal: starts at its anchor.
        assert_eq!(
            batch.window_for(&s).first().map(|c| c.open_time),
            Some(s.anchor_ts.max(NOW - 600))
        );

        s.last_check_ts = NOW - 200; // mid-candle at NOW-240
        assert_eq!(batch.window_for(&s).first().map(|c| c.open_time), Some(NOW - 240));

        // A cursor exactly on a boundary re-reads nothing before it.
        s.last_check_ts = NOW - 180;
        assert_eq!(batch.window_for(&s).first().map(|c| c.open_time), Some(NOW - 180));
    }
}
