//! Scripted collaborators shared by the engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use common::time::anchor_for;
use common::{
    Candle, Error, PriceProvider, RelayEvent, RelaySink, RelayThread, Result, Side, Signal,
    SignalStatus,
};

use crate::twelvedata::map_symbol;

/// Serves canned candles per symbol. With a cap it behaves like the real
/// provider: each response keeps only the latest `cap` bars.
#[derive(Default)]
pub struct ScriptedProvider {
    candles: HashMap<String, Vec<Candle>>,
    failing: HashSet<String>,
    failing_after: HashMap<String, usize>,
    exhausted: bool,
    cap: Option<usize>,
    calls: Mutex<Vec<(String, i64)>>,
    bounded: Mutex<Vec<(String, i64, i64)>>,
}

impl ScriptedProvider {
    pub fn with_candles(mut self, symbol: &str, candles: Vec<Candle>) -> Self {
        self.candles.insert(symbol.to_string(), candles);
        self
    }

    pub fn failing(mut self, symbol: &str) -> Self {
        self.failing.insert(symbol.to_string());
        self
    }

    /// Serve `symbol` for `ok_calls` requests, then time out.
    pub fn failing_after(mut self, symbol: &str, ok_calls: usize) -> Self {
        self.failing_after.insert(symbol.to_string(), ok_calls);
        self
    }

    pub fn exhausted(mut self) -> Self {
        self.exhausted = true;
        self
    }

    pub fn capped(mut self, cap: usize) -> Self {
        self.cap = Some(cap);
        self
    }

    /// Unbounded requests, as `(symbol, since)`.
    pub fn calls(&self) -> Vec<(String, i64)> {
        self.calls.lock().unwrap().clone()
    }

    /// Bounded requests, as `(symbol, since, until)`.
    pub fn bounded_calls(&self) -> Vec<(String, i64, i64)> {
        self.bounded.lock().unwrap().clone()
    }

    fn requests_for(&self, symbol: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.0 == symbol).count()
            + self.bounded.lock().unwrap().iter().filter(|c| c.0 == symbol).count()
    }

    fn serve(&self, symbol: &str, since: i64, until: i64) -> Result<Vec<Candle>> {
        if self.exhausted {
            return Err(Error::QuotaExhausted);
        }
        let spent = self
            .failing_after
            .get(symbol)
            .is_some_and(|ok| self.requests_for(symbol) > *ok);
        if self.failing.contains(symbol) || spent {
            return Err(Error::Provider("timeout".into()));
        }
        let mut out: Vec<Candle> = self
            .candles
            .get(symbol)
            .map(|all| {
                all.iter()
                    .filter(|c| c.open_time >= since && c.open_time < until)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(cap) = self.cap {
            let excess = out.len().saturating_sub(cap);
            out.drain(..excess);
        }
        Ok(out)
    }
}

#[async_trait]
impl PriceProvider for ScriptedProvider {
    fn supports(&self, symbol: &str) -> bool {
        map_symbol(symbol).is_some()
    }

    async fn candles_since(&self, symbol: &str, since: i64) -> Result<Vec<Candle>> {
        self.calls.lock().unwrap().push((symbol.to_string(), since));
        self.serve(symbol, since, i64::MAX)
    }

    async fn candles_between(&self, symbol: &str, since: i64, until: i64) -> Result<Vec<Candle>> {
        self.bounded
            .lock()
            .unwrap()
            .push((symbol.to_string(), since, until));
        self.serve(symbol, since, until)
    }

    fn max_span_secs(&self) -> i64 {
        self.cap.map_or(i64::MAX, |cap| cap as i64 * 60)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<RelayEvent>>,
}

impl RecordingSink {
    pub fn statuses(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| format!("{}:{}", e.status, e.tp_level))
            .collect()
    }
}

#[async_trait]
impl RelaySink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn publish(
        &self,
        event: &RelayEvent,
        _thread: Option<RelayThread>,
    ) -> Result<Option<RelayThread>> {
        self.events.lock().unwrap().push(event.clone());
        Ok(Some(RelayThread {
            chat_id: -500,
            message_id: event.signal_id * 10,
        }))
    }
}

pub fn candle(open_time: i64, high: f64, low: f64) -> Candle {
    Candle {
        open_time,
        open: (high + low) / 2.0,
        high,
        low,
        close: (high + low) / 2.0,
        volume: 0.0,
    }
}

/// Long signal at entry 100 with sl 95 and targets 105/110, never checked.
pub fn signal(id: i64, symbol: &str, created_at: i64) -> Signal {
    Signal {
        id,
        source_chat: -1,
        source_message: id,
        source_title: None,
        symbol: symbol.to_string(),
        side: Side::Long,
        entry: 100.0,
        stop_loss: Some(95.0),
        take_profits: [Some(105.0), Some(110.0), None, None],
        hits: 0,
        status: SignalStatus::Open,
        close_reason: None,
        last_announced_hit: 0,
        last_announced_ts: 0,
        created_at,
        anchor_ts: anchor_for(created_at),
        last_check_ts: created_at,
        relay: None,
    }
}
