use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use common::time::{anchor_for, minute_floor, to_rfc3339};
use common::{
    CloseReason, Config, Error, ExternalUpdate, IncomingSignal, NewSignal, PriceProvider, Result,
    Signal, SignalRef, SignalUpdate, ToleranceTable, UpdateRequest,
};
use evaluator::{evaluate, sanitize, ToleranceLookup};
use relay::{Announcement, Announcer};
use store::SignalStore;

use crate::cache::CandleBatch;
use crate::checker::{apply, plan};
use crate::guard::confirm_stop;

/// Knobs for evaluation and intake.
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub max_signal_age_days: i64,
    pub duplicate_window_secs: i64,
    pub fetch_concurrency: usize,
    pub fetch_delay: Duration,
}

impl TrackerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_signal_age_days: config.max_signal_age_days,
            duplicate_window_secs: config.duplicate_window_secs,
            fetch_concurrency: config.fetch_concurrency,
            fetch_delay: Duration::from_millis(config.fetch_delay_ms),
        }
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            max_signal_age_days: 5,
            duplicate_window_secs: 15 * 60,
            fetch_concurrency: 4,
            fetch_delay: Duration::from_millis(200),
        }
    }
}

/// Summary of one evaluation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub open: usize,
    pub evaluated: usize,
    pub closed: usize,
    pub fetches: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum IngestOutcome {
    NotASignal,
    Rejected(String),
    Duplicate(i64),
    Created(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcome {
    Applied,
    NoChange,
    AlreadyClosed,
}

/// Owns every mutation of tracked signals.
///
/// Intake, the polling cycle and the external update path all take
/// `mutation` around their read-modify-write of a signal, so none of them
/// acts on stale state.
pub struct Tracker {
    store: SignalStore,
    provider: Arc<dyn PriceProvider>,
    announcer: Announcer,
    tolerance: ToleranceTable,
    settings: TrackerSettings,
    mutation: Mutex<()>,
}

impl Tracker {
    pub fn new(
        store: SignalStore,
        provider: Arc<dyn PriceProvider>,
        announcer: Announcer,
        tolerance: ToleranceTable,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            store,
            provider,
            announcer,
            tolerance,
            settings,
            mutation: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &SignalStore {
        &self.store
    }

    pub async fn open_signals(&self, now: i64) -> Result<Vec<Signal>> {
        self.store
            .open_signals(self.settings.max_signal_age_days, now)
            .await
    }

    pub async fn count_open(&self, now: i64) -> Result<i64> {
        self.store
            .count_open(self.settings.max_signal_age_days, now)
            .await
    }

    // ─── Polling ──────────────────────────────────────────────────────────────

    /// Reset every open signal's cursor to the start of the current minute.
    pub async fn warm_start(&self, now: i64) -> Result<u64> {
        let boundary = minute_floor(now);
        let _lock = self.mutation.lock().await;
        let reset = self.store.warm_start(boundary).await?;
        info!(signals = reset, boundary, "Warm start: open signals resume from current minute");
        Ok(reset)
    }

    /// One evaluation cycle over all open, non-expired signals.
    ///
    /// Fails only on storage errors or provider quota exhaustion; anything
    /// going wrong with a single signal is logged and skipped.
    pub async fn run_cycle(&self, now: i64) -> Result<CycleReport> {
        let open = self.open_signals(now).await?;
        let mut report = CycleReport {
            open: open.len(),
            ..CycleReport::default()
        };
        if open.is_empty() {
            return Ok(report);
        }

        let boundary = minute_floor(now);
        let due: Vec<Signal> = open
            .into_iter()
            .filter(|s| s.last_check_ts < boundary)
            .collect();
        if due.is_empty() {
            debug!("No signal has a new candle yet");
            return Ok(report);
        }

        let batch = CandleBatch::fetch(
            self.provider.as_ref(),
            &due,
            self.settings.fetch_concurrency,
            self.settings.fetch_delay,
        )
        .await?;
        report.fetches = batch.fetches();

        for signal in &due {
            match self.check_signal(signal.id, &batch, now).await {
                Ok(Some(reason)) => {
                    report.evaluated += 1;
                    report.closed += 1;
                    info!(signal_id = signal.id, symbol = %signal.symbol, %reason, "Signal closed");
                }
                Ok(None) => report.evaluated += 1,
                Err(e) if e.is_quota_exhausted() => return Err(e),
                Err(e) => {
                    warn!(signal_id = signal.id, symbol = %signal.symbol, error = %e, "Signal check failed");
                }
            }
        }

        Ok(report)
    }

    /// Evaluate one signal against its slice of `batch` and persist the result.
    /// Returns the close reason when this check closed the signal.
    pub async fn check_signal(
        &self,
        id: i64,
        batch: &CandleBatch,
        now: i64,
    ) -> Result<Option<CloseReason>> {
        let _lock = self.mutation.lock().await;

        // Re-read under the lock: an external update may have landed since
        // the open set was loaded.
        let Some(mut signal) = self.store.get(id).await? else {
            return Ok(None);
        };
        if !signal.is_open() {
            return Ok(None);
        }

        let tolerance = self.tolerance.tolerance_for(&signal.symbol);
        let outcome = evaluate(&signal.levels(), tolerance, batch.window_for(&signal), signal.hits);

        let verdict = if outcome.stop_loss_triggered {
            if let Some(at) = outcome.stopped_at {
                info!(signal_id = id, stopped_at = %to_rfc3339(at), "Stop-loss touched, confirming");
            }
            match confirm_stop(self.provider.as_ref(), &signal, tolerance, now).await {
                Ok(verdict) => Some(verdict),
                Err(e) if e.is_quota_exhausted() => return Err(e),
                Err(e) => {
                    warn!(
                        signal_id = id,
                        error = %e,
                        "Stop-loss confirmation failed, leaving signal for next cycle"
                    );
                    return Ok(None);
                }
            }
        } else {
            None
        };

        let transition = plan(&signal, &outcome, verdict, now);
        self.store.update(id, &transition.update).await?;
        apply(&mut signal, &transition.update);

        if let Some(announcement) = transition.announcement {
            self.announce(&signal, announcement, now).await?;
        }
        Ok(transition.closed)
    }

    async fn announce(&self, signal: &Signal, announcement: Announcement, now: i64) -> Result<()> {
        let bookkeeping = self.announcer.announce(signal, announcement, now).await;
        if !bookkeeping.is_empty() {
            self.store.update(signal.id, &bookkeeping).await?;
        }
        Ok(())
    }

    // ─── Intake ───────────────────────────────────────────────────────────────

    /// Register a parsed signal, relay it as `NEW` and remember where it was
    /// posted so later announcements thread under it.
    pub async fn ingest(&self, incoming: IncomingSignal, now: i64) -> Result<IngestOutcome> {
        let Some(record) = &incoming.record else {
            return Ok(IngestOutcome::NotASignal);
        };

        let _lock = self.mutation.lock().await;
        if let Some(existing) = self
            .store
            .find_by_source(incoming.source_chat, incoming.source_message)
            .await?
        {
            return Ok(IngestOutcome::Duplicate(existing.id));
        }

        let sanitized = match sanitize(record) {
            Ok(s) => s,
            Err(e) => {
                warn!(chat = incoming.source_chat, message = incoming.source_message, error = %e, "Signal rejected");
                self.store
                    .append_audit(None, "signal_rejected", &serde_json::to_value(&incoming)?, now)
                    .await?;
                return Ok(IngestOutcome::Rejected(e.to_string()));
            }
        };
        for dropped in &sanitized.dropped {
            warn!(symbol = %sanitized.symbol, "Dropped level: {dropped}");
        }

        let since = incoming.observed_at - self.settings.duplicate_window_secs;
        if let Some(id) = self
            .store
            .recent_duplicate(incoming.source_chat, &sanitized.symbol, sanitized.levels.side, since)
            .await?
        {
            info!(signal_id = id, symbol = %sanitized.symbol, "Duplicate signal ignored");
            return Ok(IngestOutcome::Duplicate(id));
        }

        let new = NewSignal {
            source_chat: incoming.source_chat,
            source_message: incoming.source_message,
            source_title: incoming.source_title.clone(),
            symbol: sanitized.symbol,
            levels: sanitized.levels,
            created_at: incoming.observed_at,
            anchor_ts: anchor_for(incoming.observed_at),
        };
        let Some(id) = self.store.create(&new).await? else {
            let existing = self
                .store
                .find_by_source(incoming.source_chat, incoming.source_message)
                .await?
                .ok_or_else(|| Error::Other("source message vanished after conflict".into()))?;
            return Ok(IngestOutcome::Duplicate(existing.id));
        };
        self.store
            .append_audit(Some(id), "signal_received", &serde_json::to_value(&incoming)?, now)
            .await?;
        info!(signal_id = id, symbol = %new.symbol, side = %new.levels.side, "Signal registered");

        let signal = self.store.get(id).await?.ok_or(Error::NotFound(id))?;
        let bookkeeping = self.announcer.announce(&signal, Announcement::Opened, now).await;
        if let Some(thread) = bookkeeping.relay {
            self.store.update(id, &bookkeeping).await?;
            self.store.link_message(thread, id, now).await?;
        }
        Ok(IngestOutcome::Created(id))
    }

    // ─── External updates ─────────────────────────────────────────────────────

    /// Turn an update target into a signal id. A message reference must be
    /// the source post or a relayed card recorded at intake.
    pub async fn resolve(&self, target: SignalRef) -> Result<i64> {
        match target {
            SignalRef::Id(id) => Ok(id),
            SignalRef::Message {
                chat_id,
                message_id,
            } => self
                .store
                .find_by_message(chat_id, message_id)
                .await?
                .map(|s| s.id)
                .ok_or(Error::UnknownMessage {
                    chat_id,
                    message_id,
                }),
        }
    }

    async fn apply_request(&self, req: UpdateRequest, now: i64) -> Result<UpdateOutcome> {
        let id = self.resolve(req.target).await?;
        self.apply_external(id, req.update, now).await
    }

    /// Apply a manually reported update. Take-profit reports only raise hits,
    /// stop and close reports only close.
    pub async fn apply_external(
        &self,
        id: i64,
        update: ExternalUpdate,
        now: i64,
    ) -> Result<UpdateOutcome> {
        let _lock = self.mutation.lock().await;
        let mut signal = self.store.get(id).await?.ok_or(Error::NotFound(id))?;

        self.store
            .append_audit(Some(id), "manual_update", &serde_json::to_value(update)?, now)
            .await?;
        if !signal.is_open() {
            return Ok(UpdateOutcome::AlreadyClosed);
        }

        let tp_count = signal.levels().tp_count();
        let (change, announcement) = match update {
            ExternalUpdate::TakeProfit { level } => {
                if level == 0 || level > tp_count {
                    return Err(Error::Other(format!("signal {id} has no tp{level}")));
                }
                if level <= signal.hits {
                    return Ok(UpdateOutcome::NoChange);
                }
                let closing = level >= tp_count;
                let mut change = SignalUpdate {
                    hits: Some(level),
                    ..SignalUpdate::default()
                };
                if closing {
                    change = change.close(&CloseReason::TakeProfit(level));
                }
                (change, Announcement::TakeProfit { level, closing })
            }
            ExternalUpdate::Breakeven => (SignalUpdate::default(), Announcement::Breakeven),
            ExternalUpdate::StopLoss => {
                let announcement = if signal.hits == 0 {
                    Announcement::StopLoss
                } else {
                    Announcement::Closed { level: signal.hits }
                };
                (
                    SignalUpdate::default().close(&CloseReason::StopLossReported),
                    announcement,
                )
            }
            ExternalUpdate::Close => (
                SignalUpdate::default().close(&CloseReason::Manual),
                Announcement::Closed { level: signal.hits },
            ),
        };

        self.store.update(id, &change).await?;
        apply(&mut signal, &change);
        info!(signal_id = id, %update, "External update applied");
        self.announce(&signal, announcement, now).await?;
        Ok(UpdateOutcome::Applied)
    }

    /// Drain queued update requests until every sender is gone. Call from
    /// `tokio::spawn`.
    pub async fn serve_updates(self: Arc<Self>, mut rx: mpsc::Receiver<UpdateRequest>) {
        while let Some(req) = rx.recv().await {
            let now = common::time::now_ts();
            match self.apply_request(req, now).await {
                Ok(outcome) => debug!(target = %req.target, ?outcome, "Update request handled"),
                Err(e) => error!(target = %req.target, error = %e, "Update request failed"),
            }
        }
        warn!("Update channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{candle, RecordingSink, ScriptedProvider};
    use common::{ParsedSignal, RelayThread, Side, SignalStatus};
    use relay::{AnnouncementThrottle, ChannelDirectory, RelayHub};

    const NOW: i64 = 1_705_312_800;

    struct Fixture {
        tracker: Arc<Tracker>,
        sink: Arc<RecordingSink>,
        provider: Arc<ScriptedProvider>,
    }

    async fn fixture(provider: ScriptedProvider) -> Fixture {
        let store = SignalStore::in_memory().await.unwrap();
        let sink = Arc::new(RecordingSink::default());
        let provider = Arc::new(provider);
        let announcer = Announcer::new(
            RelayHub::new().with_sink(sink.clone()),
            AnnouncementThrottle::new(20),
            ChannelDirectory::default(),
        );
        let settings = TrackerSettings {
            fetch_delay: Duration::ZERO,
            ..TrackerSettings::default()
        };
        let tracker = Arc::new(Tracker::new(
            store,
            provider.clone(),
            announcer,
            ToleranceTable::default(),
            settings,
        ));
        Fixture {
            tracker,
            sink,
            provider,
        }
    }

    fn incoming(message: i64, symbol: &str, observed_at: i64) -> IncomingSignal {
        IncomingSignal {
            source_chat: -1,
            source_message: message,
            source_title: Some("Room".into()),
            observed_at,
            record: Some(ParsedSignal {
                symbol: symbol.into(),
                side: Side::Long,
                entry: 100.0,
                stop_loss: Some(95.0),
                tp1: Some(105.0),
                tp2: Some(110.0),
                tp3: None,
                tp4: None,
            }),
        }
    }

    async fn created(f: &Fixture, message: i64, symbol: &str, at: i64) -> i64 {
        match f.tracker.ingest(incoming(message, symbol, at), at).await.unwrap() {
            IngestOutcome::Created(id) => id,
            other => panic!("expected creation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ingest_relays_new_and_links_thread() {
        let f = fixture(ScriptedProvider::default()).await;
        let id = created(&f, 10, "eur/usd", NOW).await;

        let s = f.tracker.store().get(id).await.unwrap().unwrap();
        assert_eq!(s.symbol, "EURUSD");
        assert_eq!(s.anchor_ts, NOW + 60);
        let thread = RelayThread { chat_id: -500, message_id: id * 10 };
        assert_eq!(s.relay, Some(thread));
        assert_eq!(
            f.tracker.store().find_by_message(-500, id * 10).await.unwrap().map(|s| s.id),
            Some(id)
        );
        assert_eq!(f.sink.statuses(), vec!["NEW:0"]);
    }

    #[tokio::test]
    async fn ingest_suppresses_duplicates_and_non_signals() {
        let f = fixture(ScriptedProvider::default()).await;
        let id = created(&f, 10, "EURUSD", NOW).await;

        let again = f.tracker.ingest(incoming(10, "EURUSD", NOW), NOW).await.unwrap();
        assert_eq!(again, IngestOutcome::Duplicate(id));
        let repost = f.tracker.ingest(incoming(11, "EURUSD", NOW + 300), NOW + 300).await.unwrap();
        assert_eq!(repost, IngestOutcome::Duplicate(id));

        let mut nothing = incoming(12, "EURUSD", NOW);
        nothing.record = None;
        assert_eq!(
            f.tracker.ingest(nothing, NOW).await.unwrap(),
            IngestOutcome::NotASignal
        );

        let mut bad = incoming(13, "GBPUSD", NOW);
        if let Some(r) = bad.record.as_mut() {
            r.entry = -1.0;
        }
        assert!(matches!(
            f.tracker.ingest(bad, NOW).await.unwrap(),
            IngestOutcome::Rejected(_)
        ));
    }

    /// Ingest two messages from separate tasks at the same instant.
    async fn race(f: &Fixture, first: i64, second: i64) -> Vec<IngestOutcome> {
        let spawn = |message: i64| {
            let tracker = f.tracker.clone();
            tokio::spawn(async move { tracker.ingest(incoming(message, "EURUSD", NOW), NOW).await })
        };
        let (a, b) = tokio::join!(spawn(first), spawn(second));
        let mut outcomes = vec![a.unwrap().unwrap(), b.unwrap().unwrap()];
        outcomes.sort_by_key(|o| matches!(o, IngestOutcome::Duplicate(_)));
        outcomes
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn simultaneous_intake_creates_one_signal() {
        for (first, second) in [(7, 7), (7, 8)].into_iter().cycle().take(12) {
            let f = fixture(ScriptedProvider::default()).await;
            let outcomes = race(&f, first, second).await;
            let IngestOutcome::Created(id) = &outcomes[0] else {
                panic!("expected one creation, got {outcomes:?}");
            };
            assert_eq!(outcomes[1], IngestOutcome::Duplicate(*id));
            assert_eq!(f.sink.statuses(), vec!["NEW:0"]);
            assert_eq!(f.tracker.count_open(NOW).await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn cycle_walks_levels_then_closes_on_last() {
        let created_at = NOW - 600;
        let anchor = anchor_for(created_at);
        let provider = ScriptedProvider::default().with_candles(
            "EURUSD",
            vec![
                candle(anchor, 104.0, 100.0),
                candle(anchor + 60, 106.0, 100.0),
                candle(anchor + 120, 111.0, 100.0),
            ],
        );
        let f = fixture(provider).await;
        let id = created(&f, 10, "EURUSD", created_at).await;

        let report = f.tracker.run_cycle(NOW).await.unwrap();
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.closed, 1);
        assert_eq!(report.fetches, 1);

        let s = f.tracker.store().get(id).await.unwrap().unwrap();
        assert_eq!(s.hits, 2);
        assert_eq!(s.status, SignalStatus::Closed);
        assert_eq!(s.close_reason.as_deref(), Some("tp2_hit"));
        assert_eq!(s.last_check_ts, NOW);
        assert_eq!(f.sink.statuses(), vec!["NEW:0", "TP_HIT:2"]);
    }

    #[tokio::test]
    async fn guard_turns_narrow_stop_into_take_profit_close() {
        let created_at = NOW - 3600;
        let anchor = anchor_for(created_at);
        // tp1 was touched long ago; the narrow window only sees the stop.
        let provider = ScriptedProvider::default().with_candles(
            "EURUSD",
            vec![
                candle(anchor + 60, 106.0, 100.0),
                candle(NOW - 120, 101.0, 94.0),
            ],
        );
        let f = fixture(provider).await;
        let id = created(&f, 10, "EURUSD", created_at).await;
        f.tracker
            .store()
            .update(id, &SignalUpdate::checked_at(NOW - 180))
            .await
            .unwrap();

        f.tracker.run_cycle(NOW).await.unwrap();

        let s = f.tracker.store().get(id).await.unwrap().unwrap();
        assert_eq!(s.status, SignalStatus::Closed);
        assert_eq!(s.hits, 1);
        assert_eq!(s.close_reason.as_deref(), Some("tp1_hit_then_sl_ignored"));
        assert!(!f.sink.statuses().iter().any(|st| st.starts_with("SL_HIT")));
        assert_eq!(f.provider.calls().last().map(|c| c.1), Some(anchor));
    }

    #[tokio::test]
    async fn replayed_transition_announces_once() {
        let created_at = NOW - 600;
        let anchor = anchor_for(created_at);
        let provider = ScriptedProvider::default()
            .with_candles("EURUSD", vec![candle(anchor, 106.0, 100.0)]);
        let f = fixture(provider).await;
        let id = created(&f, 10, "EURUSD", created_at).await;

        f.tracker.run_cycle(NOW).await.unwrap();
        // Re-evaluate the same window inside the cooldown.
        f.tracker
            .store()
            .update(id, &SignalUpdate::checked_at(created_at))
            .await
            .unwrap();
        f.tracker.run_cycle(NOW + 10).await.unwrap();

        assert_eq!(f.sink.statuses(), vec!["NEW:0", "TP_HIT:1"]);
        let s = f.tracker.store().get(id).await.unwrap().unwrap();
        assert_eq!(s.last_announced_hit, 1);
        assert_eq!(s.hits, 1);
    }

    #[tokio::test]
    async fn warm_start_skips_backlog() {
        let created_at = NOW - 7200;
        let anchor = anchor_for(created_at);
        // Backlog candle that would close the trade at tp2.
        let provider = ScriptedProvider::default().with_candles(
            "EURUSD",
            vec![candle(anchor + 600, 111.0, 100.0), candle(NOW, 101.0, 99.0)],
        );
        let f = fixture(provider).await;
        let id = created(&f, 10, "EURUSD", created_at).await;

        assert_eq!(f.tracker.warm_start(NOW + 10).await.unwrap(), 1);
        let s = f.tracker.store().get(id).await.unwrap().unwrap();
        assert_eq!(s.last_check_ts, NOW);

        // Same minute: nothing is due.
        assert_eq!(f.tracker.run_cycle(NOW + 30).await.unwrap().evaluated, 0);

        f.tracker.run_cycle(NOW + 62).await.unwrap();
        let calls = f.provider.calls();
        assert_eq!(calls.last().map(|c| c.1), Some(NOW - 59));
        let s = f.tracker.store().get(id).await.unwrap().unwrap();
        assert_eq!(s.hits, 0);
        assert!(s.is_open());
    }

    #[tokio::test]
    async fn unsupported_symbol_only_advances_cursor() {
        let f = fixture(ScriptedProvider::default()).await;
        let id = created(&f, 10, "US30", NOW - 600).await;

        let report = f.tracker.run_cycle(NOW).await.unwrap();
        assert_eq!(report.fetches, 0);
        assert_eq!(report.evaluated, 1);
        assert_eq!(f.tracker.store().get(id).await.unwrap().unwrap().last_check_ts, NOW);
    }

    #[tokio::test]
    async fn quota_exhaustion_aborts_cycle() {
        let f = fixture(ScriptedProvider::default().exhausted()).await;
        created(&f, 10, "EURUSD", NOW - 600).await;
        let err = f.tracker.run_cycle(NOW).await.unwrap_err();
        assert!(err.is_quota_exhausted());
    }

    #[tokio::test]
    async fn external_updates_only_move_forward() {
        let f = fixture(ScriptedProvider::default()).await;
        let id = created(&f, 10, "EURUSD", NOW - 600).await;

        let tp = ExternalUpdate::TakeProfit { level: 1 };
        assert_eq!(f.tracker.apply_external(id, tp, NOW).await.unwrap(), UpdateOutcome::Applied);
        assert_eq!(f.tracker.apply_external(id, tp, NOW + 1).await.unwrap(), UpdateOutcome::NoChange);
        assert!(f
            .tracker
            .apply_external(id, ExternalUpdate::TakeProfit { level: 3 }, NOW)
            .await
            .is_err());

        f.tracker
            .apply_external(id, ExternalUpdate::StopLoss, NOW + 60)
            .await
            .unwrap();
        let s = f.tracker.store().get(id).await.unwrap().unwrap();
        assert_eq!(s.status, SignalStatus::Closed);
        assert_eq!(s.close_reason.as_deref(), Some("sl_reported"));
        assert_eq!(s.hits, 1);
        assert_eq!(f.sink.statuses(), vec!["NEW:0", "TP_HIT:1", "CLOSED:1"]);

        assert_eq!(
            f.tracker.apply_external(id, ExternalUpdate::Close, NOW + 120).await.unwrap(),
            UpdateOutcome::AlreadyClosed
        );
        assert!(matches!(
            f.tracker.apply_external(999, ExternalUpdate::Close, NOW).await,
            Err(Error::NotFound(999))
        ));
    }

    #[tokio::test]
    async fn transient_fetch_failure_still_advances_cursor() {
        let f = fixture(ScriptedProvider::default().failing("EURUSD")).await;
        let id = created(&f, 10, "EURUSD", NOW - 600).await;

        let report = f.tracker.run_cycle(NOW).await.unwrap();
        assert_eq!(report.evaluated, 1);

        let s = f.tracker.store().get(id).await.unwrap().unwrap();
        assert_eq!(s.last_check_ts, NOW);
        assert_eq!(s.hits, 0);
        assert!(s.is_open());
    }

    #[tokio::test]
    async fn one_failing_signal_does_not_hold_back_the_others() {
        let created_at = NOW - 600;
        let anchor = anchor_for(created_at);
        // EURUSD stops in the window, then its confirmation request times out.
        let provider = ScriptedProvider::default()
            .with_candles("EURUSD", vec![candle(anchor, 101.0, 94.0)])
            .failing_after("EURUSD", 1)
            .with_candles("GBPUSD", vec![candle(anchor, 106.0, 100.0)]);
        let f = fixture(provider).await;
        let stuck = created(&f, 10, "EURUSD", created_at).await;
        let moving = created(&f, 11, "GBPUSD", created_at).await;

        f.tracker.run_cycle(NOW).await.unwrap();

        let s = f.tracker.store().get(stuck).await.unwrap().unwrap();
        assert!(s.is_open());
        assert_eq!(s.hits, 0);
        assert_eq!(s.last_check_ts, created_at, "retried next cycle");

        let s = f.tracker.store().get(moving).await.unwrap().unwrap();
        assert_eq!(s.hits, 1);
        assert_eq!(s.last_check_ts, NOW);
        assert_eq!(f.sink.statuses(), vec!["NEW:0", "NEW:0", "TP_HIT:1"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cycle_and_manual_report_never_lose_hits() {
        let created_at = NOW - 600;
        let anchor = anchor_for(created_at);
        for _ in 0..8 {
            let provider = ScriptedProvider::default()
                .with_candles("EURUSD", vec![candle(anchor, 106.0, 100.0)]);
            let f = fixture(provider).await;
            let id = created(&f, 10, "EURUSD", created_at).await;

            let cycle = {
                let tracker = f.tracker.clone();
                tokio::spawn(async move { tracker.run_cycle(NOW).await })
            };
            let manual = {
                let tracker = f.tracker.clone();
                let tp1 = ExternalUpdate::TakeProfit { level: 1 };
                tokio::spawn(async move { tracker.apply_external(id, tp1, NOW).await })
            };
            let (cycle, manual) = tokio::join!(cycle, manual);
            cycle.unwrap().unwrap();
            assert!(matches!(
                manual.unwrap().unwrap(),
                UpdateOutcome::Applied | UpdateOutcome::NoChange
            ));

            let s = f.tracker.store().get(id).await.unwrap().unwrap();
            assert_eq!(s.hits, 1);
            assert!(s.is_open());
            assert_eq!(f.sink.statuses(), vec!["NEW:0", "TP_HIT:1"]);
        }
    }

    #[tokio::test]
    async fn replies_to_relayed_cards_address_their_signal() {
        let f = fixture(ScriptedProvider::default()).await;
        let id = created(&f, 10, "EURUSD", NOW - 600).await;
        let card = SignalRef::Message {
            chat_id: -500,
            message_id: id * 10,
        };

        assert_eq!(f.tracker.resolve(card).await.unwrap(), id);
        assert_eq!(f.tracker.resolve(SignalRef::Id(42)).await.unwrap(), 42);
        let stray = SignalRef::Message {
            chat_id: -500,
            message_id: id * 10 + 1,
        };
        assert!(matches!(
            f.tracker.resolve(stray).await,
            Err(Error::UnknownMessage { .. })
        ));

        let (tx, rx) = mpsc::channel(4);
        let worker = tokio::spawn(f.tracker.clone().serve_updates(rx));
        tx.send(UpdateRequest {
            target: card,
            update: ExternalUpdate::TakeProfit { level: 1 },
        })
        .await
        .unwrap();
        tx.send(UpdateRequest {
            target: stray,
            update: ExternalUpdate::Close,
        })
        .await
        .unwrap();
        drop(tx);
        worker.await.unwrap();

        let s = f.tracker.store().get(id).await.unwrap().unwrap();
        assert_eq!(s.hits, 1);
        assert!(s.is_open());
    }
}
