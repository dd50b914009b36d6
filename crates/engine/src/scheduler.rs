use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use common::time::{minute_floor, next_daily_reset, now_ts, to_rfc3339};
use common::{Config, SchedulerState};

use crate::tracker::{CycleReport, Tracker};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub poll_interval_secs: i64,
    pub settle_margin_secs: i64,
    pub error_retry_secs: i64,
    pub quota_reset_utc: NaiveTime,
    pub warm_start: bool,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval_secs: config.poll_interval_secs,
            settle_margin_secs: config.settle_margin_secs,
            error_retry_secs: config.error_retry_secs,
            quota_reset_utc: config.quota_reset_utc,
            warm_start: config.warm_start,
        }
    }

    /// When the next cycle should start after `outcome` at `now`.
    pub fn next_run_after(&self, outcome: &CycleOutcome, now: i64) -> i64 {
        match outcome {
            CycleOutcome::Evaluated(_) => {
                minute_floor(now + self.poll_interval_secs) + self.settle_margin_secs
            }
            CycleOutcome::NoOpenSignals => now + self.poll_interval_secs,
            CycleOutcome::QuotaExhausted { until } | CycleOutcome::BackingOff { until } => *until,
            CycleOutcome::Failed => now + self.error_retry_secs,
        }
    }
}

/// How one tick ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Evaluated(CycleReport),
    NoOpenSignals,
    QuotaExhausted { until: i64 },
    /// Still inside a backoff window; nothing was attempted.
    BackingOff { until: i64 },
    Failed,
}

/// Cloneable read-only view of the scheduler, for status surfaces.
#[derive(Clone)]
pub struct SchedulerHandle {
    state: Arc<RwLock<SchedulerState>>,
}

impl SchedulerHandle {
    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }
}

/// Drives one evaluation cycle per closed candle, backing off until the
/// provider's quota reset when credits run out.
pub struct Scheduler {
    tracker: Arc<Tracker>,
    settings: SchedulerSettings,
    state: Arc<RwLock<SchedulerState>>,
}

impl Scheduler {
    pub fn new(tracker: Arc<Tracker>, settings: SchedulerSettings) -> (Self, SchedulerHandle) {
        let state = Arc::new(RwLock::new(SchedulerState::Idle));
        let handle = SchedulerHandle {
            state: state.clone(),
        };
        (
            Self {
                tracker,
                settings,
                state,
            },
            handle,
        )
    }

    /// Run at most one cycle at `now` and update the scheduler state.
    pub async fn tick(&self, now: i64) -> CycleOutcome {
        if let SchedulerState::BackingOff { until } = *self.state.read().await {
            if now < until {
                return CycleOutcome::BackingOff { until };
            }
        }

        *self.state.write().await = SchedulerState::Evaluating;
        let outcome = match self.tracker.run_cycle(now).await {
            Ok(report) if report.open == 0 => CycleOutcome::NoOpenSignals,
            Ok(report) => {
                info!(
                    open = report.open,
                    evaluated = report.evaluated,
                    closed = report.closed,
                    fetches = report.fetches,
                    "Cycle complete"
                );
                CycleOutcome::Evaluated(report)
            }
            Err(e) if e.is_quota_exhausted() => {
                let until = next_daily_reset(now, self.settings.quota_reset_utc);
                warn!(until = %to_rfc3339(until), "Provider credits exhausted, backing off");
                CycleOutcome::QuotaExhausted { until }
            }
            Err(e) => {
                error!(error = %e, retry_in = self.settings.error_retry_secs, "Cycle failed");
                CycleOutcome::Failed
            }
        };

        *self.state.write().await = match outcome {
            CycleOutcome::QuotaExhausted { until } => SchedulerState::BackingOff { until },
            _ => SchedulerState::Idle,
        };
        outcome
    }

    /// Run the polling loop forever. Call from `tokio::spawn`.
    pub async fn run(self) {
        if self.settings.warm_start {
            if let Err(e) = self.tracker.warm_start(now_ts()).await {
                error!(error = %e, "Warm start failed, resuming from stored cursors");
            }
        }
        info!(
            poll_interval = self.settings.poll_interval_secs,
            "Scheduler running"
        );

        loop {
            let now = now_ts();
            let outcome = self.tick(now).await;
            let next = self.settings.next_run_after(&outcome, now);
            let wait = (next - now_ts()).max(1) as u64;
            tokio::time::sleep(Duration::from_secs(wait)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingSink, ScriptedProvider};
    use crate::tracker::TrackerSettings;
    use common::{IncomingSignal, ParsedSignal, Side, ToleranceTable};
    use relay::{AnnouncementThrottle, Announcer, ChannelDirectory, RelayHub};
    use store::SignalStore;

    // 2024-01-15T10:00:00Z
    const NOW: i64 = 1_705_312_800;

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            poll_interval_secs: 120,
            settle_margin_secs: 2,
            error_retry_secs: 15,
            quota_reset_utc: NaiveTime::from_hms_opt(0, 2, 0).unwrap(),
            warm_start: true,
        }
    }

    async fn scheduler(provider: ScriptedProvider, with_signal: bool) -> (Scheduler, SchedulerHandle) {
        let store = SignalStore::in_memory().await.unwrap();
        let announcer = Announcer::new(
            RelayHub::new().with_sink(Arc::new(RecordingSink::default())),
            AnnouncementThrottle::new(20),
            ChannelDirectory::default(),
        );
        let tracker = Tracker::new(
            store,
            Arc::new(provider),
            announcer,
            ToleranceTable::default(),
            TrackerSettings {
                fetch_delay: Duration::ZERO,
                ..TrackerSettings::default()
            },
        );
        if with_signal {
            let incoming = IncomingSignal {
                source_chat: -1,
                source_message: 1,
                source_title: None,
                observed_at: NOW - 600,
                record: Some(ParsedSignal {
                    symbol: "EURUSD".into(),
                    side: Side::Long,
                    entry: 1.1,
                    stop_loss: Some(1.09),
                    tp1: Some(1.11),
                    tp2: None,
                    tp3: None,
                    tp4: None,
                }),
            };
            tracker.ingest(incoming, NOW - 600).await.unwrap();
        }
        Scheduler::new(Arc::new(tracker), settings())
    }

    #[test]
    fn next_run_times() {
        let s = settings();
        let report = CycleReport::default();
        assert_eq!(
            s.next_run_after(&CycleOutcome::Evaluated(report), NOW + 5),
            NOW + 120 + 2
        );
        assert_eq!(s.next_run_after(&CycleOutcome::NoOpenSignals, NOW + 5), NOW + 125);
        assert_eq!(s.next_run_after(&CycleOutcome::Failed, NOW + 5), NOW + 20);
        assert_eq!(
            s.next_run_after(&CycleOutcome::QuotaExhausted { until: NOW + 999 }, NOW),
            NOW + 999
        );
    }

    #[tokio::test]
    async fn quota_exhaustion_backs_off_until_reset() {
        let (scheduler, handle) = scheduler(ScriptedProvider::default().exhausted(), true).await;

        let outcome = scheduler.tick(NOW).await;
        // Next 00:02 UTC after 2024-01-15T10:00:00Z.
        let reset = 1_705_363_320;
        assert_eq!(outcome, CycleOutcome::QuotaExhausted { until: reset });
        assert_eq!(handle.state().await, SchedulerState::BackingOff { until: reset });

        // Ticks inside the window attempt nothing.
        assert_eq!(
            scheduler.tick(NOW + 600).await,
            CycleOutcome::BackingOff { until: reset }
        );
    }

    #[tokio::test]
    async fn empty_store_idles_at_base_interval() {
        let (scheduler, handle) = scheduler(ScriptedProvider::default(), false).await;
        let outcome = scheduler.tick(NOW).await;
        assert_eq!(outcome, CycleOutcome::NoOpenSignals);
        assert_eq!(handle.state().await, SchedulerState::Idle);
        assert_eq!(settings().next_run_after(&outcome, NOW), NOW + 120);
    }

    #[tokio::test]
    async fn successful_cycle_returns_to_idle() {
        let (scheduler, handle) = scheduler(ScriptedProvider::default(), true).await;
        let outcome = scheduler.tick(NOW).await;
        assert!(matches!(outcome, CycleOutcome::Evaluated(r) if r.evaluated == 1));
        assert_eq!(handle.state().await, SchedulerState::Idle);
    }
}
