use std::sync::Arc;

use tracing::{debug, info, warn};

use common::{RelayEvent, RelaySink, RelayStatus, RelayThread, Signal, SignalUpdate};

use crate::event::{build_event, ChannelDirectory};
use crate::throttle::{AnnounceState, AnnouncementThrottle};

/// Fans one event out to every configured sink.
///
/// Delivery is best effort: a failing sink is logged and skipped, and never
/// affects persisted signal state.
#[derive(Clone, Default)]
pub struct RelayHub {
    sinks: Vec<Arc<dyn RelaySink>>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn RelaySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Returns the first thread reference any sink reported.
    pub async fn publish(
        &self,
        event: &RelayEvent,
        thread: Option<RelayThread>,
    ) -> Option<RelayThread> {
        let mut posted = None;
        for sink in &self.sinks {
            match sink.publish(event, thread).await {
                Ok(Some(t)) => {
                    posted.get_or_insert(t);
                }
                Ok(None) => {}
                Err(e) => warn!(
                    sink = sink.name(),
                    signal_id = event.signal_id,
                    status = %event.status,
                    error = %e,
                    "Relay delivery failed"
                ),
            }
        }
        posted
    }
}

/// Something worth telling downstream consumers about a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Announcement {
    Opened,
    /// `closing` is set when this level also closes the signal.
    TakeProfit { level: u8, closing: bool },
    StopLoss,
    Breakeven,
    Closed { level: u8 },
}

/// Applies the throttle, builds the event and hands it to the hub.
pub struct Announcer {
    hub: RelayHub,
    throttle: AnnouncementThrottle,
    directory: ChannelDirectory,
}

impl Announcer {
    pub fn new(hub: RelayHub, throttle: AnnouncementThrottle, directory: ChannelDirectory) -> Self {
        Self {
            hub,
            throttle,
            directory,
        }
    }

    /// Deliver `announcement` for `signal` and return the bookkeeping fields
    /// to persist. An empty update means nothing was sent.
    ///
    /// A take-profit that is not admitted is deferred and offered again on the
    /// next evaluation. A closing take-profit whose level was already
    /// announced goes out as `CLOSED` instead, so the close is still reported.
    pub async fn announce(
        &self,
        signal: &Signal,
        announcement: Announcement,
        now: i64,
    ) -> SignalUpdate {
        let state = AnnounceState::of(signal);
        let (status, level) = match announcement {
            Announcement::Opened => (RelayStatus::New, 0),
            Announcement::TakeProfit { level, closing } => {
                let admitted = if closing {
                    self.throttle.admits_closing(state, level)
                } else {
                    self.throttle.admits(state, level, now)
                };
                match (admitted, closing) {
                    (true, _) => (RelayStatus::TpHit, level),
                    (false, true) => (RelayStatus::Closed, level),
                    (false, false) => {
                        debug!(
                            signal_id = signal.id,
                            level,
                            last_announced = state.last_hit,
                            "Take-profit announcement deferred"
                        );
                        return SignalUpdate::default();
                    }
                }
            }
            Announcement::StopLoss => (RelayStatus::SlHit, 0),
            Announcement::Breakeven => (RelayStatus::Breakeven, signal.hits),
            Announcement::Closed { level } => (RelayStatus::Closed, level),
        };

        let event = build_event(signal, status, level, self.directory.channel_name(signal));
        info!(
            signal_id = signal.id,
            symbol = %signal.symbol,
            status = %status,
            tp_level = level,
            "Announcing"
        );
        let thread = self.hub.publish(&event, signal.relay).await;

        let mut update = SignalUpdate::default();
        match status {
            RelayStatus::New => update.relay = thread,
            RelayStatus::TpHit => {
                let after = state.after(level, now);
                update.last_announced_hit = Some(after.last_hit);
                update.last_announced_ts = Some(after.last_ts);
            }
            _ => update.last_announced_ts = Some(now),
        }
        update
    }
}
