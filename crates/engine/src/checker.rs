//! Turns one evaluation of a signal into a persisted transition and an
//! optional announcement.

use common::{CloseReason, Signal, SignalStatus, SignalUpdate};
use evaluator::HitOutcome;
use relay::Announcement;

use crate::guard::StopVerdict;

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub update: SignalUpdate,
    pub announcement: Option<Announcement>,
    pub closed: Option<CloseReason>,
}

/// Decide the next state of `signal` after evaluating a candle window.
///
/// `verdict` is the guard's answer when the window reported a stop; a missing
/// verdict on a stop is treated as confirmed.
pub fn plan(
    signal: &Signal,
    outcome: &HitOutcome,
    verdict: Option<StopVerdict>,
    now: i64,
) -> Transition {
    let mut hits = signal.hits.max(outcome.hits);
    let mut update = SignalUpdate::checked_at(now);
    let tp_count = signal.levels().tp_count();

    let (closed, announcement) = if outcome.stop_loss_triggered {
        match verdict.unwrap_or(StopVerdict::Confirmed) {
            StopVerdict::Overridden { hits: full } => {
                hits = hits.max(full);
                (
                    Some(CloseReason::TakeProfitThenStopIgnored(hits)),
                    Some(Announcement::TakeProfit {
                        level: hits,
                        closing: true,
                    }),
                )
            }
            // Profit was banked before the stop: closed, never reported as a loss.
            StopVerdict::Confirmed if outcome.ambiguous_stop => (
                Some(CloseReason::StopAfterTakeProfit(hits)),
                Some(Announcement::Closed { level: hits }),
            ),
            StopVerdict::Confirmed => {
                (Some(CloseReason::StopLoss), Some(Announcement::StopLoss))
            }
        }
    } else if tp_count > 0 && hits >= tp_count {
        (
            Some(CloseReason::TakeProfit(hits)),
            Some(Announcement::TakeProfit {
                level: hits,
                closing: true,
            }),
        )
    } else if hits > signal.last_announced_hit {
        (
            None,
            Some(Announcement::TakeProfit {
                level: hits,
                closing: false,
            }),
        )
    } else {
        (None, None)
    };

    if hits > signal.hits {
        update.hits = Some(hits);
    }
    if let Some(reason) = &closed {
        update = update.close(reason);
    }

    Transition {
        update,
        announcement,
        closed,
    }
}

/// Mirror a persisted update onto an in-memory copy, with the same
/// monotonicity the store enforces.
pub fn apply(signal: &mut Signal, update: &SignalUpdate) {
    if let Some(hits) = update.hits {
        signal.hits = signal.hits.max(hits);
    }
    if signal.is_open() {
        if let Some(status) = update.status {
            signal.status = status;
        }
        if signal.status == SignalStatus::Closed && update.close_reason.is_some() {
            signal.close_reason = update.close_reason.clone();
        }
    }
    if let Some(hit) = update.last_announced_hit {
        signal.last_announced_hit = signal.last_announced_hit.max(hit);
    }
    if let Some(ts) = update.last_announced_ts {
        signal.last_announced_ts = ts;
    }
    if let Some(ts) = update.last_check_ts {
        signal.last_check_ts = ts;
    }
    if update.relay.is_some() {
        signal.relay = update.relay;
    }
}
