//! Hit sequence evaluation: replays candles against a signal's levels.

use common::{Candle, Levels, Side, MAX_TAKE_PROFITS};

use crate::EPS;

/// Result of replaying a candle window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitOutcome {
    /// Cumulative take-profit count after the window, never below `hits_before`.
    pub hits: u8,
    /// A candle touched the stop with no next take-profit in the same candle.
    pub stop_loss_triggered: bool,
    /// The stop fired after at least one take-profit had been reached.
    pub ambiguous_stop: bool,
    /// Open time of the candle that triggered the stop.
    pub stopped_at: Option<i64>,
}

/// Replay `candles` (oldest first) against `levels`, starting from `hits_before`.
///
/// Take-profits are touched with `tolerance` added on the profit side; the
/// stop is touched exactly. When one candle touches both the stop and the next
/// take-profit, the take-profit wins and scanning continues. A candle may clear
/// several consecutive levels, always in order. Scanning stops at the first
/// candle that touches only the stop.
pub fn evaluate(levels: &Levels, tolerance: f64, candles: &[Candle], hits_before: u8) -> HitOutcome {
    let mut hits = hits_before.min(MAX_TAKE_PROFITS as u8);

    for candle in candles {
        let reached = advance(levels, tolerance, candle, hits);
        if reached > hits {
            hits = reached;
            continue;
        }
        if stop_touched(levels, candle) {
            return HitOutcome {
                hits,
                stop_loss_triggered: true,
                ambiguous_stop: hits >= 1,
                stopped_at: Some(candle.open_time),
            };
        }
    }

    HitOutcome {
        hits,
        stop_loss_triggered: false,
        ambiguous_stop: false,
        stopped_at: None,
    }
}

/// Highest level reachable in this candle, walking up from `hits`.
fn advance(levels: &Levels, tolerance: f64, candle: &Candle, hits: u8) -> u8 {
    let mut reached = hits;
    while let Some(tp) = levels.take_profit(reached + 1) {
        if !tp_touched(levels.side, tp, tolerance, candle) {
            break;
        }
        reached += 1;
    }
    reached
}

fn tp_touched(side: Side, tp: f64, tolerance: f64, candle: &Candle) -> bool {
    match side {
        Side::Long => candle.high >= tp + tolerance - EPS,
        Side::Short => candle.low <= tp - tolerance + EPS,
    }
}

fn stop_touched(levels: &Levels, candle: &Candle) -> bool {
    match (levels.side, levels.stop_loss) {
        (_, None) => false,
        (Side::Long, Some(sl)) => candle.low <= sl + EPS,
        (Side::Short, Some(sl)) => candle.high >= sl - EPS,
    }
}
