use common::Signal;

/// What has already been announced for one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnnounceState {
    pub last_hit: u8,
    /// Epoch seconds of the last announcement, 0 if none.
    pub last_ts: i64,
}

impl AnnounceState {
    pub fn of(signal: &Signal) -> Self {
        Self {
            last_hit: signal.last_announced_hit,
            last_ts: signal.last_announced_ts,
        }
    }

    pub fn after(self, level: u8, now: i64) -> Self {
        Self {
            last_hit: self.last_hit.max(level),
            last_ts: now,
        }
    }
}

/// Decides whether a take-profit level may be announced.
///
/// A level is announced at most once per signal, and two announcements for
/// the same signal are at least `cooldown_secs` apart. Closing events skip
/// the cooldown since nothing can follow them.
#[derive(Debug, Clone, Copy)]
pub struct AnnouncementThrottle {
    cooldown_secs: i64,
}

impl AnnouncementThrottle {
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            cooldown_secs: cooldown_secs.max(0),
        }
    }

    pub fn admits(&self, state: AnnounceState, level: u8, now: i64) -> bool {
        level > state.last_hit && self.cooled_down(state, now)
    }

    pub fn admits_closing(&self, state: AnnounceState, level: u8) -> bool {
        level > state.last_hit
    }

    fn cooled_down(&self, state: AnnounceState, now: i64) -> bool {
        state.last_ts == 0 || now - state.last_ts >= self.cooldown_secs
    }
}
