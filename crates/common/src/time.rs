//! Epoch-second helpers around 1-minute candle boundaries.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};

/// Length of one candle in seconds.
pub const CANDLE_SECS: i64 = 60;

pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// Start of the minute containing `ts`.
pub fn minute_floor(ts: i64) -> i64 {
    ts.div_euclid(CANDLE_SECS) * CANDLE_SECS
}

/// Start of the first full candle strictly after `created_at`.
pub fn anchor_for(created_at: i64) -> i64 {
    minute_floor(created_at) + CANDLE_SECS
}

/// Next instant after `now` whose UTC time of day equals `reset`.
pub fn next_daily_reset(now: i64, reset: NaiveTime) -> i64 {
    let now_dt = Utc.timestamp_opt(now, 0).single().unwrap_or_else(Utc::now);
    let today = now_dt.date_naive().and_time(reset).and_utc();
    if today.timestamp() > now {
        today.timestamp()
    } else {
        (today + Duration::days(1)).timestamp()
    }
}

pub fn to_rfc3339(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt: DateTime<Utc>| dt.to_rfc3339())
        .unwrap_or_default()
}
