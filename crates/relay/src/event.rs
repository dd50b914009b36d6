//! Outbound event construction: metrics, identity and dedup fingerprint.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use common::time::to_rfc3339;
use common::{ChannelRoute, EventLevels, RelayEvent, RelayStatus, Side, Signal};

/// Consumers dedup on open time rounded down to this bucket.
const FINGERPRINT_BUCKET_SECS: i64 = 600;

const EPS: f64 = 1e-9;

/// Source chat routes, keyed by source chat id.
#[derive(Debug, Clone, Default)]
pub struct ChannelDirectory {
    routes: HashMap<i64, ChannelRoute>,
}

impl ChannelDirectory {
    pub fn new(routes: impl IntoIterator<Item = ChannelRoute>) -> Self {
        Self {
            routes: routes.into_iter().map(|r| (r.source, r)).collect(),
        }
    }

    pub fn route(&self, source_chat: i64) -> Option<&ChannelRoute> {
        self.routes.get(&source_chat)
    }

    /// Configured alias, else the chat title seen at intake.
    pub fn channel_name(&self, signal: &Signal) -> String {
        self.route(signal.source_chat)
            .map(|r| r.alias.clone())
            .or_else(|| signal.source_title.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

/// Build one outbound event for `signal`.
///
/// Reward is measured to the price of `tp_level` (entry when 0). A stop-loss
/// event carries no reward and a ratio of -1. `NEW` events measure reward to
/// the first target and carry the full set of levels.
pub fn build_event(
    signal: &Signal,
    status: RelayStatus,
    tp_level: u8,
    channel_name: String,
) -> RelayEvent {
    let levels = signal.levels();
    let risk = signal
        .stop_loss
        .map(|sl| (signal.entry - sl).abs())
        .unwrap_or(0.0);

    let (reward, ratio) = match status {
        RelayStatus::SlHit => (0.0, -1.0),
        RelayStatus::Breakeven => (0.0, 0.0),
        RelayStatus::New | RelayStatus::TpHit | RelayStatus::Closed => {
            let target = if status == RelayStatus::New { 1 } else { tp_level };
            let exit = levels.take_profit(target).unwrap_or(signal.entry);
            let reward = (exit - signal.entry).abs();
            let ratio = if risk < EPS { 0.0 } else { reward / risk };
            (reward, ratio)
        }
    };

    let event_levels = (status == RelayStatus::New).then(|| EventLevels {
        entry: signal.entry,
        sl: signal.stop_loss,
        tp1: signal.take_profits[0],
        tp2: signal.take_profits[1],
        tp3: signal.take_profits[2],
        tp4: signal.take_profits[3],
    });

    RelayEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        signal_id: signal.id,
        symbol: signal.symbol.clone(),
        side: signal.side,
        status,
        tp_level,
        risk_distance: risk,
        reward_distance: reward,
        reward_to_risk_ratio: ratio,
        channel_id: signal.source_chat,
        channel_name,
        open_time: to_rfc3339(signal.created_at),
        fingerprint: fingerprint(&signal.symbol, signal.side, signal.created_at),
        levels: event_levels,
    }
}

/// `sha256_hex(symbol|side|open_time rounded down to 10 minutes)`.
pub fn fingerprint(symbol: &str, side: Side, created_at: i64) -> String {
    let bucket = created_at.div_euclid(FINGERPRINT_BUCKET_SECS) * FINGERPRINT_BUCKET_SECS;
    let key = format!("{symbol}|{}|{}", side.as_str(), to_rfc3339(bucket));
    hex::encode(Sha256::digest(key.as_bytes()))
}
