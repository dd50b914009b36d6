use serde::{Deserialize, Serialize};

/// Number of take-profit levels a signal can carry.
pub const MAX_TAKE_PROFITS: usize = 4;

/// Direction of a tracked signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum Side {
    #[serde(alias = "buy", alias = "LONG", alias = "BUY")]
    Long,
    #[serde(alias = "sell", alias = "SHORT", alias = "SELL")]
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Lifecycle status of a signal. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum SignalStatus {
    Open,
    Closed,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Open => "open",
            SignalStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One 1-minute OHLCV candle. `open_time` is epoch seconds, minute aligned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// The immutable price terms a signal is evaluated against.
///
/// Take-profits are contiguous from index 0 and ordered in the direction of
/// profit (ascending for longs, descending for shorts).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Levels {
    pub side: Side,
    pub entry: f64,
    pub stop_loss: Option<f64>,
    pub take_profits: [Option<f64>; MAX_TAKE_PROFITS],
}

impl Levels {
    /// Number of take-profit levels present.
    pub fn tp_count(&self) -> u8 {
        self.take_profits.iter().take_while(|tp| tp.is_some()).count() as u8
    }

    /// Price of take-profit `level` (1-based).
    pub fn take_profit(&self, level: u8) -> Option<f64> {
        if level == 0 {
            return None;
        }
        self.take_profits.get(level as usize - 1).copied().flatten()
    }
}

/// Reference to a message a signal was re-posted as. Follow-up announcements
/// reply to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayThread {
    pub chat_id: i64,
    pub message_id: i64,
}

/// A tracked signal as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: i64,
    pub source_chat: i64,
    pub source_message: i64,
    pub source_title: Option<String>,

    pub symbol: String,
    pub side: Side,
    pub entry: f64,
    pub stop_loss: Option<f64>,
    pub take_profits: [Option<f64>; MAX_TAKE_PROFITS],

    pub hits: u8,
    pub status: SignalStatus,
    pub close_reason: Option<String>,
    pub last_announced_hit: u8,
    /// Epoch seconds of the last announcement, 0 if none.
    pub last_announced_ts: i64,

    pub created_at: i64,
    pub anchor_ts: i64,
    pub last_check_ts: i64,

    pub relay: Option<RelayThread>,
}

impl Signal {
    pub fn levels(&self) -> Levels {
        Levels {
            side: self.side,
            entry: self.entry,
            stop_loss: self.stop_loss,
            take_profits: self.take_profits,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == SignalStatus::Open
    }
}

/// A sanitized signal ready to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSignal {
    pub source_chat: i64,
    pub source_message: i64,
    pub source_title: Option<String>,
    pub symbol: String,
    pub levels: Levels,
    pub created_at: i64,
    pub anchor_ts: i64,
}

/// Partial update of a signal's mutable fields. `None` leaves a column as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalUpdate {
    pub hits: Option<u8>,
    pub status: Option<SignalStatus>,
    pub close_reason: Option<String>,
    pub last_announced_hit: Option<u8>,
    pub last_announced_ts: Option<i64>,
    pub last_check_ts: Option<i64>,
    pub relay: Option<RelayThread>,
}

impl SignalUpdate {
    pub fn checked_at(ts: i64) -> Self {
        Self {
            last_check_ts: Some(ts),
            ..Self::default()
        }
    }

    pub fn close(mut self, reason: &CloseReason) -> Self {
        self.status = Some(SignalStatus::Closed);
        self.close_reason = Some(reason.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Why a signal was closed. Persisted as its string tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    StopLoss,
    StopAfterTakeProfit(u8),
    TakeProfit(u8),
    TakeProfitThenStopIgnored(u8),
    StopLossReported,
    Manual,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::StopLoss => write!(f, "sl_hit"),
            CloseReason::StopAfterTakeProfit(n) => write!(f, "sl_after_tp{n}"),
            CloseReason::TakeProfit(n) => write!(f, "tp{n}_hit"),
            CloseReason::TakeProfitThenStopIgnored(n) => write!(f, "tp{n}_hit_then_sl_ignored"),
            CloseReason::StopLossReported => write!(f, "sl_reported"),
            CloseReason::Manual => write!(f, "manual_close"),
        }
    }
}

/// Structured record handed over by the parsing collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSignal {
    pub symbol: String,
    pub side: Side,
    pub entry: f64,
    #[serde(default, alias = "sl")]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub tp1: Option<f64>,
    #[serde(default)]
    pub tp2: Option<f64>,
    #[serde(default)]
    pub tp3: Option<f64>,
    #[serde(default)]
    pub tp4: Option<f64>,
}

impl ParsedSignal {
    pub fn take_profits(&self) -> [Option<f64>; MAX_TAKE_PROFITS] {
        [self.tp1, self.tp2, self.tp3, self.tp4]
    }
}

/// A message observed on a source channel, with whatever the parser made of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingSignal {
    pub source_chat: i64,
    pub source_message: i64,
    #[serde(default)]
    pub source_title: Option<String>,
    /// Epoch seconds the message was posted.
    pub observed_at: i64,
    /// `None` means the parser found no signal in the message.
    #[serde(default)]
    pub record: Option<ParsedSignal>,
}

/// Out-of-band report about an existing signal (operator command, API call).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExternalUpdate {
    TakeProfit { level: u8 },
    Breakeven,
    StopLoss,
    Close,
}

impl std::fmt::Display for ExternalUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternalUpdate::TakeProfit { level } => write!(f, "tp{level}"),
            ExternalUpdate::Breakeven => write!(f, "breakeven"),
            ExternalUpdate::StopLoss => write!(f, "sl"),
            ExternalUpdate::Close => write!(f, "close"),
        }
    }
}

/// How an external report names its signal: by id, or by a message that is
/// either the original post or one of its relayed copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalRef {
    Id(i64),
    Message { chat_id: i64, message_id: i64 },
}

impl std::fmt::Display for SignalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalRef::Id(id) => write!(f, "#{id}"),
            SignalRef::Message { chat_id, message_id } => write!(f, "message {chat_id}/{message_id}"),
        }
    }
}

/// External update queued from chat commands.
#[derive(Debug, Clone, Copy)]
pub struct UpdateRequest {
    pub target: SignalRef,
    pub update: ExternalUpdate,
}

/// Current state of the polling scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    Evaluating,
    BackingOff {
        until: i64,
    },
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::Evaluating => write!(f, "evaluating"),
            SchedulerState::BackingOff { until } => {
                write!(f, "backing off until {}", crate::time::to_rfc3339(*until))
            }
        }
    }
}

/// Event status as seen by relay consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayStatus {
    New,
    TpHit,
    SlHit,
    Breakeven,
    Closed,
}

impl std::fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayStatus::New => write!(f, "NEW"),
            RelayStatus::TpHit => write!(f, "TP_HIT"),
            RelayStatus::SlHit => write!(f, "SL_HIT"),
            RelayStatus::Breakeven => write!(f, "BREAKEVEN"),
            RelayStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Signal terms carried on `NEW` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLevels {
    pub entry: f64,
    pub sl: Option<f64>,
    pub tp1: Option<f64>,
    pub tp2: Option<f64>,
    pub tp3: Option<f64>,
    pub tp4: Option<f64>,
}

/// One outbound hit/close event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEvent {
    pub event_id: String,
    pub signal_id: i64,
    pub symbol: String,
    pub side: Side,
    pub status: RelayStatus,
    pub tp_level: u8,
    pub risk_distance: f64,
    pub reward_distance: f64,
    pub reward_to_risk_ratio: f64,
    pub channel_id: i64,
    pub channel_name: String,
    /// ISO-8601 creation time of the signal.
    pub open_time: String,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub levels: Option<EventLevels>,
}
