use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::MessageId;
use tracing::{debug, warn};

use common::{AssetKind, Error, RelayEvent, RelaySink, RelayStatus, RelayThread, Result};
use relay::ChannelDirectory;

/// Re-posts new signals into each source's target channel and replies to
/// that post with every later hit or close.
pub struct TelegramSink {
    bot: Bot,
    directory: ChannelDirectory,
}

impl TelegramSink {
    pub fn new(bot: Bot, directory: ChannelDirectory) -> Self {
        Self { bot, directory }
    }
}

#[async_trait]
impl RelaySink for TelegramSink {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn publish(
        &self,
        event: &RelayEvent,
        thread: Option<RelayThread>,
    ) -> Result<Option<RelayThread>> {
        if event.status == RelayStatus::New {
            let Some(route) = self.directory.route(event.channel_id) else {
                debug!(channel_id = event.channel_id, "No target channel configured, not re-posting");
                return Ok(None);
            };
            let sent = self
                .bot
                .send_message(ChatId(route.target), format_card(event, route.asset))
                .await
                .map_err(|e| Error::Relay(e.to_string()))?;
            return Ok(Some(RelayThread {
                chat_id: route.target,
                message_id: i64::from(sent.id.0),
            }));
        }

        let Some(thread) = thread else {
            warn!(signal_id = event.signal_id, status = %event.status, "No relay thread to reply to");
            return Ok(None);
        };
        let message_id = i32::try_from(thread.message_id)
            .map_err(|_| Error::Relay(format!("message id {} out of range", thread.message_id)))?;
        self.bot
            .send_message(ChatId(thread.chat_id), format_update(event))
            .reply_to_message_id(MessageId(message_id))
            .await
            .map_err(|e| Error::Relay(e.to_string()))?;
        Ok(None)
    }
}

// ─── Formatting ───────────────────────────────────────────────────────────────

fn asset_emoji(asset: AssetKind) -> &'static str {
    match asset {
        AssetKind::Gold => "\u{1F947}",
        AssetKind::Crypto => "\u{1FA99}",
        AssetKind::Forex => "\u{1F4B1}",
        AssetKind::Indices => "\u{1F4C8}",
        AssetKind::Unknown => "\u{1F4E2}",
    }
}

fn fmt_price(p: f64) -> String {
    let s = format!("{p:.5}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// The card posted for a new signal.
pub fn format_card(event: &RelayEvent, asset: AssetKind) -> String {
    let emoji = asset_emoji(asset);
    let rule = "\u{2501}".repeat(20);
    let mut text = format!(
        "{emoji} {} {emoji}\n{rule}\n{}\nAction: {}",
        event.channel_name, event.symbol, event.side
    );
    if let Some(levels) = &event.levels {
        text.push_str(&format!(" {}\n{rule}\n", fmt_price(levels.entry)));
        let tps = [levels.tp1, levels.tp2, levels.tp3, levels.tp4];
        for (i, tp) in tps.iter().enumerate() {
            if let Some(tp) = tp {
                text.push_str(&format!("\u{1F3AF} TP{}: {}\n", i + 1, fmt_price(*tp)));
            }
        }
        if let Some(sl) = levels.sl {
            text.push_str(&format!("\u{1F6D1} SL: {}\n", fmt_price(sl)));
        }
        text.push_str(&rule);
    }
    text
}

/// The in-thread reply for a hit or close.
pub fn format_update(event: &RelayEvent) -> String {
    let tag = format!("#{}", event.symbol);
    match event.status {
        RelayStatus::TpHit => format!(
            "\u{2705} TP{} HIT ({:.2}R)\n{tag}",
            event.tp_level, event.reward_to_risk_ratio
        ),
        RelayStatus::SlHit => format!("\u{274C} SL HIT\n{tag}"),
        RelayStatus::Breakeven => format!("\u{1F6E1} Breakeven (entry secured)\n{tag}"),
        RelayStatus::Closed if event.tp_level > 0 => {
            format!("\u{1F512} CLOSED after TP{}\n{tag}", event.tp_level)
        }
        RelayStatus::Closed => format!("\u{1F512} CLOSED\n{tag}"),
        RelayStatus::New => format!("New signal\n{tag}"),
    }
}
