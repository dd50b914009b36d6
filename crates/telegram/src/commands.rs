use std::sync::Arc;

use teloxide::{dispatching::UpdateHandler, prelude::*, utils::command::BotCommands};
use tokio::sync::mpsc;
use tracing::{info, warn};

use common::time::now_ts;
use common::{ExternalUpdate, SignalRef, UpdateRequest};
use engine::{SchedulerHandle, Tracker};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub update_tx: mpsc::Sender<UpdateRequest>,
    pub scheduler: SchedulerHandle,
    pub tracker: Arc<Tracker>,
    pub allowed_user_ids: Arc<Vec<i64>>,
}

/// Operator commands. Update commands name their signal by id, or omit it
/// when sent as a reply to the signal's post or relayed card.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Signal tracker commands:")]
pub enum Command {
    #[command(description = "Show scheduler state and open signals")]
    Status,
    #[command(description = "Report a take-profit: /hit [id] <level>")]
    Hit(String),
    #[command(description = "Report breakeven: /breakeven [id]")]
    Breakeven(String),
    #[command(description = "Report a stop-loss: /sl [id]")]
    Sl(String),
    #[command(description = "Close a signal manually: /close [id]")]
    Close(String),
}

impl Command {
    /// The update request this command queues, if any. `replied_to` is the
    /// message the command answers; it names the signal when no id is given.
    pub fn request(&self, replied_to: Option<SignalRef>) -> Result<Option<UpdateRequest>, String> {
        let (args, update) = match self {
            Command::Status => return Ok(None),
            Command::Hit(args) => {
                let mut words: Vec<&str> = args.split_whitespace().collect();
                let level = words
                    .pop()
                    .and_then(|w| w.parse::<u8>().ok())
                    .ok_or("Usage: /hit [id] <level>")?;
                (words, ExternalUpdate::TakeProfit { level })
            }
            Command::Breakeven(args) => (args.split_whitespace().collect(), ExternalUpdate::Breakeven),
            Command::Sl(args) => (args.split_whitespace().collect(), ExternalUpdate::StopLoss),
            Command::Close(args) => (args.split_whitespace().collect(), ExternalUpdate::Close),
        };
        let target = target(&args, replied_to).ok_or_else(|| {
            format!("Give a signal id or reply to the signal's message ({})", update)
        })?;
        Ok(Some(UpdateRequest { target, update }))
    }
}

fn target(args: &[&str], replied_to: Option<SignalRef>) -> Option<SignalRef> {
    match args {
        [id] => id.trim_start_matches('#').parse().ok().map(SignalRef::Id),
        [] => replied_to,
        _ => None,
    }
}

/// Start the operator bot in long-polling mode.
pub async fn start_bot(bot: Bot, deps: BotDeps) {
    let deps = Arc::new(deps);

    info!("Telegram operator bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(dptree::endpoint(handle_update));

    Update::filter_message()
        .filter_map(|msg: Message| msg.from().map(|u| u.id))
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from users not in the allowed list.
async fn auth_filter(user_id: UserId, deps: Arc<BotDeps>) -> bool {
    let uid = user_id.0 as i64;
    let allowed = deps.allowed_user_ids.contains(&uid);
    if !allowed {
        warn!(user_id = uid, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let state = deps.scheduler.state().await;
    let now = now_ts();
    let listing = match deps.tracker.count_open(now).await {
        Ok(total) => deps.tracker.open_signals(now).await.map(|open| (total, open)),
        Err(e) => Err(e),
    };
    let text = match listing {
        Ok((total, open)) => {
            let mut text = format!("Scheduler: {state}\nOpen signals: {total}");
            for s in open.iter().take(20) {
                text.push_str(&format!(
                    "\n#{} {} {} TP {}/{}",
                    s.id,
                    s.symbol,
                    s.side,
                    s.hits,
                    s.levels().tp_count()
                ));
            }
            text
        }
        Err(e) => format!("Scheduler: {state}\nOpen signals unavailable: {e}"),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_update(bot: Bot, msg: Message, cmd: Command, deps: Arc<BotDeps>) -> HandlerResult {
    let replied_to = msg.reply_to_message().map(|m| SignalRef::Message {
        chat_id: m.chat.id.0,
        message_id: i64::from(m.id.0),
    });
    let req = match cmd.request(replied_to) {
        Ok(Some(req)) => req,
        Ok(None) => return Ok(()),
        Err(usage) => {
            bot.send_message(msg.chat.id, usage).await?;
            return Ok(());
        }
    };
    let reply = match deps.update_tx.send(req).await {
        Ok(()) => format!("Queued {} for signal {}.", req.update, req.target),
        Err(_) => "Tracker is not accepting updates.".to_string(),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}
