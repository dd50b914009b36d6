use std::sync::Arc;
use std::time::Duration;

use teloxide::Bot;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, TrackerFileConfig, UpdateRequest};
use engine::{Scheduler, SchedulerSettings, Tracker, TrackerSettings, TwelveDataClient};
use relay::{AnnouncementThrottle, Announcer, ChannelDirectory, RelayHub, WebhookSink};
use store::SignalStore;
use telegram_relay::{start_bot, BotDeps, TelegramSink};

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let file = TrackerFileConfig::load_or_default(&cfg.tracker_config_path)
        .unwrap_or_else(|e| panic!("Invalid tracker config: {e}"));
    info!(
        poll_interval = cfg.poll_interval_secs,
        max_age_days = cfg.max_signal_age_days,
        "Signal tracker starting"
    );

    // ── Database ──────────────────────────────────────────────────────────────
    let store = SignalStore::connect(&cfg.database_url, 5)
        .await
        .unwrap_or_else(|e| panic!("Failed to open database: {e}"));
    info!("Database ready");

    // ── Price provider ────────────────────────────────────────────────────────
    let timeout = Duration::from_secs(cfg.request_timeout_secs);
    let provider = TwelveDataClient::new(&cfg.twelvedata_api_key, timeout)
        .unwrap_or_else(|e| panic!("Failed to build price client: {e}"));

    // ── Relay sinks ───────────────────────────────────────────────────────────
    let directory = ChannelDirectory::new(file.channels.clone());
    let mut hub = RelayHub::new();

    if let Some(url) = &cfg.webhook_url {
        let sink = WebhookSink::new(url.clone(), cfg.webhook_secret.clone(), timeout)
            .unwrap_or_else(|e| panic!("Failed to build webhook sink: {e}"));
        info!(signed = cfg.webhook_secret.is_some(), "Webhook relay enabled");
        hub = hub.with_sink(Arc::new(sink));
    }

    let bot = cfg.telegram_token.as_deref().map(Bot::new);
    if let Some(bot) = &bot {
        info!("Telegram relay enabled");
        hub = hub.with_sink(Arc::new(TelegramSink::new(bot.clone(), directory.clone())));
    }

    if hub.is_empty() {
        warn!("No relay sinks configured; announcements are only logged");
    }

    // ── Tracker and scheduler ─────────────────────────────────────────────────
    let announcer = Announcer::new(
        hub,
        AnnouncementThrottle::new(cfg.announce_cooldown_secs),
        directory,
    );
    let tracker = Arc::new(Tracker::new(
        store,
        Arc::new(provider),
        announcer,
        file.tolerance,
        TrackerSettings::from_config(&cfg),
    ));
    let (scheduler, scheduler_handle) =
        Scheduler::new(tracker.clone(), SchedulerSettings::from_config(&cfg));

    // ── Operator bot ──────────────────────────────────────────────────────────
    if let Some(bot) = bot {
        let (update_tx, update_rx) = mpsc::channel::<UpdateRequest>(64);
        tokio::spawn(tracker.clone().serve_updates(update_rx));

        if cfg.telegram_operator_ids.is_empty() {
            warn!("TELEGRAM_OPERATOR_IDS is empty; operator commands will be ignored");
        }
        let deps = BotDeps {
            update_tx,
            scheduler: scheduler_handle.clone(),
            tracker: tracker.clone(),
            allowed_user_ids: Arc::new(cfg.telegram_operator_ids.clone()),
        };
        tokio::spawn(start_bot(bot, deps));
    }

    // ── HTTP API ──────────────────────────────────────────────────────────────
    let api_state = api::AppState {
        tracker: tracker.clone(),
        scheduler: scheduler_handle,
        api_token: cfg.api_token.clone(),
    };
    let port = cfg.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port).await {
            error!(error = %e, "HTTP API stopped");
        }
    });

    // ── Spawn the scheduler ───────────────────────────────────────────────────
    tokio::spawn(scheduler.run());

    info!("All subsystems started. Waiting for shutdown signal.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received. Exiting.");
}
