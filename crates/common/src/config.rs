use std::path::Path;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{Error, Result};

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Price provider
    pub twelvedata_api_key: String,
    pub request_timeout_secs: u64,
    pub fetch_concurrency: usize,
    pub fetch_delay_ms: u64,
    /// UTC time of day at which the provider's daily quota is restored.
    pub quota_reset_utc: NaiveTime,

    // Telegram
    pub telegram_token: Option<String>,
    pub telegram_operator_ids: Vec<i64>,

    // Notification endpoint
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,

    // HTTP API
    pub api_token: String,
    pub api_port: u16,

    // Tracking
    pub max_signal_age_days: i64,
    pub poll_interval_secs: i64,
    pub settle_margin_secs: i64,
    pub error_retry_secs: i64,
    pub announce_cooldown_secs: i64,
    pub duplicate_window_secs: i64,
    pub warm_start: bool,

    // Database
    pub database_url: String,

    // Tolerance table and channel routes
    pub tracker_config_path: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let telegram_operator_ids = optional_env("TELEGRAM_OPERATOR_IDS")
            .map(|raw| {
                raw.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| {
                        s.trim().parse::<i64>().unwrap_or_else(|_| {
                            panic!(
                                "TELEGRAM_OPERATOR_IDS contains non-numeric ID: '{}'",
                                s.trim()
                            )
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let quota_reset_utc = optional_env("QUOTA_RESET_UTC")
            .map(|v| {
                parse_hhmm(&v).unwrap_or_else(|e| panic!("ERROR: QUOTA_RESET_UTC: {e}"))
            })
            .unwrap_or_else(default_quota_reset);

        Config {
            twelvedata_api_key: required_env("TWELVEDATA_API_KEY"),
            request_timeout_secs: parsed_env("REQUEST_TIMEOUT_SECS", 30),
            fetch_concurrency: parsed_env("FETCH_CONCURRENCY", 4usize).max(1),
            fetch_delay_ms: parsed_env("FETCH_DELAY_MS", 200),
            quota_reset_utc,
            telegram_token: optional_env("TELEGRAM_TOKEN").filter(|t| !t.is_empty()),
            telegram_operator_ids,
            webhook_url: optional_env("WEBHOOK_URL").filter(|u| !u.is_empty()),
            webhook_secret: optional_env("WEBHOOK_SECRET").filter(|s| !s.is_empty()),
            api_token: required_env("API_TOKEN"),
            api_port: parsed_env("API_PORT", 8080),
            max_signal_age_days: parsed_env("MAX_SIGNAL_AGE_DAYS", 5),
            // One evaluation per closed candle at most.
            poll_interval_secs: parsed_env("POLL_INTERVAL_SECS", 120i64).max(60),
            settle_margin_secs: parsed_env("SETTLE_MARGIN_SECS", 2),
            error_retry_secs: parsed_env("ERROR_RETRY_SECS", 15),
            announce_cooldown_secs: parsed_env("ANNOUNCE_COOLDOWN_SECS", 20),
            duplicate_window_secs: parsed_env("DUPLICATE_WINDOW_SECS", 15 * 60),
            warm_start: optional_env("WARM_START")
                .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
            database_url: required_env("DATABASE_URL"),
            tracker_config_path: optional_env("TRACKER_CONFIG_PATH")
                .unwrap_or_else(|| "config/tracker.toml".to_string()),
        }
    }
}

fn default_quota_reset() -> NaiveTime {
    NaiveTime::from_hms_opt(0, 2, 0).unwrap_or(NaiveTime::MIN)
}

/// Parse a `HH:MM` time of day.
pub fn parse_hhmm(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|e| Error::Config(format!("expected HH:MM, got '{raw}': {e}")))
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    optional_env(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

// ─── File config ──────────────────────────────────────────────────────────────

/// Optional tracker file config (TOML).
///
/// Example `config/tracker.toml`:
/// ```toml
/// [tolerance]
/// gold = 0.5
/// silver = 0.02
/// forex = 0.0002
/// default = 0.0002
///
/// [[channel]]
/// source = -1002154812244
/// alias = "Aurora (Gold)"
/// target = -1003369420967
/// asset = "gold"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TrackerFileConfig {
    #[serde(default)]
    pub tolerance: ToleranceTable,
    #[serde(default, rename = "channel")]
    pub channels: Vec<ChannelRoute>,
}

impl TrackerFileConfig {
    /// Load from a TOML file, falling back to defaults when the file is absent.
    /// A file that exists but does not parse is an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Tracker config not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let cfg = Self::parse(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        info!(
            path = %path.display(),
            channels = cfg.channels.len(),
            "Tracker config loaded"
        );
        Ok(cfg)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Touch tolerance per instrument class, in price units.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ToleranceTable {
    pub gold: f64,
    pub silver: f64,
    pub forex: f64,
    pub default: f64,
}

impl Default for ToleranceTable {
    fn default() -> Self {
        Self {
            gold: 0.5,
            silver: 0.02,
            forex: 0.0002,
            default: 0.0002,
        }
    }
}

/// Asset family of a source channel, used to style relayed posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Gold,
    Crypto,
    Forex,
    Indices,
    #[default]
    Unknown,
}

/// Where signals from one source chat are relayed to.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChannelRoute {
    pub source: i64,
    pub alias: String,
    pub target: i64,
    #[serde(default)]
    pub asset: AssetKind,
}
