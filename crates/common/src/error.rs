use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The price provider's credit quota is spent until its next reset.
    #[error("Price provider quota exhausted")]
    QuotaExhausted,

    #[error("Price provider error: {0}")]
    Provider(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Relay delivery failed: {0}")]
    Relay(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Signal {0} not found")]
    NotFound(i64),

    #[error("No signal posted as message {message_id} in chat {chat_id}")]
    UnknownMessage { chat_id: i64, message_id: i64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, Error::QuotaExhausted)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
