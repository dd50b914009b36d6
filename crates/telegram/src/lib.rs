pub mod commands;
pub mod sink;

pub use commands::{start_bot, BotDeps};
pub use sink::TelegramSink;
