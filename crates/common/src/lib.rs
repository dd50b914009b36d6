pub mod config;
pub mod error;
pub mod provider;
pub mod time;
pub mod types;

pub use config::{AssetKind, ChannelRoute, Config, ToleranceTable, TrackerFileConfig};
pub use error::{Error, Result};
pub use provider::{PriceProvider, RelaySink};
pub use types::*;
