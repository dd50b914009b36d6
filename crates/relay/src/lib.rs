pub mod event;
pub mod hub;
pub mod throttle;
pub mod webhook;

pub use event::{build_event, fingerprint, ChannelDirectory};
pub use hub::{Announcement, Announcer, RelayHub};
pub use throttle::{AnnounceState, AnnouncementThrottle};
pub use webhook::WebhookSink;
