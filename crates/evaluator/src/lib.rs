pub mod hits;
pub mod levels;
pub mod tolerance;

pub use hits::{evaluate, HitOutcome};
pub use levels::{normalize_symbol, sanitize, SanitizeError, Sanitized};
pub use tolerance::{InstrumentClass, ToleranceLookup};

/// Slack for float comparisons against price levels.
pub const EPS: f64 = 1e-9;
