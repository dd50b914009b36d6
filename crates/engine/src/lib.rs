pub mod cache;
pub mod checker;
pub mod guard;
pub mod scheduler;
pub mod tracker;
pub mod twelvedata;

#[cfg(test)]
mod test_support;

pub use cache::{window_start, CandleBatch};
pub use guard::{confirm_stop, StopVerdict};
pub use scheduler::{CycleOutcome, Scheduler, SchedulerHandle, SchedulerSettings};
pub use tracker::{CycleReport, IngestOutcome, Tracker, TrackerSettings, UpdateOutcome};
pub use twelvedata::TwelveDataClient;
