pub mod signals;

pub use signals::SignalStore;
