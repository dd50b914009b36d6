mod rest;
mod symbols;

pub use rest::{parse_time_series, TwelveDataClient};
pub use symbols::map_symbol;
