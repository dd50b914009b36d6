use serde::{Deserialize, Serialize};

use common::ToleranceTable;

/// Instrument families that get their own touch tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentClass {
    Gold,
    Silver,
    Forex,
    Other,
}

impl InstrumentClass {
    /// Classify a normalized symbol (uppercase, no separators).
    pub fn of(symbol: &str) -> Self {
        match symbol {
            "XAUUSD" => InstrumentClass::Gold,
            "XAGUSD" => InstrumentClass::Silver,
            s if s.chars().count() >= 6
                && s.chars().rev().take(3).all(|c| c.is_ascii_alphabetic()) =>
            {
                InstrumentClass::Forex
            }
            _ => InstrumentClass::Other,
        }
    }
}

/// Resolves the touch tolerance for a symbol.
pub trait ToleranceLookup {
    fn tolerance_for(&self, symbol: &str) -> f64;
}

impl ToleranceLookup for ToleranceTable {
    fn tolerance_for(&self, symbol: &str) -> f64 {
        match InstrumentClass::of(symbol) {
            InstrumentClass::Gold => self.gold,
            InstrumentClass::Silver => self.silver,
            InstrumentClass::Forex => self.forex,
            InstrumentClass::Other => self.default,
        }
    }
}
