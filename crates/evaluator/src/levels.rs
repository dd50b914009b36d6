//! Sanitation of parsed signals into consistent, ordered levels.

use thiserror::Error;

use common::{Levels, ParsedSignal, Side, MAX_TAKE_PROFITS};

use crate::EPS;

/// A parsed record could not be turned into a trackable signal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SanitizeError {
    #[error("symbol is empty after normalization")]
    EmptySymbol,
    #[error("entry {0} is not a usable price")]
    InvalidEntry(f64),
}

/// Result of sanitation: normalized symbol, consistent levels, and what was dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub symbol: String,
    pub levels: Levels,
    pub dropped: Vec<String>,
}

/// Uppercase, alphanumeric only: `"xau/usd"` becomes `"XAUUSD"`.
pub fn normalize_symbol(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Drop every level inconsistent with the side and entry, then order the
/// remaining take-profits in the direction of profit.
///
/// Only a missing symbol or an unusable entry rejects the record.
pub fn sanitize(parsed: &ParsedSignal) -> Result<Sanitized, SanitizeError> {
    let symbol = normalize_symbol(&parsed.symbol);
    if symbol.is_empty() {
        return Err(SanitizeError::EmptySymbol);
    }
    let entry = parsed.entry;
    if !entry.is_finite() || entry <= 0.0 {
        return Err(SanitizeError::InvalidEntry(entry));
    }

    let side = parsed.side;
    let mut dropped = Vec::new();

    let stop_loss = parsed.stop_loss.filter(|&sl| {
        let ok = sl.is_finite()
            && match side {
                Side::Long => sl < entry - EPS,
                Side::Short => sl > entry + EPS,
            };
        if !ok {
            dropped.push(format!("sl {sl} on wrong side of entry {entry}"));
        }
        ok
    });

    let mut tps: Vec<f64> = parsed
        .take_profits()
        .into_iter()
        .flatten()
        .filter(|&tp| {
            let ok = tp.is_finite()
                && match side {
                    Side::Long => tp >= entry - EPS,
                    Side::Short => tp <= entry + EPS,
                };
            if !ok {
                dropped.push(format!("tp {tp} on wrong side of entry {entry}"));
            }
            ok
        })
        .collect();

    match side {
        Side::Long => tps.sort_by(|a, b| a.total_cmp(b)),
        Side::Short => tps.sort_by(|a, b| b.total_cmp(a)),
    }

    let mut take_profits = [None; MAX_TAKE_PROFITS];
    for (slot, tp) in take_profits.iter_mut().zip(tps) {
        *slot = Some(tp);
    }

    Ok(Sanitized {
        symbol,
        levels: Levels {
            side,
            entry,
            stop_loss,
            take_profits,
        },
        dropped,
    })
}
