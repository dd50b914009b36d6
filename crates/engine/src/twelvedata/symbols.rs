const FIAT_QUOTES: [&str; 11] = [
    "USD", "EUR", "GBP", "JPY", "CHF", "CAD", "AUD", "NZD", "PLN", "SEK", "NOK",
];

const CRYPTO_BASES: [&str; 12] = [
    "BTC", "ETH", "SOL", "ADA", "DOGE", "XRP", "LTC", "BNB", "DOT", "LINK", "AVAX", "MATIC",
];

/// Map a normalized symbol to Twelve Data's `BASE/QUOTE` form.
///
/// Returns `None` for anything the provider is not queried for (indices,
/// stocks, exotic crypto); such signals are never fetched.
pub fn map_symbol(symbol: &str) -> Option<String> {
    let s: String = symbol
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    if !s.is_ascii() {
        return None;
    }

    if let Some(base) = s.strip_suffix("USD") {
        if CRYPTO_BASES.contains(&base) {
            return Some(format!("{base}/USD"));
        }
    }

    if s.len() == 6 && s[..3].chars().all(|c| c.is_ascii_alphabetic()) {
        let (base, quote) = s.split_at(3);
        if FIAT_QUOTES.contains(&quote) {
            return Some(format!("{base}/{quote}"));
        }
    }

    None
}
