use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use common::{Candle, Error, PriceProvider, Result};

use super::symbols::map_symbol;

const BASE_URL: &str = "https://api.twelvedata.com";
const OUTPUT_SIZE: &str = "5000";
/// Minutes of 1-minute bars one response holds in full.
const MAX_SPAN_SECS: i64 = 5000 * 60;
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// REST client for Twelve Data 1-minute time series.
pub struct TwelveDataClient {
    api_key: String,
    base_url: String,
    http: Client,
}

impl TwelveDataClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            api_key: api_key.into(),
            base_url: BASE_URL.to_string(),
            http,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn series_url(&self, provider_symbol: &str, since: i64, until: Option<i64>) -> Result<Url> {
        let start = format_ts(since)?;
        let mut params = vec![
            ("symbol", provider_symbol.to_string()),
            ("interval", "1min".to_string()),
            ("start_date", start),
        ];
        if let Some(until) = until {
            params.push(("end_date", format_ts(until)?));
        }
        params.extend([
            ("outputsize", OUTPUT_SIZE.to_string()),
            ("timezone", "UTC".to_string()),
            ("apikey", self.api_key.clone()),
        ]);
        Url::parse_with_params(&format!("{}/time_series", self.base_url), &params)
            .map_err(|e| Error::Config(format!("bad provider url: {e}")))
    }

    async fn fetch(&self, symbol: &str, since: i64, until: Option<i64>) -> Result<Vec<Candle>> {
        let Some(provider_symbol) = map_symbol(symbol) else {
            return Ok(Vec::new());
        };
        let url = self.series_url(&provider_symbol, since, until)?;
        debug!(symbol, provider_symbol = %provider_symbol, since, ?until, "Fetching 1m candles");

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        let candles = parse_time_series(&body)?;
        debug!(symbol, count = candles.len(), "Candles received");
        Ok(candles)
    }
}

fn format_ts(ts: i64) -> Result<String> {
    Ok(Utc
        .timestamp_opt(ts, 0)
        .single()
        .ok_or_else(|| Error::Provider(format!("invalid timestamp {ts}")))?
        .format(DATETIME_FORMAT)
        .to_string())
}

#[async_trait]
impl PriceProvider for TwelveDataClient {
    fn supports(&self, symbol: &str) -> bool {
        map_symbol(symbol).is_some()
    }

    async fn candles_since(&self, symbol: &str, since: i64) -> Result<Vec<Candle>> {
        self.fetch(symbol, since, None).await
    }

    async fn candles_between(&self, symbol: &str, since: i64, until: i64) -> Result<Vec<Candle>> {
        // end_date is inclusive on the provider side
        let mut candles = self.fetch(symbol, since, Some(until)).await?;
        candles.retain(|c| c.open_time < until);
        Ok(candles)
    }

    fn max_span_secs(&self) -> i64 {
        MAX_SPAN_SECS
    }
}

/// Decode a `time_series` response body into candles, oldest first.
///
/// A daily credit exhaustion maps to [`Error::QuotaExhausted`]; the per-minute
/// limit and other provider errors are transient. "No data" is an empty series.
pub fn parse_time_series(body: &str) -> Result<Vec<Candle>> {
    let resp: SeriesResponse =
        serde_json::from_str(body).map_err(|e| Error::Provider(format!("malformed response: {e}")))?;

    if resp.status.as_deref() == Some("error") {
        let message = resp.message.unwrap_or_default();
        let lower = message.to_lowercase();
        if lower.contains("run out of api credits") {
            if lower.contains("current minute") {
                return Err(Error::Provider(message));
            }
            return Err(Error::QuotaExhausted);
        }
        if lower.contains("no data is available") {
            return Ok(Vec::new());
        }
        return Err(Error::Provider(message));
    }

    let mut candles = resp
        .values
        .into_iter()
        .map(SeriesValue::into_candle)
        .collect::<Result<Vec<_>>>()?;
    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SeriesResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    values: Vec<SeriesValue>,
}

#[derive(Deserialize)]
struct SeriesValue {
    datetime: String,
    open: String,
    high: String,
    low: String,
    close: String,
    #[serde(default)]
    volume: Option<String>,
}

impl SeriesValue {
    fn into_candle(self) -> Result<Candle> {
        let open_time = NaiveDateTime::parse_from_str(&self.datetime, DATETIME_FORMAT)
            .map_err(|e| Error::Provider(format!("bad datetime '{}': {e}", self.datetime)))?
            .and_utc()
            .timestamp();
        Ok(Candle {
            open_time,
            open: price(&self.open)?,
            high: price(&self.high)?,
            low: price(&self.low)?,
            close: price(&self.close)?,
            volume: self.volume.as_deref().map(price).transpose()?.unwrap_or(0.0),
        })
    }
}

fn price(raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|e| Error::Provider(format!("bad price '{raw}': {e}")))
}
