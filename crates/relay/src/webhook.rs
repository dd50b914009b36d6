use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use tracing::debug;

use common::{Error, RelayEvent, RelaySink, RelayThread, Result};

type HmacSha256 = Hmac<Sha256>;

/// Posts each event as JSON to a notification endpoint.
///
/// With a secret configured, the body is signed with HMAC-SHA256 and the hex
/// digest is sent in `X-Signature`.
pub struct WebhookSink {
    url: String,
    secret: Option<String>,
    http: Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, secret: Option<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            secret,
            http,
        })
    }

    fn sign(&self, body: &[u8]) -> Result<Option<String>> {
        let Some(secret) = &self.secret else {
            return Ok(None);
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| Error::Relay(e.to_string()))?;
        mac.update(body);
        Ok(Some(hex::encode(mac.finalize().into_bytes())))
    }
}

#[async_trait]
impl RelaySink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn publish(
        &self,
        event: &RelayEvent,
        _thread: Option<RelayThread>,
    ) -> Result<Option<RelayThread>> {
        let body = serde_json::to_vec(event)?;
        let mut req = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json");
        if let Some(signature) = self.sign(&body)? {
            req = req.header("X-Signature", signature);
        }

        let resp = req
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Relay(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Relay(format!("HTTP {status}: {text}")));
        }
        debug!(signal_id = event.signal_id, status = %event.status, "Webhook delivered");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_hex_hmac_of_body() {
        let sink = WebhookSink::new(
            "http://localhost:9/hook",
            Some("key".into()),
            Duration::from_secs(1),
        )
        .unwrap();
        // Well-known HMAC-SHA256 test vector.
        let sig = sink
            .sign(b"The quick brown fox jumps over the lazy dog")
            .unwrap()
            .unwrap();
        assert_eq!(
            sig,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn unsigned_without_secret() {
        let sink = WebhookSink::new("http://localhost:9/hook", None, Duration::from_secs(1)).unwrap();
        assert_eq!(sink.sign(b"{}").unwrap(), None);
    }
}
