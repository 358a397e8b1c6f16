//! C1: ReceiverClient — all receiver I/O.
//!
//! The HTTP client is built once behind a fixed configuration, the same
//! `OnceLock`-free-but-build-once shape rust-srec uses for its shared
//! proxy client in `rust-srec/src/api/routes/stream_proxy.rs`, except here
//! the client is owned by the struct rather than process-global, since each
//! `ReceiverClient` is constructed once at startup from `BridgeConfig`.

pub mod models;

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, warn};

use crate::error::{Error, Result};
pub use models::{Bouquet, EpgEvent, Service, ZapResult};

/// Receiver client configuration (a subset of `BridgeConfig`).
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub base_url: String,
    pub credentials: Option<(String, String)>,
    pub user_agent: String,
    pub http_1_0: bool,
    pub icy_metadata: bool,
    pub attempt_timeout: Duration,
    pub max_attempts: u32,
}

impl From<&crate::config::BridgeConfig> for ReceiverConfig {
    fn from(cfg: &crate::config::BridgeConfig) -> Self {
        Self {
            base_url: cfg.receiver_base_url.clone(),
            credentials: cfg.receiver_credentials.clone(),
            user_agent: cfg.receiver_user_agent.clone(),
            http_1_0: cfg.receiver_http_1_0,
            icy_metadata: cfg.receiver_icy_metadata,
            attempt_timeout: cfg.receiver_attempt_timeout,
            max_attempts: cfg.receiver_max_attempts,
        }
    }
}

pub struct ReceiverClient {
    client: reqwest::Client,
    config: ReceiverConfig,
}

impl ReceiverClient {
    pub fn new(config: ReceiverConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.attempt_timeout);
        if config.http_1_0 {
            builder = builder.http1_only();
        }
        let client = builder.build()?;
        Ok(Self { client, config })
    }

    fn base_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_str(&self.config.user_agent).unwrap_or_else(|_| {
                HeaderValue::from_static("VLC/3.0.18 LibVLC/3.0.18")
            }),
        );
        if self.config.icy_metadata {
            headers.insert("Icy-MetaData", HeaderValue::from_static("1"));
        }
        headers
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url).headers(self.base_headers());
        if let Some((user, pass)) = &self.config.credentials {
            req = req.basic_auth(user, Some(pass));
        }
        req
    }

    /// Retry a fallible attempt with capped exponential backoff, surfacing
    /// `ReceiverUnavailable` once the attempt budget is exhausted.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_millis(250);
        let mut last_err = None;
        for attempt_no in 1..=self.config.max_attempts {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(operation, attempt_no, error = %e, "receiver call failed");
                    last_err = Some(e);
                    if attempt_no < self.config.max_attempts {
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(Duration::from_secs(5));
                    }
                }
            }
        }
        Err(Error::ReceiverUnavailable(format!(
            "{operation} failed after {} attempts: {}",
            self.config.max_attempts,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Zap to `service_ref` then fetch the receiver's stream-resolution
    /// document. The returned host/port MUST be used verbatim — free-to-air
    /// and encrypted channels land on different ports.
    pub async fn zap_and_resolve_stream(&self, service_ref: &str) -> Result<ZapResult> {
        self.with_retry("zap_and_resolve_stream", || async {
            let url = format!(
                "{}/web/stream.m3u?ref={}",
                self.config.base_url,
                urlencoding_minimal(service_ref)
            );
            let resp = self.request(&url).send().await?;
            if !resp.status().is_success() {
                return Err(Error::TuneFailed(format!(
                    "receiver returned {} for {}",
                    resp.status(),
                    service_ref
                )));
            }
            let body = resp.text().await?;
            models::parse_stream_m3u(&body, service_ref)
        })
        .await
    }

    pub async fn list_bouquets(&self) -> Result<Vec<Bouquet>> {
        self.with_retry("list_bouquets", || async {
            let url = format!("{}/web/bouquets", self.config.base_url);
            let resp = self.request(&url).send().await?;
            let body = resp.text().await?;
            models::parse_bouquets(&body)
        })
        .await
    }

    pub async fn list_services_in_bouquet(&self, bouquet_ref: &str) -> Result<Vec<Service>> {
        self.with_retry("list_services_in_bouquet", || async {
            let url = format!(
                "{}/web/getservices?sRef={}",
                self.config.base_url,
                urlencoding_minimal(bouquet_ref)
            );
            let resp = self.request(&url).send().await?;
            let body = resp.text().await?;
            models::parse_services(&body)
        })
        .await
    }

    pub async fn fetch_epg_for_bouquet(
        &self,
        bouquet_ref: &str,
        _days: u32,
    ) -> Result<Vec<EpgEvent>> {
        self.with_retry("fetch_epg_for_bouquet", || async {
            let url = format!(
                "{}/web/epgbouquet?bRef={}&time=-1",
                self.config.base_url,
                urlencoding_minimal(bouquet_ref)
            );
            let resp = self.request(&url).send().await?;
            let body = resp.text().await?;
            debug!(bytes = body.len(), "fetched epg document");
            models::parse_epg(&body)
        })
        .await
    }
}

/// Minimal percent-encoding for service refs, which only ever contain
/// colons, hex digits, and `%` — no dependency pulled in for this.
fn urlencoding_minimal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencoding_preserves_colon_escaped() {
        let encoded = urlencoding_minimal("1:0:19:132F:3EF:1:C00000:0:0:0:");
        assert!(!encoded.contains(':'));
        assert!(encoded.contains("%3A"));
    }
}
