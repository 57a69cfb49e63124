//! Record Store Client - REST access to run records
//!
//! - `GET {base}/runs/?lab=<lab>&limit=1` returns the newest run
//! - `PATCH {base}/runs/{id}/` attaches instrument readouts to a run
//!
//! Fetches are retried with exponential backoff plus jitter; publishes are
//! attempted once, the upload gate retries them on a later cycle.

use super::{EventSource, FetchError, PublishError, RecordSink};
use crate::config::defaults::{FETCH_MAX_BACKOFF_EXPONENT, RUNTIME_FORMAT};
use crate::config::RecordsConfig;
use crate::types::RunEvent;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Record client construction errors
#[derive(Debug, thiserror::Error)]
pub enum RecordClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid record store URL '{0}'")]
    InvalidBaseUrl(String),
}

#[derive(Debug, Deserialize)]
struct RunsPage {
    #[serde(default)]
    results: Vec<RawRun>,
}

#[derive(Debug, Deserialize)]
struct RawRun {
    id: u64,
    runtime: String,
    #[serde(default)]
    parameters: Map<String, Value>,
    #[serde(default)]
    instrument_readouts: Map<String, Value>,
}

/// HTTP client for the run-record service.
#[derive(Clone)]
pub struct HttpRecordClient {
    http: reqwest::Client,
    base_url: String,
    lab: String,
    api_key: Option<String>,
    max_retries: u32,
    retry_base: Duration,
}

impl HttpRecordClient {
    /// Build a client from the `[records]` section.
    ///
    /// `api_key` overrides the key from the file (taken from the environment
    /// by the binary).
    pub fn new(config: &RecordsConfig, api_key: Option<String>) -> Result<Self, RecordClientError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(RecordClientError::InvalidBaseUrl(config.base_url.clone()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url,
            lab: config.lab.clone(),
            api_key: api_key.or_else(|| config.api_key.clone()),
            max_retries: config.max_retries.max(1),
            retry_base: Duration::from_millis(config.retry_base_ms),
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", format!("Token {key}")),
            None => req,
        }
    }

    async fn fetch_once(&self) -> Result<RunEvent, FetchError> {
        let resp = self
            .authorize(self.http.get(format!("{}/runs/", self.base_url)))
            .query(&[("lab", self.lab.as_str()), ("limit", "1")])
            .send()
            .await
            .map_err(|e| FetchError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Unavailable(format!("status {status}")));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::Unavailable(e.to_string()))?;
        parse_runs_page(&body)
    }
}

/// Delay before retry number `attempt` (0-based), without jitter.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(FETCH_MAX_BACKOFF_EXPONENT))
}

fn jitter(base: Duration) -> Duration {
    let max_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    use rand::Rng;
    Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
}

/// Parse a `runtime` value: `%Y-%m-%dT%H:%M:%SZ`, or RFC 3339 as a fallback.
pub fn parse_runtime(runtime: &str) -> Result<DateTime<Utc>, FetchError> {
    NaiveDateTime::parse_from_str(runtime, RUNTIME_FORMAT)
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(runtime).map(|dt| dt.with_timezone(&Utc)))
        .map_err(|e| FetchError::Malformed(format!("runtime '{runtime}': {e}")))
}

/// Turn a runs listing into the newest [`RunEvent`].
///
/// Run parameters and readouts already attached to the run both become
/// event fields, so the upload gate can see what the store already holds.
pub fn parse_runs_page(body: &str) -> Result<RunEvent, FetchError> {
    let page: RunsPage =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;
    let run = page.results.into_iter().next().ok_or(FetchError::Empty)?;

    let mut event = RunEvent::new(run.id, parse_runtime(&run.runtime)?);
    event.fields = run.parameters;
    event.fields.extend(run.instrument_readouts);
    Ok(event)
}

#[async_trait]
impl EventSource for HttpRecordClient {
    async fn latest_event(&self) -> Result<RunEvent, FetchError> {
        let mut last_error = FetchError::Empty;

        for attempt in 0..self.max_retries {
            match self.fetch_once().await {
                Ok(event) => return Ok(event),
                // An empty listing will not fill up by retrying
                Err(FetchError::Empty) => return Err(FetchError::Empty),
                Err(e) => {
                    let delay = backoff_delay(self.retry_base, attempt) + jitter(self.retry_base);
                    debug!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Run fetch failed"
                    );
                    last_error = e;
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        warn!(
            attempts = self.max_retries,
            error = %last_error,
            "Run fetch exhausted retries"
        );
        Err(last_error)
    }

    fn source_name(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RecordSink for HttpRecordClient {
    async fn publish_reading(
        &self,
        event_id: u64,
        name: &str,
        value: f64,
    ) -> Result<(), PublishError> {
        let mut readouts = Map::new();
        readouts.insert(name.to_string(), Value::from(value));
        let body = serde_json::json!({ "instrument_readouts": readouts });

        let resp = self
            .authorize(
                self.http
                    .patch(format!("{}/runs/{event_id}/", self.base_url)),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| PublishError::new(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(PublishError::new(format!("status {status}: {text}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_newest_run_with_parameters_and_readouts() {
        let body = r#"{
            "count": 812,
            "results": [{
                "id": 812,
                "runtime": "2024-03-01T12:00:08Z",
                "parameters": {"ListBoundVariables": ["tof"], "tof": 5.0},
                "instrument_readouts": {"freq_in_THz": 351.72}
            }]
        }"#;

        let event = parse_runs_page(body).unwrap();
        assert_eq!(event.event_id, 812);
        assert_eq!(event.event_time, parse_runtime("2024-03-01T12:00:08Z").unwrap());
        assert!(event.has_field("tof"));
        assert!(event.has_field("freq_in_THz"));
    }

    #[test]
    fn runtime_accepts_rfc3339_fallback() {
        let strict = parse_runtime("2024-03-01T12:00:08Z").unwrap();
        let fractional = parse_runtime("2024-03-01T12:00:08.000+00:00").unwrap();
        assert_eq!(strict, fractional);
        assert!(matches!(
            parse_runtime("yesterday"),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn empty_listing_is_empty_error() {
        assert!(matches!(
            parse_runs_page(r#"{"results": []}"#),
            Err(FetchError::Empty)
        ));
        assert!(matches!(
            parse_runs_page("<html>502</html>"),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::from_millis(300);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(300));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(600));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(2_400));
        assert_eq!(backoff_delay(base, 5), backoff_delay(base, 9));
    }

    #[test]
    fn jitter_stays_below_base() {
        let base = Duration::from_millis(300);
        for _ in 0..50 {
            assert!(jitter(base) < base);
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn rejects_non_http_base_url() {
        let config = RecordsConfig {
            base_url: "records.local".into(),
            ..RecordsConfig::default()
        };
        assert!(matches!(
            HttpRecordClient::new(&config, None),
            Err(RecordClientError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn env_key_overrides_file_key() {
        let config = RecordsConfig {
            base_url: "http://records.local/api/".into(),
            api_key: Some("from-file".into()),
            ..RecordsConfig::default()
        };
        let client = HttpRecordClient::new(&config, Some("from-env".into())).unwrap();
        assert_eq!(client.api_key.as_deref(), Some("from-env"));
        assert_eq!(client.base_url, "http://records.local/api");
    }
}
