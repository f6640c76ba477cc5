//! HTTP client for the v6 telemetry API.
//!
//! Covers: health, site listing, and time-range row queries for both
//! channel families. All methods are rate-limited and share one timeout.

pub mod rate_limit;

use std::error::Error as StdError;
use std::time::Duration;

use common::time::TimeRange;
use common::{Error, SiteId, ThRow, VocRow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use rate_limit::RateLimiter;

/// Response of `/v6/health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

/// `/v6/sites` answers with a bare array or `{"sites": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum SitesResponse {
    Bare(Vec<SiteId>),
    Wrapped {
        #[serde(default)]
        sites: Vec<SiteId>,
    },
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn format_reqwest_error(err: &reqwest::Error) -> String {
    // Keep chained causes so network failures (DNS/TLS/socket) are visible.
    let mut message = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        let cause_msg = cause.to_string();
        if !cause_msg.is_empty() && !message.contains(&cause_msg) {
            message.push_str(": ");
            message.push_str(&cause_msg);
        }
        source = cause.source();
    }

    message
}

fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(format_reqwest_error(&err))
    } else {
        Error::Http(format_reqwest_error(&err))
    }
}

fn summarize_response_body(raw: &str) -> String {
    const MAX_CHARS: usize = 800;
    let compact = raw.replace(['\n', '\r'], " ");
    if compact.chars().count() > MAX_CHARS {
        let head: String = compact.chars().take(MAX_CHARS).collect();
        format!("{}…", head)
    } else {
        compact
    }
}

/// Row endpoints return an array; anything else is treated as no rows.
fn rows_or_empty<T: DeserializeOwned>(value: serde_json::Value, path: &str) -> Result<Vec<T>, Error> {
    match value {
        serde_json::Value::Array(_) => Ok(serde_json::from_value(value)?),
        other => {
            warn!("{} returned non-array payload ({}); treating as empty", path, kind_of(&other));
            Ok(Vec::new())
        }
    }
}

fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Async client for the telemetry API.
#[derive(Debug, Clone)]
pub struct TelemetryClient {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
}

impl TelemetryClient {
    /// Create a client rooted at `base_url` (e.g. `http://host:5001/api`).
    pub fn new(base_url: &str, timeout_ms: u64, reads_per_sec: u32) -> Result<Self, Error> {
        let base_url = normalize_base_url(base_url);
        if base_url.is_empty() {
            return Err(Error::Config("api_base_url must not be empty".into()));
        }

        let client = reqwest::Client::builder()
            .user_agent("sitewatch/0.1")
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .build()
            .map_err(|e| Error::Http(format_reqwest_error(&e)))?;

        Ok(Self {
            client,
            base_url,
            limiter: RateLimiter::with_limit(reads_per_sec),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL helper.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<serde_json::Value, Error> {
        self.limiter.wait_read().await;
        debug!("GET {}{} params={:?}", self.base_url, path, query);

        let resp = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                body: summarize_response_body(&body),
            });
        }

        resp.json().await.map_err(transport_error)
    }

    fn range_params(site: Option<&SiteId>, range: TimeRange) -> Vec<(&'static str, String)> {
        let mut params = vec![("start_time", range.start_sql()), ("end_time", range.end_sql())];
        if let Some(site) = site {
            params.push(("site_name", site.to_string()));
        }
        params
    }

    // ── Read endpoints ────────────────────────────────────────────────

    pub async fn health(&self) -> Result<Health, Error> {
        let value = self.get_json("/v6/health", &[]).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn get_sites(&self) -> Result<Vec<SiteId>, Error> {
        let value = self.get_json("/v6/sites", &[]).await?;
        let sites = match serde_json::from_value::<SitesResponse>(value) {
            Ok(SitesResponse::Bare(sites)) | Ok(SitesResponse::Wrapped { sites }) => sites,
            Err(e) => {
                warn!("Unrecognized /v6/sites payload: {}", e);
                Vec::new()
            }
        };
        debug!("Fetched {} sites", sites.len());
        Ok(sites)
    }

    /// TH rows in `range`, optionally for one site.
    pub async fn query_th(&self, site: Option<&SiteId>, range: TimeRange) -> Result<Vec<ThRow>, Error> {
        let value = self.get_json("/v6/th", &Self::range_params(site, range)).await?;
        rows_or_empty(value, "/v6/th")
    }

    /// VOC rows in `range`, optionally for one site.
    pub async fn query_voc(&self, site: Option<&SiteId>, range: TimeRange) -> Result<Vec<VocRow>, Error> {
        let value = self.get_json("/v6/voc", &Self::range_params(site, range)).await?;
        rows_or_empty(value, "/v6/voc")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one connection: read the request head, then answer with `response`
    /// after `delay`.
    async fn one_shot_server(response: &'static str, delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                head.extend_from_slice(&buf[..n]);
            }
            tokio::time::sleep(delay).await;
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{}/api", addr)
    }

    #[tokio::test]
    async fn test_non_success_status_is_api_error() {
        let base = one_shot_server(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Type: text/plain\r\nContent-Length: 20\r\nConnection: close\r\n\r\nupstream\nunavailable",
            Duration::ZERO,
        )
        .await;
        let client = TelemetryClient::new(&base, 2_000, 20).unwrap();

        match client.health().await {
            Err(Error::Api { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "upstream unavailable");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_server_is_timeout() {
        let base = one_shot_server(
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\n[]",
            Duration::from_millis(1_000),
        )
        .await;
        let client = TelemetryClient::new(&base, 100, 20).unwrap();

        let err = client.get_sites().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "got {:?}", err);
        assert!(err.is_transport());
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url(" http://h:5001/api/ "), "http://h:5001/api");
        assert_eq!(normalize_base_url("http://h/api//"), "http://h/api");
    }

    #[test]
    fn test_empty_base_url_is_config_error() {
        let err = TelemetryClient::new("  / ", 1_000, 20).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {:?}", err);
    }

    #[test]
    fn test_url_join() {
        let client = TelemetryClient::new("http://localhost:5001/api/", 1_000, 20).unwrap();
        assert_eq!(client.url("/v6/th"), "http://localhost:5001/api/v6/th");
    }

    #[test]
    fn test_summarize_response_body() {
        assert_eq!(summarize_response_body("bad\r\nrequest"), "bad  request");
        let long = "é".repeat(1_000);
        let summary = summarize_response_body(&long);
        assert_eq!(summary.chars().count(), 801);
        assert!(summary.ends_with('…'));
    }

    #[test]
    fn test_range_params() {
        let range = TimeRange::new(1_740_826_800_000, 1_740_830_400_000).unwrap();
        let site = SiteId::from("UTIS0001-TH-V6_1");
        let params = TelemetryClient::range_params(Some(&site), range);
        assert_eq!(
            params,
            vec![
                ("start_time", "2025-03-01 11:00:00".to_string()),
                ("end_time", "2025-03-01 12:00:00".to_string()),
                ("site_name", "UTIS0001-TH-V6_1".to_string()),
            ]
        );
        assert_eq!(TelemetryClient::range_params(None, range).len(), 2);
    }

    #[test]
    fn test_sites_payload_shapes() {
        let bare: SitesResponse = serde_json::from_str(r#"["A-TH","A-VOC"]"#).unwrap();
        let wrapped: SitesResponse = serde_json::from_str(r#"{"sites":["A-TH"]}"#).unwrap();
        assert!(matches!(bare, SitesResponse::Bare(ref s) if s.len() == 2));
        assert!(matches!(wrapped, SitesResponse::Wrapped { ref sites } if sites.len() == 1));
    }

    #[test]
    fn test_non_array_rows_are_empty() {
        let rows: Vec<ThRow> = rows_or_empty(serde_json::json!({"error": "x"}), "/v6/th").unwrap();
        assert!(rows.is_empty());
        let rows: Vec<VocRow> = rows_or_empty(
            serde_json::json!([{"SiteName": "A-VOC", "VOC": 0.15, "ReportedTimeUTC": "2025-03-01 12:00:00"}]),
            "/v6/voc",
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].voc.as_deref(), Some("0.15"));
    }
}
