//! Feed configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::catalog::SiteCatalog;
use crate::types::ZeroReadingPolicy;

/// Top-level feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Telemetry API base URL (`/v6/*` endpoints live under it).
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Serve synthetic readings instead of calling the telemetry API.
    #[serde(default)]
    pub use_mock: bool,

    /// Per-request timeout for the telemetry API.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Telemetry API read quota.
    #[serde(default = "default_reads_per_sec")]
    pub reads_per_sec: u32,

    /// How exact-zero values are normalized.
    #[serde(default)]
    pub zero_readings: ZeroReadingPolicy,

    /// Default lookback for latest-reading snapshots.
    #[serde(default = "default_latest_hours")]
    pub latest_hours: u32,

    /// Default lookback for metric series.
    #[serde(default = "default_series_hours")]
    pub series_hours: u32,

    #[serde(default)]
    pub catalog: SiteCatalog,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub synth: SynthConfig,

    #[serde(default)]
    pub warmup: WarmupConfig,
}

/// Cache freshness thresholds (seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory for the on-disk store. `None` keeps entries in memory.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(default = "default_sites_max_age")]
    pub sites_max_age_secs: u64,

    #[serde(default = "default_latest_max_age")]
    pub latest_max_age_secs: u64,

    #[serde(default = "default_series_max_age")]
    pub series_max_age_secs: u64,

    /// Entries older than this are served but refreshed in the background.
    #[serde(default = "default_refresh_after")]
    pub refresh_after_secs: u64,
}

/// Synthetic generator parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthConfig {
    /// Emission cadence.
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,

    /// Per-step probability of a missed transmission.
    #[serde(default = "default_drop_rate")]
    pub drop_rate: f64,

    /// Upper bound (exclusive) of report→receive latency.
    #[serde(default = "default_max_receive_delay")]
    pub max_receive_delay_secs: u64,
}

/// Device-page warm-up parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupConfig {
    /// Number of catalog devices to preload.
    #[serde(default = "default_warm_count")]
    pub count: usize,

    /// Max devices warmed at once.
    #[serde(default = "default_warm_concurrency")]
    pub concurrency: usize,

    /// Lookback for preloaded series.
    #[serde(default = "default_warm_hours")]
    pub hours: u32,

    /// Version tag embedded in preloaded row keys.
    #[serde(default = "default_rows_version")]
    pub rows_version: String,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_api_base_url() -> String {
    "http://127.0.0.1:8080/api".into()
}
fn default_request_timeout_ms() -> u64 {
    15_000
}
fn default_reads_per_sec() -> u32 {
    20
}
fn default_latest_hours() -> u32 {
    12
}
fn default_series_hours() -> u32 {
    24
}

fn default_sites_max_age() -> u64 {
    3600
}
fn default_latest_max_age() -> u64 {
    120
}
fn default_series_max_age() -> u64 {
    600
}
fn default_refresh_after() -> u64 {
    60
}

fn default_step_secs() -> u64 {
    300
}
fn default_drop_rate() -> f64 {
    0.015
}
fn default_max_receive_delay() -> u64 {
    90
}

fn default_warm_count() -> usize {
    4
}
fn default_warm_concurrency() -> usize {
    2
}
fn default_warm_hours() -> u32 {
    24
}
fn default_rows_version() -> String {
    "v1".into()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            sites_max_age_secs: default_sites_max_age(),
            latest_max_age_secs: default_latest_max_age(),
            series_max_age_secs: default_series_max_age(),
            refresh_after_secs: default_refresh_after(),
        }
    }
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            step_secs: default_step_secs(),
            drop_rate: default_drop_rate(),
            max_receive_delay_secs: default_max_receive_delay(),
        }
    }
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            count: default_warm_count(),
            concurrency: default_warm_concurrency(),
            hours: default_warm_hours(),
            rows_version: default_rows_version(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            use_mock: false,
            request_timeout_ms: default_request_timeout_ms(),
            reads_per_sec: default_reads_per_sec(),
            zero_readings: ZeroReadingPolicy::default(),
            latest_hours: default_latest_hours(),
            series_hours: default_series_hours(),
            catalog: SiteCatalog::default(),
            cache: CacheConfig::default(),
            synth: SynthConfig::default(),
            warmup: WarmupConfig::default(),
        }
    }
}
