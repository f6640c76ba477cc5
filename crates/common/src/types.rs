//! Domain types shared across sitewatch.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::time::parse_utc_sql;

// ── Sites and channels ────────────────────────────────────────────────

/// Sensor channel family. Every site belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "TH")]
    Th,
    #[serde(rename = "VOC")]
    Voc,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Th, Channel::Voc];

    /// Segment used inside site ids (`UTIS0001-TH-V6_1`).
    pub fn tag(self) -> &'static str {
        match self {
            Channel::Th => "TH",
            Channel::Voc => "VOC",
        }
    }

    /// Derive the channel family from a site id.
    ///
    /// Membership is a `-`-separated segment equal to `TH` or `VOC`; there is
    /// no separate field, so ids must be built through the catalog.
    pub fn of_site(site: &str) -> Option<Channel> {
        site.split('-').find_map(|segment| match segment {
            "TH" => Some(Channel::Th),
            "VOC" => Some(Channel::Voc),
            _ => None,
        })
    }

    /// Metrics reported by this family, in display order.
    pub fn metrics(self) -> &'static [Metric] {
        match self {
            Channel::Th => &Metric::TH,
            Channel::Voc => &Metric::VOC,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A site identifier, `<BASE>-<CHANNEL>[-<VERSION>]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(String);

impl SiteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn channel(&self) -> Option<Channel> {
        Channel::of_site(&self.0)
    }

    pub fn is_channel(&self, channel: Channel) -> bool {
        self.channel() == Some(channel)
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SiteId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SiteId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SiteId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ── Metrics ───────────────────────────────────────────────────────────

/// Closed set of plottable metrics. Each maps to one reading field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Pm25,
    Pm10,
    Temperature,
    Humidity,
    Noise,
    Illumination,
    Voc,
    O3,
    So2,
    No2,
}

impl Metric {
    pub const TH: [Metric; 6] = [
        Metric::Pm25,
        Metric::Pm10,
        Metric::Temperature,
        Metric::Humidity,
        Metric::Noise,
        Metric::Illumination,
    ];

    pub const VOC: [Metric; 4] = [Metric::Voc, Metric::O3, Metric::So2, Metric::No2];

    pub const ALL: [Metric; 10] = [
        Metric::Pm25,
        Metric::Pm10,
        Metric::Temperature,
        Metric::Humidity,
        Metric::Noise,
        Metric::Illumination,
        Metric::Voc,
        Metric::O3,
        Metric::So2,
        Metric::No2,
    ];

    /// Look a metric up by its wire key. Unknown names return `None`.
    pub fn from_key(key: &str) -> Option<Metric> {
        Self::ALL.iter().copied().find(|m| m.key() == key)
    }

    pub fn key(self) -> &'static str {
        match self {
            Metric::Pm25 => "pm25",
            Metric::Pm10 => "pm10",
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
            Metric::Noise => "noise",
            Metric::Illumination => "illumination",
            Metric::Voc => "voc",
            Metric::O3 => "o3",
            Metric::So2 => "so2",
            Metric::No2 => "no2",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Metric::Pm25 => "PM2.5",
            Metric::Pm10 => "PM10",
            Metric::Temperature => "Temp",
            Metric::Humidity => "Humidity",
            Metric::Noise => "Noise",
            Metric::Illumination => "Illumination",
            Metric::Voc => "VOC",
            Metric::O3 => "O₃",
            Metric::So2 => "SO₂",
            Metric::No2 => "NO₂",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Metric::Pm25 | Metric::Pm10 => "µg/m³",
            Metric::Temperature => "°C",
            Metric::Humidity => "%",
            Metric::Noise => "dB",
            Metric::Illumination => "lx",
            Metric::Voc | Metric::O3 | Metric::So2 | Metric::No2 => "ppm",
        }
    }

    pub fn channel(self) -> Channel {
        match self {
            Metric::Pm25
            | Metric::Pm10
            | Metric::Temperature
            | Metric::Humidity
            | Metric::Noise
            | Metric::Illumination => Channel::Th,
            Metric::Voc | Metric::O3 | Metric::So2 | Metric::No2 => Channel::Voc,
        }
    }

    /// Fixed output precision: gas channels are ppm-scale.
    pub fn decimals(self) -> usize {
        match self.channel() {
            Channel::Th => 2,
            Channel::Voc => 4,
        }
    }

    /// Read this metric's field out of a reading of the matching family.
    pub fn value_of(self, reading: &Reading) -> Option<f64> {
        match (self, reading) {
            (Metric::Pm25, Reading::Th(r)) => r.pm25,
            (Metric::Pm10, Reading::Th(r)) => r.pm10,
            (Metric::Temperature, Reading::Th(r)) => r.temperature,
            (Metric::Humidity, Reading::Th(r)) => r.humidity,
            (Metric::Noise, Reading::Th(r)) => r.noise,
            (Metric::Illumination, Reading::Th(r)) => r.illumination,
            (Metric::Voc, Reading::Voc(r)) => r.voc,
            (Metric::O3, Reading::Voc(r)) => r.o3,
            (Metric::So2, Reading::Voc(r)) => r.so2,
            (Metric::No2, Reading::Voc(r)) => r.no2,
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ── Raw rows (telemetry API shape) ────────────────────────────────────

/// Accept a value sent as a JSON number or string; keep its text.
fn de_opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// One TH row as returned by `/v6/th`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThRow {
    #[serde(rename = "SiteName")]
    pub site_name: String,
    #[serde(rename = "Humidity", default, deserialize_with = "de_opt_text")]
    pub humidity: Option<String>,
    #[serde(rename = "Temperature", default, deserialize_with = "de_opt_text")]
    pub temperature: Option<String>,
    #[serde(rename = "Noise", default, deserialize_with = "de_opt_text")]
    pub noise: Option<String>,
    #[serde(rename = "PM2_5", default, deserialize_with = "de_opt_text")]
    pub pm2_5: Option<String>,
    #[serde(rename = "PM10", default, deserialize_with = "de_opt_text")]
    pub pm10: Option<String>,
    #[serde(rename = "ReceivedTime", default)]
    pub received_time: String,
    #[serde(rename = "ReportedTimeUTC", default)]
    pub reported_time_utc: String,
    #[serde(rename = "Illumination", default, deserialize_with = "de_opt_text")]
    pub illumination: Option<String>,
}

/// One VOC row as returned by `/v6/voc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocRow {
    #[serde(rename = "SiteName")]
    pub site_name: String,
    #[serde(rename = "ReportedTimeUTC", default)]
    pub reported_time_utc: String,
    #[serde(rename = "VOC", default, deserialize_with = "de_opt_text")]
    pub voc: Option<String>,
    #[serde(rename = "O3", default, deserialize_with = "de_opt_text")]
    pub o3: Option<String>,
    #[serde(rename = "SO2", default, deserialize_with = "de_opt_text")]
    pub so2: Option<String>,
    #[serde(rename = "NO2", default, deserialize_with = "de_opt_text")]
    pub no2: Option<String>,
    #[serde(rename = "ReceivedTime", default)]
    pub received_time: String,
}

// ── Normalized readings ───────────────────────────────────────────────

/// How exact-zero sensor values are treated during normalization.
///
/// `TreatAsMissing` cannot tell "instrument reported 0" from "instrument
/// reported nothing"; use `Keep` where true zeros matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroReadingPolicy {
    #[default]
    TreatAsMissing,
    Keep,
}

impl ZeroReadingPolicy {
    fn parse(self, raw: Option<&str>) -> Option<f64> {
        let value = raw?.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
        match self {
            ZeroReadingPolicy::TreatAsMissing if value == 0.0 => None,
            _ => Some(value),
        }
    }
}

fn last_seen(ts: Option<i64>, received: Option<i64>) -> Option<i64> {
    match (ts, received) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0).max(b.unwrap_or(0))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThReading {
    pub site: SiteId,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub noise: Option<f64>,
    pub illumination: Option<f64>,
    pub reported_utc: String,
    pub received_utc: String,
    /// Report time in ms since epoch.
    pub ts: Option<i64>,
    /// Later of report and receive time.
    pub last_seen_ms: Option<i64>,
}

impl ThReading {
    pub fn from_row(row: &ThRow, zeros: ZeroReadingPolicy) -> Self {
        let ts = parse_utc_sql(&row.reported_time_utc);
        let received = parse_utc_sql(&row.received_time);
        Self {
            site: SiteId::new(row.site_name.clone()),
            pm25: zeros.parse(row.pm2_5.as_deref()),
            pm10: zeros.parse(row.pm10.as_deref()),
            temperature: zeros.parse(row.temperature.as_deref()),
            humidity: zeros.parse(row.humidity.as_deref()),
            noise: zeros.parse(row.noise.as_deref()),
            illumination: zeros.parse(row.illumination.as_deref()),
            reported_utc: row.reported_time_utc.clone(),
            received_utc: row.received_time.clone(),
            ts,
            last_seen_ms: last_seen(ts, received),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VocReading {
    pub site: SiteId,
    pub voc: Option<f64>,
    pub o3: Option<f64>,
    pub so2: Option<f64>,
    pub no2: Option<f64>,
    pub reported_utc: String,
    pub received_utc: String,
    pub ts: Option<i64>,
    pub last_seen_ms: Option<i64>,
}

impl VocReading {
    pub fn from_row(row: &VocRow, zeros: ZeroReadingPolicy) -> Self {
        let ts = parse_utc_sql(&row.reported_time_utc);
        let received = parse_utc_sql(&row.received_time);
        Self {
            site: SiteId::new(row.site_name.clone()),
            voc: zeros.parse(row.voc.as_deref()),
            o3: zeros.parse(row.o3.as_deref()),
            so2: zeros.parse(row.so2.as_deref()),
            no2: zeros.parse(row.no2.as_deref()),
            reported_utc: row.reported_time_utc.clone(),
            received_utc: row.received_time.clone(),
            ts,
            last_seen_ms: last_seen(ts, received),
        }
    }
}

/// A normalized reading from either family.
///
/// Untagged on the wire; each variant rejects the other's fields so a
/// cached reading decodes back into its own family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reading {
    Th(ThReading),
    Voc(VocReading),
}

impl Reading {
    pub fn site(&self) -> &SiteId {
        match self {
            Reading::Th(r) => &r.site,
            Reading::Voc(r) => &r.site,
        }
    }

    pub fn ts(&self) -> Option<i64> {
        match self {
            Reading::Th(r) => r.ts,
            Reading::Voc(r) => r.ts,
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Reading::Th(_) => Channel::Th,
            Reading::Voc(_) => Channel::Voc,
        }
    }
}

/// One point of a metric series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    /// ms since epoch.
    pub ts: i64,
    pub value: f64,
}

/// Most recent reading per site; `None` means no data in the window.
pub type LatestSnapshot = BTreeMap<SiteId, Option<Reading>>;

/// Per-site chronological points for one metric.
pub type SeriesMap = BTreeMap<SiteId, Vec<TimePoint>>;
