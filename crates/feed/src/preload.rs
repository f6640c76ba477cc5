//! Device-page preloader.
//!
//! For each of the first catalog devices, stores the device's latest TH/VOC
//! pair under `latest:<id>` and its per-metric chart rows under
//! `rows:<id>:<hours>h:<version>`.

use common::{Error, Metric, Reading, Result, TimePoint};
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::api::SensorFeed;
use crate::warmup::{NetworkHints, WarmupOutcome, WarmupScheduler};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestPair {
    pub th: Option<Reading>,
    pub voc: Option<Reading>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedLatest {
    pub latest: LatestPair,
    pub cached_at: i64,
}

/// One chart row of a device page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub key: Metric,
    pub label: String,
    pub unit: String,
    pub points: Vec<TimePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicePage {
    pub rows: Vec<MetricRow>,
    pub cached_at: i64,
    pub max_ts: Option<i64>,
}

pub fn latest_key(device_id: &str) -> String {
    format!("latest:{}", device_id)
}

pub fn rows_key(device_id: &str, hours: u32, version: &str) -> String {
    format!("rows:{}:{}h:{}", device_id, hours, version)
}

/// Chart rows in metric display order, dropping metrics with no points.
pub fn build_rows(series: Vec<(Metric, Vec<TimePoint>)>) -> Vec<MetricRow> {
    series
        .into_iter()
        .filter(|(_, points)| !points.is_empty())
        .map(|(metric, points)| MetricRow {
            key: metric,
            label: metric.label().to_string(),
            unit: metric.unit().to_string(),
            points,
        })
        .collect()
}

fn max_ts(rows: &[MetricRow]) -> Option<i64> {
    rows.iter().flat_map(|r| r.points.iter().map(|p| p.ts)).max()
}

/// Warm one device's cache entries.
pub async fn warm_device(feed: &SensorFeed, device_id: &str) -> Result<()> {
    let hours = feed.config().warmup.hours;
    let catalog = feed.catalog();
    let th_site = catalog.th_site_of(device_id);
    let voc_site = catalog.voc_site_of(device_id);

    let snapshot = feed.get_latest_readings(hours).await?;
    let latest = CachedLatest {
        latest: LatestPair {
            th: snapshot.get(&th_site).cloned().flatten(),
            voc: snapshot.get(&voc_site).cloned().flatten(),
        },
        cached_at: feed.cache().now_ms(),
    };
    feed.cache()
        .put(&latest_key(device_id), &latest, serde_json::Value::Null)
        .await;

    let mut pending = Vec::with_capacity(Metric::ALL.len());
    for metric in Metric::ALL {
        let site = catalog.site_of(device_id, metric.channel());
        pending.push(async move {
            let mut map = feed
                .get_timeseries_by_metric(metric.key(), std::slice::from_ref(&site), hours)
                .await?;
            Ok::<_, Error>((metric, map.remove(&site).unwrap_or_default()))
        });
    }
    let series = try_join_all(pending).await?;

    let rows = build_rows(series);
    let page = DevicePage {
        max_ts: max_ts(&rows),
        cached_at: feed.cache().now_ms(),
        rows,
    };
    let key = rows_key(device_id, hours, &feed.config().warmup.rows_version);
    feed.cache()
        .put(&key, &page, json!({ "max_ts": page.max_ts }))
        .await;

    debug!("Preloaded {} ({} chart rows)", device_id, page.rows.len());
    Ok(())
}

/// Warm the first `count` catalog devices, `concurrency` at a time.
pub async fn preload_devices(
    feed: &SensorFeed,
    hints: NetworkHints,
    count: usize,
    concurrency: usize,
) -> WarmupOutcome {
    let targets: Vec<String> = feed
        .catalog()
        .devices()
        .iter()
        .take(count)
        .map(|d| d.id.clone())
        .collect();

    let scheduler = WarmupScheduler::new(concurrency, hints);
    scheduler
        .warm(targets, |device_id| {
            let feed = feed.clone();
            async move { warm_device(&feed, &device_id).await }
        })
        .await
}
