//! `SensorFeed`: the read surface consumed by dashboards and the CLI.

use std::path::Path;
use std::sync::Arc;

use common::time::{TimeRange, MS_PER_SECOND};
use common::{
    Channel, FeedConfig, LatestSnapshot, Metric, Reading, Result, SeriesMap, SiteCatalog, SiteId,
    ThReading, VocReading,
};
use futures_util::future::try_join_all;
use telemetry_client::Health;
use tracing::{debug, info};

use crate::aggregate::{
    assemble_series, empty_series, normalize_th, normalize_voc, pick_latest, resolve_scope,
};
use crate::clock::{Clock, SystemClock};
use crate::fetcher::CacheAside;
use crate::preload;
use crate::source::RowSource;
use crate::store::{JsonFileStore, KvStore, MemoryStore};
use crate::warmup::{NetworkHints, WarmupOutcome};

const SITES_KEY: &str = "sites";

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs)
        .unwrap_or(i64::MAX)
        .saturating_mul(MS_PER_SECOND)
}

fn store_for(dir: Option<&Path>) -> Arc<dyn KvStore> {
    match dir {
        Some(dir) => {
            info!("Caching to {}", dir.display());
            Arc::new(JsonFileStore::new(dir))
        }
        None => Arc::new(MemoryStore::new()),
    }
}

/// Cached, source-agnostic access to sites, latest readings and series.
#[derive(Clone)]
pub struct SensorFeed {
    config: Arc<FeedConfig>,
    source: Arc<RowSource>,
    cache: CacheAside,
}

impl SensorFeed {
    /// Build the feed the configuration describes: live or synthetic rows,
    /// memory or on-disk cache, system clock.
    pub fn from_config(config: FeedConfig) -> Result<Self> {
        config.catalog.validate()?;
        let source = RowSource::from_config(&config)?;
        let store = store_for(config.cache.dir.as_deref());
        Ok(Self::with_parts(config, source, store, Arc::new(SystemClock)))
    }

    pub fn with_parts(
        config: FeedConfig,
        source: RowSource,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            source: Arc::new(source),
            cache: CacheAside::new(store, clock),
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Device registry (names and map coordinates).
    pub fn catalog(&self) -> &SiteCatalog {
        &self.config.catalog
    }

    pub fn cache(&self) -> &CacheAside {
        &self.cache
    }

    pub fn is_mock(&self) -> bool {
        self.source.is_mock()
    }

    fn refresh_after_ms(&self) -> i64 {
        secs_to_ms(self.config.cache.refresh_after_secs)
    }

    fn last_hours(&self, hours: u32) -> TimeRange {
        TimeRange::last_hours(hours, self.cache.now_ms())
    }

    pub async fn health(&self) -> Result<Health> {
        self.source.health().await
    }

    pub async fn get_sites(&self) -> Result<Vec<SiteId>> {
        let source = self.source.clone();
        self.cache
            .fetch_with_revalidate(
                SITES_KEY,
                secs_to_ms(self.config.cache.sites_max_age_secs),
                self.refresh_after_ms(),
                move || async move { source.sites().await },
            )
            .await
    }

    /// Uncached TH readings in `range`, optionally for one site.
    pub async fn query_th(&self, site: Option<&SiteId>, range: TimeRange) -> Result<Vec<ThReading>> {
        let rows = self.source.th_rows(site, range).await?;
        let zeros = self.config.zero_readings;
        Ok(rows.iter().map(|row| ThReading::from_row(row, zeros)).collect())
    }

    /// Uncached VOC readings in `range`, optionally for one site.
    pub async fn query_voc(&self, site: Option<&SiteId>, range: TimeRange) -> Result<Vec<VocReading>> {
        let rows = self.source.voc_rows(site, range).await?;
        let zeros = self.config.zero_readings;
        Ok(rows.iter().map(|row| VocReading::from_row(row, zeros)).collect())
    }

    /// Normalized readings for one site. Sites outside both families have none.
    async fn site_readings(&self, site: &SiteId, range: TimeRange) -> Result<Vec<Reading>> {
        let zeros = self.config.zero_readings;
        match site.channel() {
            Some(Channel::Th) => {
                let rows = self.source.th_rows(Some(site), range).await?;
                Ok(normalize_th(&rows, zeros))
            }
            Some(Channel::Voc) => {
                let rows = self.source.voc_rows(Some(site), range).await?;
                Ok(normalize_voc(&rows, zeros))
            }
            None => {
                debug!("Site {} has no channel segment; skipping", site);
                Ok(Vec::new())
            }
        }
    }

    async fn readings_for(&self, sites: &[SiteId], range: TimeRange) -> Result<Vec<Reading>> {
        let mut pending = Vec::with_capacity(sites.len());
        for site in sites {
            pending.push(self.site_readings(site, range));
        }
        let per_site = try_join_all(pending).await?;
        Ok(per_site.into_iter().flatten().collect())
    }

    async fn load_latest(&self, hours: u32) -> Result<LatestSnapshot> {
        let range = self.last_hours(hours);
        let sites = self.get_sites().await?;
        let readings = self.readings_for(&sites, range).await?;
        let latest = pick_latest(&sites, &readings);
        debug!(
            "Latest snapshot: {}/{} sites reporting in the last {}h",
            latest.values().filter(|r| r.is_some()).count(),
            latest.len(),
            hours
        );
        Ok(latest)
    }

    /// Newest reading per known site within the last `hours`.
    pub async fn get_latest_readings(&self, hours: u32) -> Result<LatestSnapshot> {
        let feed = self.clone();
        self.cache
            .fetch_with_revalidate(
                &format!("latest:all:{}h", hours),
                secs_to_ms(self.config.cache.latest_max_age_secs),
                self.refresh_after_ms(),
                move || async move { feed.load_latest(hours).await },
            )
            .await
    }

    async fn load_series(&self, metric: Metric, requested: Vec<SiteId>, hours: u32) -> Result<SeriesMap> {
        let range = self.last_hours(hours);
        let known = if requested.is_empty() {
            self.get_sites().await?
        } else {
            Vec::new()
        };
        let scope = resolve_scope(metric.channel(), &requested, &known)?;
        let readings = self.readings_for(&scope, range).await?;
        Ok(assemble_series(metric, &scope, &readings))
    }

    /// Chronological points of one metric per site over the last `hours`.
    ///
    /// An empty `site_ids` means every site of the metric's family. An
    /// unrecognized metric name yields empty series, never an error.
    pub async fn get_timeseries_by_metric(
        &self,
        metric: &str,
        site_ids: &[SiteId],
        hours: u32,
    ) -> Result<SeriesMap> {
        let Some(metric) = Metric::from_key(metric) else {
            debug!("Unknown metric {:?}; returning empty series", metric);
            return Ok(empty_series(site_ids));
        };
        // Family mismatches are caller errors; report them before any I/O.
        resolve_scope(metric.channel(), site_ids, &[])?;

        let scope_key = if site_ids.is_empty() {
            "*".to_string()
        } else {
            site_ids.iter().map(SiteId::as_str).collect::<Vec<_>>().join(",")
        };
        let key = format!("series:{}:{}:{}h", metric.key(), scope_key, hours);

        let feed = self.clone();
        let requested = site_ids.to_vec();
        self.cache
            .fetch_with_revalidate(
                &key,
                secs_to_ms(self.config.cache.series_max_age_secs),
                self.refresh_after_ms(),
                move || async move { feed.load_series(metric, requested, hours).await },
            )
            .await
    }

    /// Preload device pages for the first catalog devices.
    ///
    /// `None` arguments fall back to the `[warmup]` config section.
    pub async fn warm(
        &self,
        hints: NetworkHints,
        count: Option<usize>,
        concurrency: Option<usize>,
    ) -> WarmupOutcome {
        let count = count.unwrap_or(self.config.warmup.count);
        let concurrency = concurrency.unwrap_or(self.config.warmup.concurrency);
        preload::preload_devices(self, hints, count, concurrency).await
    }
}

impl std::fmt::Debug for SensorFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorFeed")
            .field("source", &self.source)
            .field("devices", &self.config.catalog.devices().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use common::config::SynthConfig;
    use common::Device;

    const NOW: i64 = 1_740_830_400_000;

    fn mock_feed(clock: Arc<ManualClock>) -> (SensorFeed, Arc<MemoryStore>) {
        let config = FeedConfig {
            use_mock: true,
            catalog: SiteCatalog::new(
                vec![Device::new("A", "Alpha", 0.0, 0.0), Device::new("B", "Bravo", 0.0, 0.0)],
                "",
            ),
            synth: SynthConfig {
                drop_rate: 0.0,
                ..SynthConfig::default()
            },
            ..FeedConfig::default()
        };
        let store = Arc::new(MemoryStore::new());
        let source = RowSource::from_config(&config).unwrap();
        (SensorFeed::with_parts(config, source, store.clone(), clock), store)
    }

    #[tokio::test]
    async fn test_latest_covers_all_sites() {
        let (feed, store) = mock_feed(Arc::new(ManualClock::new(NOW)));
        let latest = feed.get_latest_readings(1).await.unwrap();

        let keys: Vec<&str> = latest.keys().map(SiteId::as_str).collect();
        assert_eq!(keys, vec!["A-TH", "A-VOC", "B-TH", "B-VOC"]);
        assert!(latest.values().all(|r| r.is_some()));
        assert!(matches!(latest["A-VOC"], Some(Reading::Voc(_))));
        assert_eq!(store.keys(), vec!["latest:all:1h", "sites"]);
    }

    #[tokio::test]
    async fn test_latest_is_served_from_cache() {
        let clock = Arc::new(ManualClock::new(NOW));
        let (feed, _store) = mock_feed(clock.clone());

        let first = feed.get_latest_readings(1).await.unwrap();
        clock.advance(30_000);
        let second = feed.get_latest_readings(1).await.unwrap();
        assert_eq!(first, second, "a 30s old snapshot is still fresh");
    }

    #[tokio::test]
    async fn test_unknown_metric_is_empty() {
        let (feed, store) = mock_feed(Arc::new(ManualClock::new(NOW)));
        let sites = vec![SiteId::from("A-TH")];

        let series = feed.get_timeseries_by_metric("co2", &sites, 1).await.unwrap();
        assert_eq!(series.len(), 1);
        assert!(series["A-TH"].is_empty());
        assert!(feed.get_timeseries_by_metric("co2", &[], 1).await.unwrap().is_empty());
        assert!(store.is_empty(), "unknown metrics never touch the cache");
    }

    #[tokio::test]
    async fn test_series_rejects_wrong_family() {
        let (feed, _store) = mock_feed(Arc::new(ManualClock::new(NOW)));
        let err = feed
            .get_timeseries_by_metric("voc", &[SiteId::from("A-TH")], 1)
            .await
            .unwrap_err();
        assert!(err.is_programmer_error());
    }

    #[tokio::test]
    async fn test_series_default_scope() {
        let (feed, _store) = mock_feed(Arc::new(ManualClock::new(NOW)));
        let series = feed.get_timeseries_by_metric("no2", &[], 1).await.unwrap();
        let keys: Vec<&str> = series.keys().map(SiteId::as_str).collect();
        assert_eq!(keys, vec!["A-VOC", "B-VOC"]);
        assert!(series.values().all(|points| points.len() == 13));
    }

    #[tokio::test]
    async fn test_raw_queries_normalize() {
        let (feed, _store) = mock_feed(Arc::new(ManualClock::new(NOW)));
        let range = TimeRange::last_hours(1, NOW);
        let rows = feed.query_th(Some(&SiteId::from("B-TH")), range).await.unwrap();
        assert_eq!(rows.len(), 13);
        assert!(rows.iter().all(|r| r.ts.is_some() && r.last_seen_ms >= r.ts));
        assert!(feed.query_voc(None, range).await.unwrap().len() == 26);
    }

    #[test]
    fn test_secs_to_ms_saturates() {
        assert_eq!(secs_to_ms(2), 2_000);
        assert_eq!(secs_to_ms(u64::MAX), i64::MAX);
        assert_eq!(secs_to_ms(i64::MAX as u64), i64::MAX);
        assert_eq!(secs_to_ms((i64::MAX / 1_000 + 1) as u64), i64::MAX);
    }
}
