//! Where raw rows come from: the telemetry API or the synthetic emitter.

use common::time::TimeRange;
use common::{Channel, Error, FeedConfig, Result, SiteId, ThRow, VocRow};
use synth::RowEmitter;
use telemetry_client::{Health, TelemetryClient};
use tracing::info;

const MOCK_FEATURES: [&str; 2] = ["site_filtering", "time_range_query"];

#[derive(Debug, Clone)]
pub enum RowSource {
    Live(TelemetryClient),
    Mock(RowEmitter),
}

fn check_family(site: Option<&SiteId>, channel: Channel) -> Result<()> {
    match site {
        Some(site) if !site.is_channel(channel) => Err(Error::InvalidChannel {
            site: site.to_string(),
            expected: channel,
        }),
        _ => Ok(()),
    }
}

impl RowSource {
    pub fn from_config(config: &FeedConfig) -> Result<Self> {
        if config.use_mock {
            info!("Using synthetic row source ({} devices)", config.catalog.devices().len());
            return Ok(RowSource::Mock(RowEmitter::new(
                config.catalog.clone(),
                config.synth.clone(),
            )));
        }

        let client = TelemetryClient::new(
            &config.api_base_url,
            config.request_timeout_ms,
            config.reads_per_sec,
        )?;
        info!("Using telemetry API at {}", client.base_url());
        Ok(RowSource::Live(client))
    }

    pub fn is_mock(&self) -> bool {
        matches!(self, RowSource::Mock(_))
    }

    pub async fn health(&self) -> Result<Health> {
        match self {
            RowSource::Live(client) => client.health().await,
            RowSource::Mock(_) => Ok(Health {
                status: "mock".into(),
                version: Some("v6".into()),
                features: MOCK_FEATURES.iter().map(|f| f.to_string()).collect(),
            }),
        }
    }

    pub async fn sites(&self) -> Result<Vec<SiteId>> {
        match self {
            RowSource::Live(client) => client.get_sites().await,
            RowSource::Mock(emitter) => Ok(emitter.catalog().sites()),
        }
    }

    pub async fn th_rows(&self, site: Option<&SiteId>, range: TimeRange) -> Result<Vec<ThRow>> {
        let range = TimeRange::new(range.start_ms, range.end_ms)?;
        check_family(site, Channel::Th)?;
        match self {
            RowSource::Live(client) => client.query_th(site, range).await,
            RowSource::Mock(emitter) => emitter.emit_th(site.map(std::slice::from_ref), range),
        }
    }

    pub async fn voc_rows(&self, site: Option<&SiteId>, range: TimeRange) -> Result<Vec<VocRow>> {
        let range = TimeRange::new(range.start_ms, range.end_ms)?;
        check_family(site, Channel::Voc)?;
        match self {
            RowSource::Live(client) => client.query_voc(site, range).await,
            RowSource::Mock(emitter) => emitter.emit_voc(site.map(std::slice::from_ref), range),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock() -> RowSource {
        RowSource::from_config(&FeedConfig {
            use_mock: true,
            ..FeedConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_mock_health_and_sites() {
        let source = mock();
        assert!(source.is_mock());

        let health = source.health().await.unwrap();
        assert_eq!(health.status, "mock");
        assert_eq!(health.version.as_deref(), Some("v6"));
        assert_eq!(health.features, vec!["site_filtering", "time_range_query"]);

        assert_eq!(source.sites().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_rows_reject_wrong_family_and_bad_range() {
        let source = mock();
        let voc_site = SiteId::from("UTIS0001-VOC-V6_1");
        let range = TimeRange::last_hours(1, 1_740_830_400_000);

        let err = source.th_rows(Some(&voc_site), range).await.unwrap_err();
        assert!(matches!(err, Error::InvalidChannel { .. }));

        let inverted = TimeRange {
            start_ms: range.end_ms,
            end_ms: range.start_ms,
        };
        let err = source.voc_rows(Some(&voc_site), inverted).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRange { .. }));

        let rows = source.voc_rows(Some(&voc_site), range).await.unwrap();
        assert!(rows.iter().all(|r| r.site_name == voc_site.as_str()));
        assert!(!rows.is_empty());
    }

    #[test]
    fn test_live_source_from_config() {
        let source = RowSource::from_config(&FeedConfig::default()).unwrap();
        assert!(!source.is_mock());
    }
}
