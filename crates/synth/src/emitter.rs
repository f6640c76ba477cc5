//! Row emitter: drives the signal model across a time range.

use common::config::SynthConfig;
use common::time::{to_utc_sql, TimeRange, MS_PER_SECOND};
use common::{Channel, Error, Metric, Result, SiteCatalog, SiteId, ThRow, VocRow};
use tracing::debug;

use crate::signal::{Sample, SiteSignal};

/// Lazy, finite timestamps from `start` to `end` inclusive.
#[derive(Debug, Clone)]
pub struct TimeSteps {
    next: i64,
    end: i64,
    step_ms: i64,
}

impl TimeSteps {
    pub fn new(range: TimeRange, step_ms: i64) -> Self {
        Self {
            next: range.start_ms,
            end: range.end_ms,
            step_ms: step_ms.max(1),
        }
    }
}

impl Iterator for TimeSteps {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        if self.next > self.end {
            return None;
        }
        let current = self.next;
        match current.checked_add(self.step_ms) {
            Some(next) => self.next = next,
            // The next grid point is past i64::MAX; this one is the last.
            None => self.end = current - 1,
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.next > self.end {
            return (0, Some(0));
        }
        let span = i128::from(self.end) - i128::from(self.next);
        let n = usize::try_from(span / i128::from(self.step_ms) + 1).unwrap_or(usize::MAX);
        (n, Some(n))
    }
}

/// Emitted rows for one channel family.
#[derive(Debug, Clone, PartialEq)]
pub enum Rows {
    Th(Vec<ThRow>),
    Voc(Vec<VocRow>),
}

impl Rows {
    pub fn len(&self) -> usize {
        match self {
            Rows::Th(rows) => rows.len(),
            Rows::Voc(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Synthetic replacement for the `/v6/th` and `/v6/voc` endpoints.
#[derive(Debug, Clone)]
pub struct RowEmitter {
    catalog: SiteCatalog,
    config: SynthConfig,
}

impl RowEmitter {
    pub fn new(catalog: SiteCatalog, config: SynthConfig) -> Self {
        Self { catalog, config }
    }

    pub fn catalog(&self) -> &SiteCatalog {
        &self.catalog
    }

    fn step_ms(&self) -> i64 {
        self.config.step_secs as i64 * MS_PER_SECOND
    }

    /// Resolve the site scope; no filter means the whole family.
    fn scope(&self, channel: Channel, sites: Option<&[SiteId]>) -> Result<Vec<SiteId>> {
        match sites {
            Some(requested) if !requested.is_empty() => {
                if let Some(bad) = requested.iter().find(|s| !s.is_channel(channel)) {
                    return Err(Error::InvalidChannel {
                        site: bad.to_string(),
                        expected: channel,
                    });
                }
                Ok(requested.to_vec())
            }
            _ => Ok(self.catalog.sites_for(channel)),
        }
    }

    fn samples<'a>(
        &'a self,
        site: &'a SiteId,
        channel: Channel,
        range: TimeRange,
    ) -> impl Iterator<Item = Sample> + 'a {
        let mut signal = SiteSignal::new(site.as_str(), channel, &self.config);
        TimeSteps::new(range, self.step_ms())
            .map(move |ts| signal.step(ts))
            .filter(|sample| !sample.dropped)
    }

    pub fn emit_th(&self, sites: Option<&[SiteId]>, range: TimeRange) -> Result<Vec<ThRow>> {
        let range = TimeRange::new(range.start_ms, range.end_ms)?;
        let scope = self.scope(Channel::Th, sites)?;
        let mut out = Vec::new();

        for site in &scope {
            out.extend(self.samples(site, Channel::Th, range).map(|s| ThRow {
                site_name: site.to_string(),
                humidity: s.formatted(Metric::Humidity),
                temperature: s.formatted(Metric::Temperature),
                noise: s.formatted(Metric::Noise),
                pm2_5: s.formatted(Metric::Pm25),
                pm10: s.formatted(Metric::Pm10),
                received_time: to_utc_sql(s.received_ms),
                reported_time_utc: to_utc_sql(s.ts_ms),
                illumination: s.formatted(Metric::Illumination),
            }));
        }

        debug!("Emitted {} synthetic TH rows for {} sites", out.len(), scope.len());
        Ok(out)
    }

    pub fn emit_voc(&self, sites: Option<&[SiteId]>, range: TimeRange) -> Result<Vec<VocRow>> {
        let range = TimeRange::new(range.start_ms, range.end_ms)?;
        let scope = self.scope(Channel::Voc, sites)?;
        let mut out = Vec::new();

        for site in &scope {
            out.extend(self.samples(site, Channel::Voc, range).map(|s| VocRow {
                site_name: site.to_string(),
                reported_time_utc: to_utc_sql(s.ts_ms),
                voc: s.formatted(Metric::Voc),
                o3: s.formatted(Metric::O3),
                so2: s.formatted(Metric::So2),
                no2: s.formatted(Metric::No2),
                received_time: to_utc_sql(s.received_ms),
            }));
        }

        debug!("Emitted {} synthetic VOC rows for {} sites", out.len(), scope.len());
        Ok(out)
    }

    /// Emit rows for either family over `[start_ms, end_ms]`.
    pub fn emit(
        &self,
        channel: Channel,
        sites: Option<&[SiteId]>,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Rows> {
        let range = TimeRange::new(start_ms, end_ms)?;
        match channel {
            Channel::Th => self.emit_th(sites, range).map(Rows::Th),
            Channel::Voc => self.emit_voc(sites, range).map(Rows::Voc),
        }
    }
}
