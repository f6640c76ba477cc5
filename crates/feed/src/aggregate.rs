//! Row normalization, latest-value picking and metric series assembly.

use std::collections::HashMap;

use common::{
    Channel, Error, LatestSnapshot, Metric, Reading, Result, SeriesMap, SiteId, ThReading,
    ThRow, TimePoint, VocReading, VocRow, ZeroReadingPolicy,
};

pub fn normalize_th(rows: &[ThRow], zeros: ZeroReadingPolicy) -> Vec<Reading> {
    rows.iter()
        .map(|row| Reading::Th(ThReading::from_row(row, zeros)))
        .collect()
}

pub fn normalize_voc(rows: &[VocRow], zeros: ZeroReadingPolicy) -> Vec<Reading> {
    rows.iter()
        .map(|row| Reading::Voc(VocReading::from_row(row, zeros)))
        .collect()
}

/// Newest reading per site, keyed by the reading's own family.
///
/// A row replaces the current best only on a strictly later report time, so
/// the first row seen wins an exact tie. Rows without a parseable report
/// time never win.
fn newest_by_site<'a>(
    readings: impl IntoIterator<Item = &'a Reading>,
) -> HashMap<(Channel, &'a str), (i64, &'a Reading)> {
    let mut best: HashMap<(Channel, &str), (i64, &Reading)> = HashMap::new();
    for reading in readings {
        let Some(ts) = reading.ts() else { continue };
        let key = (reading.channel(), reading.site().as_str());
        let newer = best.get(&key).map_or(true, |(current, _)| ts > *current);
        if newer {
            best.insert(key, (ts, reading));
        }
    }
    best
}

/// Map every site in `all_sites` to its newest reading, or `None`.
pub fn pick_latest<'a>(
    all_sites: &[SiteId],
    readings: impl IntoIterator<Item = &'a Reading>,
) -> LatestSnapshot {
    let best = newest_by_site(readings);
    all_sites
        .iter()
        .map(|site| {
            let latest = site
                .channel()
                .and_then(|channel| best.get(&(channel, site.as_str())))
                .map(|(_, reading)| (*reading).clone());
            (site.clone(), latest)
        })
        .collect()
}

/// Resolve which sites a series request covers.
///
/// An empty request means every known site of the metric's family. A
/// requested site of the other family is a caller error.
pub fn resolve_scope(channel: Channel, requested: &[SiteId], known: &[SiteId]) -> Result<Vec<SiteId>> {
    if requested.is_empty() {
        return Ok(known.iter().filter(|s| s.is_channel(channel)).cloned().collect());
    }
    if let Some(bad) = requested.iter().find(|s| !s.is_channel(channel)) {
        return Err(Error::InvalidChannel {
            site: bad.to_string(),
            expected: channel,
        });
    }
    Ok(requested.to_vec())
}

/// Chronological points of `metric` for each site in `scope`.
///
/// Every scoped site gets an entry, possibly empty. Missing values and
/// unparseable timestamps are dropped.
pub fn assemble_series<'a>(
    metric: Metric,
    scope: &[SiteId],
    readings: impl IntoIterator<Item = &'a Reading>,
) -> SeriesMap {
    let mut out: SeriesMap = scope.iter().map(|s| (s.clone(), Vec::new())).collect();

    for reading in readings {
        let Some(points) = out.get_mut(reading.site()) else { continue };
        if let (Some(ts), Some(value)) = (reading.ts(), metric.value_of(reading)) {
            points.push(TimePoint { ts, value });
        }
    }
    for points in out.values_mut() {
        points.sort_by_key(|p| p.ts);
    }
    out
}

/// Series for an unrecognized metric name: empty lists, never an error.
pub fn empty_series(requested: &[SiteId]) -> SeriesMap {
    requested.iter().map(|s| (s.clone(), Vec::new())).collect()
}
