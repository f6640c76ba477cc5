//! sitewatch: environmental sensor telemetry from the command line.
//!
//! Reads sites, latest readings and metric series from the v6 telemetry
//! API (or the synthetic generator with `--mock`) through the feed's
//! cache, and prints JSON on stdout. Logs go to stderr.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use common::time::TimeRange;
use common::{Device, SiteId};
use feed::{ConnectionClass, NetworkHints, SensorFeed};

/// Environmental sensor network feed
#[derive(Parser)]
#[command(name = "sitewatch", about = "Environmental sensor telemetry feed")]
struct Cli {
    /// Config file (defaults to ./config.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serve synthetic readings instead of calling the telemetry API.
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List site ids (or the device catalog with `--devices`).
    Sites {
        #[arg(long)]
        devices: bool,
    },
    /// Newest reading per site.
    Latest {
        #[arg(long)]
        hours: Option<u32>,
    },
    /// One metric's points per site.
    Series {
        #[arg(long)]
        metric: String,
        /// Restrict to these sites; repeat for several.
        #[arg(long = "site")]
        sites: Vec<String>,
        #[arg(long)]
        hours: Option<u32>,
    },
    /// Normalized rows for one channel family.
    Raw {
        #[arg(value_enum)]
        family: Family,
        #[arg(long)]
        site: Option<String>,
        #[arg(long, default_value_t = 1)]
        hours: u32,
        /// Range start, `YYYY-MM-DD HH:MM:SS` UTC. Requires `--end`.
        #[arg(long, requires = "end")]
        start: Option<String>,
        #[arg(long, requires = "start")]
        end: Option<String>,
    },
    /// Telemetry API health.
    Health,
    /// Preload device pages into the cache.
    Warm {
        #[arg(long)]
        count: Option<usize>,
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        save_data: bool,
        #[arg(long, default_value = "unknown")]
        connection: ConnectionClass,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Family {
    Th,
    Voc,
}

#[derive(Serialize)]
struct DeviceView<'a> {
    #[serde(flatten)]
    device: &'a Device,
    th_site: SiteId,
    voc_site: SiteId,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = config::load_config(cli.config.as_deref(), cli.mock).context("loading configuration")?;
    let latest_hours = cfg.latest_hours;
    let series_hours = cfg.series_hours;

    let feed = SensorFeed::from_config(cfg).context("building sensor feed")?;
    info!(
        "sitewatch ready ({} source, {} devices)",
        if feed.is_mock() { "mock" } else { "live" },
        feed.catalog().devices().len()
    );

    match cli.command {
        Command::Sites { devices: true } => {
            let catalog = feed.catalog();
            let view: Vec<DeviceView> = catalog
                .devices()
                .iter()
                .map(|device| DeviceView {
                    device,
                    th_site: catalog.th_site_of(&device.id),
                    voc_site: catalog.voc_site_of(&device.id),
                })
                .collect();
            print_json(&view)
        }
        Command::Sites { devices: false } => print_json(&feed.get_sites().await?),
        Command::Latest { hours } => {
            print_json(&feed.get_latest_readings(hours.unwrap_or(latest_hours)).await?)
        }
        Command::Series {
            metric,
            sites,
            hours,
        } => {
            let sites: Vec<SiteId> = sites.into_iter().map(SiteId::from).collect();
            let series = feed
                .get_timeseries_by_metric(&metric, &sites, hours.unwrap_or(series_hours))
                .await?;
            print_json(&series)
        }
        Command::Raw {
            family,
            site,
            hours,
            start,
            end,
        } => {
            let range = match (start, end) {
                (Some(start), Some(end)) => TimeRange::from_sql(&start, &end)?,
                _ => TimeRange::last_hours(hours, feed.cache().now_ms()),
            };
            let site = site.map(SiteId::from);
            match family {
                Family::Th => print_json(&feed.query_th(site.as_ref(), range).await?),
                Family::Voc => print_json(&feed.query_voc(site.as_ref(), range).await?),
            }
        }
        Command::Health => print_json(&feed.health().await?),
        Command::Warm {
            count,
            concurrency,
            save_data,
            connection,
        } => {
            let hints = NetworkHints {
                save_data,
                connection,
            };
            print_json(&feed.warm(hints, count, concurrency).await)
        }
    }
}

#[tokio::main]
async fn main() {
    // Logs on stderr keep stdout pure JSON.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sitewatch=info,feed=info,synth=info,telemetry_client=info".into()
            }),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}
