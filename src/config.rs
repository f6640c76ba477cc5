//! Configuration loader: merges config.toml, .env, and `SITEWATCH_*` env vars.

use common::config::FeedConfig;
use common::{Error, ZeroReadingPolicy};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn parse_bool(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    lowered != "0" && lowered != "false" && lowered != "no" && lowered != "off"
}

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(Error::Config(format!("{env_name} must be an integer > 0"))),
    }
}

fn parse_rate(raw: &str, env_name: &str) -> Result<f64, Error> {
    match raw.trim().parse::<f64>() {
        Ok(v) if (0.0..=1.0).contains(&v) => Ok(v),
        _ => Err(Error::Config(format!("{env_name} must be a number in [0,1]"))),
    }
}

pub fn validate_config(config: &FeedConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if !config.use_mock && config.api_base_url.trim().trim_end_matches('/').is_empty() {
        issues.push("api_base_url is required unless use_mock=true".into());
    }
    if config.request_timeout_ms == 0 {
        issues.push("request_timeout_ms must be > 0".into());
    }
    if config.reads_per_sec == 0 {
        issues.push("reads_per_sec must be > 0".into());
    }
    if config.latest_hours == 0 {
        issues.push("latest_hours must be > 0".into());
    }
    if config.series_hours == 0 {
        issues.push("series_hours must be > 0".into());
    }

    if config.cache.sites_max_age_secs == 0 {
        issues.push("cache.sites_max_age_secs must be > 0".into());
    }
    if config.cache.refresh_after_secs > config.cache.latest_max_age_secs
        || config.cache.refresh_after_secs > config.cache.series_max_age_secs
    {
        issues.push("cache.refresh_after_secs must not exceed the latest/series max ages".into());
    }

    if config.synth.step_secs == 0 {
        issues.push("synth.step_secs must be > 0".into());
    }
    if !(0.0..=1.0).contains(&config.synth.drop_rate) {
        issues.push("synth.drop_rate must be in [0,1]".into());
    }

    if config.warmup.concurrency == 0 {
        issues.push("warmup.concurrency must be > 0".into());
    }
    if config.warmup.hours == 0 {
        issues.push("warmup.hours must be > 0".into());
    }
    if config.warmup.rows_version.trim().is_empty() {
        issues.push("warmup.rows_version must not be empty".into());
    }

    if let Err(Error::Config(catalog_issues)) = config.catalog.validate() {
        issues.push(catalog_issues.replace("\n - ", "; "));
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Apply `SITEWATCH_*` overrides read through `lookup`.
fn apply_env_overrides<F>(config: &mut FeedConfig, lookup: F) -> Result<(), Error>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("SITEWATCH_API_BASE_URL") {
        config.api_base_url = url.trim().to_string();
    }
    if let Some(raw) = lookup("SITEWATCH_USE_MOCK") {
        config.use_mock = parse_bool(&raw);
    }
    if let Some(raw) = lookup("SITEWATCH_REQUEST_TIMEOUT_MS") {
        config.request_timeout_ms = parse_positive_u64(&raw, "SITEWATCH_REQUEST_TIMEOUT_MS")?;
    }
    if let Some(raw) = lookup("SITEWATCH_READS_PER_SEC") {
        let parsed = parse_positive_u64(&raw, "SITEWATCH_READS_PER_SEC")?;
        config.reads_per_sec = u32::try_from(parsed)
            .map_err(|_| Error::Config("SITEWATCH_READS_PER_SEC is too large".into()))?;
    }
    if let Some(raw) = lookup("SITEWATCH_ZERO_READINGS") {
        config.zero_readings = match raw.trim().to_ascii_lowercase().as_str() {
            "treat_as_missing" | "missing" => ZeroReadingPolicy::TreatAsMissing,
            "keep" => ZeroReadingPolicy::Keep,
            _ => {
                return Err(Error::Config(
                    "SITEWATCH_ZERO_READINGS must be one of: treat_as_missing, keep".into(),
                ));
            }
        };
    }
    if let Some(raw) = lookup("SITEWATCH_CACHE_DIR") {
        let trimmed = raw.trim();
        config.cache.dir = if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        };
    }
    if let Some(raw) = lookup("SITEWATCH_DROP_RATE") {
        config.synth.drop_rate = parse_rate(&raw, "SITEWATCH_DROP_RATE")?;
    }
    if let Some(raw) = lookup("SITEWATCH_WARM_COUNT") {
        config.warmup.count = parse_positive_u64(&raw, "SITEWATCH_WARM_COUNT")? as usize;
    }
    if let Some(raw) = lookup("SITEWATCH_WARM_CONCURRENCY") {
        config.warmup.concurrency = parse_positive_u64(&raw, "SITEWATCH_WARM_CONCURRENCY")? as usize;
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<FeedConfig, Error> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Apply env overrides and the `--mock` flag, then validate.
fn finish_config<F>(mut config: FeedConfig, lookup: F, force_mock: bool) -> Result<FeedConfig, Error>
where
    F: Fn(&str) -> Option<String>,
{
    apply_env_overrides(&mut config, lookup)?;
    if force_mock {
        config.use_mock = true;
    }
    validate_config(&config)?;
    Ok(config)
}

/// Load feed configuration.
///
/// An explicit `path` must exist; otherwise `config.toml` is read when present.
/// `force_mock` wins over the file and the environment.
pub fn load_config(path: Option<&Path>, force_mock: bool) -> Result<FeedConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Defaults, then the config file.
    let config = match path {
        Some(path) => read_config_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                read_config_file(default_path)?
            } else {
                FeedConfig::default()
            }
        }
    };

    // 3. Environment variables, then the command line.
    finish_config(config, |name| std::env::var(name).ok(), force_mock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&FeedConfig::default()).is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = FeedConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("SITEWATCH_USE_MOCK", "yes"),
                ("SITEWATCH_ZERO_READINGS", "keep"),
                ("SITEWATCH_CACHE_DIR", "/tmp/sitewatch"),
                ("SITEWATCH_DROP_RATE", "0"),
                ("SITEWATCH_WARM_COUNT", "10"),
            ]),
        )
        .unwrap();

        assert!(config.use_mock);
        assert_eq!(config.zero_readings, ZeroReadingPolicy::Keep);
        assert_eq!(config.cache.dir, Some(PathBuf::from("/tmp/sitewatch")));
        assert_eq!(config.synth.drop_rate, 0.0);
        assert_eq!(config.warmup.count, 10);
    }

    #[test]
    fn test_bad_env_values_are_rejected() {
        let mut config = FeedConfig::default();
        assert!(apply_env_overrides(&mut config, env(&[("SITEWATCH_DROP_RATE", "1.5")])).is_err());
        assert!(apply_env_overrides(&mut config, env(&[("SITEWATCH_READS_PER_SEC", "0")])).is_err());
        assert!(apply_env_overrides(&mut config, env(&[("SITEWATCH_ZERO_READINGS", "drop")])).is_err());
    }

    #[test]
    fn test_validate_collects_all_issues() {
        let mut config = FeedConfig::default();
        config.api_base_url = " / ".into();
        config.warmup.concurrency = 0;
        config.synth.drop_rate = 2.0;

        let msg = validate_config(&config).unwrap_err().to_string();
        assert!(msg.contains("api_base_url"), "{}", msg);
        assert!(msg.contains("warmup.concurrency"), "{}", msg);
        assert!(msg.contains("synth.drop_rate"), "{}", msg);

        config.use_mock = true;
        config.warmup.concurrency = 2;
        config.synth.drop_rate = 0.0;
        assert!(validate_config(&config).is_ok(), "mock mode needs no base URL");
    }

    #[test]
    fn test_mock_flag_applies_before_validation() {
        let mut config = FeedConfig::default();
        config.api_base_url = String::new();

        let err = finish_config(config.clone(), env(&[]), false).unwrap_err();
        assert!(err.to_string().contains("api_base_url"), "{}", err);

        let config = finish_config(config, env(&[("SITEWATCH_USE_MOCK", "false")]), true).unwrap();
        assert!(config.use_mock, "the flag overrides the environment");
    }

    #[test]
    fn test_config_file_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sitewatch.toml");
        std::fs::write(
            &path,
            r#"
use_mock = true
latest_hours = 6

[catalog]
site_version = ""
devices = [{ id = "A" }, { id = "B", name = "Bravo", lat = 27.9, lon = -97.2 }]

[synth]
drop_rate = 0.0
"#,
        )
        .unwrap();

        let config = read_config_file(&path).unwrap();
        assert!(config.use_mock);
        assert_eq!(config.latest_hours, 6);
        assert_eq!(config.catalog.sites().len(), 4);
        assert_eq!(config.catalog.devices()[1].name, "Bravo");
        assert_eq!(config.synth.step_secs, 300, "unset fields keep defaults");
        assert!(validate_config(&config).is_ok());
    }
}
