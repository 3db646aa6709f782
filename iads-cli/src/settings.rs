//! Configuration loading: TOML file plus `IADS_*` environment overrides

use anyhow::{Context, Result};
use iads_core::IadsConfig;
use std::path::Path;
use tracing::debug;

/// Load configuration from an optional TOML file, apply environment
/// overrides and validate. A missing explicit file is an error; with no
/// file given the stock defaults are used.
pub fn load_config(path: Option<&Path>) -> Result<IadsConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => IadsConfig::default(),
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Override a handful of operational knobs from `IADS_*` variables:
/// `IADS_TOP_K`, `IADS_PROBE_INTERVAL`, `IADS_PROBE_INTERVAL_MIN`,
/// `IADS_PROBE_INTERVAL_MAX`, `IADS_ROUND_TIMEOUT`,
/// `IADS_MAX_PARALLEL_PROBES`, `IADS_SLIDING_WINDOW`.
fn apply_env_overrides(config: &mut IadsConfig) -> Result<()> {
    fn parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        match std::env::var(name) {
            Ok(raw) => {
                let value = raw
                    .parse::<T>()
                    .map_err(|e| anyhow::anyhow!("invalid {name}={raw}: {e}"))?;
                debug!(name, %raw, "environment override applied");
                Ok(Some(value))
            }
            Err(_) => Ok(None),
        }
    }

    if let Some(v) = parse::<usize>("IADS_TOP_K")? {
        config.system.top_k = v;
    }
    if let Some(v) = parse::<f64>("IADS_PROBE_INTERVAL")? {
        config.system.probe_interval_default = v;
    }
    if let Some(v) = parse::<f64>("IADS_PROBE_INTERVAL_MIN")? {
        config.system.probe_interval_min = v;
    }
    if let Some(v) = parse::<f64>("IADS_PROBE_INTERVAL_MAX")? {
        config.system.probe_interval_max = v;
    }
    if let Some(v) = parse::<f64>("IADS_ROUND_TIMEOUT")? {
        config.system.round_timeout = v;
    }
    if let Some(v) = parse::<usize>("IADS_MAX_PARALLEL_PROBES")? {
        config.system.max_parallel_probes = v;
    }
    if let Some(v) = parse::<f64>("IADS_SLIDING_WINDOW")? {
        config.system.sliding_window = v;
    }
    Ok(())
}
