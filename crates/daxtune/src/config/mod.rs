use std::time::Duration;

use anyhow::{Result, bail};

pub const DEFAULT_TIMED_RUNS: usize = 3;
pub const MAX_TIMED_RUNS: usize = 50;
pub const DEFAULT_IMPROVEMENT_THRESHOLD_PERCENT: f64 = 10.0;
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_REMOTE_ENDPOINT_BASE: &str = "powerbi://api.powerbi.com/v1.0/myorg";

pub const REMOTE_URL_SCHEMES: [&str; 2] = ["powerbi://", "asazure://"];

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub timed_runs: usize,
    pub improvement_threshold_percent: f64,
    pub call_timeout: Duration,
    pub remote_endpoint_base: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timed_runs: DEFAULT_TIMED_RUNS,
            improvement_threshold_percent: DEFAULT_IMPROVEMENT_THRESHOLD_PERCENT,
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            remote_endpoint_base: DEFAULT_REMOTE_ENDPOINT_BASE.to_string(),
        }
    }
}

#[must_use]
pub fn is_remote_url(endpoint: &str) -> bool {
    let lowered = endpoint.trim().to_ascii_lowercase();
    REMOTE_URL_SCHEMES
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
}

pub fn resolve_engine_config(
    timed_runs: Option<usize>,
    improvement_threshold_percent: Option<f64>,
    call_timeout_secs: Option<u64>,
    remote_endpoint_base: Option<&str>,
) -> Result<EngineConfig> {
    let defaults = EngineConfig::default();

    let timed_runs = timed_runs.unwrap_or(defaults.timed_runs);
    if timed_runs == 0 {
        bail!("timed_runs must be at least 1");
    }
    if timed_runs > MAX_TIMED_RUNS {
        bail!("timed_runs must not exceed {MAX_TIMED_RUNS}: {timed_runs}");
    }

    let threshold =
        improvement_threshold_percent.unwrap_or(defaults.improvement_threshold_percent);
    if !threshold.is_finite() || !(0.0..=100.0).contains(&threshold) {
        bail!("improvement threshold must be between 0 and 100 percent: {threshold}");
    }

    let call_timeout = match call_timeout_secs {
        Some(0) => bail!("call timeout must be greater than zero seconds"),
        Some(secs) => Duration::from_secs(secs),
        None => defaults.call_timeout,
    };

    let remote_endpoint_base = match remote_endpoint_base {
        Some(base) => {
            let base = base.trim().trim_end_matches('/');
            if !is_remote_url(base) {
                bail!(
                    "remote endpoint base must start with one of {}: {base}",
                    REMOTE_URL_SCHEMES.join(", ")
                );
            }
            base.to_string()
        }
        None => defaults.remote_endpoint_base,
    };

    Ok(EngineConfig {
        timed_runs,
        improvement_threshold_percent: threshold,
        call_timeout,
        remote_endpoint_base,
    })
}
