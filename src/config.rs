//! Pipeline configuration with documented defaults and environment overrides.

use std::collections::HashSet;
use std::env;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rides::CalendarPeriod;
use crate::windows::{WindowConfig, WindowError, DEFAULT_INPUT_SEQ_LEN, DEFAULT_STEP_SIZE};

pub const DEFAULT_MAE_THRESHOLD: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub input_seq_len: usize,
    pub step_size: usize,
    /// Calendar months whose events are kept. Empty keeps every event.
    pub periods: Vec<CalendarPeriod>,
    /// Process locations on the rayon pool.
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_seq_len: DEFAULT_INPUT_SEQ_LEN,
            step_size: DEFAULT_STEP_SIZE,
            periods: Vec::new(),
            parallel: true,
        }
    }
}

impl PipelineConfig {
    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            input_seq_len: self.input_seq_len,
            step_size: self.step_size,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window_config().validate()?;
        let mut seen = HashSet::new();
        for period in &self.periods {
            if !seen.insert(*period) {
                return Err(ConfigError::Invalid(format!("duplicate period {period}")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub mae_threshold: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            mae_threshold: DEFAULT_MAE_THRESHOLD,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error("invalid pipeline config: {0}")]
    Invalid(String),
}

/// Reads `TAXI_INPUT_SEQ_LEN`, `TAXI_STEP_SIZE`, `TAXI_PERIODS` (`YYYY-MM[,YYYY-MM...]`) and
/// `TAXI_PARALLEL`. Unparseable values leave the default in place.
pub fn pipeline_config_from_env() -> PipelineConfig {
    let mut config = PipelineConfig::default();

    if let Some(parsed) = env_parse::<usize>("TAXI_INPUT_SEQ_LEN") {
        config.input_seq_len = parsed;
    }

    if let Some(parsed) = env_parse::<usize>("TAXI_STEP_SIZE") {
        config.step_size = parsed;
    }

    if let Ok(raw) = env::var("TAXI_PERIODS") {
        if let Some(periods) = parse_periods(&raw) {
            config.periods = periods;
        }
    }

    if let Ok(raw) = env::var("TAXI_PARALLEL") {
        if let Some(parsed) = parse_bool(&raw) {
            config.parallel = parsed;
        }
    }

    config
}

pub fn monitoring_config_from_env() -> MonitoringConfig {
    let mut config = MonitoringConfig::default();
    if let Some(parsed) = env_parse::<f64>("TAXI_MAE_THRESHOLD") {
        if parsed.is_finite() && parsed >= 0.0 {
            config.mae_threshold = parsed;
        }
    }
    config
}

/// Comma-separated `YYYY-MM` list, sorted and deduplicated. `None` if any entry is invalid.
pub fn parse_periods(raw: &str) -> Option<Vec<CalendarPeriod>> {
    let mut periods = Vec::new();
    for part in raw.split(',') {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        periods.push(trimmed.parse::<CalendarPeriod>().ok()?);
    }
    periods.sort();
    periods.dedup();
    Some(periods)
}

/// Accepts `1/true/yes/on` and `0/false/no/off`, case-insensitive.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}
