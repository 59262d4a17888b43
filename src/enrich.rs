//! Derived columns the regression pipeline adds on top of the raw lag features.

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hours::to_datetime;

const HOURS_PER_WEEK: usize = 24 * 7;
const WEEKS_AVERAGED: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineeredFeatures {
    /// Mean of the lags 1..=4 weeks back; `None` when the window is shorter than four weeks.
    pub average_rides_last_4_weeks: Option<f64>,
    pub hour: u32,
    /// Monday = 0.
    pub day_of_week: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnrichError {
    #[error("invalid UTC timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// `features` are lag values oldest first, so `hours_back = n` sits at `len - n`.
pub fn engineer_features(
    features: &[f64],
    pickup_hour_ts_ms_utc: i64,
) -> Result<EngineeredFeatures, EnrichError> {
    let dt = to_datetime(pickup_hour_ts_ms_utc)
        .ok_or(EnrichError::InvalidTimestamp(pickup_hour_ts_ms_utc))?;

    Ok(EngineeredFeatures {
        average_rides_last_4_weeks: average_weekly_lags(features),
        hour: dt.hour(),
        day_of_week: dt.weekday().num_days_from_monday(),
    })
}

fn average_weekly_lags(features: &[f64]) -> Option<f64> {
    let len = features.len();
    if len < HOURS_PER_WEEK * WEEKS_AVERAGED {
        return None;
    }
    let sum: f64 = (1..=WEEKS_AVERAGED)
        .map(|week| features[len - week * HOURS_PER_WEEK])
        .sum();
    Some(sum / WEEKS_AVERAGED as f64)
}
