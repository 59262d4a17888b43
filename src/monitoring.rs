//! Prediction monitoring against the ground-truth hourly series.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::MonitoringConfig;
use crate::densify::GroundTruthRow;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub location_id: i64,
    pub pickup_hour_ts_ms_utc: i64,
    pub predicted_rides: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitoringRow {
    pub location_id: i64,
    pub pickup_hour_ts_ms_utc: i64,
    pub predicted_rides: f64,
    pub actual_rides: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrainDecision {
    Retrain,
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaeReport {
    pub rows: u64,
    pub mae: f64,
    pub threshold: f64,
    pub decision: RetrainDecision,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MonitoringError {
    #[error("no predictions overlap the actual values in the requested range")]
    NoOverlap,
}

/// Inner join on (location, hour) restricted to `[from, to]` inclusive. When a (location, hour)
/// has several predictions the last one wins. Output is sorted by hour, then location.
pub fn join_predictions_with_actuals(
    predictions: &[Prediction],
    actuals: &[GroundTruthRow],
    from_ts_ms_utc: i64,
    to_ts_ms_utc_inclusive: i64,
) -> Vec<MonitoringRow> {
    let in_range = |ts: i64| ts >= from_ts_ms_utc && ts <= to_ts_ms_utc_inclusive;

    let actual_by_key: HashMap<(i64, i64), u64> = actuals
        .iter()
        .filter(|row| in_range(row.pickup_hour_ts_ms_utc))
        .map(|row| ((row.pickup_hour_ts_ms_utc, row.location_id), row.rides))
        .collect();

    let mut latest: BTreeMap<(i64, i64), f64> = BTreeMap::new();
    for prediction in predictions {
        if in_range(prediction.pickup_hour_ts_ms_utc) {
            latest.insert(
                (prediction.pickup_hour_ts_ms_utc, prediction.location_id),
                prediction.predicted_rides,
            );
        }
    }

    let rows: Vec<MonitoringRow> = latest
        .into_iter()
        .filter_map(|(key, predicted_rides)| {
            actual_by_key.get(&key).map(|actual| MonitoringRow {
                location_id: key.1,
                pickup_hour_ts_ms_utc: key.0,
                predicted_rides,
                actual_rides: *actual as f64,
            })
        })
        .collect();

    if rows.is_empty() {
        warn!(
            component = "monitoring",
            event = "monitoring.join.empty",
            predictions = predictions.len(),
            actuals = actuals.len(),
            from_ts_ms_utc,
            to_ts_ms_utc_inclusive
        );
    }

    rows
}

pub fn mean_absolute_error(rows: &[MonitoringRow]) -> Result<f64, MonitoringError> {
    if rows.is_empty() {
        return Err(MonitoringError::NoOverlap);
    }
    let total: f64 = rows
        .iter()
        .map(|row| (row.predicted_rides - row.actual_rides).abs())
        .sum();
    Ok(total / rows.len() as f64)
}

/// Retrain when the MAE strictly exceeds the configured threshold.
pub fn evaluate_retrain(
    rows: &[MonitoringRow],
    cfg: &MonitoringConfig,
) -> Result<MaeReport, MonitoringError> {
    let mae = mean_absolute_error(rows)?;
    let decision = if mae > cfg.mae_threshold {
        RetrainDecision::Retrain
    } else {
        RetrainDecision::Keep
    };

    info!(
        component = "monitoring",
        event = "monitoring.mae.evaluated",
        rows = rows.len(),
        mae,
        threshold = cfg.mae_threshold,
        decision = ?decision
    );

    Ok(MaeReport {
        rows: rows.len() as u64,
        mae,
        threshold: cfg.mae_threshold,
        decision,
    })
}
