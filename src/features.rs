//! Dense series to supervised (features, target) rows.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::densify::DenseSeries;
use crate::hours::HOUR_MS;
use crate::parallel::map_ordered;
use crate::windows::{series_windows, Window, WindowConfig, WindowError};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

pub const TIMESTAMP_COLUMN: &str = "pickup_hour";
pub const LOCATION_COLUMN: &str = "pickup_location_id";
pub const TARGET_COLUMN: &str = "target_rides_next_hour";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    F64,
    TimestampMs,
    I64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    /// Lag columns, oldest first: `rides_previous_{input_seq_len}_hour` .. `rides_previous_1_hour`.
    pub feature_columns: Vec<FeatureColumn>,
    pub timestamp_column: FeatureColumn,
    pub location_column: FeatureColumn,
    pub target_column: FeatureColumn,
}

impl FeatureSchema {
    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.feature_columns
            .iter()
            .position(|column| column.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub location_id: i64,
    /// Hour of the target slot.
    pub pickup_hour_ts_ms_utc: i64,
    pub features: Vec<f64>,
    pub target: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub schema: FeatureSchema,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Unlabeled feature vector for the hour right after the end of a dense series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRow {
    pub location_id: i64,
    pub pickup_hour_ts_ms_utc: i64,
    pub features: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureBuildReport {
    pub locations: u64,
    pub locations_without_windows: u64,
    pub series_len: u64,
    pub output_rows: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeatureError {
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(
        "no trainable examples: {locations} locations, none longer than input_seq_len={input_seq_len}"
    )]
    InsufficientData {
        locations: usize,
        input_seq_len: usize,
    },
    #[error("dense series length mismatch: location {location_id} has {actual}, expected {expected}")]
    LengthMismatch {
        location_id: i64,
        expected: usize,
        actual: usize,
    },
    #[error("window for location {location_id} targets index {target_idx} beyond series length {series_len}")]
    WindowOutOfRange {
        location_id: i64,
        target_idx: usize,
        series_len: usize,
    },
    #[error("window for location {window_location_id} applied to series of location {series_location_id}")]
    LocationMismatch {
        window_location_id: i64,
        series_location_id: i64,
    },
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

pub fn lag_column_name(hours_back: usize) -> String {
    format!("rides_previous_{hours_back}_hour")
}

pub fn build_feature_schema(cfg: &WindowConfig) -> FeatureSchema {
    let feature_columns: Vec<FeatureColumn> = (1..=cfg.input_seq_len)
        .rev()
        .map(|hours_back| FeatureColumn {
            name: lag_column_name(hours_back),
            dtype: FeatureDType::F64,
        })
        .collect();
    let timestamp_column = FeatureColumn {
        name: TIMESTAMP_COLUMN.to_string(),
        dtype: FeatureDType::TimestampMs,
    };
    let location_column = FeatureColumn {
        name: LOCATION_COLUMN.to_string(),
        dtype: FeatureDType::I64,
    };
    let target_column = FeatureColumn {
        name: TARGET_COLUMN.to_string(),
        dtype: FeatureDType::F64,
    };

    let fingerprint = schema_fingerprint(
        cfg,
        feature_columns
            .iter()
            .chain([&timestamp_column, &location_column, &target_column]),
    );

    debug!(
        component = "features",
        event = "features.schema.built",
        version = FEATURE_SCHEMA_VERSION,
        input_seq_len = cfg.input_seq_len,
        step_size = cfg.step_size,
        fingerprint = %fingerprint
    );

    FeatureSchema {
        version: FEATURE_SCHEMA_VERSION,
        fingerprint,
        feature_columns,
        timestamp_column,
        location_column,
        target_column,
    }
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), FeatureError> {
    if expected_version != actual.version {
        return Err(FeatureError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(FeatureError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

/// Slices one series into rows, one per window, in window order.
pub fn build_location_rows(
    series: &DenseSeries,
    windows: &[Window],
) -> Result<Vec<FeatureRow>, FeatureError> {
    let values = series.rides_values();
    let mut rows = Vec::with_capacity(windows.len());

    for window in windows {
        if window.location_id != series.location_id {
            return Err(FeatureError::LocationMismatch {
                window_location_id: window.location_id,
                series_location_id: series.location_id,
            });
        }
        if window.target_idx >= values.len() || window.start_idx > window.target_idx {
            return Err(FeatureError::WindowOutOfRange {
                location_id: series.location_id,
                target_idx: window.target_idx,
                series_len: values.len(),
            });
        }

        rows.push(FeatureRow {
            location_id: series.location_id,
            pickup_hour_ts_ms_utc: series.slots[window.target_idx].hour_ts_ms_utc,
            features: values[window.feature_range()].to_vec(),
            target: values[window.target_idx],
        });
    }

    Ok(rows)
}

/// Builds the training table for a batch of equal-length series. Rows are ordered by the batch's
/// location order, then by window start.
///
/// Locations too short for a single window contribute no rows. If no location yields a row the
/// batch fails with [`FeatureError::InsufficientData`].
pub fn build_feature_table(
    series: &[DenseSeries],
    cfg: &WindowConfig,
    parallel: bool,
) -> Result<(FeatureTable, FeatureBuildReport), FeatureError> {
    cfg.validate()?;
    let series_len = check_equal_lengths(series)?;
    let schema = build_feature_schema(cfg);

    info!(
        component = "features",
        event = "features.build.start",
        locations = series.len(),
        series_len,
        input_seq_len = cfg.input_seq_len,
        step_size = cfg.step_size,
        parallel
    );

    let per_location = map_ordered(
        series,
        parallel,
        |s| -> Result<Vec<FeatureRow>, FeatureError> {
            let windows = series_windows(s, cfg)?;
            build_location_rows(s, &windows)
        },
    );

    let mut report = FeatureBuildReport {
        locations: series.len() as u64,
        series_len: series_len as u64,
        ..FeatureBuildReport::default()
    };
    let mut rows = Vec::new();
    for (s, location_rows) in series.iter().zip(per_location) {
        let mut location_rows = location_rows?;
        if location_rows.is_empty() {
            report.locations_without_windows += 1;
            debug!(
                component = "features",
                event = "features.location.no_windows",
                location_id = s.location_id,
                series_len = s.len(),
                min_series_len = cfg.min_series_len()
            );
        }
        rows.append(&mut location_rows);
    }
    report.output_rows = rows.len() as u64;

    if rows.is_empty() {
        return Err(FeatureError::InsufficientData {
            locations: series.len(),
            input_seq_len: cfg.input_seq_len,
        });
    }

    info!(
        component = "features",
        event = "features.build.finish",
        locations = report.locations,
        locations_without_windows = report.locations_without_windows,
        output_rows = report.output_rows,
        fingerprint = %schema.fingerprint
    );

    Ok((FeatureTable { schema, rows }, report))
}

/// Latest `input_seq_len` hours of every series as features for the next, unobserved hour.
/// Series shorter than `input_seq_len` are skipped.
pub fn build_inference_batch(
    series: &[DenseSeries],
    cfg: &WindowConfig,
) -> Result<Vec<InferenceRow>, FeatureError> {
    cfg.validate()?;

    let mut rows = Vec::with_capacity(series.len());
    for s in series {
        let Some(last) = s.slots.last() else {
            continue;
        };
        if s.len() < cfg.input_seq_len {
            debug!(
                component = "features",
                event = "features.inference.location_skipped",
                location_id = s.location_id,
                series_len = s.len(),
                input_seq_len = cfg.input_seq_len
            );
            continue;
        }
        let values = s.rides_values();
        rows.push(InferenceRow {
            location_id: s.location_id,
            pickup_hour_ts_ms_utc: last.hour_ts_ms_utc + HOUR_MS,
            features: values[values.len() - cfg.input_seq_len..].to_vec(),
        });
    }

    if rows.is_empty() {
        return Err(FeatureError::InsufficientData {
            locations: series.len(),
            input_seq_len: cfg.input_seq_len,
        });
    }

    info!(
        component = "features",
        event = "features.inference.built",
        locations = series.len(),
        output_rows = rows.len()
    );

    Ok(rows)
}

fn check_equal_lengths(series: &[DenseSeries]) -> Result<usize, FeatureError> {
    let Some(first) = series.first() else {
        return Ok(0);
    };
    let expected = first.len();
    for s in series {
        if s.len() != expected {
            return Err(FeatureError::LengthMismatch {
                location_id: s.location_id,
                expected,
                actual: s.len(),
            });
        }
    }
    Ok(expected)
}

fn schema_fingerprint<'a>(
    cfg: &WindowConfig,
    columns: impl Iterator<Item = &'a FeatureColumn>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{FEATURE_SCHEMA_VERSION};"));
    hasher.update(format!("input_seq_len:{};", cfg.input_seq_len));
    hasher.update(format!("step_size:{};", cfg.step_size));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(format!(":{:?};", column.dtype));
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::densify::HourlySlot;

    const T0: i64 = 1_704_067_200_000;

    fn series(location_id: i64, rides: &[u64]) -> DenseSeries {
        DenseSeries {
            location_id,
            slots: rides
                .iter()
                .enumerate()
                .map(|(idx, rides)| HourlySlot {
                    hour_ts_ms_utc: T0 + idx as i64 * HOUR_MS,
                    rides: *rides,
                })
                .collect(),
        }
    }

    fn cfg(input_seq_len: usize, step_size: usize) -> WindowConfig {
        WindowConfig {
            input_seq_len,
            step_size,
        }
    }

    #[test]
    fn schema_names_lags_by_recency() {
        let schema = build_feature_schema(&cfg(3, 1));
        let names: Vec<&str> = schema
            .feature_columns
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "rides_previous_3_hour",
                "rides_previous_2_hour",
                "rides_previous_1_hour"
            ]
        );
        assert_eq!(schema.target_column.name, TARGET_COLUMN);
        assert_eq!(schema.feature_index("rides_previous_1_hour"), Some(2));
        assert_eq!(schema.fingerprint.len(), 64);
        assert_eq!(schema, build_feature_schema(&cfg(3, 1)));
        assert_ne!(schema.fingerprint, build_feature_schema(&cfg(4, 1)).fingerprint);
    }

    #[test]
    fn rows_use_target_hour_and_chronological_features() {
        let s = series(1, &[1, 2, 3, 4, 5]);
        let windows = series_windows(&s, &cfg(3, 1)).unwrap();
        let rows = build_location_rows(&s, &windows).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].features, vec![1.0, 2.0, 3.0]);
        assert_eq!(rows[0].target, 4.0);
        assert_eq!(rows[0].pickup_hour_ts_ms_utc, T0 + 3 * HOUR_MS);
        assert_eq!(rows[1].features, vec![2.0, 3.0, 4.0]);
        assert_eq!(rows[1].target, 5.0);
        assert_eq!(rows[1].pickup_hour_ts_ms_utc, T0 + 4 * HOUR_MS);
    }

    #[test]
    fn foreign_or_out_of_range_windows_are_rejected() {
        let s = series(1, &[1, 2, 3]);
        let foreign = Window {
            location_id: 2,
            start_idx: 0,
            target_idx: 1,
        };
        assert!(matches!(
            build_location_rows(&s, &[foreign]),
            Err(FeatureError::LocationMismatch { .. })
        ));

        let past_end = Window {
            location_id: 1,
            start_idx: 1,
            target_idx: 3,
        };
        assert!(matches!(
            build_location_rows(&s, &[past_end]),
            Err(FeatureError::WindowOutOfRange { target_idx: 3, .. })
        ));
    }

    #[test]
    fn ragged_batch_is_rejected() {
        let batch = vec![series(1, &[1, 2, 3]), series(2, &[1, 2])];
        assert_eq!(
            build_feature_table(&batch, &cfg(1, 1), false).unwrap_err(),
            FeatureError::LengthMismatch {
                location_id: 2,
                expected: 3,
                actual: 2,
            }
        );
    }

    #[test]
    fn no_windows_anywhere_is_insufficient_data() {
        let batch = vec![series(1, &[1, 2, 3]), series(2, &[0, 0, 0])];
        assert_eq!(
            build_feature_table(&batch, &cfg(3, 1), false).unwrap_err(),
            FeatureError::InsufficientData {
                locations: 2,
                input_seq_len: 3,
            }
        );
    }

    #[test]
    fn table_orders_by_location_then_window() {
        let batch = vec![series(4, &[1, 2, 3, 4]), series(9, &[10, 20, 30, 40])];
        let (table, report) = build_feature_table(&batch, &cfg(2, 1), true).unwrap();

        let keys: Vec<(i64, i64)> = table
            .rows
            .iter()
            .map(|r| (r.location_id, r.pickup_hour_ts_ms_utc))
            .collect();
        assert_eq!(
            keys,
            vec![
                (4, T0 + 2 * HOUR_MS),
                (4, T0 + 3 * HOUR_MS),
                (9, T0 + 2 * HOUR_MS),
                (9, T0 + 3 * HOUR_MS),
            ]
        );
        assert_eq!(report.output_rows, 4);
        assert_eq!(report.locations_without_windows, 0);
        assert_eq!(report.series_len, 4);
    }

    #[test]
    fn inference_batch_takes_latest_hours() {
        let batch = vec![series(1, &[1, 2, 3, 4, 5]), series(2, &[5, 4, 3, 2, 1])];
        let rows = build_inference_batch(&batch, &cfg(2, 1)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].features, vec![4.0, 5.0]);
        assert_eq!(rows[0].pickup_hour_ts_ms_utc, T0 + 5 * HOUR_MS);
        assert_eq!(rows[1].features, vec![2.0, 1.0]);

        assert!(matches!(
            build_inference_batch(&batch, &cfg(6, 1)),
            Err(FeatureError::InsufficientData { .. })
        ));
    }

    #[test]
    fn schema_compatibility_check_matches_version_and_fingerprint() {
        let schema = build_feature_schema(&cfg(2, 1));
        assert_schema_compatible(FEATURE_SCHEMA_VERSION, &schema.fingerprint, &schema)
            .expect("compatibility should pass");

        assert!(matches!(
            assert_schema_compatible(FEATURE_SCHEMA_VERSION + 1, &schema.fingerprint, &schema),
            Err(FeatureError::SchemaVersionMismatch { .. })
        ));
        assert!(matches!(
            assert_schema_compatible(FEATURE_SCHEMA_VERSION, "not-real", &schema),
            Err(FeatureError::SchemaFingerprintMismatch { .. })
        ));
    }
}
