//! CSV output for feature tables, split partitions and the ground-truth series.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::densify::GroundTruthRow;
use crate::enrich::{engineer_features, EnrichError};
use crate::features::{
    FeatureRow, FeatureSchema, LOCATION_COLUMN, TARGET_COLUMN, TIMESTAMP_COLUMN,
};
use crate::hours::format_ts_ms_utc;
use crate::split::SplitPartition;

const ENGINEERED_COLUMNS: [&str; 3] = ["average_rides_last_4_weeks", "hour", "day_of_week"];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timestamp {0} cannot be formatted as UTC")]
    InvalidTimestamp(i64),
    #[error(transparent)]
    Enrich(#[from] EnrichError),
    #[error("row for location {location_id} has {actual} features, schema expects {expected}")]
    WidthMismatch {
        location_id: i64,
        expected: usize,
        actual: usize,
    },
}

/// Writes one row per feature row: lag columns, hour, location, optional engineered columns,
/// then the target. Returns the number of data rows.
pub fn write_feature_table_csv<W: Write>(
    writer: W,
    schema: &FeatureSchema,
    rows: &[FeatureRow],
    include_engineered: bool,
) -> Result<usize, ExportError> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(header(schema, include_engineered))?;

    for row in rows {
        let record = feature_record(
            schema,
            row.location_id,
            row.pickup_hour_ts_ms_utc,
            &row.features,
            row.target,
            include_engineered,
        )?;
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(rows.len())
}

/// Same layout as [`write_feature_table_csv`] for one side of a train/test split.
pub fn write_partition_csv<W: Write>(
    writer: W,
    schema: &FeatureSchema,
    partition: &SplitPartition,
    include_engineered: bool,
) -> Result<usize, ExportError> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(header(schema, include_engineered))?;

    for (inputs, target) in partition.x.iter().zip(&partition.y) {
        let record = feature_record(
            schema,
            inputs.location_id,
            inputs.pickup_hour_ts_ms_utc,
            &inputs.values,
            *target,
            include_engineered,
        )?;
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(partition.len())
}

pub fn write_ground_truth_csv<W: Write>(
    writer: W,
    rows: &[GroundTruthRow],
) -> Result<usize, ExportError> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record([TIMESTAMP_COLUMN, LOCATION_COLUMN, "rides"])?;
    for row in rows {
        out.write_record([
            format_hour(row.pickup_hour_ts_ms_utc)?,
            row.location_id.to_string(),
            row.rides.to_string(),
        ])?;
    }
    out.flush()?;
    Ok(rows.len())
}

/// Creates `path` (and its parent directory) and writes a split partition to it.
pub fn export_partition_file(
    path: &Path,
    schema: &FeatureSchema,
    partition: &SplitPartition,
    include_engineered: bool,
) -> Result<usize, ExportError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    let rows = write_partition_csv(file, schema, partition, include_engineered)?;

    info!(
        component = "export",
        event = "export.partition.written",
        path = %path.display(),
        rows
    );

    Ok(rows)
}

fn header(schema: &FeatureSchema, include_engineered: bool) -> Vec<String> {
    let mut columns: Vec<String> = schema
        .feature_columns
        .iter()
        .map(|column| column.name.clone())
        .collect();
    columns.push(schema.timestamp_column.name.clone());
    columns.push(schema.location_column.name.clone());
    if include_engineered {
        columns.extend(ENGINEERED_COLUMNS.iter().map(|name| name.to_string()));
    }
    columns.push(TARGET_COLUMN.to_string());
    columns
}

fn feature_record(
    schema: &FeatureSchema,
    location_id: i64,
    pickup_hour_ts_ms_utc: i64,
    features: &[f64],
    target: f64,
    include_engineered: bool,
) -> Result<Vec<String>, ExportError> {
    let expected = schema.feature_columns.len();
    if features.len() != expected {
        return Err(ExportError::WidthMismatch {
            location_id,
            expected,
            actual: features.len(),
        });
    }

    let mut fields: Vec<String> = features.iter().map(|value| value.to_string()).collect();
    fields.push(format_hour(pickup_hour_ts_ms_utc)?);
    fields.push(location_id.to_string());

    if include_engineered {
        let engineered = engineer_features(features, pickup_hour_ts_ms_utc)?;
        fields.push(
            engineered
                .average_rides_last_4_weeks
                .map(|avg| avg.to_string())
                .unwrap_or_default(),
        );
        fields.push(engineered.hour.to_string());
        fields.push(engineered.day_of_week.to_string());
    }

    fields.push(target.to_string());
    Ok(fields)
}

fn format_hour(ts_ms_utc: i64) -> Result<String, ExportError> {
    format_ts_ms_utc(ts_ms_utc).ok_or(ExportError::InvalidTimestamp(ts_ms_utc))
}
