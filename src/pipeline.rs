//! End-to-end run: ride events to hourly counts, dense series and the feature table.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::aggregate::aggregate_hourly;
use crate::config::{ConfigError, PipelineConfig};
use crate::densify::{densify, DenseSeries, DensifyError, HourlyGrid};
use crate::features::{build_feature_table, FeatureError, FeatureTable};
use crate::rides::RideEvent;
use crate::split::{train_test_split, SplitResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub input_events: u64,
    pub hourly_rows: u64,
    pub locations: u64,
    pub series_len: u64,
    pub start_hour_ts_ms_utc: i64,
    pub end_hour_ts_ms_utc_inclusive: i64,
    pub locations_without_windows: u64,
    pub output_rows: u64,
    pub schema_fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub series: Vec<DenseSeries>,
    pub table: FeatureTable,
    pub report: PipelineReport,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Densify(#[from] DensifyError),
    #[error(transparent)]
    Features(#[from] FeatureError),
}

impl PipelineError {
    /// True when the run itself was sound but produced nothing to train on.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(
            self,
            Self::Features(FeatureError::InsufficientData { .. })
        )
    }

    pub fn is_empty_input(&self) -> bool {
        matches!(self, Self::Densify(DensifyError::EmptyInput))
    }
}

/// Aggregates, densifies and windows `events`. No events inside the configured periods fails
/// with `EmptyInput`; no window anywhere fails with `InsufficientData`.
pub fn run_pipeline(
    events: &[RideEvent],
    cfg: &PipelineConfig,
) -> Result<PipelineOutput, PipelineError> {
    cfg.validate()?;

    info!(
        component = "pipeline",
        event = "pipeline.start",
        input_events = events.len(),
        input_seq_len = cfg.input_seq_len,
        step_size = cfg.step_size,
        periods = ?cfg.periods.iter().map(ToString::to_string).collect::<Vec<_>>(),
        parallel = cfg.parallel
    );

    let hourly = aggregate_hourly(events, &cfg.periods);
    let grid = HourlyGrid::from_counts(&hourly)?;
    let series = densify(&hourly, cfg.parallel)?;
    let (table, build_report) = build_feature_table(&series, &cfg.window_config(), cfg.parallel)?;

    let report = PipelineReport {
        input_events: events.len() as u64,
        hourly_rows: hourly.len() as u64,
        locations: series.len() as u64,
        series_len: grid.len() as u64,
        start_hour_ts_ms_utc: grid.start_hour_ts_ms_utc,
        end_hour_ts_ms_utc_inclusive: grid.end_hour_ts_ms_utc_inclusive,
        locations_without_windows: build_report.locations_without_windows,
        output_rows: build_report.output_rows,
        schema_fingerprint: table.schema.fingerprint.clone(),
    };

    info!(
        component = "pipeline",
        event = "pipeline.finish",
        locations = report.locations,
        series_len = report.series_len,
        output_rows = report.output_rows,
        locations_without_windows = report.locations_without_windows
    );

    Ok(PipelineOutput {
        series,
        table,
        report,
    })
}

/// [`run_pipeline`] followed by a train/test split at `cutoff_ts_ms_utc`.
pub fn run_pipeline_with_split(
    events: &[RideEvent],
    cfg: &PipelineConfig,
    cutoff_ts_ms_utc: i64,
) -> Result<(PipelineOutput, SplitResult), PipelineError> {
    let output = run_pipeline(events, cfg)?;
    let split = train_test_split(&output.table.rows, cutoff_ts_ms_utc);
    Ok((output, split))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hours::HOUR_MS;
    use crate::rides::CalendarPeriod;

    const JAN_1_2024: i64 = 1_704_067_200_000;

    fn cfg(input_seq_len: usize) -> PipelineConfig {
        PipelineConfig {
            input_seq_len,
            step_size: 1,
            periods: vec![CalendarPeriod::new(2024, 1).unwrap()],
            parallel: false,
        }
    }

    #[test]
    fn events_outside_period_only_is_empty_input() {
        let events = vec![RideEvent {
            pickup_ts_ms_utc: JAN_1_2024 - HOUR_MS,
            location_id: 1,
        }];
        let err = run_pipeline(&events, &cfg(2)).unwrap_err();
        assert!(err.is_empty_input());
        assert!(!err.is_insufficient_data());
    }

    #[test]
    fn too_short_range_is_insufficient_data() {
        let events: Vec<RideEvent> = (0..3)
            .map(|h| RideEvent {
                pickup_ts_ms_utc: JAN_1_2024 + h * HOUR_MS,
                location_id: 1,
            })
            .collect();
        let err = run_pipeline(&events, &cfg(3)).unwrap_err();
        assert!(err.is_insufficient_data());
    }

    #[test]
    fn invalid_config_is_rejected_before_work() {
        let bad = PipelineConfig {
            input_seq_len: 0,
            ..cfg(1)
        };
        assert!(matches!(
            run_pipeline(&[], &bad),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn report_describes_grid_and_rows() {
        let events: Vec<RideEvent> = (0..6)
            .map(|h| RideEvent {
                pickup_ts_ms_utc: JAN_1_2024 + h * HOUR_MS + 1_000,
                location_id: 1 + h % 2,
            })
            .collect();
        let out = run_pipeline(&events, &cfg(2)).unwrap();
        assert_eq!(out.report.input_events, 6);
        assert_eq!(out.report.hourly_rows, 6);
        assert_eq!(out.report.locations, 2);
        assert_eq!(out.report.series_len, 6);
        assert_eq!(out.report.start_hour_ts_ms_utc, JAN_1_2024);
        assert_eq!(out.report.end_hour_ts_ms_utc_inclusive, JAN_1_2024 + 5 * HOUR_MS);
        assert_eq!(out.report.output_rows, 8);
        assert_eq!(out.report.schema_fingerprint, out.table.schema.fingerprint);
    }
}
