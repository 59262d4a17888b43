//! Taxi demand core crate.
//!
//! Current implemented scope:
//! - ride event loading per calendar month, with missing months skipped
//! - hourly aggregation and zero-filled densification per pickup location
//! - sliding-window feature tables, inference batches and time-based splits
//! - SQLite store for hourly rides and predictions, plus MAE monitoring
//! - CSV export of feature tables and split partitions

mod aggregate;
mod config;
mod densify;
mod enrich;
mod export;
mod features;
mod hours;
mod monitoring;
mod observability;
mod parallel;
mod pipeline;
mod rides;
mod split;
mod store;
mod windows;

pub use aggregate::{aggregate_hourly, HourlyCount};
pub use config::{
    monitoring_config_from_env, parse_bool, parse_periods, pipeline_config_from_env, ConfigError,
    MonitoringConfig, PipelineConfig, DEFAULT_MAE_THRESHOLD,
};
pub use densify::{
    densify, ground_truth_rows, DenseSeries, DensifyError, GroundTruthRow, HourlyGrid, HourlySlot,
};
pub use enrich::{engineer_features, EngineeredFeatures, EnrichError};
pub use export::{
    export_partition_file, write_feature_table_csv, write_ground_truth_csv, write_partition_csv,
    ExportError,
};
pub use features::{
    assert_schema_compatible, build_feature_schema, build_feature_table, build_inference_batch,
    build_location_rows, lag_column_name, FeatureBuildReport, FeatureColumn, FeatureDType,
    FeatureError, FeatureRow, FeatureSchema, FeatureTable, InferenceRow, FEATURE_SCHEMA_VERSION,
    LOCATION_COLUMN, TARGET_COLUMN, TIMESTAMP_COLUMN,
};
pub use hours::{
    floor_to_hour, format_ts_ms_utc, hours_inclusive, is_hour_aligned, parse_ts_ms_utc,
    to_datetime, HOUR_MS,
};
pub use monitoring::{
    evaluate_retrain, join_predictions_with_actuals, mean_absolute_error, MaeReport,
    MonitoringError, MonitoringRow, Prediction, RetrainDecision,
};
pub use observability::{
    init_logging, log_app_start, logging_config_from_env, LogFormat, LoggingConfig,
    LoggingInitError,
};
pub use pipeline::{
    run_pipeline, run_pipeline_with_split, PipelineError, PipelineOutput, PipelineReport,
};
pub use rides::{
    filter_to_period, load_rides_csv, load_rides_for_periods, read_rides_csv, CalendarPeriod,
    RideEvent, RideLoadError, RideLoadReport, RideLoadResult, RideSource,
};
pub use split::{train_test_split, FeatureInputs, SplitPartition, SplitResult};
pub use store::{StoreError, TimeSeriesStore};
pub use windows::{
    series_windows, window_indices, Window, WindowConfig, WindowError, DEFAULT_INPUT_SEQ_LEN,
    DEFAULT_STEP_SIZE,
};
