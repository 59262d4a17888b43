use std::fs::File;
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use taxi_demand::{
    export_partition_file, ground_truth_rows, init_logging, log_app_start,
    load_rides_for_periods, logging_config_from_env, parse_bool, parse_ts_ms_utc,
    pipeline_config_from_env, run_pipeline_with_split, write_ground_truth_csv, PipelineReport,
    RideLoadReport, RideSource, TimeSeriesStore,
};
use tracing::info;

#[derive(Debug, Serialize)]
struct RunSummary {
    generated_at_ts_ms_utc: i64,
    cutoff_ts_ms_utc: i64,
    load: RideLoadReport,
    pipeline: PipelineReport,
    stored_hourly_rows: usize,
    train_rows: usize,
    test_rows: usize,
    output_dir: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_app_start("build_training_data", &logging);

    let cfg = pipeline_config_from_env();
    cfg.validate()?;
    if cfg.periods.is_empty() {
        return Err("TAXI_PERIODS must list at least one YYYY-MM month to load".into());
    }

    let rides_dir = std::env::var("TAXI_RIDES_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/raw"));
    let store_path = std::env::var("TAXI_STORE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/taxi_demand.sqlite"));
    let output_dir = std::env::var("TAXI_OUTPUT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/transformed"));
    let include_engineered = std::env::var("TAXI_ENGINEERED_FEATURES")
        .ok()
        .and_then(|raw| parse_bool(&raw))
        .unwrap_or(false);

    // Without an explicit cutoff the most recent month is held out for testing.
    let cutoff_ts_ms_utc = match std::env::var("TAXI_CUTOFF") {
        Ok(raw) => parse_ts_ms_utc(&raw).ok_or_else(|| format!("invalid TAXI_CUTOFF '{raw}'"))?,
        Err(_) => cfg
            .periods
            .iter()
            .max()
            .map(|period| period.start_ts_ms_utc())
            .ok_or("no periods configured")?,
    };

    let sources: Vec<RideSource> = cfg
        .periods
        .iter()
        .map(|period| RideSource::in_dir(&rides_dir, *period))
        .collect();
    let loaded = load_rides_for_periods(&sources)?;

    let (output, split) = run_pipeline_with_split(&loaded.events, &cfg, cutoff_ts_ms_utc)?;

    let truth = ground_truth_rows(&output.series);
    let mut store = TimeSeriesStore::open(&store_path)?;
    let stored_hourly_rows = store.upsert_hourly_rides(&truth)?;

    std::fs::create_dir_all(&output_dir)?;
    write_ground_truth_csv(File::create(output_dir.join("ground_truth.csv"))?, &truth)?;
    let train_rows = export_partition_file(
        &output_dir.join("train.csv"),
        &output.table.schema,
        &split.train,
        include_engineered,
    )?;
    let test_rows = export_partition_file(
        &output_dir.join("test.csv"),
        &output.table.schema,
        &split.test,
        include_engineered,
    )?;

    info!(
        component = "build_training_data",
        event = "build.finish",
        store = %store_path.display(),
        output_dir = %output_dir.display(),
        train_rows,
        test_rows
    );

    let summary = RunSummary {
        generated_at_ts_ms_utc: Utc::now().timestamp_millis(),
        cutoff_ts_ms_utc,
        load: loaded.report,
        pipeline: output.report,
        stored_hourly_rows,
        train_rows,
        test_rows,
        output_dir,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
