use std::io;
use std::io::Write;
use std::sync::{Arc, Mutex};

use taxi_demand::{
    build_feature_table, evaluate_retrain, log_app_start, run_pipeline, CalendarPeriod,
    DenseSeries, HourlySlot, LoggingConfig, MonitoringConfig, MonitoringRow, PipelineConfig,
    RideEvent, TimeSeriesStore, WindowConfig, HOUR_MS,
};
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

const JAN_1_2024: i64 = 1_704_067_200_000;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

fn cfg() -> PipelineConfig {
    PipelineConfig {
        input_seq_len: 2,
        step_size: 1,
        periods: vec![CalendarPeriod::new(2024, 1).expect("valid period")],
        // Rayon workers do not inherit the scoped dispatcher.
        parallel: false,
    }
}

#[test]
fn pipeline_run_emits_stage_events() {
    let events: Vec<RideEvent> = (0..6)
        .map(|hour| RideEvent {
            pickup_ts_ms_utc: JAN_1_2024 + hour * HOUR_MS,
            location_id: 10,
        })
        .collect();

    let logs = capture_logs(Level::INFO, || {
        let out = run_pipeline(&events, &cfg()).expect("pipeline should succeed");
        assert_eq!(out.table.len(), 4);
    });

    assert!(logs.contains("\"event\":\"pipeline.start\""));
    assert!(logs.contains("\"event\":\"aggregate.finish\""));
    assert!(logs.contains("\"event\":\"densify.finish\""));
    assert!(logs.contains("\"event\":\"features.build.finish\""));
    assert!(logs.contains("\"event\":\"pipeline.finish\""));
    assert!(!logs.contains("\"event\":\"features.location.no_windows\""));
}

#[test]
fn short_locations_are_logged_at_debug() {
    let batch = vec![
        DenseSeries {
            location_id: 1,
            slots: (0..4)
                .map(|idx| HourlySlot {
                    hour_ts_ms_utc: JAN_1_2024 + idx * HOUR_MS,
                    rides: 1,
                })
                .collect(),
        },
        DenseSeries {
            location_id: 2,
            slots: (0..4)
                .map(|idx| HourlySlot {
                    hour_ts_ms_utc: JAN_1_2024 + idx * HOUR_MS,
                    rides: 0,
                })
                .collect(),
        },
    ];
    let window = WindowConfig {
        input_seq_len: 4,
        step_size: 1,
    };

    let logs = capture_logs(Level::DEBUG, || {
        let err = build_feature_table(&batch, &window, false)
            .expect_err("no location is long enough");
        assert!(err.to_string().contains("no trainable examples"));
    });

    assert_eq!(
        logs.matches("\"event\":\"features.location.no_windows\"")
            .count(),
        2
    );
}

#[test]
fn store_and_monitoring_emit_events() {
    let logs = capture_logs(Level::INFO, || {
        log_app_start("build_training_data", &LoggingConfig::default());

        let mut store = TimeSeriesStore::open_in_memory().expect("store");
        let out = run_pipeline(
            &[
                RideEvent {
                    pickup_ts_ms_utc: JAN_1_2024,
                    location_id: 3,
                },
                RideEvent {
                    pickup_ts_ms_utc: JAN_1_2024 + 4 * HOUR_MS,
                    location_id: 3,
                },
            ],
            &cfg(),
        )
        .expect("pipeline");
        store
            .upsert_hourly_rides(&taxi_demand::ground_truth_rows(&out.series))
            .expect("upsert");

        evaluate_retrain(
            &[MonitoringRow {
                location_id: 3,
                pickup_hour_ts_ms_utc: JAN_1_2024,
                predicted_rides: 2.0,
                actual_rides: 1.0,
            }],
            &MonitoringConfig::default(),
        )
        .expect("mae");
    });

    assert!(logs.contains("\"event\":\"app.start\""));
    assert!(logs.contains("\"component\":\"build_training_data\""));
    assert!(logs.contains("\"event\":\"store.hourly_rides.upserted\""));
    assert!(logs.contains("\"event\":\"monitoring.mae.evaluated\""));
}
