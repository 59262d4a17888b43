//! Time-based train/test partitioning of a feature table.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::features::FeatureRow;

/// Feature-side view of a row: everything except the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureInputs {
    pub location_id: i64,
    pub pickup_hour_ts_ms_utc: i64,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitPartition {
    pub x: Vec<FeatureInputs>,
    pub y: Vec<f64>,
}

impl SplitPartition {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    fn push(&mut self, row: &FeatureRow) {
        self.x.push(FeatureInputs {
            location_id: row.location_id,
            pickup_hour_ts_ms_utc: row.pickup_hour_ts_ms_utc,
            values: row.features.clone(),
        });
        self.y.push(row.target);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitResult {
    pub cutoff_ts_ms_utc: i64,
    pub train: SplitPartition,
    pub test: SplitPartition,
}

/// `train` takes rows strictly before `cutoff_ts_ms_utc`, `test` the rest. Row order is kept in
/// both partitions and either may be empty.
pub fn train_test_split(rows: &[FeatureRow], cutoff_ts_ms_utc: i64) -> SplitResult {
    let mut train = SplitPartition::default();
    let mut test = SplitPartition::default();

    for row in rows {
        if row.pickup_hour_ts_ms_utc < cutoff_ts_ms_utc {
            train.push(row);
        } else {
            test.push(row);
        }
    }

    info!(
        component = "split",
        event = "split.finish",
        cutoff_ts_ms_utc,
        train_rows = train.len(),
        test_rows = test.len()
    );

    SplitResult {
        cutoff_ts_ms_utc,
        train,
        test,
    }
}
