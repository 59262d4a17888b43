//! Hourly aggregation of ride events per pickup location.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::hours::floor_to_hour;
use crate::rides::{CalendarPeriod, RideEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HourlyCount {
    pub hour_ts_ms_utc: i64,
    pub location_id: i64,
    pub rides: u64,
}

/// Counts events per (location, hour). Events outside every given period are discarded; an
/// empty `periods` slice keeps all events.
///
/// Output is sorted by location id, then hour.
pub fn aggregate_hourly(events: &[RideEvent], periods: &[CalendarPeriod]) -> Vec<HourlyCount> {
    let mut buckets: BTreeMap<(i64, i64), u64> = BTreeMap::new();
    let mut dropped = 0u64;

    for event in events {
        let in_period =
            periods.is_empty() || periods.iter().any(|p| p.contains(event.pickup_ts_ms_utc));
        if !in_period {
            dropped += 1;
            continue;
        }
        let hour = floor_to_hour(event.pickup_ts_ms_utc);
        *buckets.entry((event.location_id, hour)).or_insert(0) += 1;
    }

    let counts: Vec<HourlyCount> = buckets
        .into_iter()
        .map(|((location_id, hour_ts_ms_utc), rides)| HourlyCount {
            hour_ts_ms_utc,
            location_id,
            rides,
        })
        .collect();

    info!(
        component = "aggregate",
        event = "aggregate.finish",
        input_events = events.len(),
        dropped_outside_period = dropped,
        hourly_rows = counts.len()
    );

    counts
}
