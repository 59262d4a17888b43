//! Slot densification onto a shared hourly grid.
//!
//! The grid spans the global minimum to maximum observed hour across all locations, so every
//! dense series has the same length and the same index refers to the same hour everywhere.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::aggregate::HourlyCount;
use crate::hours::{hours_inclusive, is_hour_aligned, HOUR_MS};
use crate::parallel::map_ordered;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyGrid {
    pub start_hour_ts_ms_utc: i64,
    pub end_hour_ts_ms_utc_inclusive: i64,
}

impl HourlyGrid {
    pub fn from_counts(counts: &[HourlyCount]) -> Result<Self, DensifyError> {
        let start = counts.iter().map(|c| c.hour_ts_ms_utc).min();
        let end = counts.iter().map(|c| c.hour_ts_ms_utc).max();
        match (start, end) {
            (Some(start_hour_ts_ms_utc), Some(end_hour_ts_ms_utc_inclusive)) => Ok(Self {
                start_hour_ts_ms_utc,
                end_hour_ts_ms_utc_inclusive,
            }),
            _ => Err(DensifyError::EmptyInput),
        }
    }

    pub fn len(&self) -> usize {
        hours_inclusive(self.start_hour_ts_ms_utc, self.end_hour_ts_ms_utc_inclusive)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hour_at(&self, idx: usize) -> i64 {
        self.start_hour_ts_ms_utc + idx as i64 * HOUR_MS
    }

    pub fn index_of(&self, hour_ts_ms_utc: i64) -> Option<usize> {
        if hour_ts_ms_utc < self.start_hour_ts_ms_utc
            || hour_ts_ms_utc > self.end_hour_ts_ms_utc_inclusive
            || !is_hour_aligned(hour_ts_ms_utc - self.start_hour_ts_ms_utc)
        {
            return None;
        }
        Some(((hour_ts_ms_utc - self.start_hour_ts_ms_utc) / HOUR_MS) as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlySlot {
    pub hour_ts_ms_utc: i64,
    pub rides: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseSeries {
    pub location_id: i64,
    pub slots: Vec<HourlySlot>,
}

impl DenseSeries {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn rides_values(&self) -> Vec<f64> {
        self.slots.iter().map(|slot| slot.rides as f64).collect()
    }
}

/// One row of the flat `(hour, location, rides)` ground-truth table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundTruthRow {
    pub pickup_hour_ts_ms_utc: i64,
    pub location_id: i64,
    pub rides: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DensifyError {
    #[error("no hourly counts to densify")]
    EmptyInput,
    #[error("hour {hour_ts_ms_utc} for location {location_id} is not aligned to the hour")]
    MisalignedHour {
        location_id: i64,
        hour_ts_ms_utc: i64,
    },
    #[error("duplicate hourly count for location {location_id} at {hour_ts_ms_utc}")]
    DuplicateSlot {
        location_id: i64,
        hour_ts_ms_utc: i64,
    },
}

/// Reindexes every location onto the shared grid with zero fill. Locations are emitted sorted
/// by id regardless of input order.
pub fn densify(counts: &[HourlyCount], parallel: bool) -> Result<Vec<DenseSeries>, DensifyError> {
    let grid = HourlyGrid::from_counts(counts)?;

    let mut by_location: BTreeMap<i64, Vec<(usize, u64)>> = BTreeMap::new();
    for count in counts {
        if !is_hour_aligned(count.hour_ts_ms_utc) {
            return Err(DensifyError::MisalignedHour {
                location_id: count.location_id,
                hour_ts_ms_utc: count.hour_ts_ms_utc,
            });
        }
        let idx = grid
            .index_of(count.hour_ts_ms_utc)
            .ok_or(DensifyError::MisalignedHour {
                location_id: count.location_id,
                hour_ts_ms_utc: count.hour_ts_ms_utc,
            })?;
        by_location
            .entry(count.location_id)
            .or_default()
            .push((idx, count.rides));
    }

    let entities: Vec<(i64, Vec<(usize, u64)>)> = by_location.into_iter().collect();
    let series = map_ordered(&entities, parallel, |(location_id, observed)| {
        densify_location(&grid, *location_id, observed)
    })
    .into_iter()
    .collect::<Result<Vec<_>, _>>()?;

    info!(
        component = "densify",
        event = "densify.finish",
        locations = series.len(),
        series_len = grid.len(),
        start_hour_ts_ms_utc = grid.start_hour_ts_ms_utc,
        end_hour_ts_ms_utc_inclusive = grid.end_hour_ts_ms_utc_inclusive,
        parallel
    );

    Ok(series)
}

fn densify_location(
    grid: &HourlyGrid,
    location_id: i64,
    observed: &[(usize, u64)],
) -> Result<DenseSeries, DensifyError> {
    let len = grid.len();
    let mut rides = vec![0u64; len];
    let mut seen = vec![false; len];

    for &(idx, count) in observed {
        if seen[idx] {
            return Err(DensifyError::DuplicateSlot {
                location_id,
                hour_ts_ms_utc: grid.hour_at(idx),
            });
        }
        seen[idx] = true;
        rides[idx] = count;
    }

    debug!(
        component = "densify",
        event = "densify.location.filled",
        location_id,
        observed_hours = observed.len(),
        zero_filled_hours = len - observed.len()
    );

    let slots = rides
        .into_iter()
        .enumerate()
        .map(|(idx, rides)| HourlySlot {
            hour_ts_ms_utc: grid.hour_at(idx),
            rides,
        })
        .collect();

    Ok(DenseSeries { location_id, slots })
}

/// Flattens dense series into `(hour, location, rides)` rows, location-major.
pub fn ground_truth_rows(series: &[DenseSeries]) -> Vec<GroundTruthRow> {
    series
        .iter()
        .flat_map(|s| {
            s.slots.iter().map(move |slot| GroundTruthRow {
                pickup_hour_ts_ms_utc: slot.hour_ts_ms_utc,
                location_id: s.location_id,
                rides: slot.rides,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_704_067_200_000;

    fn count(hour: i64, location_id: i64, rides: u64) -> HourlyCount {
        HourlyCount {
            hour_ts_ms_utc: T0 + hour * HOUR_MS,
            location_id,
            rides,
        }
    }

    fn rides(series: &DenseSeries) -> Vec<u64> {
        series.slots.iter().map(|slot| slot.rides).collect()
    }

    #[test]
    fn fills_missing_hour_with_zero() {
        let counts = vec![count(0, 7, 1), count(1, 7, 1), count(3, 7, 1)];
        let series = densify(&counts, false).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].location_id, 7);
        assert_eq!(rides(&series[0]), vec![1, 1, 0, 1]);
        assert_eq!(series[0].slots[2].hour_ts_ms_utc, T0 + 2 * HOUR_MS);
    }

    #[test]
    fn range_is_global_not_per_location() {
        let counts = vec![count(5, 2, 4), count(1, 9, 3), count(2, 2, 1)];
        let series = densify(&counts, false).unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].location_id, 2);
        assert_eq!(series[1].location_id, 9);
        for s in &series {
            assert_eq!(s.len(), 5);
            assert_eq!(s.slots[0].hour_ts_ms_utc, T0 + HOUR_MS);
            assert_eq!(s.slots[4].hour_ts_ms_utc, T0 + 5 * HOUR_MS);
        }
        assert_eq!(rides(&series[0]), vec![0, 1, 0, 0, 4]);
        assert_eq!(rides(&series[1]), vec![3, 0, 0, 0, 0]);
    }

    #[test]
    fn empty_input_is_an_error() {
        assert_eq!(densify(&[], false).unwrap_err(), DensifyError::EmptyInput);
    }

    #[test]
    fn misaligned_and_duplicate_hours_are_rejected() {
        let misaligned = vec![HourlyCount {
            hour_ts_ms_utc: T0 + 1,
            location_id: 1,
            rides: 1,
        }];
        assert!(matches!(
            densify(&misaligned, false).unwrap_err(),
            DensifyError::MisalignedHour { location_id: 1, .. }
        ));

        let duplicated = vec![count(0, 1, 1), count(0, 1, 2)];
        assert_eq!(
            densify(&duplicated, false).unwrap_err(),
            DensifyError::DuplicateSlot {
                location_id: 1,
                hour_ts_ms_utc: T0,
            }
        );
    }

    #[test]
    fn parallel_output_matches_sequential() {
        let counts: Vec<HourlyCount> = (0..50)
            .flat_map(|loc| {
                (0..24)
                    .filter(move |h| (h + loc) % 3 != 0)
                    .map(move |h| count(h, 50 - loc, (h * loc) as u64))
            })
            .collect();
        assert_eq!(
            densify(&counts, false).unwrap(),
            densify(&counts, true).unwrap()
        );
    }

    #[test]
    fn ground_truth_is_location_major() {
        let series = densify(&[count(0, 2, 1), count(1, 1, 5)], false).unwrap();
        let rows = ground_truth_rows(&series);
        assert_eq!(rows.len(), 4);
        assert_eq!(
            rows[0],
            GroundTruthRow {
                pickup_hour_ts_ms_utc: T0,
                location_id: 1,
                rides: 0,
            }
        );
        assert_eq!(rows[1].rides, 5);
        assert_eq!(rows[2].location_id, 2);
        assert_eq!(rows[2].rides, 1);
    }

    #[test]
    fn grid_index_roundtrip() {
        let grid = HourlyGrid {
            start_hour_ts_ms_utc: T0,
            end_hour_ts_ms_utc_inclusive: T0 + 3 * HOUR_MS,
        };
        assert_eq!(grid.len(), 4);
        assert_eq!(grid.index_of(T0 + 2 * HOUR_MS), Some(2));
        assert_eq!(grid.index_of(T0 + 4 * HOUR_MS), None);
        assert_eq!(grid.index_of(T0 + 1), None);
        assert_eq!(grid.hour_at(3), T0 + 3 * HOUR_MS);
    }
}
