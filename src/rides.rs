//! Raw ride events: CSV ride-table loading, schema checks and calendar-period filtering.

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDate;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::hours::parse_ts_ms_utc;

const PICKUP_TIME_COLUMNS: [&str; 2] = ["pickup_datetime", "tpep_pickup_datetime"];
const LOCATION_COLUMNS: [&str; 2] = ["pickup_location_id", "PULocationID"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RideEvent {
    pub pickup_ts_ms_utc: i64,
    pub location_id: i64,
}

/// A calendar month in UTC. Construction validates the month, so bounds are always defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CalendarPeriod {
    year: i32,
    month: u32,
}

impl CalendarPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self, RideLoadError> {
        if !(1..=12).contains(&month) || NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(RideLoadError::InvalidPeriod(format!("{year}-{month:02}")));
        }
        Ok(Self { year, month })
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn start_ts_ms_utc(self) -> i64 {
        month_start_ms(self.year, self.month)
    }

    /// First millisecond of the following month; December rolls into January of the next year.
    pub fn end_ts_ms_utc_exclusive(self) -> i64 {
        let next = self.next();
        month_start_ms(next.year, next.month)
    }

    pub fn contains(self, ts_ms_utc: i64) -> bool {
        ts_ms_utc >= self.start_ts_ms_utc() && ts_ms_utc < self.end_ts_ms_utc_exclusive()
    }

    pub fn file_stem(self) -> String {
        format!("rides_{self}")
    }
}

impl fmt::Display for CalendarPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

impl FromStr for CalendarPeriod {
    type Err = RideLoadError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let (year, month) = trimmed
            .split_once('-')
            .ok_or_else(|| RideLoadError::InvalidPeriod(trimmed.to_string()))?;
        let year = year
            .parse::<i32>()
            .map_err(|_| RideLoadError::InvalidPeriod(trimmed.to_string()))?;
        let month = month
            .parse::<u32>()
            .map_err(|_| RideLoadError::InvalidPeriod(trimmed.to_string()))?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for CalendarPeriod {
    type Error = RideLoadError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<CalendarPeriod> for String {
    fn from(period: CalendarPeriod) -> Self {
        period.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideSource {
    pub period: CalendarPeriod,
    pub path: PathBuf,
}

impl RideSource {
    /// `<dir>/rides_YYYY-MM.csv`
    pub fn in_dir(dir: &Path, period: CalendarPeriod) -> Self {
        Self {
            period,
            path: dir.join(format!("{}.csv", period.file_stem())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideLoadReport {
    pub rows_read: u64,
    pub rows_outside_period: u64,
    pub periods_loaded: Vec<CalendarPeriod>,
    pub periods_missing: Vec<CalendarPeriod>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideLoadResult {
    pub events: Vec<RideEvent>,
    pub report: RideLoadReport,
}

#[derive(Debug, Error)]
pub enum RideLoadError {
    #[error("ride table schema mismatch: missing {missing:?}, found columns {found:?}")]
    SchemaMismatch {
        missing: Vec<String>,
        found: Vec<String>,
    },
    #[error("invalid calendar period: {0}")]
    InvalidPeriod(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to parse field {field} value '{value}' on line {line}")]
    ParseField {
        field: &'static str,
        value: String,
        line: u64,
    },
}

/// Reads a ride table with a header row. Only the pickup time and pickup location columns are
/// required; any other columns are ignored.
pub fn read_rides_csv<R: Read>(reader: R) -> Result<Vec<RideEvent>, RideLoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let (time_idx, location_idx) = resolve_columns(&headers)?;

    let mut events = Vec::new();
    for record in reader.records() {
        let record = record?;
        events.push(parse_ride_record(&record, time_idx, location_idx)?);
    }

    Ok(events)
}

pub fn load_rides_csv(path: &Path) -> Result<Vec<RideEvent>, RideLoadError> {
    let file = fs::File::open(path)?;
    let events = read_rides_csv(file)?;
    info!(
        component = "rides",
        event = "rides.file.loaded",
        path = %path.display(),
        rows = events.len()
    );
    Ok(events)
}

/// Drops events outside `[period_start, period_end)`. Upstream monthly files occasionally carry
/// rows from adjacent months.
pub fn filter_to_period(events: Vec<RideEvent>, period: CalendarPeriod) -> Vec<RideEvent> {
    events
        .into_iter()
        .filter(|event| period.contains(event.pickup_ts_ms_utc))
        .collect()
}

/// Loads one file per period, filters each file to its own period and concatenates them in the
/// given order. Periods whose file does not exist are reported and skipped.
pub fn load_rides_for_periods(sources: &[RideSource]) -> Result<RideLoadResult, RideLoadError> {
    let mut report = RideLoadReport::default();
    let mut events = Vec::new();

    for source in sources {
        if !source.path.exists() {
            warn!(
                component = "rides",
                event = "rides.period.missing",
                period = %source.period,
                path = %source.path.display()
            );
            report.periods_missing.push(source.period);
            continue;
        }

        let raw = load_rides_csv(&source.path)?;
        let read = raw.len() as u64;
        let mut kept = filter_to_period(raw, source.period);
        let dropped = read - kept.len() as u64;

        if dropped > 0 {
            warn!(
                component = "rides",
                event = "rides.period.rows_dropped",
                period = %source.period,
                dropped
            );
        }

        report.rows_read += read;
        report.rows_outside_period += dropped;
        report.periods_loaded.push(source.period);
        events.append(&mut kept);
    }

    info!(
        component = "rides",
        event = "rides.load.finish",
        rows_read = report.rows_read,
        rows_outside_period = report.rows_outside_period,
        periods_loaded = report.periods_loaded.len(),
        periods_missing = report.periods_missing.len()
    );

    Ok(RideLoadResult { events, report })
}

fn resolve_columns(headers: &StringRecord) -> Result<(usize, usize), RideLoadError> {
    let find = |candidates: &[&str]| {
        headers
            .iter()
            .position(|header| candidates.iter().any(|name| header == *name))
    };

    let time_idx = find(&PICKUP_TIME_COLUMNS);
    let location_idx = find(&LOCATION_COLUMNS);

    match (time_idx, location_idx) {
        (Some(time_idx), Some(location_idx)) => Ok((time_idx, location_idx)),
        _ => {
            let mut missing = Vec::new();
            if time_idx.is_none() {
                missing.push(PICKUP_TIME_COLUMNS[0].to_string());
            }
            if location_idx.is_none() {
                missing.push(LOCATION_COLUMNS[0].to_string());
            }
            Err(RideLoadError::SchemaMismatch {
                missing,
                found: headers.iter().map(str::to_string).collect(),
            })
        }
    }
}

fn parse_ride_record(
    record: &StringRecord,
    time_idx: usize,
    location_idx: usize,
) -> Result<RideEvent, RideLoadError> {
    let line = record.position().map(|pos| pos.line()).unwrap_or_default();

    let raw_time = record.get(time_idx).unwrap_or_default();
    let pickup_ts_ms_utc = parse_ts_ms_utc(raw_time).ok_or_else(|| RideLoadError::ParseField {
        field: "pickup_datetime",
        value: raw_time.to_string(),
        line,
    })?;

    let raw_location = record.get(location_idx).unwrap_or_default();
    let location_id = raw_location
        .parse::<i64>()
        .map_err(|_| RideLoadError::ParseField {
            field: "pickup_location_id",
            value: raw_location.to_string(),
            line,
        })?;

    Ok(RideEvent {
        pickup_ts_ms_utc,
        location_id,
    })
}

fn month_start_ms(year: i32, month: u32) -> i64 {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .expect("calendar period is validated on construction")
        .and_utc()
        .timestamp_millis()
}
