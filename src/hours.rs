//! Hour-grid arithmetic over UTC epoch milliseconds.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

pub const HOUR_MS: i64 = 3_600_000;

pub fn floor_to_hour(ts_ms_utc: i64) -> i64 {
    ts_ms_utc.div_euclid(HOUR_MS) * HOUR_MS
}

pub fn is_hour_aligned(ts_ms_utc: i64) -> bool {
    ts_ms_utc.rem_euclid(HOUR_MS) == 0
}

/// Number of hourly slots in `[start, end]`, both ends inclusive.
pub fn hours_inclusive(start_hour_ts_ms_utc: i64, end_hour_ts_ms_utc: i64) -> usize {
    if end_hour_ts_ms_utc < start_hour_ts_ms_utc {
        0
    } else {
        ((end_hour_ts_ms_utc - start_hour_ts_ms_utc) / HOUR_MS) as usize + 1
    }
}

pub fn to_datetime(ts_ms_utc: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ts_ms_utc).single()
}

pub fn format_ts_ms_utc(ts_ms_utc: i64) -> Option<String> {
    to_datetime(ts_ms_utc).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Accepts integer epoch milliseconds, RFC 3339, or a naive `YYYY-MM-DD[ T]HH:MM:SS[.f]`
/// interpreted as UTC.
pub fn parse_ts_ms_utc(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(ms) = trimmed.parse::<i64>() {
        return Some(ms);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.timestamp_millis());
    }

    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }

    None
}
