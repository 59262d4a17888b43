//! Local SQLite store for the ground-truth hourly series and model predictions.

use std::path::Path;

use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::info;

use crate::densify::GroundTruthRow;
use crate::monitoring::{MonitoringRow, Prediction};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("negative ride count {rides} stored for location {location_id} at {pickup_hour_ms}")]
    NegativeCount {
        location_id: i64,
        pickup_hour_ms: i64,
        rides: i64,
    },
}

pub struct TimeSeriesStore {
    conn: Connection,
}

impl TimeSeriesStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        ensure_schema(&conn)?;

        info!(
            component = "store",
            event = "store.open",
            path = %path.display()
        );

        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Inserts or overwrites rows keyed on (location, hour). Returns the number of rows written.
    pub fn upsert_hourly_rides(&mut self, rows: &[GroundTruthRow]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO hourly_rides (location_id, pickup_hour_ms, rides)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(location_id, pickup_hour_ms) DO UPDATE SET
                    rides = excluded.rides
                ",
            )?;

            for row in rows {
                stmt.execute(params![
                    row.location_id,
                    row.pickup_hour_ts_ms_utc,
                    row.rides as i64
                ])?;
            }
        }
        tx.commit()?;

        info!(
            component = "store",
            event = "store.hourly_rides.upserted",
            rows = rows.len()
        );

        Ok(rows.len())
    }

    /// Rows with `start <= hour < end`, ordered by location then hour.
    pub fn load_hourly_rides(
        &self,
        start_ts_ms_utc: i64,
        end_ts_ms_utc_exclusive: i64,
    ) -> Result<Vec<GroundTruthRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT location_id, pickup_hour_ms, rides
            FROM hourly_rides
            WHERE pickup_hour_ms >= ?1
              AND pickup_hour_ms < ?2
            ORDER BY location_id ASC, pickup_hour_ms ASC
            ",
        )?;

        let mut rows = stmt.query(params![start_ts_ms_utc, end_ts_ms_utc_exclusive])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let location_id: i64 = row.get(0)?;
            let pickup_hour_ms: i64 = row.get(1)?;
            let rides: i64 = row.get(2)?;
            let rides = u64::try_from(rides).map_err(|_| StoreError::NegativeCount {
                location_id,
                pickup_hour_ms,
                rides,
            })?;
            out.push(GroundTruthRow {
                pickup_hour_ts_ms_utc: pickup_hour_ms,
                location_id,
                rides,
            });
        }

        Ok(out)
    }

    pub fn count_hourly_rides(
        &self,
        start_ts_ms_utc: i64,
        end_ts_ms_utc_exclusive: i64,
    ) -> Result<u64, StoreError> {
        let count: i64 = self.conn.query_row(
            "
            SELECT COUNT(*)
            FROM hourly_rides
            WHERE pickup_hour_ms >= ?1
              AND pickup_hour_ms < ?2
            ",
            params![start_ts_ms_utc, end_ts_ms_utc_exclusive],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn upsert_predictions(&mut self, predictions: &[Prediction]) -> Result<usize, StoreError> {
        if predictions.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO predictions (location_id, pickup_hour_ms, predicted_rides)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(location_id, pickup_hour_ms) DO UPDATE SET
                    predicted_rides = excluded.predicted_rides
                ",
            )?;

            for prediction in predictions {
                stmt.execute(params![
                    prediction.location_id,
                    prediction.pickup_hour_ts_ms_utc,
                    prediction.predicted_rides
                ])?;
            }
        }
        tx.commit()?;

        info!(
            component = "store",
            event = "store.predictions.upserted",
            rows = predictions.len()
        );

        Ok(predictions.len())
    }

    /// Predictions joined with actuals for hours in `[from, to]` inclusive, ordered by hour then
    /// location.
    pub fn load_monitoring_rows(
        &self,
        from_ts_ms_utc: i64,
        to_ts_ms_utc_inclusive: i64,
    ) -> Result<Vec<MonitoringRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT p.location_id, p.pickup_hour_ms, p.predicted_rides, a.rides
            FROM predictions p
            INNER JOIN hourly_rides a
              ON a.location_id = p.location_id
             AND a.pickup_hour_ms = p.pickup_hour_ms
            WHERE p.pickup_hour_ms >= ?1
              AND p.pickup_hour_ms <= ?2
            ORDER BY p.pickup_hour_ms ASC, p.location_id ASC
            ",
        )?;

        let rows = stmt.query_map(params![from_ts_ms_utc, to_ts_ms_utc_inclusive], |row| {
            let actual: i64 = row.get(3)?;
            Ok(MonitoringRow {
                location_id: row.get(0)?,
                pickup_hour_ts_ms_utc: row.get(1)?,
                predicted_rides: row.get(2)?,
                actual_rides: actual as f64,
            })
        })?;

        let out = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS hourly_rides (
            location_id INTEGER NOT NULL,
            pickup_hour_ms INTEGER NOT NULL,
            rides INTEGER NOT NULL,
            PRIMARY KEY(location_id, pickup_hour_ms)
        ) WITHOUT ROWID;

        CREATE TABLE IF NOT EXISTS predictions (
            location_id INTEGER NOT NULL,
            pickup_hour_ms INTEGER NOT NULL,
            predicted_rides REAL NOT NULL,
            PRIMARY KEY(location_id, pickup_hour_ms)
        ) WITHOUT ROWID;

        CREATE INDEX IF NOT EXISTS idx_hourly_rides_hour ON hourly_rides(pickup_hour_ms);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hours::HOUR_MS;
    use tempfile::NamedTempFile;

    const T0: i64 = 1_704_067_200_000;

    fn truth(hour: i64, location_id: i64, rides: u64) -> GroundTruthRow {
        GroundTruthRow {
            pickup_hour_ts_ms_utc: T0 + hour * HOUR_MS,
            location_id,
            rides,
        }
    }

    #[test]
    fn upsert_overwrites_and_range_is_half_open() {
        let mut store = TimeSeriesStore::open_in_memory().unwrap();
        store
            .upsert_hourly_rides(&[truth(0, 2, 1), truth(1, 2, 0), truth(0, 1, 7)])
            .unwrap();
        store.upsert_hourly_rides(&[truth(1, 2, 3)]).unwrap();

        let rows = store.load_hourly_rides(T0, T0 + 2 * HOUR_MS).unwrap();
        assert_eq!(rows, vec![truth(0, 1, 7), truth(0, 2, 1), truth(1, 2, 3)]);

        assert_eq!(store.count_hourly_rides(T0, T0 + HOUR_MS).unwrap(), 2);
        assert!(store.load_hourly_rides(T0 + 2 * HOUR_MS, T0 + 3 * HOUR_MS).unwrap().is_empty());
    }

    #[test]
    fn file_store_persists_between_opens() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let mut store = TimeSeriesStore::open(tmp.path()).unwrap();
            store.upsert_hourly_rides(&[truth(0, 1, 4)]).unwrap();
        }
        let store = TimeSeriesStore::open(tmp.path()).unwrap();
        assert_eq!(
            store.load_hourly_rides(T0, T0 + HOUR_MS).unwrap(),
            vec![truth(0, 1, 4)]
        );
    }

    #[test]
    fn monitoring_join_in_sql() {
        let mut store = TimeSeriesStore::open_in_memory().unwrap();
        store
            .upsert_hourly_rides(&[truth(0, 1, 3), truth(1, 1, 5), truth(2, 1, 8)])
            .unwrap();
        store
            .upsert_predictions(&[
                Prediction {
                    location_id: 1,
                    pickup_hour_ts_ms_utc: T0 + HOUR_MS,
                    predicted_rides: 4.0,
                },
                Prediction {
                    location_id: 1,
                    pickup_hour_ts_ms_utc: T0 + 2 * HOUR_MS,
                    predicted_rides: 6.0,
                },
                Prediction {
                    location_id: 9,
                    pickup_hour_ts_ms_utc: T0 + HOUR_MS,
                    predicted_rides: 1.0,
                },
            ])
            .unwrap();

        let rows = store.load_monitoring_rows(T0, T0 + 2 * HOUR_MS).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].actual_rides, 5.0);
        assert_eq!(rows[1].predicted_rides, 6.0);
        assert_eq!(rows[1].actual_rides, 8.0);
    }
}
