// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! Database module for persistent storage
//!
//! Raw fixes and their derived labels live in one SQLite table. Incoming
//! timestamps are validated against the server clock; a rejected timestamp
//! is replaced rather than the fix being dropped.

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::detection::{location_key, ActivityLabel, ClusterQuery, FrequentLocation};
use crate::device::Fix;

/// The history interface the pipeline depends on.
pub trait HistoryStore: Send + Sync {
    /// Most recent fixes, chronological (most recent last).
    fn recent_fixes(&self, limit: usize) -> Result<Vec<Fix>>;

    /// Persist a fix with its derived labels.
    fn append_fix(&self, fix: &Fix, activity: ActivityLabel, is_anomaly: bool) -> Result<AppendOutcome>;

    /// Low-speed locations visited often enough to count as normal.
    fn frequent_locations(&self, query: &ClusterQuery) -> Result<Vec<FrequentLocation>>;
}

/// Why a submitted timestamp was replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampCorrection {
    TooOld,
    InFuture,
    Duplicate,
    NotNewer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppendOutcome {
    pub id: i64,
    pub stored_timestamp: i64,
    pub correction: Option<TimestampCorrection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredFix {
    pub id: i64,
    #[serde(flatten)]
    pub fix: Fix,
    pub activity: Option<ActivityLabel>,
    pub is_anomaly: bool,
    /// Server time of insertion, unix seconds
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoryStats {
    pub total_fixes: i64,
    pub anomaly_count: i64,
    pub normal_count: i64,
    pub activity_distribution: BTreeMap<String, i64>,
    pub last_24h_activity: BTreeMap<String, i64>,
    pub avg_speed_by_activity: BTreeMap<String, f64>,
}

/// Database manager
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    config: DatabaseConfig,
}

impl Database {
    /// Open or create database
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&config.path)?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            config: config.clone(),
        };
        db.create_tables()?;

        info!("Database opened at {:?}", config.path);
        Ok(db)
    }

    /// In-memory database, for tests and one-off runs
    pub fn open_in_memory(config: &DatabaseConfig) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            config: config.clone(),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS gps_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                speed REAL NOT NULL,
                timestamp INTEGER NOT NULL,
                activity TEXT,
                is_anomaly INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_gps_timestamp ON gps_data(timestamp);
            CREATE INDEX IF NOT EXISTS idx_gps_created ON gps_data(created_at);
        "#,
        )?;

        Ok(())
    }

    /// Store a fix, validating its timestamp against `now` (unix seconds).
    pub fn append_fix_at(&self, fix: &Fix, activity: Option<ActivityLabel>, is_anomaly: bool, now: i64) -> Result<AppendOutcome> {
        let conn = self.conn.lock();

        let last: Option<i64> = conn.query_row("SELECT MAX(timestamp) FROM gps_data", [], |row| row.get(0))?;

        let correction = if fix.timestamp < now - self.config.max_age_secs {
            Some(TimestampCorrection::TooOld)
        } else if fix.timestamp > now + self.config.max_future_secs {
            Some(TimestampCorrection::InFuture)
        } else if is_duplicate(&conn, fix, now - self.config.duplicate_window_secs)? {
            Some(TimestampCorrection::Duplicate)
        } else if last.map_or(false, |l| fix.timestamp <= l) {
            Some(TimestampCorrection::NotNewer)
        } else {
            None
        };

        let stored_timestamp = match correction {
            None => fix.timestamp,
            Some(reason) => {
                let replacement = match last {
                    Some(l) if now <= l => l + 1,
                    _ => now,
                };
                warn!(
                    "Replacing timestamp {} ({:?}) with {}",
                    fix.timestamp, reason, replacement
                );
                replacement
            }
        };

        conn.execute(
            r#"INSERT INTO gps_data
               (latitude, longitude, speed, timestamp, activity, is_anomaly, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                fix.lat,
                fix.lon,
                fix.sanitized_speed(),
                stored_timestamp,
                activity.map(|a| a.as_str()),
                is_anomaly,
                now
            ],
        )?;

        Ok(AppendOutcome {
            id: conn.last_insert_rowid(),
            stored_timestamp,
            correction,
        })
    }

    /// Stored rows, most recent first, optionally for one activity.
    pub fn query_history(&self, limit: usize, activity: Option<ActivityLabel>) -> Result<Vec<StoredFix>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            r#"SELECT id, latitude, longitude, speed, timestamp, activity, is_anomaly, created_at
               FROM gps_data
               WHERE (?1 IS NULL OR activity = ?1)
               ORDER BY timestamp DESC, id DESC
               LIMIT ?2"#,
        )?;

        let rows = stmt.query_map(params![activity.map(|a| a.as_str()), limit as i64], stored_fix_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Aggregate statistics over the stored history.
    pub fn stats(&self, now: i64) -> Result<HistoryStats> {
        let conn = self.conn.lock();
        let mut stats = HistoryStats::default();

        stats.total_fixes = conn.query_row("SELECT COUNT(*) FROM gps_data", [], |row| row.get(0))?;
        stats.anomaly_count = conn.query_row("SELECT COUNT(*) FROM gps_data WHERE is_anomaly = 1", [], |row| row.get(0))?;
        stats.normal_count = stats.total_fixes - stats.anomaly_count;

        let mut stmt = conn.prepare(
            "SELECT COALESCE(activity, 'unknown'), COUNT(*), AVG(speed) FROM gps_data GROUP BY 1",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let activity: String = row.get(0)?;
            stats.activity_distribution.insert(activity.clone(), row.get(1)?);
            stats.avg_speed_by_activity.insert(activity, row.get(2)?);
        }

        let mut stmt = conn.prepare(
            "SELECT COALESCE(activity, 'unknown'), COUNT(*) FROM gps_data WHERE timestamp >= ?1 GROUP BY 1",
        )?;
        let mut rows = stmt.query(params![now - 24 * 3600])?;
        while let Some(row) = rows.next()? {
            stats.last_24h_activity.insert(row.get(0)?, row.get(1)?);
        }

        Ok(stats)
    }

    /// Delete fixes older than the retention period
    pub fn cleanup(&self, retention_days: u32) -> Result<usize> {
        self.cleanup_at(retention_days, Utc::now().timestamp())
    }

    pub fn cleanup_at(&self, retention_days: u32, now: i64) -> Result<usize> {
        let conn = self.conn.lock();

        let cutoff = now - retention_days as i64 * 86_400;
        let deleted = conn.execute("DELETE FROM gps_data WHERE timestamp < ?1", params![cutoff])?;

        conn.execute("VACUUM", [])?;

        info!("Cleaned up {} fixes older than {} days", deleted, retention_days);
        Ok(deleted)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM gps_data", [], |row| row.get(0))?)
    }
}

impl HistoryStore for Database {
    fn recent_fixes(&self, limit: usize) -> Result<Vec<Fix>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            r#"SELECT latitude, longitude, speed, timestamp FROM gps_data
               ORDER BY timestamp DESC, id DESC
               LIMIT ?1"#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(Fix::new(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;

        let mut fixes = Vec::with_capacity(limit);
        for row in rows {
            fixes.push(row?);
        }
        fixes.reverse();
        Ok(fixes)
    }

    fn append_fix(&self, fix: &Fix, activity: ActivityLabel, is_anomaly: bool) -> Result<AppendOutcome> {
        self.append_fix_at(fix, Some(activity), is_anomaly, Utc::now().timestamp())
    }

    fn frequent_locations(&self, query: &ClusterQuery) -> Result<Vec<FrequentLocation>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            r#"SELECT ROUND(latitude, 4) AS lat_r, ROUND(longitude, 4) AS lon_r,
                      AVG(latitude), AVG(longitude), COUNT(*) AS visits
               FROM gps_data
               WHERE speed < ?1 AND (activity = 'stationary' OR activity IS NULL)
               GROUP BY lat_r, lon_r
               HAVING visits >= ?2
               ORDER BY visits DESC
               LIMIT ?3"#,
        )?;

        let rows = stmt.query_map(
            params![query.max_speed, query.min_count as i64, query.limit as i64],
            |row| {
                let lat_r: f64 = row.get(0)?;
                let lon_r: f64 = row.get(1)?;
                let visits: i64 = row.get(4)?;
                Ok(FrequentLocation::new(
                    location_key(lat_r, lon_r),
                    row.get(2)?,
                    row.get(3)?,
                    visits.clamp(0, u32::MAX as i64) as u32,
                ))
            },
        )?;

        let mut locations = Vec::new();
        for row in rows {
            locations.push(row?);
        }
        debug!("Mined {} frequent locations", locations.len());
        Ok(locations)
    }
}

fn is_duplicate(conn: &Connection, fix: &Fix, since: i64) -> Result<bool> {
    let hit: Option<i64> = conn
        .query_row(
            r#"SELECT id FROM gps_data
               WHERE timestamp = ?1 AND latitude = ?2 AND longitude = ?3 AND created_at >= ?4
               LIMIT 1"#,
            params![fix.timestamp, fix.lat, fix.lon, since],
            |row| row.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

fn stored_fix_from_row(row: &Row<'_>) -> rusqlite::Result<StoredFix> {
    let activity: Option<String> = row.get(5)?;
    Ok(StoredFix {
        id: row.get(0)?,
        fix: Fix::new(row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?),
        activity: activity.and_then(|a| a.parse().ok()),
        is_anomaly: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn db() -> Database {
        Database::open_in_memory(&DatabaseConfig::default()).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let db = db();
        let fix = Fix::new(-7.005, 110.438, 12.5, NOW - 10);
        let outcome = db.append_fix_at(&fix, Some(ActivityLabel::Motor), false, NOW).unwrap();
        assert_eq!(outcome.correction, None);
        assert_eq!(outcome.stored_timestamp, NOW - 10);

        let fixes = db.recent_fixes(10).unwrap();
        assert_eq!(fixes, vec![fix]);

        let rows = db.query_history(10, None).unwrap();
        assert_eq!(rows[0].activity, Some(ActivityLabel::Motor));
        assert_eq!(rows[0].created_at, NOW);
    }

    #[test]
    fn test_recent_fixes_are_chronological() {
        let db = db();
        for i in 0..5 {
            db.append_fix_at(&Fix::new(i as f64, 0.0, 1.0, NOW - 100 + i), None, false, NOW).unwrap();
        }
        let fixes = db.recent_fixes(3).unwrap();
        let ts: Vec<i64> = fixes.iter().map(|f| f.timestamp).collect();
        assert_eq!(ts, vec![NOW - 98, NOW - 97, NOW - 96]);
    }

    #[test]
    fn test_old_and_future_timestamps_are_replaced() {
        let db = db();
        let old = db.append_fix_at(&Fix::new(1.0, 1.0, 0.0, NOW - 3601), None, false, NOW).unwrap();
        assert_eq!(old.correction, Some(TimestampCorrection::TooOld));
        assert_eq!(old.stored_timestamp, NOW);

        let future = db.append_fix_at(&Fix::new(1.0, 1.0, 0.0, NOW + 400), None, false, NOW + 5).unwrap();
        assert_eq!(future.correction, Some(TimestampCorrection::InFuture));
        assert_eq!(future.stored_timestamp, NOW + 5);
    }

    #[test]
    fn test_duplicate_and_stale_timestamps_are_replaced() {
        let db = db();
        let fix = Fix::new(1.0, 2.0, 3.0, NOW - 60);
        db.append_fix_at(&fix, None, false, NOW).unwrap();

        let dup = db.append_fix_at(&fix, None, false, NOW + 1).unwrap();
        assert_eq!(dup.correction, Some(TimestampCorrection::Duplicate));
        assert_eq!(dup.stored_timestamp, NOW + 1);

        let stale = db.append_fix_at(&Fix::new(5.0, 5.0, 0.0, NOW - 30), None, false, NOW + 1).unwrap();
        assert_eq!(stale.correction, Some(TimestampCorrection::NotNewer));
        // Server time is not newer than the last stored value, so bump it.
        assert_eq!(stale.stored_timestamp, NOW + 2);

        assert_eq!(db.count().unwrap(), 3);
    }

    #[test]
    fn test_frequent_locations() {
        let db = db();
        let mut ts = NOW - 3000;
        let mut add = |lat: f64, lon: f64, speed: f64, activity: Option<ActivityLabel>| {
            ts += 1;
            db.append_fix_at(&Fix::new(lat, lon, speed, ts), activity, false, NOW).unwrap();
        };
        for _ in 0..5 {
            add(1.00001, 2.00001, 0.5, Some(ActivityLabel::Stationary));
        }
        for _ in 0..3 {
            add(3.0, 4.0, 1.0, None);
        }
        // Too few visits, too fast, or moving: ignored.
        add(5.0, 5.0, 0.1, None);
        for _ in 0..4 {
            add(6.0, 6.0, 10.0, None);
            add(7.0, 7.0, 1.0, Some(ActivityLabel::Walking));
        }

        let query = ClusterQuery { max_speed: 2.0, min_count: 3, limit: 20 };
        let locations = db.frequent_locations(&query).unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].key, "1.0000,2.0000");
        assert_eq!(locations[0].frequency, 5);
        assert_eq!(locations[0].radius_meters, 500.0);
        assert!((locations[0].lat - 1.00001).abs() < 1e-9);
        assert_eq!(locations[1].key, "3.0000,4.0000");
    }

    #[test]
    fn test_query_history_filter_and_stats() {
        let db = db();
        db.append_fix_at(&Fix::new(0.0, 0.0, 1.0, NOW - 50), Some(ActivityLabel::Stationary), false, NOW).unwrap();
        db.append_fix_at(&Fix::new(0.0, 0.0, 50.0, NOW - 40), Some(ActivityLabel::Car), true, NOW).unwrap();
        db.append_fix_at(&Fix::new(0.0, 0.0, 60.0, NOW - 30), Some(ActivityLabel::Car), false, NOW).unwrap();

        let cars = db.query_history(10, Some(ActivityLabel::Car)).unwrap();
        assert_eq!(cars.len(), 2);
        assert_eq!(cars[0].fix.timestamp, NOW - 30);

        let stats = db.stats(NOW).unwrap();
        assert_eq!(stats.total_fixes, 3);
        assert_eq!(stats.anomaly_count, 1);
        assert_eq!(stats.normal_count, 2);
        assert_eq!(stats.activity_distribution.get("car"), Some(&2));
        assert_eq!(stats.last_24h_activity.get("stationary"), Some(&1));
        assert_eq!(stats.avg_speed_by_activity.get("car"), Some(&55.0));
    }

    #[test]
    fn test_cleanup_removes_old_rows() {
        let db = db();
        db.append_fix_at(&Fix::new(0.0, 0.0, 1.0, NOW - 10), None, false, NOW).unwrap();
        let later = NOW + 40 * 86_400;
        db.append_fix_at(&Fix::new(0.0, 0.0, 1.0, later), None, false, later).unwrap();

        assert_eq!(db.cleanup_at(30, later).unwrap(), 1);
        assert_eq!(db.count().unwrap(), 1);
    }
}
