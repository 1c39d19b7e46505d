//! Sources of data repair work.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::ReconcileError;

/// Result of checksumming one table on one slave against its master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecksumReport {
    pub cluster_id: u64,
    pub master_ip: String,
    pub slave_ip: String,
    pub db: String,
    pub tbl: String,
    pub is_consistent: bool,
    pub reported_at: DateTime<Utc>,
}

/// Where the daily repair pass learns which tables drifted.
pub trait RepairSource: Send + Sync {
    /// Inconsistent reports at or after `since`, oldest first.
    fn inconsistent_since(&self, since: DateTime<Utc>) -> Result<Vec<ChecksumReport>, ReconcileError>;
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed checksum report table.
pub struct SqliteChecksumReports {
    conn: Mutex<Connection>,
}

impl SqliteChecksumReports {
    /// Open (or create) the report table in the database at `path`.
    pub fn new(path: &Path) -> Result<Self, ReconcileError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory report table (useful for testing)
    pub fn in_memory() -> Result<Self, ReconcileError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ReconcileError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS checksum_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cluster_id INTEGER NOT NULL,
                master_ip TEXT NOT NULL,
                slave_ip TEXT NOT NULL,
                db TEXT NOT NULL,
                tbl TEXT NOT NULL,
                is_consistent INTEGER NOT NULL,
                reported_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_checksum_reports_reported_at
                ON checksum_reports(reported_at);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ReconcileError> {
        self.conn.lock().map_err(|_| ReconcileError::Poisoned)
    }

    /// Store one checksum result.
    pub fn record(&self, report: &ChecksumReport) -> Result<(), ReconcileError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO checksum_reports
                (cluster_id, master_ip, slave_ip, db, tbl, is_consistent, reported_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                report.cluster_id as i64,
                report.master_ip,
                report.slave_ip,
                report.db,
                report.tbl,
                report.is_consistent,
                timestamp(&report.reported_at),
            ],
        )?;
        Ok(())
    }
}

impl RepairSource for SqliteChecksumReports {
    fn inconsistent_since(&self, since: DateTime<Utc>) -> Result<Vec<ChecksumReport>, ReconcileError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT cluster_id, master_ip, slave_ip, db, tbl, is_consistent, reported_at
            FROM checksum_reports
            WHERE is_consistent = 0 AND reported_at >= ?
            ORDER BY reported_at ASC, id ASC
            "#,
        )?;

        let rows = stmt.query_map(params![timestamp(&since)], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut reports = Vec::new();
        for row in rows {
            let (cluster_id, master_ip, slave_ip, db, tbl, is_consistent, reported_at) = row?;
            let reported_at = DateTime::parse_from_rfc3339(&reported_at)
                .map_err(|e| ReconcileError::Corrupt(format!("reported_at: {}", e)))?
                .with_timezone(&Utc);
            reports.push(ChecksumReport {
                cluster_id: cluster_id as u64,
                master_ip,
                slave_ip,
                db,
                tbl,
                is_consistent,
                reported_at,
            });
        }
        Ok(reports)
    }
}
