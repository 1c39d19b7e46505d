use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, Row};

use super::{AuditError, AuditEvent, AuditFilter, AuditRecord, AuditStore};

const COLUMNS: &str = "id, timestamp, event_type, ticket_id, flow_id, user_id, data";

/// Audit trail in the shared SQLite database
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> AuditError {
    AuditError::Database(e.to_string())
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// WHERE clause and bind values for `filter`.
fn conditions(filter: &AuditFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values = Vec::new();

    let exact = [
        ("ticket_id", &filter.ticket_id),
        ("flow_id", &filter.flow_id),
        ("user_id", &filter.user_id),
    ];
    for (column, value) in exact {
        if let Some(value) = value {
            clauses.push(format!("{} = ?", column));
            values.push(Value::Text(value.clone()));
        }
    }
    if !filter.event_types.is_empty() {
        let marks = vec!["?"; filter.event_types.len()].join(", ");
        clauses.push(format!("event_type IN ({})", marks));
        values.extend(filter.event_types.iter().cloned().map(Value::Text));
    }
    if let Some(from) = &filter.from {
        clauses.push("timestamp >= ?".to_string());
        values.push(Value::Text(timestamp(from)));
    }
    if let Some(to) = &filter.to {
        clauses.push("timestamp <= ?".to_string());
        values.push(Value::Text(timestamp(to)));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), values)
    }
}

impl SqliteAuditStore {
    /// Open (or create) the audit log in the database at `path`.
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        Self::with_connection(Connection::open(path).map_err(db_err)?)
    }

    pub fn in_memory() -> Result<Self, AuditError> {
        Self::with_connection(Connection::open_in_memory().map_err(db_err)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                ticket_id TEXT,
                flow_id TEXT,
                user_id TEXT,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_events_ticket_id ON audit_events(ticket_id);
            CREATE INDEX IF NOT EXISTS idx_audit_events_flow_id ON audit_events(flow_id);
            CREATE INDEX IF NOT EXISTS idx_audit_events_event_type ON audit_events(event_type);
            "#,
        )
        .map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AuditError> {
        self.conn.lock().map_err(|_| AuditError::Poisoned)
    }
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<Result<AuditRecord, AuditError>> {
    let ts: String = row.get(1)?;
    let data: String = row.get(6)?;

    let timestamp = match DateTime::parse_from_rfc3339(&ts) {
        Ok(t) => t.with_timezone(&Utc),
        Err(e) => return Ok(Err(AuditError::Database(format!("Invalid timestamp: {}", e)))),
    };
    let data: AuditEvent = match serde_json::from_str(&data) {
        Ok(event) => event,
        Err(e) => return Ok(Err(AuditError::Serialization(e.to_string()))),
    };

    Ok(Ok(AuditRecord {
        id: row.get(0)?,
        timestamp,
        event_type: row.get(2)?,
        ticket_id: row.get(3)?,
        flow_id: row.get(4)?,
        user_id: row.get(5)?,
        data,
    }))
}

impl AuditStore for SqliteAuditStore {
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
        let data = serde_json::to_string(&record.data)
            .map_err(|e| AuditError::Serialization(e.to_string()))?;

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO audit_events (timestamp, event_type, ticket_id, flow_id, user_id, data)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                timestamp(&record.timestamp),
                record.event_type,
                record.ticket_id,
                record.flow_id,
                record.user_id,
                data,
            ],
        )
        .map_err(db_err)?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let (where_clause, mut values) = conditions(filter);
        values.push(Value::Integer(filter.limit));
        values.push(Value::Integer(filter.offset));
        let sql = format!(
            "SELECT {} FROM audit_events {} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            COLUMNS, where_clause
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(values), read_record)
            .map_err(db_err)?;

        rows.map(|row| row.map_err(db_err)?).collect()
    }

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError> {
        let (where_clause, values) = conditions(filter);
        let sql = format!("SELECT COUNT(*) FROM audit_events {}", where_clause);

        let conn = self.conn()?;
        conn.query_row(&sql, params_from_iter(values), |row| row.get(0))
            .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(event: AuditEvent) -> AuditRecord {
        AuditRecord {
            id: 0,
            timestamp: Utc::now(),
            event_type: event.event_type().to_string(),
            ticket_id: event.ticket_id().map(String::from),
            flow_id: event.flow_id().map(String::from),
            user_id: event.user_id().map(String::from),
            data: event,
        }
    }

    fn created(ticket_id: &str, creator: &str) -> AuditRecord {
        record(AuditEvent::TicketCreated {
            ticket_id: ticket_id.to_string(),
            ticket_type: "MYSQL_MASTER_SLAVE_SWITCH".to_string(),
            creator: creator.to_string(),
            flow_count: 1,
        })
    }

    fn queued(ticket_id: &str) -> AuditRecord {
        queued_flow(ticket_id, "f")
    }

    fn queued_flow(ticket_id: &str, flow_id: &str) -> AuditRecord {
        record(AuditEvent::FlowQueued {
            ticket_id: ticket_id.to_string(),
            flow_id: flow_id.to_string(),
            exclusive_key: "cluster-1".to_string(),
            position: 0,
        })
    }

    #[test]
    fn test_insert_and_query_roundtrip() {
        let store = SqliteAuditStore::in_memory().unwrap();
        let id = store.insert(&queued("t-1")).unwrap();

        let results = store.query(&AuditFilter::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
        assert!(matches!(results[0].data, AuditEvent::FlowQueued { position: 0, .. }));
    }

    #[test]
    fn test_filters() {
        let store = SqliteAuditStore::in_memory().unwrap();
        store.insert(&created("t-1", "alice")).unwrap();
        store.insert(&created("t-2", "bob")).unwrap();
        store.insert(&queued("t-1")).unwrap();

        let by_ticket = AuditFilter::new().with_ticket_id("t-1");
        assert_eq!(store.count(&by_ticket).unwrap(), 2);

        let by_type = AuditFilter::new().with_event_type("ticket_created");
        assert_eq!(store.query(&by_type).unwrap().len(), 2);

        let by_user = AuditFilter::new().with_user_id("bob");
        let results = store.query(&by_user).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].ticket_id.as_deref(), Some("t-2"));
    }

    #[test]
    fn test_flow_trail_and_event_type_set() {
        let store = SqliteAuditStore::in_memory().unwrap();
        store.insert(&created("t-1", "alice")).unwrap();
        store.insert(&queued_flow("t-1", "f-1")).unwrap();
        store.insert(&queued_flow("t-1", "f-2")).unwrap();
        store
            .insert(&record(AuditEvent::FlowAdmitted {
                ticket_id: "t-1".to_string(),
                flow_id: "f-1".to_string(),
                exclusive_key: "cluster-1".to_string(),
            }))
            .unwrap();

        let trail = store.query(&AuditFilter::new().with_flow_id("f-1")).unwrap();
        assert_eq!(trail.len(), 2);
        assert!(trail.iter().all(|r| r.flow_id.as_deref() == Some("f-1")));

        let either = AuditFilter::new()
            .with_event_type("ticket_created")
            .with_event_type("flow_admitted");
        assert_eq!(store.count(&either).unwrap(), 2);
        assert_eq!(store.count(&either.unpaged().with_flow_id("f-2")).unwrap(), 0);
    }

    #[test]
    fn test_newest_first_and_pagination() {
        let store = SqliteAuditStore::in_memory().unwrap();
        for i in 0..5 {
            store.insert(&created(&format!("t-{}", i), "alice")).unwrap();
        }

        let page = store
            .query(&AuditFilter::new().with_page(2, 0))
            .unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[0].id > page[1].id);

        let last = store
            .query(&AuditFilter::new().with_page(2, 4))
            .unwrap();
        assert_eq!(last.len(), 1);
    }

    #[test]
    fn test_time_range() {
        let store = SqliteAuditStore::in_memory().unwrap();
        let now = Utc::now();

        let mut old = queued("t-1");
        old.timestamp = now - Duration::hours(3);
        store.insert(&old).unwrap();
        store.insert(&queued("t-1")).unwrap();

        let recent = AuditFilter::new().with_time_range(Some(now - Duration::hours(1)), None);
        assert_eq!(store.count(&recent).unwrap(), 1);
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("audit.db");

        {
            let store = SqliteAuditStore::new(&db_path).unwrap();
            store.insert(&created("t-1", "alice")).unwrap();
        }

        let store = SqliteAuditStore::new(&db_path).unwrap();
        assert_eq!(store.count(&AuditFilter::new()).unwrap(), 1);
    }
}
