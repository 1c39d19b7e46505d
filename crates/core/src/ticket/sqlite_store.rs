//! SQLite-backed ticket store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::exclusive::ExclusiveKey;

use super::{
    Flow, FlowError, FlowStatus, FlowUpdate, NewFlow, NewTicket, Ticket, TicketError,
    TicketFilter, TicketStatus, TicketStore,
};

const TICKET_COLUMNS: &str =
    "id, ticket_type, creator, params, status, scope, created_at, updated_at";

const FLOW_COLUMNS: &str = "id, ticket_id, ordinal, flow_type, root_id, context, status, \
     exclusive_key, retry_count, retry_of, error, created_at, updated_at";

/// SQLite-backed ticket and flow store.
pub struct SqliteTicketStore {
    conn: Mutex<Connection>,
}

/// Fixed-width RFC 3339 so stored timestamps compare lexicographically.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn corrupt(column: usize, reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, reason.into())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, TicketError> {
    serde_json::to_string(value).map_err(|e| TicketError::Database(e.to_string()))
}

impl SqliteTicketStore {
    /// Create a new SQLite ticket store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, TicketError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite ticket store (useful for testing).
    pub fn in_memory() -> Result<Self, TicketError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TicketError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tickets (
                id TEXT PRIMARY KEY,
                ticket_type TEXT NOT NULL,
                creator TEXT NOT NULL,
                params TEXT NOT NULL,
                status TEXT NOT NULL,
                scope TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);
            CREATE INDEX IF NOT EXISTS idx_tickets_type_status ON tickets(ticket_type, status);

            CREATE TABLE IF NOT EXISTS flows (
                id TEXT PRIMARY KEY,
                ticket_id TEXT NOT NULL REFERENCES tickets(id),
                ordinal INTEGER NOT NULL,
                flow_type TEXT NOT NULL,
                root_id TEXT NOT NULL UNIQUE,
                context TEXT NOT NULL,
                status TEXT NOT NULL,
                exclusive_key TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                retry_of TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_flows_ticket ON flows(ticket_id, ordinal);
            CREATE INDEX IF NOT EXISTS idx_flows_status_updated ON flows(status, updated_at);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, TicketError> {
        self.conn
            .lock()
            .map_err(|_| TicketError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &TicketFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(ticket_type) = filter.ticket_type {
            conditions.push("ticket_type = ?");
            params.push(Box::new(ticket_type.as_str()));
        }

        if let Some(ref creator) = filter.creator {
            conditions.push("creator = ?");
            params.push(Box::new(creator.clone()));
        }

        if let Some(ref since) = filter.created_after {
            conditions.push("created_at >= ?");
            params.push(Box::new(timestamp(since)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_ticket(row: &rusqlite::Row) -> rusqlite::Result<Ticket> {
        let ticket_type: String = row.get(1)?;
        let params_json: String = row.get(3)?;
        let status: String = row.get(4)?;
        let scope_json: String = row.get(5)?;
        let created_at: String = row.get(6)?;
        let updated_at: String = row.get(7)?;

        let scope: Vec<ExclusiveKey> =
            serde_json::from_str(&scope_json).map_err(|e| corrupt(5, e.to_string()))?;

        Ok(Ticket {
            id: row.get(0)?,
            ticket_type: ticket_type.parse().map_err(|e| corrupt(1, e))?,
            creator: row.get(2)?,
            params: serde_json::from_str(&params_json).unwrap_or(serde_json::Value::Null),
            status: status.parse().map_err(|e| corrupt(4, e))?,
            scope,
            flow_ids: Vec::new(),
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn row_to_flow(row: &rusqlite::Row) -> rusqlite::Result<Flow> {
        let flow_type: String = row.get(3)?;
        let context_json: String = row.get(5)?;
        let status: String = row.get(6)?;
        let key: String = row.get(7)?;
        let error_json: Option<String> = row.get(10)?;
        let created_at: String = row.get(11)?;
        let updated_at: String = row.get(12)?;

        let error: Option<FlowError> = error_json
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| corrupt(10, e.to_string()))?;

        Ok(Flow {
            id: row.get(0)?,
            ticket_id: row.get(1)?,
            ordinal: row.get(2)?,
            flow_type: flow_type.parse().map_err(|e| corrupt(3, e))?,
            root_id: row.get(4)?,
            context: serde_json::from_str(&context_json).unwrap_or(serde_json::Value::Null),
            status: status.parse().map_err(|e| corrupt(6, e))?,
            exclusive_key: ExclusiveKey::new(key),
            retry_count: row.get(8)?,
            retry_of: row.get(9)?,
            error,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn load_ticket(conn: &Connection, id: &str) -> Result<Option<Ticket>, TicketError> {
        let ticket = conn
            .query_row(
                &format!("SELECT {} FROM tickets WHERE id = ?", TICKET_COLUMNS),
                params![id],
                Self::row_to_ticket,
            )
            .optional()?;

        match ticket {
            Some(mut ticket) => {
                ticket.flow_ids = Self::load_flow_ids(conn, &ticket.id)?;
                Ok(Some(ticket))
            }
            None => Ok(None),
        }
    }

    fn load_flow_ids(conn: &Connection, ticket_id: &str) -> Result<Vec<String>, TicketError> {
        let mut stmt = conn.prepare(
            "SELECT id FROM flows WHERE ticket_id = ? ORDER BY ordinal ASC, retry_count ASC, created_at ASC",
        )?;
        let ids = stmt
            .query_map(params![ticket_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn load_flow(conn: &Connection, id: &str) -> Result<Option<Flow>, TicketError> {
        let flow = conn
            .query_row(
                &format!("SELECT {} FROM flows WHERE id = ?", FLOW_COLUMNS),
                params![id],
                Self::row_to_flow,
            )
            .optional()?;
        Ok(flow)
    }

    fn insert_flow(conn: &Connection, flow: &Flow) -> Result<(), TicketError> {
        let error_json = flow.error.as_ref().map(to_json).transpose()?;
        conn.execute(
            &format!(
                "INSERT INTO flows ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                FLOW_COLUMNS
            ),
            params![
                flow.id,
                flow.ticket_id,
                flow.ordinal,
                flow.flow_type.as_str(),
                flow.root_id,
                to_json(&flow.context)?,
                flow.status.as_str(),
                flow.exclusive_key.as_str(),
                flow.retry_count,
                flow.retry_of,
                error_json,
                timestamp(&flow.created_at),
                timestamp(&flow.updated_at),
            ],
        )?;
        Ok(())
    }

    fn pending_flow(
        ticket_id: &str,
        ordinal: u32,
        plan: super::FlowPlan,
        retry_count: u32,
        retry_of: Option<String>,
        now: DateTime<Utc>,
    ) -> Flow {
        Flow {
            id: uuid::Uuid::new_v4().to_string(),
            ticket_id: ticket_id.to_string(),
            ordinal,
            flow_type: plan.flow_type,
            root_id: uuid::Uuid::new_v4().simple().to_string(),
            context: plan.context,
            status: FlowStatus::Pending,
            exclusive_key: plan.exclusive_key,
            retry_count,
            retry_of,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl TicketStore for SqliteTicketStore {
    fn create(&self, request: NewTicket) -> Result<(Ticket, Vec<Flow>), TicketError> {
        let mut conn = self.conn()?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut scope: Vec<ExclusiveKey> = Vec::new();
        for plan in &request.flows {
            if !scope.contains(&plan.exclusive_key) {
                scope.push(plan.exclusive_key.clone());
            }
        }

        let flows: Vec<Flow> = request
            .flows
            .into_iter()
            .enumerate()
            .map(|(ordinal, plan)| Self::pending_flow(&id, ordinal as u32, plan, 0, None, now))
            .collect();

        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO tickets ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                TICKET_COLUMNS
            ),
            params![
                id,
                request.ticket_type.as_str(),
                request.creator,
                to_json(&request.params)?,
                TicketStatus::Running.as_str(),
                to_json(&scope)?,
                timestamp(&now),
                timestamp(&now),
            ],
        )?;
        for flow in &flows {
            Self::insert_flow(&tx, flow)?;
        }
        tx.commit()?;

        let ticket = Ticket {
            id,
            ticket_type: request.ticket_type,
            creator: request.creator,
            params: request.params,
            status: TicketStatus::Running,
            scope,
            flow_ids: flows.iter().map(|f| f.id.clone()).collect(),
            created_at: now,
            updated_at: now,
        };

        Ok((ticket, flows))
    }

    fn get(&self, id: &str) -> Result<Option<Ticket>, TicketError> {
        let conn = self.conn()?;
        Self::load_ticket(&conn, id)
    }

    fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, TicketError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM tickets {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
            TICKET_COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_ticket)?;

        let mut tickets = Vec::new();
        for row_result in rows {
            let mut ticket = row_result?;
            ticket.flow_ids = Self::load_flow_ids(&conn, &ticket.id)?;
            tickets.push(ticket);
        }

        Ok(tickets)
    }

    fn count(&self, filter: &TicketFilter) -> Result<i64, TicketError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM tickets {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count)
    }

    fn update_status(&self, id: &str, status: TicketStatus) -> Result<Ticket, TicketError> {
        let conn = self.conn()?;

        let mut ticket =
            Self::load_ticket(&conn, id)?.ok_or_else(|| TicketError::NotFound(id.to_string()))?;

        if ticket.status == status {
            return Ok(ticket);
        }

        if ticket.status.is_terminal() {
            return Err(TicketError::InvalidState {
                ticket_id: id.to_string(),
                current_state: ticket.status.to_string(),
                operation: format!("move to {}", status),
            });
        }

        let now = Utc::now();
        conn.execute(
            "UPDATE tickets SET status = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), timestamp(&now), id],
        )?;

        ticket.status = status;
        ticket.updated_at = now;
        Ok(ticket)
    }

    fn get_flow(&self, id: &str) -> Result<Option<Flow>, TicketError> {
        let conn = self.conn()?;
        Self::load_flow(&conn, id)
    }

    fn get_flow_by_root(&self, root_id: &str) -> Result<Option<Flow>, TicketError> {
        let conn = self.conn()?;
        let flow = conn
            .query_row(
                &format!("SELECT {} FROM flows WHERE root_id = ?", FLOW_COLUMNS),
                params![root_id],
                Self::row_to_flow,
            )
            .optional()?;
        Ok(flow)
    }

    fn list_flows(&self, ticket_id: &str) -> Result<Vec<Flow>, TicketError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM flows WHERE ticket_id = ? ORDER BY ordinal ASC, retry_count ASC, created_at ASC",
            FLOW_COLUMNS
        ))?;
        let flows = stmt
            .query_map(params![ticket_id], Self::row_to_flow)?
            .collect::<rusqlite::Result<Vec<Flow>>>()?;
        Ok(flows)
    }

    fn list_flows_by_status(
        &self,
        status: FlowStatus,
        updated_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Flow>, TicketError> {
        let conn = self.conn()?;
        let flows = match updated_before {
            Some(cutoff) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM flows WHERE status = ? AND updated_at <= ? ORDER BY updated_at ASC",
                    FLOW_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![status.as_str(), timestamp(&cutoff)], Self::row_to_flow)?
                    .collect::<rusqlite::Result<Vec<Flow>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM flows WHERE status = ? ORDER BY updated_at ASC",
                    FLOW_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![status.as_str()], Self::row_to_flow)?
                    .collect::<rusqlite::Result<Vec<Flow>>>()?;
                rows
            }
        };
        Ok(flows)
    }

    fn count_flows(&self, status: FlowStatus) -> Result<i64, TicketError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM flows WHERE status = ?",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn transition_flow(
        &self,
        id: &str,
        expected: FlowStatus,
        update: FlowUpdate,
    ) -> Result<Option<Flow>, TicketError> {
        let conn = self.conn()?;

        let error_json = update.error.as_ref().map(to_json).transpose()?;
        let context_json = update.context.as_ref().map(to_json).transpose()?;

        let changed = conn.execute(
            "UPDATE flows SET status = ?, error = COALESCE(?, error), context = COALESCE(?, context), updated_at = ? \
             WHERE id = ? AND status = ?",
            params![
                update.status.as_str(),
                error_json,
                context_json,
                timestamp(&Utc::now()),
                id,
                expected.as_str(),
            ],
        )?;

        if changed == 0 {
            return match Self::load_flow(&conn, id)? {
                Some(_) => Ok(None),
                None => Err(TicketError::FlowNotFound(id.to_string())),
            };
        }

        Self::load_flow(&conn, id)
    }

    fn add_flow(&self, request: NewFlow) -> Result<Flow, TicketError> {
        let conn = self.conn()?;

        let ticket_status: Option<String> = conn
            .query_row(
                "SELECT status FROM tickets WHERE id = ?",
                params![request.ticket_id],
                |row| row.get(0),
            )
            .optional()?;
        if ticket_status.is_none() {
            return Err(TicketError::NotFound(request.ticket_id));
        }

        let flow = Self::pending_flow(
            &request.ticket_id,
            request.ordinal,
            request.plan,
            request.retry_count,
            request.retry_of,
            Utc::now(),
        );
        Self::insert_flow(&conn, &flow)?;
        Ok(flow)
    }

    fn increment_flow_retry(&self, id: &str) -> Result<Flow, TicketError> {
        let conn = self.conn()?;

        let changed = conn.execute(
            "UPDATE flows SET retry_count = retry_count + 1, updated_at = ? WHERE id = ?",
            params![timestamp(&Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(TicketError::FlowNotFound(id.to_string()));
        }

        Self::load_flow(&conn, id)?.ok_or_else(|| TicketError::FlowNotFound(id.to_string()))
    }
}
