use chrono::{DateTime, Utc};
use deck_core::events::{event_kind_tag, Event};
use deck_core::state::{is_transition_allowed, ExecutionStatus};
use deck_core::types::{ExecutionId, ExecutionRecord, SessionId, TaskId};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;

use crate::error::StoreError;

/// Durable mirror of execution records and lifecycle events.
///
/// The execution lifecycle manager is the sole writer of execution rows; this
/// store only runs the parameterized statements it is handed.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

type ExecutionRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<i32>,
    Option<String>,
);

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path_ref)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS executions (
    execution_id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    status_tag TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    exit_code INTEGER,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_executions_task ON executions(task_id, started_at);
CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status_tag);

CREATE TABLE IF NOT EXISTS events (
    event_id TEXT PRIMARY KEY,
    execution_id TEXT NOT NULL,
    task_id TEXT NOT NULL,
    at TEXT NOT NULL,
    kind_tag TEXT NOT NULL,
    payload_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_execution_at ON events(execution_id, at);
CREATE INDEX IF NOT EXISTS idx_events_task_at ON events(task_id, at);
"#,
        )?;
        Ok(())
    }

    pub fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        self.conn.execute(
            r#"
INSERT INTO executions (execution_id, task_id, session_id, status_tag, started_at, completed_at, exit_code, error_message)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
"#,
            params![
                record.id.0,
                record.task_id.0,
                record.session_id.0,
                record.status.as_str(),
                record.started_at.to_rfc3339(),
                record.completed_at.map(|value| value.to_rfc3339()),
                record.exit_code,
                record.error_message,
            ],
        )?;
        Ok(())
    }

    pub fn load_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let row: Option<ExecutionRow> = self
            .conn
            .query_row(
                "SELECT execution_id, task_id, session_id, status_tag, started_at, completed_at, exit_code, error_message
                 FROM executions WHERE execution_id = ?1",
                params![execution_id.0],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                },
            )
            .optional()?;

        row.map(row_to_record).transpose()
    }

    pub fn list_executions(&self) -> Result<Vec<ExecutionRecord>, StoreError> {
        self.query_executions(
            "SELECT execution_id, task_id, session_id, status_tag, started_at, completed_at, exit_code, error_message
             FROM executions ORDER BY started_at DESC, execution_id ASC",
            params![],
        )
    }

    pub fn list_executions_for_task(
        &self,
        task_id: &TaskId,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        self.query_executions(
            "SELECT execution_id, task_id, session_id, status_tag, started_at, completed_at, exit_code, error_message
             FROM executions WHERE task_id = ?1 ORDER BY started_at DESC, execution_id ASC",
            params![task_id.0],
        )
    }

    pub fn list_running(&self) -> Result<Vec<ExecutionRecord>, StoreError> {
        self.query_executions(
            "SELECT execution_id, task_id, session_id, status_tag, started_at, completed_at, exit_code, error_message
             FROM executions WHERE status_tag = ?1 ORDER BY started_at ASC, execution_id ASC",
            params![ExecutionStatus::Running.as_str()],
        )
    }

    /// Write a new status, refusing any transition out of a terminal state.
    pub fn update_status(
        &self,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
    ) -> Result<(), StoreError> {
        let current: Option<String> = self
            .conn
            .query_row(
                "SELECT status_tag FROM executions WHERE execution_id = ?1",
                params![execution_id.0],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Err(StoreError::ExecutionNotFound {
                execution_id: execution_id.0.clone(),
            });
        };
        let from = current
            .parse::<ExecutionStatus>()
            .map_err(|_| StoreError::StatusParse { value: current })?;
        if !is_transition_allowed(from, status) {
            return Err(StoreError::InvalidTransition {
                execution_id: execution_id.0.clone(),
                from,
                to: status,
            });
        }

        self.conn.execute(
            "UPDATE executions SET status_tag = ?1 WHERE execution_id = ?2",
            params![status.as_str(), execution_id.0],
        )?;
        Ok(())
    }

    pub fn finish_execution(
        &self,
        execution_id: &ExecutionId,
        completed_at: DateTime<Utc>,
        exit_code: Option<i32>,
    ) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE executions SET completed_at = ?1, exit_code = ?2 WHERE execution_id = ?3",
            params![completed_at.to_rfc3339(), exit_code, execution_id.0],
        )?;
        if updated == 0 {
            return Err(StoreError::ExecutionNotFound {
                execution_id: execution_id.0.clone(),
            });
        }
        Ok(())
    }

    pub fn set_error(
        &self,
        execution_id: &ExecutionId,
        message: &str,
    ) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE executions SET error_message = ?1 WHERE execution_id = ?2",
            params![message, execution_id.0],
        )?;
        if updated == 0 {
            return Err(StoreError::ExecutionNotFound {
                execution_id: execution_id.0.clone(),
            });
        }
        Ok(())
    }

    /// Administrative removal. The lifecycle manager never calls this.
    pub fn delete_execution(&self, execution_id: &ExecutionId) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM executions WHERE execution_id = ?1",
            params![execution_id.0],
        )?;
        Ok(())
    }

    pub fn append_event(&self, event: &Event) -> Result<(), StoreError> {
        let payload = serde_json::to_string(event)?;
        self.conn.execute(
            r#"
INSERT INTO events (event_id, execution_id, task_id, at, kind_tag, payload_json)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#,
            params![
                event.id.0,
                event.execution_id.0,
                event.task_id.0,
                event.at.to_rfc3339(),
                event_kind_tag(&event.kind),
                payload,
            ],
        )?;
        Ok(())
    }

    pub fn list_events_for_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<Event>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload_json FROM events WHERE execution_id = ?1 ORDER BY at ASC, event_id ASC",
        )?;
        let rows = stmt.query_map(params![execution_id.0], |row| row.get::<_, String>(0))?;
        let mut events = Vec::new();
        for row in rows {
            let payload = row?;
            events.push(serde_json::from_str::<Event>(&payload)?);
        }
        Ok(events)
    }

    pub fn list_events_global(&self) -> Result<Vec<Event>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload_json FROM events ORDER BY at ASC, event_id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut events = Vec::new();
        for row in rows {
            let payload = row?;
            events.push(serde_json::from_str::<Event>(&payload)?);
        }
        Ok(events)
    }

    fn query_executions(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row_to_record(row?)?);
        }
        Ok(records)
    }
}

fn row_to_record(row: ExecutionRow) -> Result<ExecutionRecord, StoreError> {
    let (id, task_id, session_id, status_tag, started_at, completed_at, exit_code, error_message) =
        row;

    let status = status_tag
        .parse::<ExecutionStatus>()
        .map_err(|_| StoreError::StatusParse { value: status_tag })?;

    Ok(ExecutionRecord {
        id: ExecutionId(id),
        task_id: TaskId(task_id),
        session_id: SessionId(session_id),
        status,
        started_at: parse_timestamp(started_at)?,
        completed_at: completed_at.map(parse_timestamp).transpose()?,
        exit_code,
        error_message,
    })
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| StoreError::TimestampParse { value, source })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use deck_core::events::{Event, EventKind};
    use deck_core::state::ExecutionStatus;
    use deck_core::types::{derive_session_id, ExecutionId, ExecutionRecord, TaskId};
    use rusqlite::params;

    use super::SqliteStore;
    use crate::error::StoreError;

    fn mk_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().expect("in-memory store");
        store.migrate().expect("migrate");
        store
    }

    fn mk_record(id: &str, task_id: &str, started_at: chrono::DateTime<Utc>) -> ExecutionRecord {
        let id = ExecutionId::new(id);
        let session_id = derive_session_id(&id);
        ExecutionRecord {
            id,
            task_id: TaskId::new(task_id),
            session_id,
            status: ExecutionStatus::Running,
            started_at,
            completed_at: None,
            exit_code: None,
            error_message: None,
        }
    }

    #[test]
    fn insert_and_load_execution_roundtrip() {
        let store = mk_store();
        let record = mk_record("X1", "T1", Utc::now());
        store.insert_execution(&record).expect("insert");

        let loaded = store
            .load_execution(&record.id)
            .expect("load")
            .expect("record exists");
        assert_eq!(loaded, record);
    }

    #[test]
    fn load_execution_returns_none_for_unknown_id() {
        let store = mk_store();
        let loaded = store
            .load_execution(&ExecutionId::new("X-MISSING"))
            .expect("load");
        assert_eq!(loaded, None);
    }

    #[test]
    fn list_running_filters_terminal_records() {
        let store = mk_store();
        let base = Utc::now();
        let running = mk_record("X1", "T1", base);
        let mut finished = mk_record("X2", "T1", base + Duration::seconds(1));
        finished.status = ExecutionStatus::Completed;
        finished.completed_at = Some(base + Duration::seconds(2));
        finished.exit_code = Some(0);
        store.insert_execution(&running).expect("insert running");
        store.insert_execution(&finished).expect("insert finished");

        let listed = store.list_running().expect("list running");
        let ids = listed.iter().map(|record| record.id.0.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["X1"]);
    }

    #[test]
    fn list_executions_for_task_scopes_by_task() {
        let store = mk_store();
        let base = Utc::now();
        store
            .insert_execution(&mk_record("X1", "T1", base))
            .expect("insert x1");
        store
            .insert_execution(&mk_record("X2", "T2", base + Duration::seconds(1)))
            .expect("insert x2");
        store
            .insert_execution(&mk_record("X3", "T1", base + Duration::seconds(2)))
            .expect("insert x3");

        let for_t1 = store
            .list_executions_for_task(&TaskId::new("T1"))
            .expect("list for task");
        let ids = for_t1.iter().map(|record| record.id.0.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["X3", "X1"]);

        let all = store.list_executions().expect("list all");
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn update_status_and_finish_execution_persist_terminal_fields() {
        let store = mk_store();
        let record = mk_record("X1", "T1", Utc::now());
        store.insert_execution(&record).expect("insert");

        let completed_at = Utc::now() + Duration::seconds(5);
        store
            .finish_execution(&record.id, completed_at, Some(0))
            .expect("finish");
        store
            .update_status(&record.id, ExecutionStatus::Completed)
            .expect("update status");

        let loaded = store
            .load_execution(&record.id)
            .expect("load")
            .expect("record exists");
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert_eq!(loaded.exit_code, Some(0));
        assert!(loaded.completed_at.is_some());
    }

    #[test]
    fn set_error_records_message_without_touching_status() {
        let store = mk_store();
        let record = mk_record("X1", "T1", Utc::now());
        store.insert_execution(&record).expect("insert");

        store
            .set_error(&record.id, "process host write failed")
            .expect("set error");

        let loaded = store
            .load_execution(&record.id)
            .expect("load")
            .expect("record exists");
        assert_eq!(
            loaded.error_message.as_deref(),
            Some("process host write failed")
        );
        assert_eq!(loaded.status, ExecutionStatus::Running);
    }

    #[test]
    fn updates_on_unknown_execution_fail_with_not_found() {
        let store = mk_store();
        let missing = ExecutionId::new("X-MISSING");

        let err = store
            .update_status(&missing, ExecutionStatus::Cancelled)
            .expect_err("update must fail");
        assert!(matches!(err, StoreError::ExecutionNotFound { .. }));

        let err = store
            .finish_execution(&missing, Utc::now(), None)
            .expect_err("finish must fail");
        assert!(matches!(err, StoreError::ExecutionNotFound { .. }));

        let err = store
            .set_error(&missing, "boom")
            .expect_err("set_error must fail");
        assert!(matches!(err, StoreError::ExecutionNotFound { .. }));
    }

    #[test]
    fn update_status_refuses_to_leave_a_terminal_state() {
        let store = mk_store();
        let record = mk_record("X1", "T1", Utc::now());
        store.insert_execution(&record).expect("insert");
        store
            .update_status(&record.id, ExecutionStatus::Cancelled)
            .expect("running to cancelled");

        let err = store
            .update_status(&record.id, ExecutionStatus::Completed)
            .expect_err("terminal state must be sticky");
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: ExecutionStatus::Cancelled,
                to: ExecutionStatus::Completed,
                ..
            }
        ));

        // re-asserting the same terminal state is a no-op allowance
        store
            .update_status(&record.id, ExecutionStatus::Cancelled)
            .expect("self transition");
    }

    #[test]
    fn delete_execution_removes_the_row() {
        let store = mk_store();
        let record = mk_record("X1", "T1", Utc::now());
        store.insert_execution(&record).expect("insert");
        store.delete_execution(&record.id).expect("delete");
        assert_eq!(store.load_execution(&record.id).expect("load"), None);
    }

    #[test]
    fn append_and_list_events_orders_by_timestamp() {
        let store = mk_store();
        let base = Utc::now();
        let id = ExecutionId::new("X1");
        let task = TaskId::new("T1");

        let started = Event::for_execution(
            id.clone(),
            task.clone(),
            base,
            EventKind::ExecutionStarted,
        );
        let completed = Event::for_execution(
            id.clone(),
            task.clone(),
            base + Duration::seconds(3),
            EventKind::ExecutionCompleted { exit_code: Some(0) },
        );
        store.append_event(&started).expect("append started");
        store.append_event(&completed).expect("append completed");

        let events = store
            .list_events_for_execution(&id)
            .expect("list events");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::ExecutionStarted);
        assert_eq!(
            events[1].kind,
            EventKind::ExecutionCompleted { exit_code: Some(0) }
        );

        let global = store.list_events_global().expect("list global");
        assert_eq!(global.len(), 2);
    }

    #[test]
    fn corrupt_status_tag_surfaces_as_status_parse_error() {
        let store = mk_store();
        let record = mk_record("X1", "T1", Utc::now());
        store.insert_execution(&record).expect("insert");
        store
            .conn
            .execute(
                "UPDATE executions SET status_tag = ?1 WHERE execution_id = ?2",
                params!["paused", record.id.0],
            )
            .expect("corrupt row");

        let err = store
            .load_execution(&record.id)
            .expect_err("corrupt tag must fail");
        assert!(matches!(err, StoreError::StatusParse { value } if value == "paused"));
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested/state.sqlite");
        let store = SqliteStore::open(&path).expect("open with nested parent");
        store.migrate().expect("migrate");
        assert!(path.exists());
    }
}
