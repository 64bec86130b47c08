//! SQLite-backed task store.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::store::{TaskError, TaskFilter, TaskStore};
use super::types::{ConversionTask, CreateTaskRequest, TaskState};

/// Task store on a single SQLite connection.
///
/// The state column holds the tagged JSON form of [`TaskState`]; state
/// filters and the compare-and-set precondition go through
/// `json_extract(state, '$.type')`. Queries are short and the
/// connection is behind a mutex, so lock hold times stay negligible.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

/// Decodes a JSON column, reporting the column index on failure.
fn from_json<T: serde::de::DeserializeOwned>(s: &str, idx: usize) -> Result<T, rusqlite::Error> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

impl SqliteTaskStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, TaskError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self, TaskError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), TaskError> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                created_by TEXT,
                input TEXT NOT NULL,
                original_filename TEXT NOT NULL,
                input_format TEXT NOT NULL,
                output_format TEXT NOT NULL,
                options TEXT NOT NULL,
                engine_id TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_state
                ON tasks (json_extract(state, '$.type'));
            CREATE INDEX IF NOT EXISTS idx_tasks_created_at
                ON tasks (created_at);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means a panic mid-query; continuing with the
        // connection is still sound for SQLite.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn row_to_task(row: &Row<'_>) -> Result<ConversionTask, rusqlite::Error> {
        let input_json: String = row.get("input")?;
        let options_json: String = row.get("options")?;
        let state_json: String = row.get("state")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        let parse_ts = |s: &str, idx: usize| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        idx,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
        };
        let parse_format = |s: String, idx: usize| {
            crate::registry::MediaFormat::from_extension(&s).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("unknown media format: {s}"),
                    )),
                )
            })
        };

        Ok(ConversionTask {
            id: row.get("id")?,
            created_by: row.get("created_by")?,
            input: from_json(&input_json, 2)?,
            original_filename: row.get("original_filename")?,
            input_format: parse_format(row.get::<_, String>("input_format")?, 4)?,
            output_format: parse_format(row.get::<_, String>("output_format")?, 5)?,
            options: from_json(&options_json, 6)?,
            engine_id: crate::registry::EngineId::new(row.get::<_, String>("engine_id")?),
            state: from_json(&state_json, 8)?,
            created_at: parse_ts(&created_at, 9)?,
            updated_at: parse_ts(&updated_at, 10)?,
        })
    }

    fn filter_clauses(filter: &TaskFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(state) = &filter.state {
            clauses.push("json_extract(state, '$.type') = ?");
            values.push(Box::new(state.clone()));
        }
        if let Some(created_by) = &filter.created_by {
            clauses.push("created_by = ?");
            values.push(Box::new(created_by.clone()));
        }
        if let Some(engine_id) = &filter.engine_id {
            clauses.push("engine_id = ?");
            values.push(Box::new(engine_id.clone()));
        }
        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (sql, values)
    }

    fn get_sync(conn: &Connection, id: &str) -> Result<ConversionTask, TaskError> {
        conn.query_row("SELECT * FROM tasks WHERE id = ?", params![id], |row| {
            Self::row_to_task(row)
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => TaskError::NotFound(id.to_string()),
            other => other.into(),
        })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, request: CreateTaskRequest) -> Result<ConversionTask, TaskError> {
        let task = request.into_task();
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO tasks (
                id, created_by, input, original_filename, input_format,
                output_format, options, engine_id, state, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                task.id,
                task.created_by,
                serde_json::to_string(&task.input)?,
                task.original_filename,
                task.input_format.extension(),
                task.output_format.extension(),
                serde_json::to_string(&task.options)?,
                task.engine_id.as_str(),
                serde_json::to_string(&task.state)?,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(task)
    }

    async fn get(&self, id: &str) -> Result<ConversionTask, TaskError> {
        let conn = self.lock();
        Self::get_sync(&conn, id)
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<ConversionTask>, TaskError> {
        let conn = self.lock();
        let (where_sql, values) = Self::filter_clauses(filter);
        let limit = filter.limit.unwrap_or(100);
        let offset = filter.offset.unwrap_or(0);
        let sql = format!(
            "SELECT * FROM tasks{where_sql} ORDER BY created_at DESC LIMIT {limit} OFFSET {offset}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let params = rusqlite::params_from_iter(values.iter().map(|v| v.as_ref()));
        let rows = stmt.query_map(params, |row| Self::row_to_task(row))?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    async fn count(&self, filter: &TaskFilter) -> Result<u64, TaskError> {
        let conn = self.lock();
        let (where_sql, values) = Self::filter_clauses(filter);
        let sql = format!("SELECT COUNT(*) FROM tasks{where_sql}");
        let mut stmt = conn.prepare(&sql)?;
        let params = rusqlite::params_from_iter(values.iter().map(|v| v.as_ref()));
        let count: u64 = stmt.query_row(params, |row| row.get(0))?;
        Ok(count)
    }

    async fn transition(
        &self,
        id: &str,
        from_state_type: &str,
        new_state: TaskState,
    ) -> Result<ConversionTask, TaskError> {
        let conn = self.lock();
        let updated = conn.execute(
            r#"
            UPDATE tasks SET state = ?, updated_at = ?
            WHERE id = ? AND json_extract(state, '$.type') = ?
            "#,
            params![
                serde_json::to_string(&new_state)?,
                Utc::now().to_rfc3339(),
                id,
                from_state_type,
            ],
        )?;
        if updated == 0 {
            // Distinguish a lost race from a missing task.
            let current = Self::get_sync(&conn, id)?;
            return Err(TaskError::Conflict {
                task_id: id.to_string(),
                expected: from_state_type.to_string(),
                actual: current.state.state_type().to_string(),
            });
        }
        Self::get_sync(&conn, id)
    }

    async fn delete(&self, id: &str) -> Result<(), TaskError> {
        let conn = self.lock();
        let deleted = conn.execute("DELETE FROM tasks WHERE id = ?", params![id])?;
        if deleted == 0 {
            return Err(TaskError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn prune_terminal(&self, older_than_secs: u64) -> Result<u64, TaskError> {
        let conn = self.lock();
        let cutoff = Utc::now() - chrono::Duration::seconds(older_than_secs as i64);
        let deleted = conn.execute(
            r#"
            DELETE FROM tasks
            WHERE json_extract(state, '$.type') IN ('completed', 'failed', 'cancelled')
              AND updated_at < ?
            "#,
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted as u64)
    }
}
