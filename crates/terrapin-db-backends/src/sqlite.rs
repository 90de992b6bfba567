//! SQLite client using `rusqlite`.
//!
//! [`SqliteClient`] implements [`DbClient`] by running every statement on a
//! single `rusqlite::Connection` inside `tokio::task::spawn_blocking`. The
//! connection sits behind an async mutex, so statements from concurrent
//! tasks are serialized and a transaction opened through the client owns
//! the connection until it is finalised.
//!
//! Connection settings come from the credentials bag produced by
//! `expand_db_url`:
//!
//! | key | default |
//! |---|---|
//! | `file_path` | required, `:memory:` for an in-memory database |
//! | `journal_mode` | `WAL` |
//! | `journal_size_limit` | `16384` |
//! | `foreign_keys` | `true` |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::types::ValueRef;
use terrapin_core::logging::query_span;
use terrapin_core::{ConnectionSettings, TerrapinError, TerrapinResult};
use terrapin_db::query::compiler::Row;
use terrapin_db::{DatabaseBackendType, DbClient, Value};
use tokio::sync::Mutex;

/// A SQLite database client.
pub struct SqliteClient {
    alias: String,
    path: PathBuf,
    /// `None` once the client has been closed.
    conn: Arc<Mutex<Option<rusqlite::Connection>>>,
}

impl std::fmt::Debug for SqliteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteClient")
            .field("alias", &self.alias)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn map_err(err: rusqlite::Error) -> TerrapinError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            TerrapinError::IntegrityError(err.to_string())
        }
        _ => TerrapinError::operational(err.to_string()),
    }
}

fn join_err(err: tokio::task::JoinError) -> TerrapinError {
    TerrapinError::operational(format!("SQLite task failed: {err}"))
}

impl SqliteClient {
    /// Opens a database file (or `:memory:`) with default pragmas.
    pub fn open(alias: impl Into<String>, path: impl Into<PathBuf>) -> TerrapinResult<Self> {
        Self::open_with(alias.into(), path.into(), "WAL", 16384, true)
    }

    /// Opens an in-memory database.
    pub fn memory(alias: impl Into<String>) -> TerrapinResult<Self> {
        Self::open(alias, ":memory:")
    }

    /// Opens the database described by a credentials bag.
    pub fn from_settings(alias: &str, settings: &ConnectionSettings) -> TerrapinResult<Self> {
        let path = settings.credential_str("file_path").ok_or_else(|| {
            TerrapinError::configuration(format!(
                "Connection '{alias}' has no 'file_path' credential"
            ))
        })?;
        let journal_mode = settings.credential_str("journal_mode").unwrap_or("WAL");
        let journal_size_limit = settings
            .credentials
            .get("journal_size_limit")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(16384);
        let foreign_keys = match settings.credentials.get("foreign_keys") {
            Some(serde_json::Value::Bool(enabled)) => *enabled,
            Some(serde_json::Value::String(s)) => !matches!(s.to_ascii_lowercase().as_str(), "off" | "false" | "0"),
            Some(serde_json::Value::Number(n)) => n.as_i64() != Some(0),
            _ => true,
        };
        Self::open_with(
            alias.to_string(),
            PathBuf::from(path),
            journal_mode,
            journal_size_limit,
            foreign_keys,
        )
    }

    fn open_with(
        alias: String,
        path: PathBuf,
        journal_mode: &str,
        journal_size_limit: i64,
        foreign_keys: bool,
    ) -> TerrapinResult<Self> {
        if journal_mode.is_empty() || !journal_mode.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(TerrapinError::configuration(format!(
                "Invalid journal_mode '{journal_mode}' for connection '{alias}'"
            )));
        }
        let conn = if path.as_os_str() == ":memory:" {
            rusqlite::Connection::open_in_memory()
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            rusqlite::Connection::open(&path)
        }
        .map_err(|e| TerrapinError::operational(format!("SQLite open failed: {e}")))?;

        let foreign_keys = if foreign_keys { "ON" } else { "OFF" };
        conn.execute_batch(&format!(
            "PRAGMA journal_mode={journal_mode}; \
             PRAGMA journal_size_limit={journal_size_limit}; \
             PRAGMA foreign_keys={foreign_keys};"
        ))
        .map_err(|e| TerrapinError::operational(format!("Failed to set pragmas: {e}")))?;

        tracing::debug!(connection = %alias, path = %path.display(), "sqlite database opened");
        Ok(Self {
            alias,
            path,
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// The database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` on the connection in a blocking task.
    async fn run<T, F>(&self, sql: &str, f: F) -> TerrapinResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection, &str) -> TerrapinResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let alias = self.alias.clone();
        tokio::task::spawn_blocking(move || {
            let span = query_span(&alias);
            let _enter = span.enter();
            tracing::debug!(sql = %sql, "executing");
            let guard = conn.blocking_lock();
            let conn = guard.as_ref().ok_or_else(|| {
                TerrapinError::operational(format!("Connection '{alias}' is closed"))
            })?;
            f(conn, &sql)
        })
        .await
        .map_err(join_err)?
    }

    /// Binds ORM values to a prepared statement.
    fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> TerrapinResult<()> {
        for (i, param) in params.iter().enumerate() {
            let idx = i + 1;
            match param {
                Value::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null),
                Value::Bool(b) => stmt.raw_bind_parameter(idx, i64::from(*b)),
                Value::Int(v) => stmt.raw_bind_parameter(idx, v),
                Value::Float(v) => stmt.raw_bind_parameter(idx, v),
                Value::String(s) => stmt.raw_bind_parameter(idx, s.as_str()),
                Value::Bytes(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
                Value::Date(d) => stmt.raw_bind_parameter(idx, d.to_string()),
                Value::DateTime(dt) => stmt.raw_bind_parameter(idx, dt.to_string()),
                Value::DateTimeTz(dt) => stmt.raw_bind_parameter(idx, dt.to_rfc3339()),
                Value::Duration(d) => {
                    let micros = d.num_microseconds().ok_or_else(|| {
                        TerrapinError::operational(format!("Duration {d} overflows microseconds"))
                    })?;
                    stmt.raw_bind_parameter(idx, micros)
                }
                Value::Uuid(u) => stmt.raw_bind_parameter(idx, u.to_string()),
                Value::Json(j) => stmt.raw_bind_parameter(idx, j.to_string()),
                Value::List(_) => stmt.raw_bind_parameter(idx, param.to_json().to_string()),
            }
            .map_err(map_err)?;
        }
        Ok(())
    }

    fn convert_row(row: &rusqlite::Row<'_>, columns: &[String]) -> TerrapinResult<Row> {
        let values = (0..columns.len())
            .map(|i| {
                Ok(match row.get_ref(i).map_err(map_err)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(v) => Value::Int(v),
                    ValueRef::Real(v) => Value::Float(v),
                    ValueRef::Text(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
                    ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
                })
            })
            .collect::<TerrapinResult<Vec<_>>>()?;
        Ok(Row::new(columns.to_vec(), values))
    }

    fn execute_prepared(conn: &rusqlite::Connection, sql: &str, params: &[Value]) -> TerrapinResult<usize> {
        let mut stmt = conn.prepare(sql).map_err(map_err)?;
        Self::bind_params(&mut stmt, params)?;
        stmt.raw_execute().map_err(map_err)
    }
}

#[async_trait::async_trait]
impl DbClient for SqliteClient {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    fn alias(&self) -> &str {
        &self.alias
    }

    async fn execute_query(&self, sql: &str, params: &[Value]) -> TerrapinResult<Vec<Row>> {
        let params = params.to_vec();
        self.run(sql, move |conn, sql| {
            let mut stmt = conn.prepare(sql).map_err(map_err)?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            Self::bind_params(&mut stmt, &params)?;
            let mut raw_rows = stmt.raw_query();
            let mut rows = Vec::new();
            while let Some(row) = raw_rows.next().map_err(map_err)? {
                rows.push(Self::convert_row(row, &columns)?);
            }
            Ok(rows)
        })
        .await
    }

    async fn execute_insert(&self, sql: &str, params: &[Value]) -> TerrapinResult<Value> {
        let params = params.to_vec();
        self.run(sql, move |conn, sql| {
            Self::execute_prepared(conn, sql, &params)?;
            Ok(Value::Int(conn.last_insert_rowid()))
        })
        .await
    }

    async fn execute_update(&self, sql: &str, params: &[Value]) -> TerrapinResult<u64> {
        let params = params.to_vec();
        self.run(sql, move |conn, sql| {
            let count = Self::execute_prepared(conn, sql, &params)?;
            Ok(count as u64)
        })
        .await
    }

    async fn execute_script(&self, sql: &str) -> TerrapinResult<()> {
        self.run(sql, |conn, sql| conn.execute_batch(sql).map_err(map_err))
            .await
    }

    async fn close(&self) -> TerrapinResult<()> {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| map_err(e))?;
            tracing::debug!(connection = %self.alias, "sqlite database closed");
        }
        Ok(())
    }
}
