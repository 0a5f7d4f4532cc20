//! SQLite backend for rivven-orm
//!
//! Provides:
//! - SqliteConnection over a blocking `rusqlite` handle
//! - SqliteConnectionFactory resolving `sqlite:` URLs
//!
//! `sqlite::memory:` URLs are backed by a named shared-cache database, so
//! every connection opened by one factory sees the same data. Shared-cache
//! databases lock whole tables, so concurrent writers should use a file.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, ErrorCode, OpenFlags};
use tracing::debug;

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, DatabaseType, InsertOutcome,
};
use crate::error::{DriverErrorKind, Error, Result};
use crate::types::{Row, Value};

/// Convert a rivven Value to a SQLite value
fn value_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int32(n) => SqlValue::Integer(i64::from(*n)),
        Value::Int64(n) => SqlValue::Integer(*n),
        Value::Float64(n) => SqlValue::Real(*n),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Date(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => SqlValue::Text(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::DateTimeTz(dt) => SqlValue::Text(dt.to_rfc3339()),
        Value::Uuid(u) => SqlValue::Text(u.to_string()),
    }
}

/// Convert a SQLite value to a rivven Value
fn sql_value_to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Int64(n),
        ValueRef::Real(n) => Value::Float64(n),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

/// Map a rusqlite error onto the error taxonomy
fn classify(err: rusqlite::Error, sql: Option<&str>) -> Error {
    let kind = match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => DriverErrorKind::Constraint,
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            DriverErrorKind::Timeout
        }
        Some(ErrorCode::CannotOpen) | Some(ErrorCode::NotADatabase) => {
            DriverErrorKind::Connection
        }
        _ => DriverErrorKind::Other,
    };
    Error::from_driver(kind, err.to_string(), sql, Some(Box::new(err)))
}

/// SQLite connection implementation
pub struct SqliteConnection {
    conn: Mutex<rusqlite::Connection>,
    auto_commit: AtomicBool,
    in_tx: AtomicBool,
    closed: AtomicBool,
}

impl SqliteConnection {
    /// Wrap an open rusqlite handle
    pub fn new(conn: rusqlite::Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            auto_commit: AtomicBool::new(true),
            in_tx: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Run `f` on the handle, opening the pending transaction first when
    /// auto-commit is off
    fn with_conn<R>(&self, f: impl FnOnce(&rusqlite::Connection) -> Result<R>) -> Result<R> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::connection("connection is closed"));
        }
        let conn = self.conn.lock();
        if !self.auto_commit.load(Ordering::Acquire) && !self.in_tx.load(Ordering::Acquire) {
            conn.execute_batch("BEGIN IMMEDIATE")
                .map_err(|e| classify(e, Some("BEGIN IMMEDIATE")))?;
            self.in_tx.store(true, Ordering::Release);
        }
        f(&conn)
    }

    /// Run COMMIT or ROLLBACK. The transaction flag follows the handle's
    /// real state, so a COMMIT that SQLite rejects (deferred constraint,
    /// busy database) leaves the transaction open for a rollback.
    fn end_transaction(&self, sql: &str) -> Result<()> {
        if !self.in_tx.load(Ordering::Acquire) {
            return Ok(());
        }
        let conn = self.conn.lock();
        if conn.is_autocommit() {
            // SQLite already ended the transaction (e.g. after a fatal error)
            self.in_tx.store(false, Ordering::Release);
            return Ok(());
        }
        let result = conn.execute_batch(sql).map_err(|e| classify(e, Some(sql)));
        self.in_tx.store(!conn.is_autocommit(), Ordering::Release);
        result
    }
}

impl Connection for SqliteConnection {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        debug!(sql = %sql, params = params.len(), "query");
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql).map_err(|e| classify(e, Some(sql)))?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt
                .query(params_from_iter(params.iter().map(value_to_sql)))
                .map_err(|e| classify(e, Some(sql)))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(|e| classify(e, Some(sql)))? {
                let values = (0..columns.len())
                    .map(|i| row.get_ref(i).map(sql_value_to_value))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| classify(e, Some(sql)))?;
                out.push(Row::new(columns.clone(), values));
            }
            Ok(out)
        })
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        debug!(sql = %sql, params = params.len(), "execute");
        self.with_conn(|conn| {
            conn.execute(sql, params_from_iter(params.iter().map(value_to_sql)))
                .map(|n| n as u64)
                .map_err(|e| classify(e, Some(sql)))
        })
    }

    fn execute_returning_key(
        &self,
        sql: &str,
        params: &[Value],
        _key_column: &str,
    ) -> Result<InsertOutcome> {
        debug!(sql = %sql, params = params.len(), "execute returning key");
        self.with_conn(|conn| {
            let affected = conn
                .execute(sql, params_from_iter(params.iter().map(value_to_sql)))
                .map_err(|e| classify(e, Some(sql)))? as u64;
            let generated_key = (affected > 0).then(|| Value::Int64(conn.last_insert_rowid()));
            Ok(InsertOutcome {
                affected,
                generated_key,
            })
        })
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::Acquire)
    }

    fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        let was = self.auto_commit.swap(enabled, Ordering::AcqRel);
        if enabled && !was {
            if let Err(e) = self.end_transaction("COMMIT") {
                self.auto_commit.store(false, Ordering::Release);
                return Err(e);
            }
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_tx.load(Ordering::Acquire)
    }

    fn commit(&self) -> Result<()> {
        self.end_transaction("COMMIT")
    }

    fn rollback(&self) -> Result<()> {
        self.end_transaction("ROLLBACK")
    }

    fn is_valid(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.conn
            .lock()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    fn close(&self) -> Result<()> {
        if self.in_tx.load(Ordering::Acquire) {
            self.rollback()?;
        }
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }
}

/// Where a `sqlite:` URL points
#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Memory,
    File(PathBuf),
    Uri(String),
}

fn parse_location(url: &str) -> Result<Location> {
    let rest = url
        .trim()
        .strip_prefix("sqlite://")
        .or_else(|| url.trim().strip_prefix("sqlite:"))
        .ok_or_else(|| Error::config(format!("not a sqlite URL: {}", url)))?;

    match rest {
        "" | ":memory:" | "memory" => Ok(Location::Memory),
        uri if uri.starts_with("file:") => Ok(Location::Uri(uri.to_string())),
        path => Ok(Location::File(PathBuf::from(
            path.split('?').next().unwrap_or(path),
        ))),
    }
}

/// SQLite connection factory.
///
/// Owns the name of its in-memory database, so connections from the same
/// factory share data.
#[derive(Debug, Clone)]
pub struct SqliteConnectionFactory {
    memory_uri: String,
}

impl Default for SqliteConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteConnectionFactory {
    /// Create a factory with a fresh in-memory database name
    pub fn new() -> Self {
        Self {
            memory_uri: format!(
                "file:rivven_orm_{}?mode=memory&cache=shared",
                uuid::Uuid::new_v4().simple()
            ),
        }
    }
}

impl ConnectionFactory for SqliteConnectionFactory {
    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let location = parse_location(&config.url)?;
        let conn = match &location {
            Location::Memory => rusqlite::Connection::open_with_flags(&self.memory_uri, flags),
            Location::Uri(uri) => rusqlite::Connection::open_with_flags(uri, flags),
            Location::File(path) => rusqlite::Connection::open_with_flags(path, flags),
        }
        .map_err(|e| Error::connection_with_source("failed to open sqlite database", e))?;

        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| classify(e, None))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| classify(e, None))?;
        if let Location::File(_) = location {
            let mode: String = conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                .map_err(|e| classify(e, None))?;
            debug!(journal_mode = %mode, "opened sqlite database");
        }

        Ok(Box::new(SqliteConnection::new(conn)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }
}
