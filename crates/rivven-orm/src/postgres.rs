//! PostgreSQL backend for rivven-orm
//!
//! Provides PostgreSQL-specific implementations:
//! - PgConnection over the blocking `postgres` client
//! - Parameter binding driven by the prepared statement's parameter types
//! - Generated keys through `RETURNING`
//! - SQLSTATE classification into the error taxonomy
//!
//! Engine SQL uses `?` placeholders; they are rewritten to `$n` here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use postgres::types::{ToSql, Type};
use postgres::NoTls;
use tracing::debug;

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, DatabaseType, InsertOutcome,
};
use crate::dialect::{PostgresDialect, SqlDialect};
use crate::error::{DriverErrorKind, Error, Result};
use crate::types::{FieldType, Row, Value};

type BoxedParam = Box<dyn ToSql + Sync + Send>;

fn bind<T>(value: &Value) -> Result<BoxedParam>
where
    T: FieldType + ToSql + Sync + Send + 'static,
{
    let bound: Option<T> = if value.is_null() {
        None
    } else {
        Some(T::from_value(value.clone())?)
    };
    Ok(Box::new(bound))
}

/// Convert a rivven Value into a parameter of the statement's declared type
fn value_to_sql(value: &Value, pg_type: &Type) -> Result<BoxedParam> {
    match *pg_type {
        Type::BOOL => bind::<bool>(value),
        Type::INT2 => {
            let n: Option<i16> = match value.as_i64() {
                Some(n) => Some(i16::try_from(n).map_err(|_| {
                    Error::type_conversion(format!("{} does not fit in smallint", n))
                })?),
                None if value.is_null() => None,
                None => {
                    return Err(Error::type_conversion(format!(
                        "cannot bind {} as smallint",
                        value.sql_type()
                    )))
                }
            };
            Ok(Box::new(n))
        }
        Type::INT4 => bind::<i32>(value),
        Type::INT8 => bind::<i64>(value),
        Type::FLOAT4 => bind::<f32>(value),
        Type::FLOAT8 => bind::<f64>(value),
        Type::BYTEA => bind::<Vec<u8>>(value),
        Type::DATE => bind::<chrono::NaiveDate>(value),
        Type::TIMESTAMP => bind::<chrono::NaiveDateTime>(value),
        Type::TIMESTAMPTZ => bind::<chrono::DateTime<chrono::Utc>>(value),
        Type::UUID => bind::<uuid::Uuid>(value),
        _ => bind::<String>(value),
    }
}

/// Convert a postgres row to a rivven Row
fn pg_row_to_row(pg_row: &postgres::Row) -> Row {
    let columns: Vec<String> = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let values: Vec<Value> = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| pg_value_to_value(pg_row, i, col.type_()))
        .collect();

    Row::new(columns, values)
}

/// Convert a PostgreSQL value to a rivven Value
fn pg_value_to_value(row: &postgres::Row, idx: usize, pg_type: &Type) -> Value {
    fn get<'a, T>(row: &'a postgres::Row, idx: usize, f: impl FnOnce(T) -> Value) -> Value
    where
        T: postgres::types::FromSql<'a>,
    {
        row.try_get::<_, Option<T>>(idx)
            .ok()
            .flatten()
            .map(f)
            .unwrap_or(Value::Null)
    }

    match *pg_type {
        Type::BOOL => get(row, idx, Value::Bool),
        Type::INT2 => get(row, idx, |n: i16| Value::Int32(i32::from(n))),
        Type::INT4 => get(row, idx, Value::Int32),
        Type::INT8 => get(row, idx, Value::Int64),
        Type::FLOAT4 => get(row, idx, |n: f32| Value::Float64(f64::from(n))),
        Type::FLOAT8 => get(row, idx, Value::Float64),
        Type::BYTEA => get(row, idx, Value::Bytes),
        Type::DATE => get(row, idx, Value::Date),
        Type::TIMESTAMP => get(row, idx, Value::DateTime),
        Type::TIMESTAMPTZ => get(row, idx, Value::DateTimeTz),
        Type::UUID => get(row, idx, Value::Uuid),
        // Try to get as string for text and unknown types
        _ => get(row, idx, Value::String),
    }
}

/// Map a postgres error onto the error taxonomy
fn classify(err: postgres::Error, sql: Option<&str>) -> Error {
    let kind = match err.code().map(|c| c.code()) {
        Some(code) if code.starts_with("23") => DriverErrorKind::Constraint,
        Some(code) if code.starts_with("08") => DriverErrorKind::Connection,
        Some("40P01") | Some("40001") => DriverErrorKind::Deadlock,
        Some("57014") | Some("55P03") => DriverErrorKind::Timeout,
        None if err.is_closed() => DriverErrorKind::Connection,
        _ => DriverErrorKind::Other,
    };
    let message = match err.as_db_error() {
        Some(db) => db.message().to_string(),
        None => err.to_string(),
    };
    Error::from_driver(kind, message, sql, Some(Box::new(err)))
}

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: Mutex<postgres::Client>,
    auto_commit: AtomicBool,
    in_tx: AtomicBool,
    closed: AtomicBool,
    created_at: Instant,
}

impl PgConnection {
    /// Create a new connection from a postgres client
    pub fn new(client: postgres::Client) -> Self {
        Self {
            client: Mutex::new(client),
            auto_commit: AtomicBool::new(true),
            in_tx: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
        }
    }

    /// Get the age of this connection (time since creation)
    #[inline]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn run<R>(
        &self,
        sql: &str,
        params: &[Value],
        f: impl FnOnce(
            &mut postgres::Client,
            &postgres::Statement,
            &[&(dyn ToSql + Sync)],
        ) -> std::result::Result<R, postgres::Error>,
    ) -> Result<R> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::connection("connection is closed"));
        }
        let sql = PostgresDialect.rewrite_placeholders(sql);
        let mut client = self.client.lock();

        if !self.auto_commit.load(Ordering::Acquire) && !self.in_tx.load(Ordering::Acquire) {
            client
                .batch_execute("BEGIN")
                .map_err(|e| classify(e, Some("BEGIN")))?;
            self.in_tx.store(true, Ordering::Release);
        }

        let stmt = client.prepare(&sql).map_err(|e| classify(e, Some(&sql)))?;
        if stmt.params().len() != params.len() {
            return Err(Error::database_with_sql(
                format!(
                    "statement expects {} parameters, {} given",
                    stmt.params().len(),
                    params.len()
                ),
                sql,
            ));
        }

        let boxed: Vec<BoxedParam> = params
            .iter()
            .zip(stmt.params())
            .map(|(v, t)| value_to_sql(v, t))
            .collect::<Result<_>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();

        f(&mut *client, &stmt, &refs).map_err(|e| classify(e, Some(&sql)))
    }

    /// Run COMMIT or ROLLBACK; the transaction flag is only cleared once
    /// the server accepted the statement
    fn end_transaction(&self, sql: &str) -> Result<()> {
        if !self.in_tx.load(Ordering::Acquire) {
            return Ok(());
        }
        self.client
            .lock()
            .batch_execute(sql)
            .map_err(|e| classify(e, Some(sql)))?;
        self.in_tx.store(false, Ordering::Release);
        Ok(())
    }
}

impl Connection for PgConnection {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        debug!(sql = %sql, params = params.len(), "query");
        let rows = self.run(sql, params, |client, stmt, refs| client.query(stmt, refs))?;
        Ok(rows.iter().map(pg_row_to_row).collect())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        debug!(sql = %sql, params = params.len(), "execute");
        self.run(sql, params, |client, stmt, refs| client.execute(stmt, refs))
    }

    fn execute_returning_key(
        &self,
        sql: &str,
        params: &[Value],
        key_column: &str,
    ) -> Result<InsertOutcome> {
        let sql = format!(
            "{} RETURNING {}",
            sql,
            PostgresDialect.quote_identifier(key_column)
        );
        debug!(sql = %sql, params = params.len(), "execute returning key");
        let rows = self.run(&sql, params, |client, stmt, refs| client.query(stmt, refs))?;
        Ok(InsertOutcome {
            affected: rows.len() as u64,
            generated_key: rows
                .first()
                .map(pg_row_to_row)
                .and_then(|r| r.get(0).cloned())
                .filter(|v| !v.is_null()),
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
        self.client.lock().is_valid(Duration::from_secs(5)).is_ok()
    }

    fn close(&self) -> Result<()> {
        if self.in_tx.load(Ordering::Acquire) {
            self.rollback()?;
        }
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

impl ConnectionFactory for PgConnectionFactory {
    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut pg_config: postgres::Config = config
            .url
            .parse()
            .map_err(|e| Error::connection_with_source("invalid postgres URL", e))?;
        pg_config.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        if let Some(name) = &config.application_name {
            pg_config.application_name(name);
        }

        let client = pg_config
            .connect(NoTls)
            .map_err(|e| Error::connection_with_source("failed to connect", e))?;

        Ok(Box::new(PgConnection::new(client)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}
