//! Ad-hoc parameterized queries
//!
//! A [`Query`] accumulates SQL text and positional parameters, runs once on
//! a pooled connection and maps result rows back into entities. Appended
//! clauses are trusted: callers validate them before calling
//! [`Query::with`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::coerce::convert_generated_key;
use crate::error::{Error, Result};
use crate::metadata::{Entity, EntityMetadata};
use crate::pool::ConnectionPool;
use crate::transaction::in_transaction;
use crate::types::{Row, Value};

/// Leading keywords of statements that return rows
const SELECT_KEYWORDS: &[&str] = &["SELECT", "WITH", "VALUES", "SHOW", "EXPLAIN", "PRAGMA"];

/// What a statement produced
#[derive(Debug)]
pub enum QueryOutcome<T> {
    /// Mapped rows of a SELECT
    Rows(Vec<T>),
    /// Affected row count of a DML statement
    Affected {
        /// Rows changed
        rows: u64,
        /// Key generated by an INSERT, if any
        generated_key: Option<Value>,
    },
}

/// Result of [`Query::execute`]
#[derive(Debug)]
pub struct QueryResult<T> {
    /// Rows or affected count
    pub outcome: QueryOutcome<T>,
    /// Wall time spent on the database round trip
    pub elapsed: Duration,
}

impl<T> QueryResult<T> {
    /// Mapped rows, empty for DML
    pub fn rows(self) -> Vec<T> {
        match self.outcome {
            QueryOutcome::Rows(rows) => rows,
            QueryOutcome::Affected { .. } => Vec::new(),
        }
    }

    /// Affected row count, or the number of rows returned for a SELECT
    pub fn affected(&self) -> u64 {
        match &self.outcome {
            QueryOutcome::Rows(rows) => rows.len() as u64,
            QueryOutcome::Affected { rows, .. } => *rows,
        }
    }

    /// Generated key of an INSERT
    pub fn generated_key(&self) -> Option<&Value> {
        match &self.outcome {
            QueryOutcome::Affected { generated_key, .. } => generated_key.as_ref(),
            QueryOutcome::Rows(_) => None,
        }
    }
}

/// Single-use SQL builder bound to an entity type
pub struct Query<T> {
    pool: Arc<dyn ConnectionPool>,
    metadata: Arc<EntityMetadata<T>>,
    sql: String,
    params: Vec<Value>,
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("table", &self.metadata.table().table_name)
            .field("sql", &self.sql)
            .field("params", &self.params.len())
            .finish()
    }
}

impl<T: Entity> Query<T> {
    /// Start a query with initial SQL text
    pub fn new(
        pool: Arc<dyn ConnectionPool>,
        metadata: Arc<EntityMetadata<T>>,
        sql: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            metadata,
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append a clause and its parameters
    pub fn with(mut self, clause: &str, params: &[Value]) -> Self {
        let clause = clause.trim();
        if !clause.is_empty() {
            if !self.sql.is_empty() {
                self.sql.push(' ');
            }
            self.sql.push_str(clause);
        }
        self.params.extend_from_slice(params);
        self
    }

    /// Bind one more positional parameter
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Append LIMIT/OFFSET for a 1-based page number
    pub fn page(mut self, page_number: u64, page_size: u64) -> Self {
        let offset = page_number.saturating_sub(1).saturating_mul(page_size);
        let clause = self
            .pool
            .dialect()
            .limit_offset_sql(Some(page_size), Some(offset));
        self.sql.push_str(&clause);
        self
    }

    /// SQL text so far
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound parameters so far
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Whether the statement returns rows, judged by its leading keyword
    pub fn is_select(&self) -> bool {
        let head = self
            .sql
            .trim_start()
            .trim_start_matches('(')
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or_default();
        SELECT_KEYWORDS.iter().any(|k| head.eq_ignore_ascii_case(k))
    }

    /// Run the query and map every row
    pub fn select_list(self) -> Result<Vec<T>> {
        let conn = self.pool.get()?;
        let rows = conn
            .query(&self.sql, &self.params)
            .map_err(|e| e.with_table(&self.metadata.table().table_name))?;
        rows.iter().map(|row| map_row(&self.metadata, row)).collect()
    }

    /// Run the query and map the first row
    pub fn select_single(self) -> Result<Option<T>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_one(&self.sql, &self.params)
            .map_err(|e| e.with_table(&self.metadata.table().table_name))?;
        row.map(|r| map_row(&self.metadata, &r)).transpose()
    }

    /// Run a DML statement in its own transaction
    pub fn execute_update(self) -> Result<u64> {
        let conn = self.pool.get()?;
        let table = &self.metadata.table().table_name;
        in_transaction(conn.connection(), |c| c.execute(&self.sql, &self.params))
            .map_err(|e| e.with_table(table))
    }

    /// Run the statement, selecting or updating depending on its leading
    /// keyword
    pub fn execute(self) -> Result<QueryResult<T>> {
        let started = Instant::now();
        if self.is_select() {
            let rows = self.select_list()?;
            return Ok(QueryResult {
                outcome: QueryOutcome::Rows(rows),
                elapsed: started.elapsed(),
            });
        }

        let table = self.metadata.table();
        let is_insert = self
            .sql
            .trim_start()
            .get(..6)
            .is_some_and(|head| head.eq_ignore_ascii_case("INSERT"));
        let id = table.id_column_def();
        let wants_key = is_insert && table.id_strategy.is_generated() && id.column_type.is_integer();

        let conn = self.pool.get()?;
        let (rows, generated_key) = in_transaction(conn.connection(), |c| {
            if wants_key {
                let outcome = c.execute_returning_key(&self.sql, &self.params, &id.name)?;
                let key = outcome
                    .generated_key
                    .map(|k| convert_generated_key(k, id.column_type))
                    .transpose()?;
                Ok((outcome.affected, key))
            } else {
                Ok((c.execute(&self.sql, &self.params)?, None))
            }
        })
        .map_err(|e| e.with_table(&table.table_name))?;

        let elapsed = started.elapsed();
        debug!(
            table = %table.table_name,
            rows,
            elapsed_ms = elapsed.as_millis() as u64,
            "statement executed"
        );
        Ok(QueryResult {
            outcome: QueryOutcome::Affected {
                rows,
                generated_key,
            },
            elapsed,
        })
    }
}

/// Map a result row into a fresh entity.
///
/// Columns are matched to fields by label, case-insensitively; labels that
/// match no field are ignored.
pub fn map_row<T: Default>(metadata: &EntityMetadata<T>, row: &Row) -> Result<T> {
    let mut entity = T::default();
    for (label, value) in row.iter() {
        if let Some(idx) = metadata.column_index(label) {
            metadata.set_at(&mut entity, idx, value.clone()).map_err(|e| match e {
                Error::Mapping { .. } => e,
                other => Error::mapping(
                    format!("cannot map column '{}'", label),
                    other.technical_detail().unwrap_or_else(|| other.to_string()),
                ),
            })?;
        }
    }
    Ok(entity)
}
