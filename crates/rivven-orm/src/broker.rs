//! Generic CRUD broker
//!
//! A [`Broker`] binds one entity type to its table. Construction builds the
//! entity metadata once and synchronizes the schema; every operation then
//! borrows a pooled connection for the duration of the call only.
//!
//! Mutations run in a single transaction each. Values are always bound as
//! parameters; the only interpolated text is validated identifiers and
//! clauses.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rivven_orm::prelude::*;
//!
//! let pool: Arc<dyn ConnectionPool> = create_pool(&OrmConfig::new("sqlite:app.db"))?;
//! let users = Broker::<User>::new(pool)?;
//!
//! let mut user = User { name: "ada".into(), ..Default::default() };
//! let saved = users.save(&mut user)?;
//! assert_eq!(users.find_by_id(saved.id)?, Some(saved));
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::coerce::{coerce_for_column, convert_generated_key};
use crate::connection::Connection;
use crate::dialect::SqlDialect;
use crate::error::{Error, Result};
use crate::metadata::{CheckConstraint, Entity, EntityMetadata, IdStrategy, MetadataOptions};
use crate::pool::ConnectionPool;
use crate::query::{map_row, Query, QueryResult};
use crate::schema::{SchemaSyncMode, SchemaSyncReport, SchemaSynchronizer};
use crate::security;
use crate::transaction::in_transaction;
use crate::types::{ColumnType, Value};

/// Statements that only depend on the metadata
#[derive(Debug, Clone)]
struct Statements {
    select_by_id: String,
    select_all: String,
    delete_by_id: String,
    exists_by_id: String,
}

/// Builder for [`Broker`]
pub struct BrokerBuilder<T> {
    pool: Arc<dyn ConnectionPool>,
    options: MetadataOptions,
    schema_sync: SchemaSyncMode,
    synchronizer: Option<Arc<SchemaSynchronizer>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> BrokerBuilder<T> {
    /// Start a builder over a pool
    pub fn new(pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            pool,
            options: MetadataOptions::default(),
            schema_sync: SchemaSyncMode::default(),
            synchronizer: None,
            _entity: PhantomData,
        }
    }

    /// Use another field (or column) as the primary key
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.options = self.options.with_id_field(field);
        self
    }

    /// Set the schema synchronization mode
    pub fn schema_sync(mut self, mode: SchemaSyncMode) -> Self {
        self.schema_sync = mode;
        self
    }

    /// Share a synchronizer (and its check registry) between brokers
    pub fn synchronizer(mut self, synchronizer: Arc<SchemaSynchronizer>) -> Self {
        self.synchronizer = Some(synchronizer);
        self
    }

    /// Build metadata, synchronize the schema and create the broker
    pub fn build(self) -> Result<Broker<T>> {
        let metadata = Arc::new(EntityMetadata::<T>::build_with(&self.options)?);
        let dialect = self.pool.dialect();
        let synchronizer = self.synchronizer.unwrap_or_default();
        let table = metadata.table();

        let report = {
            let conn = self.pool.get()?;
            synchronizer.sync(conn.connection(), dialect.as_ref(), table, self.schema_sync)?
        };

        let by_id = format!("{} = ?", dialect.quote_identifier(&table.id_column));
        let statements = Statements {
            select_by_id: dialect.select_by_id_sql(&table.table_name, &table.id_column),
            select_all: dialect.select_sql(
                &table.table_name,
                None,
                Some(table.id_column.as_str()),
                None,
                None,
            ),
            delete_by_id: dialect.delete_by_id_sql(&table.table_name, &table.id_column),
            exists_by_id: dialect.count_sql(&table.table_name, Some(by_id.as_str())),
        };

        debug!(
            table = %table.table_name,
            id_column = %table.id_column,
            strategy = %table.id_strategy,
            columns = table.columns.len(),
            "broker ready"
        );

        Ok(Broker {
            pool: self.pool,
            metadata,
            dialect,
            synchronizer,
            statements: Arc::new(statements),
            sync_report: Arc::new(report),
        })
    }
}

/// CRUD façade over one entity type.
///
/// Holds no per-call state; clones share metadata and the pool.
pub struct Broker<T> {
    pool: Arc<dyn ConnectionPool>,
    metadata: Arc<EntityMetadata<T>>,
    dialect: Arc<dyn SqlDialect>,
    synchronizer: Arc<SchemaSynchronizer>,
    statements: Arc<Statements>,
    sync_report: Arc<SchemaSyncReport>,
}

impl<T> Clone for Broker<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            metadata: self.metadata.clone(),
            dialect: self.dialect.clone(),
            synchronizer: self.synchronizer.clone(),
            statements: self.statements.clone(),
            sync_report: self.sync_report.clone(),
        }
    }
}

impl<T> fmt::Debug for Broker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("table", &self.metadata.table().table_name)
            .field("dialect", &self.dialect.name())
            .finish_non_exhaustive()
    }
}

impl<T: Entity> Broker<T> {
    /// Create a broker with default options
    pub fn new(pool: Arc<dyn ConnectionPool>) -> Result<Self> {
        BrokerBuilder::new(pool).build()
    }

    /// Start a builder
    pub fn builder(pool: Arc<dyn ConnectionPool>) -> BrokerBuilder<T> {
        BrokerBuilder::new(pool)
    }

    /// Entity metadata
    pub fn metadata(&self) -> &EntityMetadata<T> {
        &self.metadata
    }

    /// What schema synchronization did when the broker was built
    pub fn sync_report(&self) -> &SchemaSyncReport {
        &self.sync_report
    }

    /// Check constraints recorded for this broker's table
    pub fn check_constraints(&self) -> Vec<CheckConstraint> {
        self.synchronizer
            .check_constraints(&self.metadata.table().table_name)
    }

    fn table_name(&self) -> &str {
        &self.metadata.table().table_name
    }

    fn id_type(&self) -> ColumnType {
        self.metadata.table().id_column_def().column_type
    }

    /// Convert a caller id to the id column type, rejecting NULL
    fn id_param(&self, id: Value) -> Result<Value> {
        if id.is_null() {
            return Err(Error::data_integrity(format!(
                "id of {} must not be null",
                self.table_name()
            )));
        }
        coerce_for_column(id, self.id_type())
    }

    fn fetch(&self, conn: &dyn Connection, sql: &str, params: &[Value]) -> Result<Vec<T>> {
        let rows = conn
            .query(sql, params)
            .map_err(|e| e.with_table(self.table_name()))?;
        rows.iter()
            .map(|row| {
                map_row(&self.metadata, row).inspect_err(|e| {
                    warn!(
                        table = %self.table_name(),
                        error = %e,
                        detail = ?e.technical_detail(),
                        "row mapping failed"
                    )
                })
            })
            .collect()
    }

    fn fetch_by_id(&self, conn: &dyn Connection, id: &Value) -> Result<Option<T>> {
        Ok(self
            .fetch(conn, &self.statements.select_by_id, std::slice::from_ref(id))?
            .into_iter()
            .next())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Load the row with the given primary key
    pub fn find_by_id(&self, id: impl Into<Value>) -> Result<Option<T>> {
        let id = self.id_param(id.into())?;
        let conn = self.pool.get()?;
        self.fetch_by_id(conn.connection(), &id)
    }

    /// Load every row, ordered by primary key
    pub fn find_all(&self) -> Result<Vec<T>> {
        let conn = self.pool.get()?;
        self.fetch(conn.connection(), &self.statements.select_all, &[])
    }

    /// Load `limit` rows starting at `offset`, ordered by primary key
    pub fn find_all_paged(&self, offset: u64, limit: u64) -> Result<Vec<T>> {
        let table = self.metadata.table();
        let sql = self.dialect.select_sql(
            &table.table_name,
            None,
            Some(table.id_column.as_str()),
            Some(limit),
            Some(offset),
        );
        let conn = self.pool.get()?;
        self.fetch(conn.connection(), &sql, &[])
    }

    /// Load rows matching every `column = value` pair.
    ///
    /// Keys may be column or field names. A NULL value matches `IS NULL`.
    /// No criteria means [`find_all`](Self::find_all).
    pub fn find_by_criteria<I, K, V>(&self, criteria: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let table = self.metadata.table();
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        for (key, value) in criteria {
            let key = key.as_ref();
            security::validate_column_name(key)?;
            let column = table
                .column(key)
                .or_else(|| table.column_for_field(key))
                .ok_or_else(|| {
                    Error::validation(
                        format!("unknown column for table {}", table.table_name),
                        key,
                    )
                })?;
            let quoted = self.dialect.quote_identifier(&column.name);
            let value = value.into();
            if value.is_null() {
                conditions.push(format!("{} IS NULL", quoted));
            } else {
                conditions.push(format!("{} = ?", quoted));
                params.push(coerce_for_column(value, column.column_type)?);
            }
        }

        if conditions.is_empty() {
            return self.find_all();
        }

        let where_clause = conditions.join(" AND ");
        let sql = self.dialect.select_sql(
            &table.table_name,
            Some(where_clause.as_str()),
            Some(table.id_column.as_str()),
            None,
            None,
        );
        let conn = self.pool.get()?;
        self.fetch(conn.connection(), &sql, &params)
    }

    /// Count rows, optionally filtered by a validated WHERE clause
    pub fn count(&self, where_clause: Option<&str>, params: &[Value]) -> Result<i64> {
        if let Some(clause) = where_clause {
            security::validate_where_clause(clause)?;
        }
        let sql = self.dialect.count_sql(self.table_name(), where_clause);
        let conn = self.pool.get()?;
        self.scalar_count(conn.connection(), &sql, params)
    }

    /// Whether a row with the given primary key exists
    pub fn exists(&self, id: impl Into<Value>) -> Result<bool> {
        let id = self.id_param(id.into())?;
        let conn = self.pool.get()?;
        Ok(self.scalar_count(conn.connection(), &self.statements.exists_by_id, &[id])? > 0)
    }

    fn scalar_count(&self, conn: &dyn Connection, sql: &str, params: &[Value]) -> Result<i64> {
        let row = conn
            .query_one(sql, params)
            .map_err(|e| e.with_table(self.table_name()))?;
        row.as_ref()
            .and_then(|r| r.get_by_name("n").or_else(|| r.get(0)))
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::unknown("COUNT returned no value", sql.to_string()))
    }

    /// Load rows matching a validated WHERE clause, ordered by primary key
    pub fn select(&self, where_clause: &str, params: &[Value]) -> Result<Vec<T>> {
        security::validate_where_clause(where_clause)?;
        let table = self.metadata.table();
        let sql = self.dialect.select_sql(
            &table.table_name,
            Some(where_clause),
            Some(table.id_column.as_str()),
            None,
            None,
        );
        let conn = self.pool.get()?;
        self.fetch(conn.connection(), &sql, params)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert or update `entity` and return the stored row.
    ///
    /// An unset id (NULL, zero, empty string, nil UUID) inserts; the
    /// generated key is written back into `entity`. Otherwise the row is
    /// updated. Either way the row is read back so database defaults are
    /// reflected in the result.
    pub fn save(&self, entity: &mut T) -> Result<T> {
        let current = self.metadata.id_value(entity);
        let conn = self.pool.get()?;

        let id = in_transaction(conn.connection(), |c| {
            if current.is_unset_id() {
                self.insert(c, entity)
            } else {
                self.update_or_insert(c, entity, current)
            }
        })
        .inspect_err(|e| {
            warn!(
                table = %self.table_name(),
                error = %e,
                detail = ?e.technical_detail(),
                "save failed"
            )
        })?;

        self.fetch_by_id(conn.connection(), &id)?.ok_or_else(|| {
            Error::unknown(
                format!("saved row of {} could not be read back", self.table_name()),
                format!("id={:?}", id),
            )
        })
    }

    fn insert(&self, conn: &dyn Connection, entity: &mut T) -> Result<Value> {
        let table = self.metadata.table();
        let id_type = self.id_type();

        let (assigned, returns_key) = match table.id_strategy {
            IdStrategy::None => {
                return Err(Error::data_integrity(format!(
                    "{} ids are assigned by the caller, but the id is unset",
                    table.table_name
                )));
            }
            _ if id_type == ColumnType::Uuid => (Some(Value::Uuid(Uuid::new_v4())), false),
            _ => (None, true),
        };

        let id = self.insert_row(conn, entity, assigned, returns_key)?;
        self.metadata.set_id(entity, id.clone())?;
        Ok(id)
    }

    fn insert_row(
        &self,
        conn: &dyn Connection,
        entity: &T,
        assigned_id: Option<Value>,
        returns_key: bool,
    ) -> Result<Value> {
        let table = self.metadata.table();
        let mut columns: Vec<&str> = Vec::new();
        let mut params = Vec::new();

        if let Some(id) = &assigned_id {
            columns.push(&table.id_column);
            params.push(coerce_for_column(id.clone(), self.id_type())?);
        }
        for (column, value) in self.persistable(entity)? {
            columns.push(column);
            params.push(value);
        }
        if columns.is_empty() {
            return Err(Error::data_integrity(format!(
                "entity for {} has no persistable fields",
                table.table_name
            )));
        }

        let sql = self.dialect.insert_sql(&table.table_name, &columns);
        if returns_key {
            let outcome = conn
                .execute_returning_key(&sql, &params, &table.id_column)
                .map_err(|e| e.with_table(&table.table_name))?;
            if outcome.affected == 0 {
                return Err(Error::unknown(
                    format!("insert into {} affected no rows", table.table_name),
                    format!("sql={}", sql),
                ));
            }
            let key = outcome.generated_key.ok_or_else(|| {
                Error::unknown(
                    format!("insert into {} returned no generated key", table.table_name),
                    format!("sql={}", sql),
                )
            })?;
            convert_generated_key(key, self.id_type())
        } else {
            let affected = conn
                .execute(&sql, &params)
                .map_err(|e| e.with_table(&table.table_name))?;
            if affected == 0 {
                return Err(Error::unknown(
                    format!("insert into {} affected no rows", table.table_name),
                    format!("sql={}", sql),
                ));
            }
            assigned_id.ok_or_else(|| {
                Error::unknown(
                    format!("no id available for {}", table.table_name),
                    format!("sql={}", sql),
                )
            })
        }
    }

    fn update_or_insert(&self, conn: &dyn Connection, entity: &T, id: Value) -> Result<Value> {
        let table = self.metadata.table();
        let id = coerce_for_column(id, self.id_type())?;
        let values = self.persistable(entity)?;

        let affected = if values.is_empty() {
            0
        } else {
            let columns: Vec<&str> = values.iter().map(|(c, _)| *c).collect();
            let mut params: Vec<Value> = values.into_iter().map(|(_, v)| v).collect();
            params.push(id.clone());
            let sql = self
                .dialect
                .update_by_id_sql(&table.table_name, &columns, &table.id_column);
            conn.execute(&sql, &params)
                .map_err(|e| e.with_table(&table.table_name))?
        };

        if affected > 0 {
            return Ok(id);
        }
        match table.id_strategy {
            IdStrategy::None => self.insert_row(conn, entity, Some(id), false),
            _ => Err(Error::not_found(format!(
                "no {} row with id {:?} to update",
                table.table_name, id
            ))),
        }
    }

    /// Non-id, non-null column values coerced to their column types
    fn persistable<'m>(&'m self, entity: &T) -> Result<Vec<(&'m str, Value)>> {
        let table = self.metadata.table();
        self.metadata
            .persistable_values(entity)
            .into_iter()
            .map(|(column, value)| {
                let column_type = table
                    .column(column)
                    .map(|c| c.column_type)
                    .unwrap_or(ColumnType::String);
                Ok((column, coerce_for_column(value, column_type)?))
            })
            .collect()
    }

    /// Delete the row of `entity`
    pub fn delete(&self, entity: &T) -> Result<bool> {
        self.delete_by_id(self.metadata.id_value(entity))
    }

    /// Delete by primary key; returns whether a row was removed
    pub fn delete_by_id(&self, id: impl Into<Value>) -> Result<bool> {
        let id = self.id_param(id.into())?;
        let conn = self.pool.get()?;
        let affected = in_transaction(conn.connection(), |c| {
            c.execute(&self.statements.delete_by_id, std::slice::from_ref(&id))
        })
        .map_err(|e| e.with_table(self.table_name()))?;
        debug!(table = %self.table_name(), id = ?id, affected, "delete");
        Ok(affected > 0)
    }

    /// `UPDATE <table> SET <fragment>` with bound parameters
    pub fn update(&self, fragment: &str, params: &[Value]) -> Result<u64> {
        security::validate_raw_sql(fragment)?;
        let sql = format!(
            "UPDATE {} SET {}",
            self.dialect.quote_identifier(self.table_name()),
            fragment.trim()
        );
        let conn = self.pool.get()?;
        in_transaction(conn.connection(), |c| c.execute(&sql, params))
            .map_err(|e| e.with_table(self.table_name()))
    }

    /// Run validated raw SQL; SELECTs map rows, anything else reports the
    /// affected count
    pub fn sql(&self, raw_sql: &str, params: &[Value]) -> Result<QueryResult<T>> {
        self.query(raw_sql)?.with("", params).execute()
    }

    /// Start an ad-hoc query from validated SQL
    pub fn query(&self, sql: &str) -> Result<Query<T>> {
        security::validate_raw_sql(sql)?;
        Ok(Query::new(self.pool.clone(), self.metadata.clone(), sql))
    }
}
