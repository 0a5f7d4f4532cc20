//! Schema synchronization for rivven-orm
//!
//! Provides:
//! - SchemaSynchronizer: reconciles a live table with entity metadata
//! - SchemaSyncMode: how far brokers may change the schema on construction
//! - DDL rendering for table creation and additive migration
//! - Catalog introspection of live columns
//!
//! Synchronization is additive. Missing tables, columns and indexes are
//! created; existing columns are never dropped, renamed or altered.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::coerce::sql_type_for;
use crate::connection::Connection;
use crate::dialect::SqlDialect;
use crate::error::{Error, Result};
use crate::metadata::{CheckConstraint, ColumnDef, IdStrategy, TableMetadata};
use crate::types::{ColumnMetadata, ColumnType, Value};

/// Schema synchronization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaSyncMode {
    /// No DDL; the table must already exist
    None,
    /// Create the table and its indexes if missing
    Create,
    /// Create if missing and add missing columns and indexes
    #[default]
    CreateAndEvolve,
}

/// Result of one synchronization pass
#[derive(Debug, Clone, Default)]
pub struct SchemaSyncReport {
    /// Whether the table was created
    pub table_created: bool,
    /// Columns added to an existing table
    pub columns_added: Vec<String>,
    /// Indexes created
    pub indexes_added: Vec<String>,
    /// Every DDL statement executed, in order
    pub statements: Vec<String>,
}

impl SchemaSyncReport {
    /// Check if any changes were made
    pub fn has_changes(&self) -> bool {
        self.table_created
            || !self.columns_added.is_empty()
            || !self.indexes_added.is_empty()
            || !self.statements.is_empty()
    }
}

/// Reconciles live tables with entity metadata.
///
/// Check constraints of every synchronized table are kept in a registry for
/// introspection.
#[derive(Debug, Default)]
pub struct SchemaSynchronizer {
    checks: RwLock<HashMap<String, Vec<CheckConstraint>>>,
}

impl SchemaSynchronizer {
    /// Create a synchronizer with an empty check registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure the table exists with every mapped column and index
    pub fn validate_table(
        &self,
        conn: &dyn Connection,
        dialect: &dyn SqlDialect,
        table: &TableMetadata,
    ) -> Result<SchemaSyncReport> {
        self.sync(conn, dialect, table, SchemaSyncMode::CreateAndEvolve)
    }

    /// Synchronize according to `mode`
    pub fn sync(
        &self,
        conn: &dyn Connection,
        dialect: &dyn SqlDialect,
        table: &TableMetadata,
        mode: SchemaSyncMode,
    ) -> Result<SchemaSyncReport> {
        self.checks
            .write()
            .insert(table.table_name.clone(), table.check_constraints.clone());

        let mut report = SchemaSyncReport::default();
        let exists = table_exists(conn, dialect, &table.table_name)?;

        match (exists, mode) {
            (false, SchemaSyncMode::None) => {
                return Err(Error::schema(
                    "table does not exist and schema sync is disabled",
                    table.table_name.clone(),
                    None,
                ));
            }
            (false, _) => {
                self.create_table(conn, dialect, table, &mut report)?;
                self.manage_indexes(conn, dialect, table, &mut report)?;
            }
            (true, SchemaSyncMode::CreateAndEvolve) => {
                self.add_missing_columns(conn, dialect, table, &mut report)?;
                self.manage_indexes(conn, dialect, table, &mut report)?;
            }
            (true, _) => {
                debug!(table = %table.table_name, "table exists, evolution disabled");
            }
        }

        if report.has_changes() {
            info!(
                table = %table.table_name,
                created = report.table_created,
                columns_added = report.columns_added.len(),
                indexes_added = report.indexes_added.len(),
                "schema synchronized"
            );
        }
        Ok(report)
    }

    /// Check constraints recorded for `table`
    pub fn check_constraints(&self, table: &str) -> Vec<CheckConstraint> {
        self.checks.read().get(table).cloned().unwrap_or_default()
    }

    fn create_table(
        &self,
        conn: &dyn Connection,
        dialect: &dyn SqlDialect,
        table: &TableMetadata,
        report: &mut SchemaSyncReport,
    ) -> Result<()> {
        if table.id_strategy == IdStrategy::Sequence {
            match dialect.create_sequence_sql(&table.sequence_name()) {
                Some(sql) => run_ddl(conn, &table.table_name, &sql, report)?,
                None => warn!(
                    table = %table.table_name,
                    dialect = dialect.name(),
                    "sequences unsupported, falling back to identity ids"
                ),
            }
        }

        let sql = create_table_sql(dialect, table)?;
        run_ddl(conn, &table.table_name, &sql, report)?;
        report.table_created = true;
        Ok(())
    }

    fn add_missing_columns(
        &self,
        conn: &dyn Connection,
        dialect: &dyn SqlDialect,
        table: &TableMetadata,
        report: &mut SchemaSyncReport,
    ) -> Result<()> {
        let live = live_columns(conn, dialect, &table.table_name)?;

        for column in &table.columns {
            if live.contains(&column.name.to_ascii_lowercase()) {
                continue;
            }
            if column.primary_key {
                return Err(Error::schema(
                    format!(
                        "primary key column '{}' is missing from the live table",
                        column.name
                    ),
                    table.table_name.clone(),
                    None,
                ));
            }
            if !column.nullable {
                warn!(
                    table = %table.table_name,
                    column = %column.name,
                    "added column is created nullable, NOT NULL dropped"
                );
            }

            let sql = add_column_sql(dialect, table, column)?;
            run_ddl(conn, &table.table_name, &sql, report)?;
            report.columns_added.push(column.name.clone());

            if table.unique_columns.contains(&column.name) {
                let name = unique_constraint_name(&table.table_name, &column.name);
                let sql = format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
                    dialect.quote_identifier(&name),
                    dialect.quote_identifier(&table.table_name),
                    dialect.quote_identifier(&column.name)
                );
                run_ddl(conn, &table.table_name, &sql, report)?;
                report.indexes_added.push(name);
            }
        }
        Ok(())
    }

    /// Create missing indexes for indexed columns not covered by a
    /// uniqueness constraint or the primary key
    fn manage_indexes(
        &self,
        conn: &dyn Connection,
        dialect: &dyn SqlDialect,
        table: &TableMetadata,
        report: &mut SchemaSyncReport,
    ) -> Result<()> {
        let wanted: Vec<&String> = table
            .indexed_columns
            .iter()
            .filter(|c| !table.unique_columns.contains(*c) && **c != table.id_column)
            .collect();
        if wanted.is_empty() {
            return Ok(());
        }

        let live = live_indexes(conn, dialect, &table.table_name)?;
        for column in wanted {
            let name = index_name(&table.table_name, column);
            if live.contains(&name.to_ascii_lowercase()) {
                continue;
            }
            let sql = format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                dialect.quote_identifier(&name),
                dialect.quote_identifier(&table.table_name),
                dialect.quote_identifier(column)
            );
            run_ddl(conn, &table.table_name, &sql, report)?;
            report.indexes_added.push(name);
        }
        Ok(())
    }
}

/// `CREATE TABLE` for the whole entity, primary key first
pub fn create_table_sql(dialect: &dyn SqlDialect, table: &TableMetadata) -> Result<String> {
    let mut parts = Vec::with_capacity(table.columns.len() + table.unique_columns.len());
    for column in &table.columns {
        parts.push(column_definition(dialect, table, column, false)?);
    }
    for column in &table.unique_columns {
        parts.push(format!(
            "CONSTRAINT {} UNIQUE ({})",
            dialect.quote_identifier(&unique_constraint_name(&table.table_name, column)),
            dialect.quote_identifier(column)
        ));
    }
    Ok(format!(
        "CREATE TABLE {} ({})",
        dialect.quote_identifier(&table.table_name),
        parts.join(", ")
    ))
}

/// `ALTER TABLE ... ADD COLUMN` without key or NOT NULL modifiers
pub fn add_column_sql(
    dialect: &dyn SqlDialect,
    table: &TableMetadata,
    column: &ColumnDef,
) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} ADD COLUMN {}",
        dialect.quote_identifier(&table.table_name),
        column_definition(dialect, table, column, true)?
    ))
}

fn column_definition(
    dialect: &dyn SqlDialect,
    table: &TableMetadata,
    column: &ColumnDef,
    added: bool,
) -> Result<String> {
    let quoted = dialect.quote_identifier(&column.name);
    let sql_type = sql_type_for(dialect, column)?;

    if column.primary_key && !added {
        let strategy = match (table.id_strategy, column.column_type) {
            // UUID identities are generated client-side
            (IdStrategy::Identity, ColumnType::Uuid) => IdStrategy::None,
            (strategy, _) => strategy,
        };
        let sequence = table.sequence_name();
        let clause = dialect.primary_key_clause(
            &sql_type,
            strategy,
            (strategy == IdStrategy::Sequence).then_some(sequence.as_str()),
        );
        return Ok(format!("{} {}", quoted, clause));
    }

    let mut def = format!("{} {}", quoted, sql_type);
    if !column.nullable && !added {
        def.push_str(" NOT NULL");
    }
    for check in table.checks_for(&column.name) {
        def.push_str(&format!(" CHECK ({})", check.to_sql(&quoted)));
    }
    Ok(def)
}

fn unique_constraint_name(table: &str, column: &str) -> String {
    format!("uk_{}_{}", table, column)
}

fn index_name(table: &str, column: &str) -> String {
    format!("idx_{}_{}", table, column)
}

fn run_ddl(
    conn: &dyn Connection,
    table: &str,
    sql: &str,
    report: &mut SchemaSyncReport,
) -> Result<()> {
    info!(table = %table, sql = %sql, "executing DDL");
    conn.execute(sql, &[]).map_err(|e| Error::Schema {
        message: format!("DDL failed: {}", e),
        table: table.to_string(),
        sql: Some(sql.to_string()),
        source: Some(Box::new(e)),
    })?;
    report.statements.push(sql.to_string());
    Ok(())
}

fn table_exists(conn: &dyn Connection, dialect: &dyn SqlDialect, table: &str) -> Result<bool> {
    let (sql, params) = dialect.table_exists_query(table);
    let row = conn
        .query_one(&sql, &params)
        .map_err(|e| e.with_table(table))?;
    Ok(row
        .and_then(|r| r.get(0).and_then(Value::as_i64))
        .is_some_and(|n| n > 0))
}

/// Columns of a live table as reported by the catalog
pub fn describe_table(
    conn: &dyn Connection,
    dialect: &dyn SqlDialect,
    table: &str,
) -> Result<Vec<ColumnMetadata>> {
    let (sql, params) = dialect.list_columns_query(table);
    let rows = conn.query(&sql, &params).map_err(|e| e.with_table(table))?;
    Ok(rows
        .iter()
        .filter_map(|r| {
            let name = r.get_by_name("column_name").and_then(Value::as_str)?;
            let type_name = r
                .get_by_name("data_type")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let mut column = ColumnMetadata::new(name, type_name);
            column.nullable = r
                .get_by_name("is_nullable")
                .and_then(Value::as_str)
                .map_or(true, |v| v.eq_ignore_ascii_case("YES"));
            Some(column)
        })
        .collect())
}

fn live_columns(
    conn: &dyn Connection,
    dialect: &dyn SqlDialect,
    table: &str,
) -> Result<HashSet<String>> {
    Ok(describe_table(conn, dialect, table)?
        .into_iter()
        .map(|c| c.name.to_ascii_lowercase())
        .collect())
}

fn live_indexes(
    conn: &dyn Connection,
    dialect: &dyn SqlDialect,
    table: &str,
) -> Result<HashSet<String>> {
    let (sql, params) = dialect.list_indexes_query(table);
    let rows = conn.query(&sql, &params).map_err(|e| e.with_table(table))?;
    Ok(rows
        .iter()
        .filter_map(|r| r.get_by_name("index_name").and_then(Value::as_str))
        .map(str::to_ascii_lowercase)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::metadata::CheckKind;
    use std::collections::BTreeSet;

    fn column(name: &str, column_type: ColumnType, primary_key: bool) -> ColumnDef {
        ColumnDef {
            field: name.into(),
            name: name.into(),
            column_type,
            nullable: false,
            max_length: None,
            primary_key,
            unique: primary_key,
            indexed: false,
            references: None,
        }
    }

    fn users(strategy: IdStrategy) -> TableMetadata {
        let mut email = column("email", ColumnType::String, false);
        email.max_length = Some(120);
        email.unique = true;
        let mut status = column("status", ColumnType::String, false);
        status.indexed = true;
        let mut bio = column("bio", ColumnType::String, false);
        bio.nullable = true;

        TableMetadata {
            table_name: "users".into(),
            id_field: "id".into(),
            id_column: "id".into(),
            id_strategy: strategy,
            columns: vec![column("id", ColumnType::Long, true), email, status, bio],
            unique_columns: BTreeSet::from(["email".to_string()]),
            indexed_columns: BTreeSet::from(["status".to_string()]),
            check_constraints: vec![CheckConstraint {
                column: "status".into(),
                kind: CheckKind::AllowedValues(vec!["'active'".into(), "'banned'".into()]),
            }],
        }
    }

    #[test]
    fn test_create_table_sql_postgres() {
        let sql = create_table_sql(&PostgresDialect, &users(IdStrategy::Identity)).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE \"users\" (\
             \"id\" BIGINT PRIMARY KEY GENERATED ALWAYS AS IDENTITY, \
             \"email\" VARCHAR(120) NOT NULL, \
             \"status\" TEXT NOT NULL CHECK (\"status\" IN ('active', 'banned')), \
             \"bio\" TEXT, \
             CONSTRAINT \"uk_users_email\" UNIQUE (\"email\"))"
        );
    }

    #[test]
    fn test_create_table_sql_sequence() {
        let sql = create_table_sql(&PostgresDialect, &users(IdStrategy::Sequence)).unwrap();
        assert!(sql.contains("\"id\" BIGINT PRIMARY KEY DEFAULT nextval('users_id_seq')"));

        let sql = create_table_sql(&SqliteDialect, &users(IdStrategy::Sequence)).unwrap();
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
    }

    #[test]
    fn test_uuid_identity_has_no_generated_clause() {
        let mut table = users(IdStrategy::Identity);
        table.columns[0] = column("id", ColumnType::Uuid, true);
        let sql = create_table_sql(&PostgresDialect, &table).unwrap();
        assert!(sql.contains("\"id\" UUID PRIMARY KEY,"));
    }

    #[test]
    fn test_add_column_sql_strips_not_null() {
        let table = users(IdStrategy::Identity);
        let sql = add_column_sql(&SqliteDialect, &table, &table.columns[2]).unwrap();
        assert_eq!(
            sql,
            "ALTER TABLE \"users\" ADD COLUMN \"status\" TEXT CHECK (\"status\" IN ('active', 'banned'))"
        );
    }

    #[test]
    fn test_report_has_changes() {
        let mut report = SchemaSyncReport::default();
        assert!(!report.has_changes());
        report.columns_added.push("bio".into());
        assert!(report.has_changes());
    }

    #[test]
    fn test_sync_mode_deserialize() {
        let mode: SchemaSyncMode = serde_yaml::from_str("create_and_evolve").unwrap();
        assert_eq!(mode, SchemaSyncMode::CreateAndEvolve);
        let mode: SchemaSyncMode = serde_yaml::from_str("none").unwrap();
        assert_eq!(mode, SchemaSyncMode::None);
    }
}
