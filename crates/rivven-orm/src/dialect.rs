//! SQL dialect abstraction for rivven-orm
//!
//! Vendor-specific SQL generation. DML is built with sea-query; DDL and
//! catalog queries are plain strings over validated identifiers.
//!
//! - SqlDialect: trait for database-specific SQL generation
//! - Type mapping from [`ColumnType`] to native column types
//! - Primary key / identity / sequence clauses
//! - Catalog introspection queries (tables, columns, indexes)
//!
//! Every statement produced here uses `?` placeholders.
//! [`SqlDialect::rewrite_placeholders`] turns them into the native form just
//! before execution.

use sea_query::{
    Alias, Asterisk, Expr, IntoIden, Order, PostgresQueryBuilder, Query, SqliteQueryBuilder,
    TableRef,
};
use std::sync::Arc;

use crate::connection::DatabaseType;
use crate::metadata::IdStrategy;
use crate::types::{ColumnType, Value};

/// Bound parameter marker used in generated SQL
const PARAM: &str = "?";

fn sea_table_ref(table: &str) -> TableRef {
    TableRef::Table(Alias::new(table).into_iden())
}

fn param() -> sea_query::SimpleExpr {
    Expr::cust(PARAM)
}

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Backend the dialect targets
    fn database_type(&self) -> DatabaseType;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Get the native placeholder for a 1-based parameter index
    fn placeholder(&self, index: usize) -> String;

    /// Rewrite `?` markers into native placeholders, leaving quoted
    /// literals and identifiers untouched
    fn rewrite_placeholders(&self, sql: &str) -> String {
        let mut out = String::with_capacity(sql.len() + 8);
        let mut index = 0;
        let mut quote: Option<char> = None;
        for c in sql.chars() {
            match (quote, c) {
                (Some(q), c) if c == q => {
                    quote = None;
                    out.push(c);
                }
                (Some(_), c) => out.push(c),
                (None, '\'') | (None, '"') => {
                    quote = Some(c);
                    out.push(c);
                }
                (None, '?') => {
                    index += 1;
                    out.push_str(&self.placeholder(index));
                }
                (None, c) => out.push(c),
            }
        }
        out
    }

    /// Native column type for a semantic type
    fn native_type(&self, column_type: ColumnType, max_length: Option<u32>) -> String;

    /// Type and constraint clause of the primary key column
    fn primary_key_clause(
        &self,
        sql_type: &str,
        strategy: IdStrategy,
        sequence: Option<&str>,
    ) -> String;

    /// Whether the backend has standalone sequences
    fn supports_sequences(&self) -> bool;

    /// DDL creating a sequence if it does not exist
    fn create_sequence_sql(&self, name: &str) -> Option<String> {
        if self.supports_sequences() {
            Some(format!(
                "CREATE SEQUENCE IF NOT EXISTS {}",
                self.quote_identifier(name)
            ))
        } else {
            None
        }
    }

    /// Get the LIMIT/OFFSET syntax
    fn limit_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut sql = String::new();
        if let Some(l) = limit {
            sql.push_str(&format!(" LIMIT {}", l));
        }
        if let Some(o) = offset {
            sql.push_str(&format!(" OFFSET {}", o));
        }
        sql
    }

    /// Query returning one row with a count column `n` > 0 when the table exists
    fn table_exists_query(&self, table: &str) -> (String, Vec<Value>);

    /// Query returning `column_name`, `data_type`, `is_nullable` per live column
    fn list_columns_query(&self, table: &str) -> (String, Vec<Value>);

    /// Query returning `index_name` per index on the table
    fn list_indexes_query(&self, table: &str) -> (String, Vec<Value>);

    /// Statement builder used for DML
    fn render(&self, stmt: &dyn Renderable) -> String;

    /// `SELECT * FROM t WHERE id = ?`
    fn select_by_id_sql(&self, table: &str, id_column: &str) -> String {
        let mut stmt = Query::select();
        stmt.column(Asterisk)
            .from(sea_table_ref(table))
            .and_where(Expr::col(Alias::new(id_column)).eq(param()));
        self.render(&SelectStmt(stmt))
    }

    /// `SELECT * FROM t [WHERE clause] ORDER BY id [LIMIT n OFFSET m]`
    fn select_sql(
        &self,
        table: &str,
        where_clause: Option<&str>,
        order_by: Option<&str>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> String {
        let mut stmt = Query::select();
        stmt.column(Asterisk).from(sea_table_ref(table));
        if let Some(w) = where_clause {
            stmt.and_where(Expr::cust(w));
        }
        if let Some(col) = order_by {
            stmt.order_by(Alias::new(col), Order::Asc);
        }
        let mut sql = self.render(&SelectStmt(stmt));
        sql.push_str(&self.limit_offset_sql(limit, offset));
        sql
    }

    /// `SELECT COUNT(*) AS n FROM t [WHERE clause]`
    fn count_sql(&self, table: &str, where_clause: Option<&str>) -> String {
        let mut stmt = Query::select();
        stmt.expr_as(Expr::cust("COUNT(*)"), Alias::new("n"))
            .from(sea_table_ref(table));
        if let Some(w) = where_clause {
            stmt.and_where(Expr::cust(w));
        }
        self.render(&SelectStmt(stmt))
    }

    /// `DELETE FROM t WHERE id = ?`
    fn delete_by_id_sql(&self, table: &str, id_column: &str) -> String {
        let mut stmt = Query::delete();
        stmt.from_table(sea_table_ref(table))
            .and_where(Expr::col(Alias::new(id_column)).eq(param()));
        self.render(&DeleteStmt(stmt))
    }

    /// `INSERT INTO t (c1, c2) VALUES (?, ?)`
    fn insert_sql(&self, table: &str, columns: &[&str]) -> String {
        let mut stmt = Query::insert();
        stmt.into_table(sea_table_ref(table))
            .columns(columns.iter().map(|c| Alias::new(*c).into_iden()))
            .values_panic(columns.iter().map(|_| param()));
        self.render(&InsertStmt(stmt))
    }

    /// `UPDATE t SET c1 = ?, c2 = ? WHERE id = ?`
    fn update_by_id_sql(&self, table: &str, columns: &[&str], id_column: &str) -> String {
        let mut stmt = Query::update();
        stmt.table(sea_table_ref(table))
            .values(columns.iter().map(|c| (Alias::new(*c).into_iden(), param())))
            .and_where(Expr::col(Alias::new(id_column)).eq(param()));
        self.render(&UpdateStmt(stmt))
    }
}

/// A sea-query statement that can be rendered by either backend builder
pub trait Renderable {
    /// Render with the PostgreSQL builder
    fn postgres(&self) -> String;
    /// Render with the SQLite builder
    fn sqlite(&self) -> String;
}

macro_rules! renderable {
    ($name:ident, $stmt:ty) => {
        #[doc(hidden)]
        pub struct $name(pub $stmt);

        impl Renderable for $name {
            fn postgres(&self) -> String {
                self.0.to_string(PostgresQueryBuilder)
            }

            fn sqlite(&self) -> String {
                self.0.to_string(SqliteQueryBuilder)
            }
        }
    };
}

renderable!(SelectStmt, sea_query::SelectStatement);
renderable!(InsertStmt, sea_query::InsertStatement);
renderable!(UpdateStmt, sea_query::UpdateStatement);
renderable!(DeleteStmt, sea_query::DeleteStatement);

// ===========================================================================
// PostgreSQL
// ===========================================================================

/// PostgreSQL dialect
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn native_type(&self, column_type: ColumnType, max_length: Option<u32>) -> String {
        match column_type {
            ColumnType::String => match max_length {
                Some(len) => format!("VARCHAR({})", len),
                None => "TEXT".to_string(),
            },
            ColumnType::Int => "INTEGER".to_string(),
            ColumnType::Long => "BIGINT".to_string(),
            ColumnType::Double => "DOUBLE PRECISION".to_string(),
            ColumnType::Bool => "BOOLEAN".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::TimestampTz => "TIMESTAMPTZ".to_string(),
            ColumnType::Uuid => "UUID".to_string(),
            ColumnType::Bytes => "BYTEA".to_string(),
        }
    }

    fn primary_key_clause(
        &self,
        sql_type: &str,
        strategy: IdStrategy,
        sequence: Option<&str>,
    ) -> String {
        match (strategy, sequence) {
            (IdStrategy::Identity, _) => {
                format!("{} PRIMARY KEY GENERATED ALWAYS AS IDENTITY", sql_type)
            }
            (IdStrategy::Sequence, Some(seq)) => format!(
                "{} PRIMARY KEY DEFAULT nextval('{}')",
                sql_type,
                crate::security::escape_string_literal(seq)
            ),
            _ => format!("{} PRIMARY KEY", sql_type),
        }
    }

    fn supports_sequences(&self) -> bool {
        true
    }

    fn table_exists_query(&self, table: &str) -> (String, Vec<Value>) {
        (
            "SELECT COUNT(*) AS n FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name::text = ?"
                .to_string(),
            vec![Value::from(table)],
        )
    }

    fn list_columns_query(&self, table: &str) -> (String, Vec<Value>) {
        (
            "SELECT column_name::text AS column_name, data_type::text AS data_type, \
             is_nullable::text AS is_nullable FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name::text = ? \
             ORDER BY ordinal_position"
                .to_string(),
            vec![Value::from(table)],
        )
    }

    fn list_indexes_query(&self, table: &str) -> (String, Vec<Value>) {
        (
            "SELECT indexname::text AS index_name FROM pg_indexes \
             WHERE schemaname = current_schema() AND tablename::text = ?"
                .to_string(),
            vec![Value::from(table)],
        )
    }

    fn render(&self, stmt: &dyn Renderable) -> String {
        stmt.postgres()
    }
}

// ===========================================================================
// SQLite
// ===========================================================================

/// SQLite dialect
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "SQLite"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    fn placeholder(&self, _index: usize) -> String {
        PARAM.to_string()
    }

    fn rewrite_placeholders(&self, sql: &str) -> String {
        sql.to_string()
    }

    fn native_type(&self, column_type: ColumnType, max_length: Option<u32>) -> String {
        match column_type {
            ColumnType::String => match max_length {
                Some(len) => format!("VARCHAR({})", len),
                None => "TEXT".to_string(),
            },
            // AUTOINCREMENT requires the exact INTEGER type name
            ColumnType::Int | ColumnType::Long => "INTEGER".to_string(),
            ColumnType::Double => "REAL".to_string(),
            ColumnType::Bool => "BOOLEAN".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::TimestampTz => "TIMESTAMPTZ".to_string(),
            ColumnType::Uuid => "UUID".to_string(),
            ColumnType::Bytes => "BLOB".to_string(),
        }
    }

    fn primary_key_clause(
        &self,
        sql_type: &str,
        strategy: IdStrategy,
        _sequence: Option<&str>,
    ) -> String {
        match strategy {
            IdStrategy::Identity | IdStrategy::Sequence if sql_type == "INTEGER" => {
                "INTEGER PRIMARY KEY AUTOINCREMENT".to_string()
            }
            _ => format!("{} PRIMARY KEY", sql_type),
        }
    }

    fn supports_sequences(&self) -> bool {
        false
    }

    fn limit_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        // SQLite only accepts OFFSET after a LIMIT
        match (limit, offset) {
            (None, Some(o)) => format!(" LIMIT -1 OFFSET {}", o),
            (Some(l), Some(o)) => format!(" LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!(" LIMIT {}", l),
            (None, None) => String::new(),
        }
    }

    fn table_exists_query(&self, table: &str) -> (String, Vec<Value>) {
        (
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?"
                .to_string(),
            vec![Value::from(table)],
        )
    }

    fn list_columns_query(&self, table: &str) -> (String, Vec<Value>) {
        (
            "SELECT name AS column_name, type AS data_type, \
             CASE WHEN \"notnull\" = 0 THEN 'YES' ELSE 'NO' END AS is_nullable \
             FROM pragma_table_info(?) ORDER BY cid"
                .to_string(),
            vec![Value::from(table)],
        )
    }

    fn list_indexes_query(&self, table: &str) -> (String, Vec<Value>) {
        (
            "SELECT name AS index_name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?"
                .to_string(),
            vec![Value::from(table)],
        )
    }

    fn render(&self, stmt: &dyn Renderable) -> String {
        stmt.sqlite()
    }
}

/// Get a dialect instance by database type name
pub fn dialect_for(name: &str) -> Option<Arc<dyn SqlDialect>> {
    match name.to_lowercase().as_str() {
        "postgres" | "postgresql" | "pg" => Some(Arc::new(PostgresDialect)),
        "sqlite" | "sqlite3" => Some(Arc::new(SqliteDialect)),
        _ => None,
    }
}

/// Get the dialect for a backend
pub fn dialect_for_type(database: DatabaseType) -> Arc<dyn SqlDialect> {
    match database {
        DatabaseType::PostgreSQL => Arc::new(PostgresDialect),
        DatabaseType::SQLite => Arc::new(SqliteDialect),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_dialect() {
        let dialect = PostgresDialect;
        assert_eq!(dialect.quote_identifier("users"), "\"users\"");
        assert_eq!(dialect.quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(dialect.placeholder(1), "$1");
        assert!(dialect.supports_sequences());
        assert_eq!(
            dialect.create_sequence_sql("users_id_seq").unwrap(),
            "CREATE SEQUENCE IF NOT EXISTS \"users_id_seq\""
        );
    }

    #[test]
    fn test_sqlite_dialect() {
        let dialect = SqliteDialect;
        assert_eq!(dialect.placeholder(3), "?");
        assert!(!dialect.supports_sequences());
        assert!(dialect.create_sequence_sql("s").is_none());
        assert_eq!(dialect.limit_offset_sql(None, Some(4)), " LIMIT -1 OFFSET 4");
    }

    #[test]
    fn test_rewrite_placeholders_skips_literals() {
        let sql = "SELECT * FROM \"t?\" WHERE a = ? AND b = '?' AND c = ?";
        assert_eq!(
            PostgresDialect.rewrite_placeholders(sql),
            "SELECT * FROM \"t?\" WHERE a = $1 AND b = '?' AND c = $2"
        );
        assert_eq!(SqliteDialect.rewrite_placeholders(sql), sql);
    }

    #[test]
    fn test_native_types() {
        assert_eq!(
            PostgresDialect.native_type(ColumnType::String, Some(64)),
            "VARCHAR(64)"
        );
        assert_eq!(PostgresDialect.native_type(ColumnType::String, None), "TEXT");
        assert_eq!(PostgresDialect.native_type(ColumnType::Long, None), "BIGINT");
        assert_eq!(
            PostgresDialect.native_type(ColumnType::Double, None),
            "DOUBLE PRECISION"
        );
        assert_eq!(SqliteDialect.native_type(ColumnType::Long, None), "INTEGER");
        assert_eq!(SqliteDialect.native_type(ColumnType::Bytes, None), "BLOB");
    }

    #[test]
    fn test_primary_key_clauses() {
        assert_eq!(
            PostgresDialect.primary_key_clause("BIGINT", IdStrategy::Identity, None),
            "BIGINT PRIMARY KEY GENERATED ALWAYS AS IDENTITY"
        );
        assert_eq!(
            PostgresDialect.primary_key_clause("BIGINT", IdStrategy::Sequence, Some("t_id_seq")),
            "BIGINT PRIMARY KEY DEFAULT nextval('t_id_seq')"
        );
        assert_eq!(
            SqliteDialect.primary_key_clause("INTEGER", IdStrategy::Identity, None),
            "INTEGER PRIMARY KEY AUTOINCREMENT"
        );
        assert_eq!(
            SqliteDialect.primary_key_clause("TEXT", IdStrategy::None, None),
            "TEXT PRIMARY KEY"
        );
    }

    #[test]
    fn test_sea_query_dml() {
        let d = PostgresDialect;
        assert_eq!(
            d.select_by_id_sql("users", "id"),
            "SELECT * FROM \"users\" WHERE \"id\" = (?)"
        );
        assert_eq!(
            d.delete_by_id_sql("users", "id"),
            "DELETE FROM \"users\" WHERE \"id\" = (?)"
        );
        assert_eq!(
            d.insert_sql("users", &["name", "email"]),
            "INSERT INTO \"users\" (\"name\", \"email\") VALUES (?, ?)"
        );
        assert_eq!(
            d.update_by_id_sql("users", &["name"], "id"),
            "UPDATE \"users\" SET \"name\" = ? WHERE \"id\" = (?)"
        );
    }

    #[test]
    fn test_select_and_count() {
        let d = SqliteDialect;
        let sql = d.select_sql("events", Some("kind = ?"), Some("id"), Some(5), Some(2));
        assert!(sql.starts_with("SELECT * FROM \"events\" WHERE kind = ?"));
        assert!(sql.contains("ORDER BY \"id\" ASC"));
        assert!(sql.ends_with(" LIMIT 5 OFFSET 2"));

        let count = d.count_sql("events", None);
        assert!(count.starts_with("SELECT COUNT(*) AS \"n\" FROM \"events\""));
    }

    #[test]
    fn test_dialect_for() {
        assert_eq!(dialect_for("postgres").unwrap().name(), "PostgreSQL");
        assert_eq!(dialect_for("SQLite").unwrap().name(), "SQLite");
        assert!(dialect_for("oracle").is_none());
        assert_eq!(
            dialect_for_type(DatabaseType::SQLite).database_type(),
            DatabaseType::SQLite
        );
    }
}
