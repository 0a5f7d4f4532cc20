//! SQL injection guards for rivven-orm.
//!
//! Only structural fragments (table names, column names, clause shapes) are
//! ever interpolated into SQL text, and only after passing these checks.
//! Values always travel as bound parameters.
//!
//! Provides:
//! - `is_valid_*` predicates over identifiers, column names, WHERE clauses
//!   and raw SQL
//! - `validate_*` counterparts returning [`Error::Validation`] naming the
//!   rejected fragment
//! - String literal escaping for CHECK value lists

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::error::{Error, Result};

/// Maximum accepted identifier length
const MAX_IDENTIFIER_LEN: usize = 255;

/// Maximum accepted WHERE clause / raw SQL length
const MAX_CLAUSE_LEN: usize = 4096;

/// Reserved words across standard SQL, PostgreSQL, SQLite, MySQL and
/// SQL Server. Common column names that are only non-reserved keywords
/// (`name`, `type`, `value`, `status`, `key`, ...) are left out.
const RESERVED_KEYWORDS: &[&str] = &[
    "ABORT", "ABSOLUTE", "ACTION", "ADD", "ALL", "ALLOCATE", "ALTER", "ANALYSE", "ANALYZE",
    "AND", "ANY", "ARE", "ARRAY", "AS", "ASC", "ASENSITIVE", "ASSERTION", "ASYMMETRIC",
    "AT", "ATTACH", "AUTHORIZATION", "AUTOINCREMENT", "AUTO_INCREMENT", "BACKUP", "BEGIN",
    "BETWEEN", "BINARY", "BOTH", "BREAK", "BROWSE", "BULK", "BY", "CALL", "CASCADE",
    "CASCADED", "CASE", "CAST", "CHECK", "CHECKPOINT", "CLOSE", "CLUSTERED", "COALESCE",
    "COLLATE", "COLUMN", "COMMIT", "COMPUTE", "CONCURRENTLY", "CONDITION", "CONFLICT",
    "CONNECT", "CONSTRAINT", "CONTAINS", "CONTINUE", "CONVERT", "CREATE", "CROSS",
    "CURRENT", "CURRENT_CATALOG", "CURRENT_DATE", "CURRENT_ROLE", "CURRENT_SCHEMA",
    "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURRENT_USER", "CURSOR", "DATABASE", "DATABASES",
    "DBCC", "DEALLOCATE", "DECLARE", "DEFAULT", "DEFERRABLE", "DEFERRED", "DELAYED",
    "DELETE", "DENY", "DESC", "DESCRIBE", "DETACH", "DISTINCT", "DISTINCTROW", "DISTRIBUTED",
    "DIV", "DO", "DROP", "DUAL", "DUMP", "EACH", "ELSE", "ELSEIF", "ENCLOSED", "END",
    "ERRLVL", "ESCAPE", "ESCAPED", "EXCEPT", "EXCLUSIVE", "EXEC", "EXECUTE", "EXISTS",
    "EXIT", "EXPLAIN", "EXTERNAL", "FALSE", "FETCH", "FILLFACTOR", "FOR", "FORCE",
    "FOREIGN", "FREETEXT", "FREEZE", "FROM", "FULL", "FULLTEXT", "FUNCTION", "GLOB",
    "GOTO", "GRANT", "GROUP", "HAVING", "HOLDLOCK", "IDENTITY", "IDENTITYCOL",
    "IDENTITY_INSERT", "IF", "IGNORE", "ILIKE", "IMMEDIATE", "IN", "INDEX", "INDEXED",
    "INITIALLY", "INNER", "INOUT", "INSENSITIVE", "INSERT", "INSTEAD", "INTERSECT", "INTO",
    "IS", "ISNULL", "ITERATE", "JOIN", "KILL", "LATERAL", "LEADING", "LEAVE", "LEFT",
    "LIKE", "LIMIT", "LINENO", "LOAD", "LOCALTIME", "LOCALTIMESTAMP", "LOCK", "LOOP",
    "MATCH", "MERGE", "NATIONAL", "NATURAL", "NOCHECK", "NONCLUSTERED", "NOT", "NOTHING",
    "NOTNULL", "NULL", "NULLIF", "OF", "OFF", "OFFSET", "OFFSETS", "ON", "ONLY", "OPEN",
    "OPENDATASOURCE", "OPENQUERY", "OPENROWSET", "OPENXML", "OPTIMIZE", "OPTION", "OR",
    "ORDER", "OUT", "OUTER", "OUTFILE", "OVER", "OVERLAPS", "PERCENT", "PIVOT", "PLACING",
    "PLAN", "PRAGMA", "PRECISION", "PREPARE", "PRIMARY", "PRINT", "PROC", "PROCEDURE",
    "PUBLIC", "PURGE", "RAISE", "RAISERROR", "READTEXT", "RECONFIGURE", "RECURSIVE",
    "REFERENCES", "REGEXP", "REINDEX", "RELEASE", "RENAME", "REPEAT", "REPLACE",
    "REPLICATION", "REQUIRE", "RESIGNAL", "RESTORE", "RESTRICT", "RETURN", "RETURNING",
    "REVERT", "REVOKE", "RIGHT", "RLIKE", "ROLLBACK", "ROW", "ROWCOUNT", "ROWGUIDCOL",
    "ROWS", "RULE", "SAVE", "SAVEPOINT", "SCHEMA", "SCHEMAS", "SECURITYAUDIT", "SELECT",
    "SEMANTICKEYPHRASETABLE", "SESSION_USER", "SET", "SETUSER", "SHOW", "SHUTDOWN",
    "SIGNAL", "SIMILAR", "SOME", "SQL", "SQLEXCEPTION", "SQLSTATE", "SQLWARNING",
    "STARTING", "STATISTICS", "STRAIGHT_JOIN", "SYMMETRIC", "SYSTEM_USER", "TABLE",
    "TABLESAMPLE", "TEMP", "TEMPORARY", "TERMINATED", "TEXTSIZE", "THEN", "TO", "TOP",
    "TRAILING", "TRAN", "TRANSACTION", "TRIGGER", "TRUE", "TRUNCATE", "TRY_CONVERT",
    "TSEQUAL", "UNDO", "UNION", "UNIQUE", "UNLOCK", "UNPIVOT", "UNSIGNED", "UPDATE",
    "UPDATETEXT", "USAGE", "USE", "USER", "USING", "VACUUM", "VALUES", "VARIADIC",
    "VARYING", "VERBOSE", "VIEW", "VIRTUAL", "WAITFOR", "WHEN", "WHERE", "WHILE",
    "WINDOW", "WITH", "WITHIN", "WITHOUT", "WRITETEXT", "XOR", "ZEROFILL",
];

static KEYWORDS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| RESERVED_KEYWORDS.iter().copied().collect());

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

static COLUMN_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)?$").unwrap());

const WHERE_COLUMN: &str = r"([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?)";
const WHERE_OP: &str = r"(?:=|!=|<>|<=|>=|<|>|NOT\s+LIKE|LIKE|IS\s+NOT|IS)";
const WHERE_VALUE: &str = r"(?:\?|-?\d+(?:\.\d+)?|'(?:[^']|'')*'|TRUE|FALSE|NULL)";

/// One `column OP value` condition, capturing the column
static WHERE_CONDITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i){WHERE_COLUMN}\s*{WHERE_OP}\s*{WHERE_VALUE}")).unwrap()
});

/// `column OP value ((AND|OR) column OP value)*`
static WHERE_CHAIN: LazyLock<Regex> = LazyLock::new(|| {
    let cond = format!(r"{WHERE_COLUMN}\s*{WHERE_OP}\s*{WHERE_VALUE}");
    Regex::new(&format!(r"(?i)^\s*{cond}(?:\s+(?:AND|OR)\s+{cond})*\s*$")).unwrap()
});

static DANGEROUS_TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:xp_\w+|sp_executesql|sp_oacreate|pg_sleep|pg_read_file|pg_ls_dir|lo_import|lo_export|load_file|dbms_pipe|utl_http)\b|\b(?:sleep|benchmark|exec|char)\s*\(|\bwaitfor\s+(?:delay|time)\b|\binto\s+(?:outfile|dumpfile)\b|\bcopy\s+\w+\s+(?:from|to)\s+program\b",
    )
    .unwrap()
});

static UNION_INJECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bunion\s+(?:all\s+|distinct\s+)?select\b").unwrap());

/// Check whether a word is a reserved SQL keyword (case-insensitive)
pub fn is_reserved_keyword(word: &str) -> bool {
    KEYWORDS.contains(word.to_ascii_uppercase().as_str())
}

/// Check a bare identifier (table, column, index or sequence name).
///
/// # Examples
///
/// ```
/// use rivven_orm::security::is_valid_identifier;
///
/// assert!(is_valid_identifier("users"));
/// assert!(is_valid_identifier("order_items_2024"));
///
/// assert!(!is_valid_identifier("users; DROP TABLE users"));
/// assert!(!is_valid_identifier("select"));
/// assert!(!is_valid_identifier(""));
/// ```
pub fn is_valid_identifier(name: &str) -> bool {
    name.len() <= MAX_IDENTIFIER_LEN && IDENTIFIER.is_match(name) && !is_reserved_keyword(name)
}

/// Check a column name, optionally qualified as `table.column`.
///
/// Every dotted segment must itself be a non-keyword identifier.
pub fn is_valid_column_name(name: &str) -> bool {
    name.len() <= MAX_IDENTIFIER_LEN
        && COLUMN_NAME.is_match(name)
        && name.split('.').all(|segment| !is_reserved_keyword(segment))
}

/// Check a WHERE clause against the simple comparison-chain grammar.
///
/// Accepts `column OP value` conditions joined by `AND`/`OR`, where a value
/// is `?`, a number, a single-quoted string, `TRUE`, `FALSE` or `NULL`.
/// Anything richer (`IN (...)`, subqueries, functions) is rejected.
///
/// # Examples
///
/// ```
/// use rivven_orm::security::is_valid_where_clause;
///
/// assert!(is_valid_where_clause("status = ? AND age >= 18"));
/// assert!(is_valid_where_clause("deleted_at IS NULL"));
///
/// assert!(!is_valid_where_clause("1=1; DROP TABLE x"));
/// assert!(!is_valid_where_clause("id IN (1, 2)"));
/// ```
pub fn is_valid_where_clause(clause: &str) -> bool {
    where_clause_violation(clause).is_none()
}

fn where_clause_violation(clause: &str) -> Option<&'static str> {
    if clause.trim().is_empty() {
        return Some("WHERE clause cannot be empty");
    }
    if clause.len() > MAX_CLAUSE_LEN {
        return Some("WHERE clause too long");
    }
    if let Some(reason) = structural_violation(clause) {
        return Some(reason);
    }
    if !WHERE_CHAIN.is_match(clause) {
        return Some("WHERE clause is not a simple comparison chain");
    }
    let keyword_column = WHERE_CONDITION
        .captures_iter(clause)
        .filter_map(|c| c.get(1))
        .any(|m| !is_valid_column_name(m.as_str()));
    if keyword_column {
        return Some("WHERE clause references an invalid column name");
    }
    None
}

/// Check a raw SQL statement for injection markers.
///
/// Rejects statement terminators, comments, known dangerous functions and
/// commands, UNION-based injection and unbalanced quotes.
pub fn is_valid_raw_sql(sql: &str) -> bool {
    raw_sql_violation(sql).is_none()
}

fn raw_sql_violation(sql: &str) -> Option<&'static str> {
    if sql.trim().is_empty() {
        return Some("SQL cannot be empty");
    }
    if sql.len() > MAX_CLAUSE_LEN {
        return Some("SQL too long");
    }
    if let Some(reason) = structural_violation(sql) {
        return Some(reason);
    }
    if DANGEROUS_TOKENS.is_match(sql) {
        return Some("SQL contains a prohibited function or command");
    }
    if UNION_INJECTION.is_match(sql) {
        return Some("SQL contains a UNION SELECT");
    }
    None
}

/// Terminators, comments and quote/parenthesis balance
fn structural_violation(fragment: &str) -> Option<&'static str> {
    if fragment.contains(';') {
        return Some("statement terminator ';' is not allowed");
    }
    if fragment.contains("--") {
        return Some("line comment '--' is not allowed");
    }
    if fragment.contains("/*") || fragment.contains("*/") {
        return Some("block comment is not allowed");
    }
    if fragment.contains('\0') {
        return Some("NUL byte is not allowed");
    }
    if fragment.matches('\'').count() % 2 != 0 {
        return Some("unbalanced single quotes");
    }
    if fragment.matches('"').count() % 2 != 0 {
        return Some("unbalanced double quotes");
    }

    let mut depth: i64 = 0;
    for c in strip_string_literals(fragment).chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Some("unbalanced parentheses");
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Some("unbalanced parentheses");
    }
    None
}

/// Blank out single-quoted literals so structure checks ignore their content
fn strip_string_literals(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut in_literal = false;
    for c in fragment.chars() {
        if c == '\'' {
            in_literal = !in_literal;
            out.push(c);
        } else if in_literal {
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

/// Validate an identifier, returning a validation error on violation
pub fn validate_identifier(name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else if is_reserved_keyword(name) {
        Err(Error::validation("identifier is a reserved SQL keyword", name))
    } else {
        Err(Error::validation(
            "identifier must match [a-zA-Z0-9_]+ (max 255 chars)",
            name,
        ))
    }
}

/// Validate a column name, returning a validation error on violation
pub fn validate_column_name(name: &str) -> Result<()> {
    if is_valid_column_name(name) {
        Ok(())
    } else {
        Err(Error::validation(
            "column name must be [table.]column without reserved keywords",
            name,
        ))
    }
}

/// Validate a WHERE clause, returning a validation error on violation
pub fn validate_where_clause(clause: &str) -> Result<()> {
    match where_clause_violation(clause) {
        None => Ok(()),
        Some(reason) => Err(Error::validation(reason, clause)),
    }
}

/// Validate raw SQL, returning a validation error on violation
pub fn validate_raw_sql(sql: &str) -> Result<()> {
    match raw_sql_violation(sql) {
        None => Ok(()),
        Some(reason) => Err(Error::validation(reason, sql)),
    }
}

/// Escape a string value for a single-quoted SQL literal.
///
/// Used for CHECK constraint value lists, where DDL cannot take parameters.
///
/// # Examples
///
/// ```
/// use rivven_orm::security::escape_string_literal;
///
/// assert_eq!(escape_string_literal("active"), "active");
/// assert_eq!(escape_string_literal("don't"), "don''t");
/// ```
pub fn escape_string_literal(value: &str) -> String {
    // Fast path: no escaping needed (common case)
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}
