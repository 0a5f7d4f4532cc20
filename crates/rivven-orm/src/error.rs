//! Error types for rivven-orm
//!
//! Every failure maps onto one [`ErrorCategory`] so callers can pattern-match
//! on the kind of failure instead of inspecting messages:
//! - Configuration errors (no primary key, missing id field) are fatal at
//!   broker construction and never retried
//! - Data-integrity and validation errors are caller-correctable
//! - Mapping errors wrap row/field conversion failures
//! - Database errors carry the offending SQL and table for diagnostics
//!
//! `Display` renders the user-facing message only. The SQL, table and
//! underlying driver error are available through [`Error::technical_detail`]
//! for logging.

use std::fmt;
use thiserror::Error;

/// Result type for rivven-orm operations
pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Entity or broker misconfiguration
    Configuration,
    /// Caller supplied data that cannot be persisted as-is
    DataIntegrity,
    /// Row or field mapping failure
    Mapping,
    /// Database/driver failure
    Database,
    /// DDL failure during schema synchronization
    Schema,
    /// Rejected SQL fragment
    Validation,
    /// Type conversion errors
    TypeConversion,
    /// Expected row does not exist
    NotFound,
    /// Connection-related errors (retriable)
    Connection,
    /// Timeout errors (retriable)
    Timeout,
    /// Pool exhausted (retriable with backoff)
    PoolExhausted,
    /// Transaction errors
    Transaction,
    /// Expected outcome missing (zero rows, no generated key)
    Unknown,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout | Self::PoolExhausted)
    }
}

/// Driver-level failure classes reported by backends.
///
/// Backends classify their native errors into one of these kinds and hand
/// them to [`Error::from_driver`], which maps them onto the taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Unique, not-null, check or foreign key violation
    Constraint,
    /// Connectivity failure
    Connection,
    /// Lock wait or statement timeout
    Timeout,
    /// Deadlock or serialization failure
    Deadlock,
    /// Anything else
    Other,
}

/// Main error type for rivven-orm
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Entity or broker misconfiguration
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Data cannot be persisted (null id, no persistable fields, constraint)
    #[error("data integrity error: {message}")]
    DataIntegrity {
        message: String,
        detail: Option<String>,
        #[source]
        source: Option<BoxError>,
    },

    /// Row to entity (or entity to row) mapping failed
    #[error("internal mapping error: {message}")]
    Mapping {
        message: String,
        detail: Option<String>,
        #[source]
        source: Option<BoxError>,
    },

    /// Statement execution failed
    #[error("database error: {message}")]
    Database {
        message: String,
        sql: Option<String>,
        table: Option<String>,
        #[source]
        source: Option<BoxError>,
    },

    /// DDL failed while synchronizing a table
    #[error("schema error on table {table}: {message}")]
    Schema {
        message: String,
        table: String,
        sql: Option<String>,
        #[source]
        source: Option<BoxError>,
    },

    /// A dynamic SQL fragment was rejected
    #[error("invalid SQL fragment: {message}")]
    Validation { message: String, fragment: String },

    /// Type conversion failed
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },

    /// Row not found
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Connection failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Operation timed out
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Connection pool exhausted
    #[error("pool exhausted: {message}")]
    PoolExhausted { message: String },

    /// Transaction control failed
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// An expected effect did not happen
    #[error("unexpected outcome: {message}")]
    Unknown {
        message: String,
        detail: Option<String>,
    },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::DataIntegrity { .. } => ErrorCategory::DataIntegrity,
            Self::Mapping { .. } => ErrorCategory::Mapping,
            Self::Database { .. } => ErrorCategory::Database,
            Self::Schema { .. } => ErrorCategory::Schema,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::PoolExhausted { .. } => ErrorCategory::PoolExhausted,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Unknown { .. } => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Message safe to show to end users (no SQL, no driver internals)
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// Technical detail for logs: SQL, table, fragment and the source chain.
    pub fn technical_detail(&self) -> Option<String> {
        let mut parts = Vec::new();

        match self {
            Self::Database { sql, table, .. } => {
                if let Some(table) = table {
                    parts.push(format!("table={}", table));
                }
                if let Some(sql) = sql {
                    parts.push(format!("sql={}", sql));
                }
            }
            Self::Schema { sql, table, .. } => {
                parts.push(format!("table={}", table));
                if let Some(sql) = sql {
                    parts.push(format!("sql={}", sql));
                }
            }
            Self::Validation { fragment, .. } => parts.push(format!("fragment={}", fragment)),
            Self::DataIntegrity { detail, .. }
            | Self::Mapping { detail, .. }
            | Self::Unknown { detail, .. } => {
                if let Some(detail) = detail {
                    parts.push(detail.clone());
                }
            }
            _ => {}
        }

        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            parts.push(format!("caused by: {}", err));
            source = err.source();
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }

    /// Map a classified driver error onto the taxonomy
    pub fn from_driver(
        kind: DriverErrorKind,
        message: impl Into<String>,
        sql: Option<&str>,
        source: Option<BoxError>,
    ) -> Self {
        let message = message.into();
        match kind {
            DriverErrorKind::Constraint => Self::DataIntegrity {
                message,
                detail: sql.map(|s| format!("sql={}", s)),
                source,
            },
            DriverErrorKind::Connection => Self::Connection { message, source },
            DriverErrorKind::Timeout => Self::Timeout { message },
            DriverErrorKind::Deadlock => Self::Transaction { message, source },
            DriverErrorKind::Other => Self::Database {
                message,
                sql: sql.map(String::from),
                table: None,
                source,
            },
        }
    }

    /// Attach the table name to a database error
    pub fn with_table(mut self, name: impl Into<String>) -> Self {
        if let Self::Database { table, .. } = &mut self {
            if table.is_none() {
                *table = Some(name.into());
            }
        }
        self
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a data integrity error
    pub fn data_integrity(message: impl Into<String>) -> Self {
        Self::DataIntegrity {
            message: message.into(),
            detail: None,
            source: None,
        }
    }

    /// Create a mapping error with technical detail
    pub fn mapping(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Mapping {
            message: message.into(),
            detail: Some(detail.into()),
            source: None,
        }
    }

    /// Create a database error with SQL
    pub fn database_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql: Some(sql.into()),
            table: None,
            source: None,
        }
    }

    /// Create a schema error for a failed DDL statement
    pub fn schema(message: impl Into<String>, table: impl Into<String>, sql: Option<String>) -> Self {
        Self::Schema {
            message: message.into(),
            table: table.into(),
            sql,
            source: None,
        }
    }

    /// Create a validation error naming the rejected fragment
    pub fn validation(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            fragment: fragment.into(),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Create an unknown-outcome error
    pub fn unknown(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
            detail: Some(detail.into()),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::DataIntegrity => write!(f, "data_integrity"),
            Self::Mapping => write!(f, "mapping"),
            Self::Database => write!(f, "database"),
            Self::Schema => write!(f, "schema"),
            Self::Validation => write!(f, "validation"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::NotFound => write!(f, "not_found"),
            Self::Connection => write!(f, "connection"),
            Self::Timeout => write!(f, "timeout"),
            Self::PoolExhausted => write!(f, "pool_exhausted"),
            Self::Transaction => write!(f, "transaction"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}
