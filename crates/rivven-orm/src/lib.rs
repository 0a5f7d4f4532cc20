//! # rivven-orm
//!
//! Entity-to-table mapping and transactional CRUD for Rivven services.
//!
//! An entity type describes its table once, usually through `#[derive(Entity)]`.
//! A [`Broker`] built for that type synchronizes the live schema and then
//! offers persistence operations that each run on a pooled connection inside
//! their own transaction.
//!
//! ## Features
//!
//! - **Compile-time Metadata**: Table, column, key and constraint shape derived from the entity type
//! - **Schema Synchronization**: Creates missing tables, additively adds columns and indexes
//! - **Generic Broker**: save, find, count, delete and paged reads for any entity
//! - **Connection Pooling**: Bounded pool with acquire timeout and health checks
//! - **SQL Dialect Abstraction**: Vendor-specific DDL and DML generation using sea-query
//! - **Injection Guard**: Identifier and fragment validation for every interpolated string
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_orm::prelude::*;
//!
//! #[derive(Debug, Default, Entity)]
//! #[entity(table = "customers")]
//! struct Customer {
//!     #[column(id)]
//!     id: i64,
//!     #[column(max_length = 120, unique)]
//!     email: String,
//!     nickname: Option<String>,
//! }
//!
//! let config = OrmConfig::new("sqlite::memory:").with_max_pool_size(4);
//! let pool = create_pool(&config)?;
//! let customers: Broker<Customer> = Broker::new(pool)?;
//!
//! let mut customer = Customer { email: "ada@example.com".into(), ..Default::default() };
//! let saved = customers.save(&mut customer)?;
//! assert!(customers.exists(saved.id)?);
//!
//! let page = customers.find_all_paged(0, 20)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlite` - SQLite support via rusqlite (default)
//! - `postgres` - PostgreSQL support via the blocking postgres client
//! - `derive` - `#[derive(Entity)]` (default)
//! - `full` - All features enabled

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

extern crate self as rivven_orm;

pub mod broker;
pub mod coerce;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod metadata;
pub mod pool;
pub mod query;
pub mod schema;
pub mod security;
pub mod transaction;
pub mod types;

// Backend implementations (conditionally compiled)
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Configuration
    pub use crate::config::{OrmConfig, PoolSettings};

    // Value and type system
    pub use crate::types::{ColumnMetadata, ColumnType, FieldType, Row, Value};

    // Connection traits and config
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, DatabaseType, InsertOutcome,
    };

    // Pool types
    pub use crate::pool::{
        create_pool, create_pool_with_config, ConnectionPool, PoolBuilder, PoolConfig, PoolStats,
        PooledConnection, SimpleConnectionPool,
    };

    // Transactions
    pub use crate::transaction::{in_transaction, TransactionScope};

    // Dialect types
    pub use crate::dialect::{dialect_for, PostgresDialect, SqlDialect, SqliteDialect};

    // Entity metadata
    pub use crate::metadata::{
        Entity, EntityDescriptor, EntityMetadata, FieldDescriptor, IdStrategy, MetadataOptions,
        TableMetadata,
    };

    // Schema types
    pub use crate::schema::{SchemaSyncMode, SchemaSyncReport, SchemaSynchronizer};

    // Broker and queries
    pub use crate::broker::{Broker, BrokerBuilder};
    pub use crate::query::{Query, QueryOutcome, QueryResult};

    #[cfg(feature = "derive")]
    pub use rivven_orm_derive::Entity;
}

// Re-export commonly used items at crate root
pub use broker::Broker;
pub use error::{Error, Result};
pub use metadata::Entity;
pub use types::{ColumnType, FieldType, Row, Value};

#[cfg(feature = "derive")]
pub use rivven_orm_derive::Entity;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _value = Value::Int32(42);
        let _config = ConnectionConfig::new("sqlite::memory:");
        let _orm = OrmConfig::default();
        assert_eq!(SchemaSyncMode::default(), SchemaSyncMode::CreateAndEvolve);
        assert_eq!(IdStrategy::default(), IdStrategy::Identity);
    }

    #[test]
    fn test_error_types() {
        let err = Error::connection("test error");
        assert!(err.is_retriable());
        assert_eq!(err.category(), ErrorCategory::Connection);
    }

    #[test]
    fn test_value_types() {
        let v = Value::from(42_i32);
        assert!(!v.is_null());
        assert_eq!(v.as_i64(), Some(42));

        let v = Value::from("hello");
        assert_eq!(v.as_str(), Some("hello"));
    }

    #[test]
    fn test_dialect_selection() {
        let pg = dialect_for("postgres").unwrap();
        assert_eq!(pg.name(), "PostgreSQL");

        let sqlite = dialect_for("sqlite").unwrap();
        assert_eq!(sqlite.name(), "SQLite");

        assert!(dialect_for("oracle").is_none());
    }
}
