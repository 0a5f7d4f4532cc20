//! Type and SQL coercion helpers
//!
//! Pure functions mapping semantic column types to native SQL types and
//! converting database values into the types entity fields expect.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::dialect::SqlDialect;
use crate::error::{Error, Result};
use crate::metadata::{ColumnDef, Entity, EntityMetadata};
use crate::types::{ColumnType, Value};

/// Native SQL type of a column.
///
/// Columns referencing another entity take the type of that entity's id.
pub fn sql_type_for(dialect: &dyn SqlDialect, column: &ColumnDef) -> Result<String> {
    match column.references {
        Some(target) => {
            let target = target()?;
            Ok(dialect.native_type(target.column_type, target.max_length))
        }
        None => Ok(dialect.native_type(column.column_type, column.max_length)),
    }
}

/// Native SQL type of the id column of entity `U`
pub fn foreign_key_sql_type<U: Entity>(dialect: &dyn SqlDialect) -> Result<String> {
    let meta = EntityMetadata::<U>::build()?;
    let id = meta.table().id_column_def();
    Ok(dialect.native_type(id.column_type, id.max_length))
}

/// Parse a textual value into a value of the given column type
pub fn convert_to_field_type(text: &str, column_type: ColumnType) -> Result<Value> {
    let trimmed = text.trim();
    let unsupported = || {
        Error::type_conversion(format!("cannot convert '{}' to {}", text, column_type))
    };
    match column_type {
        ColumnType::String => Ok(Value::String(text.to_string())),
        ColumnType::Int => trimmed.parse().map(Value::Int32).map_err(|_| unsupported()),
        ColumnType::Long => trimmed.parse().map(Value::Int64).map_err(|_| unsupported()),
        ColumnType::Double => trimmed.parse().map(Value::Float64).map_err(|_| unsupported()),
        ColumnType::Bool => Value::String(trimmed.to_string())
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(unsupported),
        ColumnType::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|_| unsupported()),
        ColumnType::Timestamp => Value::String(trimmed.to_string())
            .as_datetime()
            .map(Value::DateTime)
            .ok_or_else(unsupported),
        ColumnType::TimestampTz => Value::String(trimmed.to_string())
            .as_datetime()
            .map(|dt| Value::DateTimeTz(dt.and_utc()))
            .ok_or_else(unsupported),
        ColumnType::Uuid => Uuid::parse_str(trimmed)
            .map(Value::Uuid)
            .map_err(|_| unsupported()),
        ColumnType::Bytes => Ok(Value::Bytes(text.as_bytes().to_vec())),
    }
}

/// Convert a generated key returned by the driver into the id column's type
pub fn convert_generated_key(key: Value, id_type: ColumnType) -> Result<Value> {
    let mismatch = |key: &Value| {
        Error::type_conversion(format!(
            "generated key of type {} cannot be used as a {} id",
            key.sql_type(),
            id_type
        ))
    };
    match id_type {
        ColumnType::Int => {
            let n = key.as_i64().ok_or_else(|| mismatch(&key))?;
            i32::try_from(n)
                .map(Value::Int32)
                .map_err(|_| Error::type_conversion(format!("generated key {} overflows int", n)))
        }
        ColumnType::Long => key.as_i64().map(Value::Int64).ok_or_else(|| mismatch(&key)),
        ColumnType::Uuid => key.as_uuid().map(Value::Uuid).ok_or_else(|| mismatch(&key)),
        ColumnType::String => key.as_string().map(Value::String).ok_or_else(|| mismatch(&key)),
        _ => Err(mismatch(&key)),
    }
}

/// Adjust a bound value to the column it is written to
pub fn coerce_for_column(value: Value, column_type: ColumnType) -> Result<Value> {
    match (column_type, value) {
        (_, Value::Null) => Ok(Value::Null),
        (ColumnType::Int, Value::Int64(n)) => i32::try_from(n)
            .map(Value::Int32)
            .map_err(|_| Error::type_conversion(format!("{} does not fit in int", n))),
        (ColumnType::Long, Value::Int32(n)) => Ok(Value::Int64(i64::from(n))),
        (ColumnType::Double, Value::Int32(n)) => Ok(Value::Float64(f64::from(n))),
        (ColumnType::Double, Value::Int64(n)) => Ok(Value::Float64(n as f64)),
        (ColumnType::Timestamp, Value::DateTimeTz(dt)) => Ok(Value::DateTime(dt.naive_utc())),
        (ColumnType::TimestampTz, Value::DateTime(dt)) => Ok(Value::DateTimeTz(dt.and_utc())),
        (ColumnType::Timestamp, Value::Date(d)) => Ok(d
            .and_hms_opt(0, 0, 0)
            .map(Value::DateTime)
            .unwrap_or(Value::Date(d))),
        (ColumnType::String, Value::String(s)) => Ok(Value::String(s)),
        // Non-text values written to a text column keep their rendering;
        // values without one are left for the database to reject
        (ColumnType::String, v) => Ok(v.as_string().map(Value::String).unwrap_or(v)),
        (ct, Value::String(s)) => convert_to_field_type(&s, ct),
        (_, v) => Ok(v),
    }
}
