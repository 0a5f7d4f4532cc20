//! Value types for rivven-orm
//!
//! - [`Value`]: a database value travelling as a bound parameter or read from a row
//! - [`Row`]: ordered column labels and values
//! - [`ColumnType`]: the semantic type of an entity property
//! - [`FieldType`]: bridges Rust field types to column types and values
//! - [`ColumnMetadata`]: a live column as reported by the catalog

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Text formats accepted when a timestamp comes back as a string (SQLite).
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// SQL value type that can hold any supported database value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit signed integer (INTEGER)
    Int32(i32),
    /// 64-bit signed integer (BIGINT)
    Int64(i64),
    /// 64-bit floating point (DOUBLE PRECISION)
    Float64(f64),
    /// Text string (VARCHAR, TEXT)
    String(String),
    /// Binary data (BYTEA, BLOB)
    Bytes(Vec<u8>),
    /// Date without time (DATE)
    Date(NaiveDate),
    /// Timestamp without timezone (TIMESTAMP)
    DateTime(NaiveDateTime),
    /// Timestamp with timezone (TIMESTAMPTZ)
    DateTimeTz(DateTime<Utc>),
    /// UUID
    Uuid(Uuid),
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this value counts as an unassigned id: NULL, numeric zero,
    /// empty string or the nil UUID.
    pub fn is_unset_id(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Int32(n) => *n == 0,
            Self::Int64(n) => *n == 0,
            Self::String(s) => s.is_empty(),
            Self::Uuid(u) => u.is_nil(),
            _ => false,
        }
    }

    /// Get SQL type name
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOLEAN",
            Self::Int32(_) => "INTEGER",
            Self::Int64(_) => "BIGINT",
            Self::Float64(_) => "DOUBLE PRECISION",
            Self::String(_) => "VARCHAR",
            Self::Bytes(_) => "BYTEA",
            Self::Date(_) => "DATE",
            Self::DateTime(_) => "TIMESTAMP",
            Self::DateTimeTz(_) => "TIMESTAMPTZ",
            Self::Uuid(_) => "UUID",
        }
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int32(n) => Some(*n != 0),
            Self::Int64(n) => Some(*n != 0),
            Self::String(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Some(true),
                "false" | "f" | "no" | "n" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(n) => Some(i64::from(*n)),
            Self::Int64(n) => Some(*n),
            Self::Float64(n) if n.is_finite() && n.fract() == 0.0 => Some(*n as i64),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int32(n) => Some(f64::from(*n)),
            Self::Int64(n) => Some(*n as f64),
            Self::Float64(n) => Some(*n),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Try to convert to UUID
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            Self::String(s) => Uuid::parse_str(s).ok(),
            Self::Bytes(b) if b.len() == 16 => Uuid::from_slice(b).ok(),
            _ => None,
        }
    }

    /// Try to convert to a naive timestamp
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            Self::DateTimeTz(dt) => Some(dt.naive_utc()),
            Self::Date(d) => d.and_hms_opt(0, 0, 0),
            Self::String(s) => parse_datetime(s),
            _ => None,
        }
    }

    /// Convert to owned string representation
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Int32(n) => Some(n.to_string()),
            Self::Int64(n) => Some(n.to_string()),
            Self::Float64(n) => Some(n.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Uuid(u) => Some(u.to_string()),
            Self::Date(d) => Some(d.to_string()),
            Self::DateTime(dt) => Some(dt.to_string()),
            Self::DateTimeTz(dt) => Some(dt.to_rfc3339()),
            _ => None,
        }
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTimeTz(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Self::Null,
        }
    }
}

/// Database row as ordered column values
#[derive(Debug, Clone)]
pub struct Row {
    /// Column labels
    columns: Vec<String>,
    /// Column values (same order as columns)
    values: Vec<Value>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Get column count
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if row is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get column labels
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Get all values
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Get value by column index
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Get value by column label (case-insensitive)
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }

    /// Iterate over `(label, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Convert row to HashMap
    pub fn into_map(self) -> HashMap<String, Value> {
        self.columns.into_iter().zip(self.values).collect()
    }
}

/// Semantic type of an entity property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// Text; bounded when a max length is declared
    String,
    /// 32-bit integer
    Int,
    /// 64-bit integer
    Long,
    /// Double precision float
    Double,
    /// Boolean
    Bool,
    /// Calendar date
    Date,
    /// Timestamp without timezone
    Timestamp,
    /// Timestamp with timezone
    TimestampTz,
    /// UUID
    Uuid,
    /// Binary data
    Bytes,
}

impl ColumnType {
    /// Whether the type is an integer type (eligible for identity generation)
    #[inline]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::Int | Self::Long)
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Long => "long",
            Self::Double => "double",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::TimestampTz => "timestamptz",
            Self::Uuid => "uuid",
            Self::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// A Rust type usable as an entity property.
///
/// `#[derive(Entity)]` uses this trait to derive the column type and
/// nullability of each field and to move values in and out of rows.
pub trait FieldType: Sized {
    /// Semantic column type
    const COLUMN_TYPE: ColumnType;
    /// Whether the column accepts NULL
    const NULLABLE: bool = false;

    /// Convert the field into a bound parameter value
    fn to_value(&self) -> Value;

    /// Convert a row value into the field
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch<T>(expected: ColumnType, value: &Value) -> Result<T> {
    Err(Error::type_conversion(format!(
        "cannot convert {} value to {}",
        value.sql_type(),
        expected
    )))
}

impl FieldType for i32 {
    const COLUMN_TYPE: ColumnType = ColumnType::Int;

    fn to_value(&self) -> Value {
        Value::Int32(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value.as_i64() {
            Some(n) => i32::try_from(n)
                .map_err(|_| Error::type_conversion(format!("{} does not fit in int", n))),
            None => mismatch(Self::COLUMN_TYPE, &value),
        }
    }
}

impl FieldType for i64 {
    const COLUMN_TYPE: ColumnType = ColumnType::Long;

    fn to_value(&self) -> Value {
        Value::Int64(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value.as_i64() {
            Some(n) => Ok(n),
            None => mismatch(Self::COLUMN_TYPE, &value),
        }
    }
}

impl FieldType for f64 {
    const COLUMN_TYPE: ColumnType = ColumnType::Double;

    fn to_value(&self) -> Value {
        Value::Float64(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value.as_f64() {
            Some(n) => Ok(n),
            None => mismatch(Self::COLUMN_TYPE, &value),
        }
    }
}

impl FieldType for f32 {
    const COLUMN_TYPE: ColumnType = ColumnType::Double;

    fn to_value(&self) -> Value {
        Value::Float64(f64::from(*self))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value.as_f64() {
            Some(n) => Ok(n as f32),
            None => mismatch(Self::COLUMN_TYPE, &value),
        }
    }
}

impl FieldType for bool {
    const COLUMN_TYPE: ColumnType = ColumnType::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value.as_bool() {
            Some(b) => Ok(b),
            None => mismatch(Self::COLUMN_TYPE, &value),
        }
    }
}

impl FieldType for String {
    const COLUMN_TYPE: ColumnType = ColumnType::String;

    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s),
            Value::Bytes(b) => String::from_utf8(b)
                .map_err(|e| Error::type_conversion(format!("invalid UTF-8 text: {}", e))),
            other => match other.as_string() {
                Some(s) => Ok(s),
                None => mismatch(Self::COLUMN_TYPE, &other),
            },
        }
    }
}

impl FieldType for Vec<u8> {
    const COLUMN_TYPE: ColumnType = ColumnType::Bytes;

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            Value::String(s) => Ok(s.into_bytes()),
            other => mismatch(Self::COLUMN_TYPE, &other),
        }
    }
}

impl FieldType for NaiveDate {
    const COLUMN_TYPE: ColumnType = ColumnType::Date;

    fn to_value(&self) -> Value {
        Value::Date(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Date(d) => Ok(*d),
            Value::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| Error::type_conversion(format!("invalid date '{}': {}", s, e))),
            other => match other.as_datetime() {
                Some(dt) => Ok(dt.date()),
                None => mismatch(Self::COLUMN_TYPE, other),
            },
        }
    }
}

impl FieldType for NaiveDateTime {
    const COLUMN_TYPE: ColumnType = ColumnType::Timestamp;

    fn to_value(&self) -> Value {
        Value::DateTime(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value.as_datetime() {
            Some(dt) => Ok(dt),
            None => mismatch(Self::COLUMN_TYPE, &value),
        }
    }
}

impl FieldType for DateTime<Utc> {
    const COLUMN_TYPE: ColumnType = ColumnType::TimestampTz;

    fn to_value(&self) -> Value {
        Value::DateTimeTz(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::DateTimeTz(dt) => Ok(dt),
            other => match other.as_datetime() {
                Some(dt) => Ok(dt.and_utc()),
                None => mismatch(Self::COLUMN_TYPE, &other),
            },
        }
    }
}

impl FieldType for Uuid {
    const COLUMN_TYPE: ColumnType = ColumnType::Uuid;

    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value.as_uuid() {
            Some(u) => Ok(u),
            None => mismatch(Self::COLUMN_TYPE, &value),
        }
    }
}

impl<T: FieldType> FieldType for Option<T> {
    const COLUMN_TYPE: ColumnType = T::COLUMN_TYPE;
    const NULLABLE: bool = true;

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

/// Column as reported by catalog introspection
#[derive(Debug, Clone)]
pub struct ColumnMetadata {
    /// Column name
    pub name: String,
    /// SQL type name (vendor-specific)
    pub type_name: String,
    /// Whether column is nullable
    pub nullable: bool,
}

impl ColumnMetadata {
    /// Create basic column metadata
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_id() {
        assert!(Value::Null.is_unset_id());
        assert!(Value::Int64(0).is_unset_id());
        assert!(Value::Int32(0).is_unset_id());
        assert!(Value::String(String::new()).is_unset_id());
        assert!(Value::Uuid(Uuid::nil()).is_unset_id());

        assert!(!Value::Int64(7).is_unset_id());
        assert!(!Value::String("abc".into()).is_unset_id());
    }

    #[test]
    fn test_field_type_from_sqlite_shapes() {
        // SQLite hands back booleans as integers and timestamps as text
        assert!(bool::from_value(Value::Int64(1)).unwrap());
        assert_eq!(i32::from_value(Value::Int64(42)).unwrap(), 42);
        assert!(i32::from_value(Value::Int64(i64::MAX)).is_err());

        let dt = NaiveDateTime::from_value(Value::String("2024-03-01 10:11:12.5".into())).unwrap();
        assert_eq!(dt.to_string(), "2024-03-01 10:11:12.500");

        let id = Uuid::new_v4();
        assert_eq!(Uuid::from_value(Value::String(id.to_string())).unwrap(), id);
    }

    #[test]
    fn test_option_field_type() {
        assert!(<Option<String> as FieldType>::NULLABLE);
        assert!(!<String as FieldType>::NULLABLE);
        assert_eq!(Option::<i64>::from_value(Value::Null).unwrap(), None);
        assert_eq!(Some(5_i64).to_value(), Value::Int64(5));
        assert_eq!(None::<i64>.to_value(), Value::Null);
    }

    #[test]
    fn test_row_lookup_is_case_insensitive() {
        let row = Row::new(
            vec!["id".into(), "name".into()],
            vec![Value::Int64(1), Value::String("Alice".into())],
        );

        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0), Some(&Value::Int64(1)));
        assert_eq!(row.get_by_name("NAME"), Some(&Value::String("Alice".into())));
        assert!(row.get_by_name("missing").is_none());
    }

    #[test]
    fn test_value_mismatch_is_type_conversion() {
        let err = Uuid::from_value(Value::Bool(true)).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::TypeConversion);
    }

    #[test]
    fn test_booleans_are_not_integers() {
        assert_eq!(Value::Bool(true).as_i64(), None);
        assert!(i32::from_value(Value::Bool(true)).is_err());
        assert!(i64::from_value(Value::Bool(false)).is_err());
        assert!(!bool::from_value(Value::Int64(0)).unwrap());
    }
}
