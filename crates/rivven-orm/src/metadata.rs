//! Entity metadata for rivven-orm
//!
//! An entity describes itself once through [`Entity::descriptor`], usually
//! generated by `#[derive(Entity)]`. [`EntityMetadata::build`] turns that
//! descriptor into an immutable [`TableMetadata`] plus an accessor table
//! indexed by column position, so per-call field access is a plain function
//! pointer call.
//!
//! # Example
//!
//! ```rust
//! use rivven_orm::metadata::{Entity, EntityDescriptor, FieldDescriptor, IdStrategy};
//!
//! #[derive(Debug, Default)]
//! struct Tag {
//!     id: i64,
//!     label: String,
//! }
//!
//! impl Entity for Tag {
//!     fn descriptor() -> EntityDescriptor<Self> {
//!         EntityDescriptor::<Self>::new("tags")
//!             .field(
//!                 FieldDescriptor::typed::<i64>("id", |t: &Tag| t.id.into(), |t: &mut Tag, v| {
//!                     t.id = rivven_orm::FieldType::from_value(v)?;
//!                     Ok(())
//!                 })
//!                 .primary_key(IdStrategy::Identity),
//!             )
//!             .field(
//!                 FieldDescriptor::typed::<String>("label", |t: &Tag| t.label.clone().into(), |t: &mut Tag, v| {
//!                     t.label = rivven_orm::FieldType::from_value(v)?;
//!                     Ok(())
//!                 })
//!                 .max_length(32)
//!                 .unique(),
//!             )
//!     }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::security;
use crate::types::{ColumnType, FieldType, Value};

/// Reads a field as a bound value
pub type Getter<T> = fn(&T) -> Value;

/// Writes a row value into a field
pub type Setter<T> = fn(&mut T, Value) -> Result<()>;

/// Resolves the id column of a referenced entity
pub type ForeignKeyTarget = fn() -> Result<ForeignKeyRef>;

/// A record type mapped to one table.
pub trait Entity: Default + Send + Sync + 'static {
    /// Describe the table and fields of this entity
    fn descriptor() -> EntityDescriptor<Self>;
}

/// How primary key values are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IdStrategy {
    /// The caller assigns ids
    None,
    /// The database (or, for UUID ids, the engine) generates ids on insert
    #[default]
    Identity,
    /// Ids are drawn from a dedicated sequence
    Sequence,
}

impl IdStrategy {
    /// Whether ids are generated rather than assigned by the caller
    pub const fn is_generated(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Strategy used when a primary key declares none: generated for
    /// integer and UUID ids, caller-assigned otherwise
    pub fn default_for(column_type: ColumnType) -> Self {
        if column_type.is_integer() || column_type == ColumnType::Uuid {
            Self::Identity
        } else {
            Self::None
        }
    }
}

impl fmt::Display for IdStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Identity => write!(f, "IDENTITY"),
            Self::Sequence => write!(f, "SEQUENCE"),
        }
    }
}

/// Declared shape of one entity field
pub struct FieldDescriptor<T> {
    field: &'static str,
    column: Option<String>,
    column_type: ColumnType,
    nullable: bool,
    max_length: Option<u32>,
    primary_key: Option<IdStrategy>,
    unique: bool,
    indexed: bool,
    allowed_values: Vec<String>,
    check: Option<String>,
    references: Option<ForeignKeyTarget>,
    getter: Getter<T>,
    setter: Setter<T>,
}

impl<T> FieldDescriptor<T> {
    /// Describe a field with an explicit column type (not null by default)
    pub fn new(
        field: &'static str,
        column_type: ColumnType,
        getter: Getter<T>,
        setter: Setter<T>,
    ) -> Self {
        Self {
            field,
            column: None,
            column_type,
            nullable: false,
            max_length: None,
            primary_key: None,
            unique: false,
            indexed: false,
            allowed_values: Vec::new(),
            check: None,
            references: None,
            getter,
            setter,
        }
    }

    /// Describe a field taking type and nullability from its Rust type
    pub fn typed<F: FieldType>(field: &'static str, getter: Getter<T>, setter: Setter<T>) -> Self {
        Self::new(field, F::COLUMN_TYPE, getter, setter).nullable(F::NULLABLE)
    }

    /// Override the column name (defaults to the field name)
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.column = Some(name.into());
        self
    }

    /// Set nullability
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Bound string columns to `len` characters
    pub fn max_length(mut self, len: u32) -> Self {
        self.max_length = Some(len);
        self
    }

    /// Mark as the primary key
    pub fn primary_key(mut self, strategy: IdStrategy) -> Self {
        self.primary_key = Some(strategy);
        self
    }

    /// Add a uniqueness constraint
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Request an index
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Restrict the column to an enumerated value domain
    pub fn one_of<S: AsRef<str>>(mut self, values: &[S]) -> Self {
        self.allowed_values = values.iter().map(|v| v.as_ref().to_string()).collect();
        self
    }

    /// Add a CHECK expression over this column
    pub fn check(mut self, expression: impl Into<String>) -> Self {
        self.check = Some(expression.into());
        self
    }

    /// Mark the column as holding the primary key of entity `U`
    pub fn references<U: Entity>(mut self) -> Self {
        self.references = Some(foreign_key_target::<U>);
        self
    }

    /// Field name
    pub fn field_name(&self) -> &'static str {
        self.field
    }

    fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(self.field)
    }
}

impl<T> fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("field", &self.field)
            .field("column", &self.column_name())
            .field("column_type", &self.column_type)
            .field("nullable", &self.nullable)
            .field("primary_key", &self.primary_key)
            .finish_non_exhaustive()
    }
}

/// Declared shape of an entity: table name plus fields in declaration order
#[derive(Debug)]
pub struct EntityDescriptor<T> {
    table: String,
    fields: Vec<FieldDescriptor<T>>,
}

impl<T> EntityDescriptor<T> {
    /// Start a descriptor for `table`
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field
    pub fn field(mut self, field: FieldDescriptor<T>) -> Self {
        self.fields.push(field);
        self
    }

    /// Table name
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Declared fields
    pub fn fields(&self) -> &[FieldDescriptor<T>] {
        &self.fields
    }
}

/// Id column of a referenced entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    /// Referenced table
    pub table: String,
    /// Referenced id column
    pub column: String,
    /// Type of the referenced id
    pub column_type: ColumnType,
    /// Length bound of the referenced id, if any
    pub max_length: Option<u32>,
}

/// Build the [`ForeignKeyRef`] for entity `U`
pub fn foreign_key_target<U: Entity>() -> Result<ForeignKeyRef> {
    let meta = EntityMetadata::<U>::build()?;
    let id = meta.table().id_column_def();
    Ok(ForeignKeyRef {
        table: meta.table().table_name.clone(),
        column: id.name.clone(),
        column_type: id.column_type,
        max_length: id.max_length,
    })
}

/// One mapped column
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Entity field name
    pub field: String,
    /// Column name
    pub name: String,
    /// Semantic type
    pub column_type: ColumnType,
    /// Whether NULL is accepted
    pub nullable: bool,
    /// Length bound for strings
    pub max_length: Option<u32>,
    /// Whether this is the primary key
    pub primary_key: bool,
    /// Whether a uniqueness constraint applies
    pub unique: bool,
    /// Whether an index was requested
    pub indexed: bool,
    /// Referenced entity, resolved lazily
    pub references: Option<ForeignKeyTarget>,
}

/// Body of a CHECK constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckKind {
    /// `column IN (...)`; values are kept as SQL literals
    AllowedValues(Vec<String>),
    /// A validated comparison-chain expression
    Expression(String),
}

/// A value-domain check on one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckConstraint {
    /// Constrained column
    pub column: String,
    /// Constraint body
    pub kind: CheckKind,
}

impl CheckConstraint {
    /// Render the CHECK body (without the `CHECK` keyword)
    pub fn to_sql(&self, quoted_column: &str) -> String {
        match &self.kind {
            CheckKind::AllowedValues(values) => {
                format!("{} IN ({})", quoted_column, values.join(", "))
            }
            CheckKind::Expression(expr) => expr.clone(),
        }
    }
}

/// Immutable description of an entity's table
#[derive(Debug, Clone)]
pub struct TableMetadata {
    /// Table name
    pub table_name: String,
    /// Entity field holding the primary key
    pub id_field: String,
    /// Primary key column
    pub id_column: String,
    /// Id generation strategy
    pub id_strategy: IdStrategy,
    /// Columns, primary key first, then declaration order
    pub columns: Vec<ColumnDef>,
    /// Columns carrying a uniqueness constraint (excluding the primary key)
    pub unique_columns: BTreeSet<String>,
    /// Columns with an index hint (excluding the primary key)
    pub indexed_columns: BTreeSet<String>,
    /// Value-domain checks
    pub check_constraints: Vec<CheckConstraint>,
}

impl TableMetadata {
    /// Field name to column name mapping
    pub fn field_to_column(&self) -> BTreeMap<&str, &str> {
        self.columns
            .iter()
            .map(|c| (c.field.as_str(), c.name.as_str()))
            .collect()
    }

    /// Look up a column by name (case-insensitive)
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Look up a column by entity field name
    pub fn column_for_field(&self, field: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.field == field)
    }

    /// The primary key column
    pub fn id_column_def(&self) -> &ColumnDef {
        // build() always places the primary key first
        &self.columns[0]
    }

    /// Name of the backing sequence for `SEQUENCE` ids
    pub fn sequence_name(&self) -> String {
        format!("{}_{}_seq", self.table_name, self.id_column)
    }

    /// Check constraints on one column
    pub fn checks_for(&self, column: &str) -> impl Iterator<Item = &CheckConstraint> + '_ {
        let column = column.to_string();
        self.check_constraints
            .iter()
            .filter(move |c| c.column == column)
    }
}

/// Options for building metadata
#[derive(Debug, Clone, Default)]
pub struct MetadataOptions {
    /// Use this field (or column) as the primary key instead of the
    /// declared marker. Missing fields are a configuration error.
    pub id_field: Option<String>,
}

impl MetadataOptions {
    /// Override the primary key field
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = Some(field.into());
        self
    }
}

struct Accessor<T> {
    getter: Getter<T>,
    setter: Setter<T>,
}

/// Table metadata plus the accessor table of an entity type
pub struct EntityMetadata<T> {
    table: TableMetadata,
    accessors: Vec<Accessor<T>>,
}

impl<T> fmt::Debug for EntityMetadata<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMetadata")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl<T: Entity> EntityMetadata<T> {
    /// Build metadata using the declared primary key marker
    pub fn build() -> Result<Self> {
        Self::build_with(&MetadataOptions::default())
    }

    /// Build metadata with options
    pub fn build_with(options: &MetadataOptions) -> Result<Self> {
        Self::from_descriptor(T::descriptor(), options)
    }
}

impl<T> EntityMetadata<T> {
    /// Build metadata from an explicit descriptor
    pub fn from_descriptor(descriptor: EntityDescriptor<T>, options: &MetadataOptions) -> Result<Self> {
        let EntityDescriptor { table, fields } = descriptor;

        if !security::is_valid_identifier(&table) {
            return Err(Error::config(format!("invalid table name '{}'", table)));
        }
        if fields.is_empty() {
            return Err(Error::config(format!("entity for table '{}' has no fields", table)));
        }

        let id_index = find_primary_key(&table, &fields, options)?;

        let mut seen = HashSet::new();
        for field in &fields {
            let name = field.column_name();
            if !security::is_valid_identifier(name) {
                return Err(Error::config(format!(
                    "invalid column name '{}' for field '{}' of table '{}'",
                    name, field.field, table
                )));
            }
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(Error::config(format!(
                    "duplicate column '{}' in table '{}'",
                    name, table
                )));
            }
        }

        let id = &fields[id_index];
        let id_strategy = id
            .primary_key
            .unwrap_or_else(|| IdStrategy::default_for(id.column_type));
        match id_strategy {
            IdStrategy::Identity
                if !(id.column_type.is_integer() || id.column_type == ColumnType::Uuid) =>
            {
                return Err(Error::config(format!(
                    "IDENTITY id '{}' of table '{}' must be an integer or UUID, found {}",
                    id.field, table, id.column_type
                )));
            }
            IdStrategy::Sequence if !id.column_type.is_integer() => {
                return Err(Error::config(format!(
                    "SEQUENCE id '{}' of table '{}' must be an integer, found {}",
                    id.field, table, id.column_type
                )));
            }
            _ => {}
        }

        let id_field = id.field.to_string();
        let id_column = id.column_name().to_string();

        let mut order: Vec<usize> = Vec::with_capacity(fields.len());
        order.push(id_index);
        order.extend((0..fields.len()).filter(|i| *i != id_index));

        let mut columns = Vec::with_capacity(fields.len());
        let mut accessors = Vec::with_capacity(fields.len());
        let mut unique_columns = BTreeSet::new();
        let mut indexed_columns = BTreeSet::new();
        let mut check_constraints = Vec::new();

        let mut fields: Vec<Option<FieldDescriptor<T>>> = fields.into_iter().map(Some).collect();
        for idx in order {
            let Some(field) = fields[idx].take() else {
                continue;
            };
            let primary_key = idx == id_index;
            let name = field.column_name().to_string();

            if !primary_key {
                if field.unique {
                    unique_columns.insert(name.clone());
                }
                if field.indexed {
                    indexed_columns.insert(name.clone());
                }
            }

            if !field.allowed_values.is_empty() {
                let values = field
                    .allowed_values
                    .iter()
                    .map(|v| check_literal(&table, &name, field.column_type, v))
                    .collect::<Result<Vec<_>>>()?;
                check_constraints.push(CheckConstraint {
                    column: name.clone(),
                    kind: CheckKind::AllowedValues(values),
                });
            }
            if let Some(expr) = &field.check {
                if expr.contains('?') {
                    return Err(Error::config(format!(
                        "check expression on {}.{} cannot use bound parameters",
                        table, name
                    )));
                }
                security::validate_where_clause(expr).map_err(|e| {
                    Error::config(format!(
                        "invalid check expression on {}.{}: {}",
                        table, name, e
                    ))
                })?;
                check_constraints.push(CheckConstraint {
                    column: name.clone(),
                    kind: CheckKind::Expression(expr.clone()),
                });
            }

            columns.push(ColumnDef {
                field: field.field.to_string(),
                name,
                column_type: field.column_type,
                nullable: field.nullable && !primary_key,
                max_length: field.max_length,
                primary_key,
                unique: field.unique || primary_key,
                indexed: field.indexed,
                references: field.references,
            });
            accessors.push(Accessor {
                getter: field.getter,
                setter: field.setter,
            });
        }

        Ok(Self {
            table: TableMetadata {
                table_name: table,
                id_field,
                id_column,
                id_strategy,
                columns,
                unique_columns,
                indexed_columns,
                check_constraints,
            },
            accessors,
        })
    }

    /// Table metadata
    pub fn table(&self) -> &TableMetadata {
        &self.table
    }

    /// Number of mapped columns
    pub fn len(&self) -> usize {
        self.accessors.len()
    }

    /// Whether no columns are mapped
    pub fn is_empty(&self) -> bool {
        self.accessors.is_empty()
    }

    /// Read the value of column `idx`
    pub fn value_at(&self, entity: &T, idx: usize) -> Value {
        (self.accessors[idx].getter)(entity)
    }

    /// Write `value` into column `idx`
    pub fn set_at(&self, entity: &mut T, idx: usize, value: Value) -> Result<()> {
        let column = &self.table.columns[idx];
        (self.accessors[idx].setter)(entity, value).map_err(|e| {
            Error::mapping(
                format!("cannot set field '{}'", column.field),
                format!("table={} column={} cause={}", self.table.table_name, column.name, e),
            )
        })
    }

    /// Current primary key value
    pub fn id_value(&self, entity: &T) -> Value {
        self.value_at(entity, 0)
    }

    /// Write the primary key value
    pub fn set_id(&self, entity: &mut T, value: Value) -> Result<()> {
        self.set_at(entity, 0, value)
    }

    /// Position of the column with the given label (case-insensitive)
    pub fn column_index(&self, label: &str) -> Option<usize> {
        self.table
            .columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(label))
    }

    /// Non-id columns whose current value is not NULL
    pub fn persistable_values(&self, entity: &T) -> Vec<(&str, Value)> {
        (1..self.accessors.len())
            .map(|idx| (self.table.columns[idx].name.as_str(), self.value_at(entity, idx)))
            .filter(|(_, v)| !v.is_null())
            .collect()
    }
}

fn find_primary_key<T>(
    table: &str,
    fields: &[FieldDescriptor<T>],
    options: &MetadataOptions,
) -> Result<usize> {
    if let Some(wanted) = options.id_field.as_deref() {
        return fields
            .iter()
            .position(|f| f.field == wanted || f.column_name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                Error::config(format!(
                    "id field '{}' not found on entity for table '{}'",
                    wanted, table
                ))
            });
    }

    let marked: Vec<usize> = fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.primary_key.is_some())
        .map(|(i, _)| i)
        .collect();

    match marked.as_slice() {
        [idx] => Ok(*idx),
        [] => Err(Error::config(format!(
            "no primary key declared for table '{}'",
            table
        ))),
        _ => Err(Error::config(format!(
            "table '{}' declares {} primary keys, expected exactly one",
            table,
            marked.len()
        ))),
    }
}

/// Render an allowed value as a SQL literal suited to the column type
fn check_literal(table: &str, column: &str, column_type: ColumnType, value: &str) -> Result<String> {
    match column_type {
        ColumnType::Int | ColumnType::Long => value
            .trim()
            .parse::<i64>()
            .map(|n| n.to_string())
            .map_err(|_| invalid_allowed(table, column, value)),
        ColumnType::Double => value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(|n| n.to_string())
            .ok_or_else(|| invalid_allowed(table, column, value)),
        ColumnType::Bool => match value.trim().to_ascii_lowercase().as_str() {
            "true" => Ok("TRUE".to_string()),
            "false" => Ok("FALSE".to_string()),
            _ => Err(invalid_allowed(table, column, value)),
        },
        _ => Ok(format!("'{}'", security::escape_string_literal(value))),
    }
}

fn invalid_allowed(table: &str, column: &str, value: &str) -> Error {
    Error::config(format!(
        "allowed value '{}' does not match the type of {}.{}",
        value, table, column
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Account {
        id: i64,
        email: String,
        tier: String,
        nickname: Option<String>,
    }

    fn account_fields() -> EntityDescriptor<Account> {
        EntityDescriptor::<Account>::new("accounts")
            .field(
                FieldDescriptor::typed::<String>(
                    "email",
                    |a: &Account| a.email.to_value(),
                    |a: &mut Account, v| {
                        a.email = FieldType::from_value(v)?;
                        Ok(())
                    },
                )
                .max_length(120)
                .unique()
                .indexed(),
            )
            .field(
                FieldDescriptor::typed::<i64>(
                    "id",
                    |a: &Account| a.id.to_value(),
                    |a: &mut Account, v| {
                        a.id = FieldType::from_value(v)?;
                        Ok(())
                    },
                )
                .column("account_id")
                .primary_key(IdStrategy::Identity),
            )
            .field(
                FieldDescriptor::typed::<String>(
                    "tier",
                    |a: &Account| a.tier.to_value(),
                    |a: &mut Account, v| {
                        a.tier = FieldType::from_value(v)?;
                        Ok(())
                    },
                )
                .one_of(&["free", "pro"]),
            )
            .field(FieldDescriptor::typed::<Option<String>>(
                "nickname",
                |a: &Account| a.nickname.to_value(),
                |a: &mut Account, v| {
                    a.nickname = FieldType::from_value(v)?;
                    Ok(())
                },
            ))
    }

    impl Entity for Account {
        fn descriptor() -> EntityDescriptor<Self> {
            account_fields()
        }
    }

    #[test]
    fn test_primary_key_first_and_mapping() {
        let meta = EntityMetadata::<Account>::build().unwrap();
        let table = meta.table();

        assert_eq!(table.table_name, "accounts");
        assert_eq!(table.id_field, "id");
        assert_eq!(table.id_column, "account_id");
        assert_eq!(table.id_strategy, IdStrategy::Identity);
        assert_eq!(table.columns[0].name, "account_id");
        assert!(table.columns[0].primary_key);
        assert_eq!(table.field_to_column().get("id"), Some(&"account_id"));
        assert!(table.unique_columns.contains("email"));
        assert!(table.indexed_columns.contains("email"));
        assert!(table.column("NICKNAME").unwrap().nullable);
        assert!(!table.column("tier").unwrap().nullable);
        assert_eq!(table.sequence_name(), "accounts_account_id_seq");
    }

    #[test]
    fn test_allowed_values_become_quoted_literals() {
        let meta = EntityMetadata::<Account>::build().unwrap();
        let check = meta.table().checks_for("tier").next().unwrap();
        assert_eq!(check.to_sql("\"tier\""), "\"tier\" IN ('free', 'pro')");
    }

    #[test]
    fn test_accessors_follow_column_order() {
        let meta = EntityMetadata::<Account>::build().unwrap();
        let mut account = Account {
            email: "a@example.com".into(),
            tier: "free".into(),
            ..Default::default()
        };

        assert_eq!(meta.id_value(&account), Value::Int64(0));
        meta.set_id(&mut account, Value::Int64(9)).unwrap();
        assert_eq!(account.id, 9);

        let values = meta.persistable_values(&account);
        let names: Vec<&str> = values.iter().map(|(c, _)| *c).collect();
        assert_eq!(names, vec!["email", "tier"]);
    }

    #[test]
    fn test_setter_failure_is_mapping_error() {
        let meta = EntityMetadata::<Account>::build().unwrap();
        let mut account = Account::default();
        let err = meta.set_id(&mut account, Value::Bool(true)).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Mapping);
    }

    #[test]
    fn test_missing_primary_key_is_configuration_error() {
        let descriptor = EntityDescriptor::<Account>::new("accounts").field(FieldDescriptor::typed::<
            String,
        >(
            "email",
            |a: &Account| a.email.to_value(),
            |_: &mut Account, _| Ok(()),
        ));
        let err = EntityMetadata::from_descriptor(descriptor, &MetadataOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_id_field_override() {
        let options = MetadataOptions::default().with_id_field("email");
        let meta = EntityMetadata::<Account>::build_with(&options).unwrap();
        assert_eq!(meta.table().id_column, "email");
        assert_eq!(meta.table().id_strategy, IdStrategy::None);

        let missing = MetadataOptions::default().with_id_field("uuid");
        assert!(EntityMetadata::<Account>::build_with(&missing).is_err());
    }

    #[test]
    fn test_identity_on_string_rejected() {
        let descriptor = EntityDescriptor::<Account>::new("accounts").field(
            FieldDescriptor::typed::<String>("email", |a: &Account| a.email.to_value(), |_: &mut Account, _| Ok(()))
                .primary_key(IdStrategy::Identity),
        );
        assert!(EntityMetadata::from_descriptor(descriptor, &MetadataOptions::default()).is_err());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let descriptor = EntityDescriptor::<Account>::new("select").field(
            FieldDescriptor::typed::<i64>("id", |a: &Account| a.id.to_value(), |_: &mut Account, _| Ok(()))
                .primary_key(IdStrategy::Identity),
        );
        assert!(EntityMetadata::from_descriptor(descriptor, &MetadataOptions::default()).is_err());

        let descriptor = EntityDescriptor::<Account>::new("accounts").field(
            FieldDescriptor::typed::<i64>("id", |a: &Account| a.id.to_value(), |_: &mut Account, _| Ok(()))
                .column("id; DROP TABLE accounts")
                .primary_key(IdStrategy::Identity),
        );
        assert!(EntityMetadata::from_descriptor(descriptor, &MetadataOptions::default()).is_err());
    }

    #[test]
    fn test_foreign_key_target() {
        let target = foreign_key_target::<Account>().unwrap();
        assert_eq!(target.table, "accounts");
        assert_eq!(target.column, "account_id");
        assert_eq!(target.column_type, ColumnType::Long);
    }
}
