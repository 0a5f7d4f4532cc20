//! Metadata produced by `#[derive(Entity)]`

use rivven_orm::metadata::{CheckKind, EntityMetadata, IdStrategy, MetadataOptions};
use rivven_orm::prelude::*;

#[derive(Debug, Clone, Default, PartialEq, Entity)]
struct LineItem {
    id: i64,
    #[column(name = "sku_code", max_length = 32, unique)]
    sku: String,
    quantity: i32,
    note: Option<String>,
    #[column(skip)]
    cached_total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
#[entity(table = "payments")]
struct Payment {
    #[column(index)]
    reference: String,
    #[column(id, strategy = "sequence")]
    payment_no: i64,
    #[column(one_of = "pending, settled ,failed")]
    state: String,
    #[column(one_of = "1,2,3")]
    attempt: i32,
    #[column(check = "amount > 0")]
    amount: f64,
    #[column(nullable = true)]
    memo: String,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
#[entity(table = "api_keys")]
struct ApiKey {
    #[column(id)]
    token: String,
    owner: String,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
#[entity(table = "sessions")]
struct Session {
    id: uuid::Uuid,
    #[column(references = "ApiKey")]
    api_key: Option<String>,
}

#[test]
fn test_table_name_defaults_to_snake_case() {
    let meta = EntityMetadata::<LineItem>::build().unwrap();
    assert_eq!(meta.table().table_name, "line_item");
}

#[test]
fn test_columns_follow_declaration_with_id_first() {
    let meta = EntityMetadata::<LineItem>::build().unwrap();
    let table = meta.table();
    let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "sku_code", "quantity", "note"]);

    assert_eq!(table.id_field, "id");
    assert_eq!(table.id_strategy, IdStrategy::Identity);

    let sku = table.column_for_field("sku").unwrap();
    assert_eq!(sku.name, "sku_code");
    assert_eq!(sku.max_length, Some(32));
    assert!(sku.unique);
    assert!(table.unique_columns.contains("sku_code"));
    assert!(!sku.nullable);

    let note = table.column("note").unwrap();
    assert!(note.nullable);
    assert_eq!(note.column_type, ColumnType::String);

    assert!(table.column_for_field("cached_total").is_none());
}

#[test]
fn test_skipped_field_keeps_default_on_read() {
    let pool: std::sync::Arc<dyn ConnectionPool> =
        create_pool(&OrmConfig::new("sqlite::memory:")).unwrap();
    let items = Broker::<LineItem>::new(pool).unwrap();

    let saved = items
        .save(&mut LineItem {
            sku: "A-1".into(),
            quantity: 2,
            cached_total: 99.5,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(saved.cached_total, 0.0);
    assert_eq!(saved.sku, "A-1");
}

#[test]
fn test_explicit_id_and_sequence_strategy() {
    let meta = EntityMetadata::<Payment>::build().unwrap();
    let table = meta.table();

    assert_eq!(table.table_name, "payments");
    assert_eq!(table.id_column, "payment_no");
    assert_eq!(table.id_strategy, IdStrategy::Sequence);
    assert_eq!(table.columns[0].name, "payment_no");
    assert_eq!(table.sequence_name(), "payments_payment_no_seq");
    assert!(table.indexed_columns.contains("reference"));
    assert!(table.column("memo").unwrap().nullable);
}

#[test]
fn test_value_domains_become_checks() {
    let meta = EntityMetadata::<Payment>::build().unwrap();
    let table = meta.table();
    assert_eq!(table.check_constraints.len(), 3);

    let state = table.checks_for("state").next().unwrap();
    assert_eq!(
        state.kind,
        CheckKind::AllowedValues(vec![
            "'pending'".to_string(),
            "'settled'".to_string(),
            "'failed'".to_string()
        ])
    );
    assert_eq!(state.to_sql("\"state\""), "\"state\" IN ('pending', 'settled', 'failed')");

    let attempt = table.checks_for("attempt").next().unwrap();
    assert_eq!(
        attempt.kind,
        CheckKind::AllowedValues(vec!["1".into(), "2".into(), "3".into()])
    );

    let amount = table.checks_for("amount").next().unwrap();
    assert_eq!(amount.kind, CheckKind::Expression("amount > 0".into()));
}

#[test]
fn test_string_id_defaults_to_assigned() {
    let meta = EntityMetadata::<ApiKey>::build().unwrap();
    assert_eq!(meta.table().id_strategy, IdStrategy::None);
    assert_eq!(meta.table().id_column_def().column_type, ColumnType::String);
}

#[test]
fn test_uuid_id_and_reference() {
    let meta = EntityMetadata::<Session>::build().unwrap();
    let table = meta.table();
    assert_eq!(table.id_strategy, IdStrategy::Identity);
    assert_eq!(table.id_column_def().column_type, ColumnType::Uuid);

    let target = table.column("api_key").unwrap().references.unwrap()().unwrap();
    assert_eq!(target.table, "api_keys");
    assert_eq!(target.column, "token");
    assert_eq!(target.column_type, ColumnType::String);
}

#[test]
fn test_accessors_read_and_write_fields() {
    let meta = EntityMetadata::<LineItem>::build().unwrap();
    let mut item = LineItem {
        id: 7,
        sku: "B-2".into(),
        quantity: 3,
        ..Default::default()
    };

    assert_eq!(meta.id_value(&item), Value::Int64(7));
    let idx = meta.column_index("SKU_CODE").unwrap();
    assert_eq!(meta.value_at(&item, idx), Value::String("B-2".into()));

    meta.set_at(&mut item, idx, Value::String("C-3".into())).unwrap();
    assert_eq!(item.sku, "C-3");

    let note = meta.column_index("note").unwrap();
    meta.set_at(&mut item, note, Value::Null).unwrap();
    assert_eq!(item.note, None);

    let err = meta
        .set_at(&mut item, idx, Value::Bytes(vec![0xff, 0xfe]))
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Mapping);
}

#[test]
fn test_id_field_override() {
    let meta =
        EntityMetadata::<LineItem>::build_with(&MetadataOptions::default().with_id_field("sku"))
            .unwrap();
    assert_eq!(meta.table().id_column, "sku_code");
    assert_eq!(meta.table().id_strategy, IdStrategy::None);
    assert_eq!(meta.table().columns[1].name, "id");

    let err = EntityMetadata::<LineItem>::build_with(
        &MetadataOptions::default().with_id_field("missing"),
    )
    .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}
