//! Schema synchronization tests for rivven-orm

use std::sync::Arc;

use rivven_orm::prelude::*;
use rivven_orm::schema::describe_table;

mod v1 {
    use rivven_orm::Entity;

    #[derive(Debug, Clone, Default, PartialEq, Entity)]
    #[entity(table = "widgets")]
    pub struct Widget {
        #[column(id)]
        pub id: i64,
        #[column(max_length = 40)]
        pub title: String,
    }
}

mod v2 {
    use rivven_orm::Entity;

    #[derive(Debug, Clone, Default, PartialEq, Entity)]
    #[entity(table = "widgets")]
    pub struct Widget {
        #[column(id)]
        pub id: i64,
        #[column(max_length = 40)]
        pub title: String,
        #[column(index)]
        pub color: Option<String>,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
#[entity(table = "tickets")]
struct Ticket {
    #[column(id, strategy = "sequence")]
    id: i64,
    #[column(one_of = "open,closed")]
    state: String,
    #[column(check = "priority >= 0")]
    priority: i32,
    #[column(references = "Queue")]
    queue_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
#[entity(table = "queues")]
struct Queue {
    id: i64,
    title: String,
}

fn memory_pool() -> Arc<dyn ConnectionPool> {
    create_pool(&OrmConfig::new("sqlite::memory:")).unwrap()
}

#[test]
fn test_first_build_creates_table() {
    let pool = memory_pool();
    let widgets = Broker::<v1::Widget>::new(pool).unwrap();

    let report = widgets.sync_report();
    assert!(report.table_created);
    assert!(report.columns_added.is_empty());
    assert!(report.statements[0].starts_with("CREATE TABLE \"widgets\""));
}

#[test]
fn test_sync_is_idempotent() {
    let pool = memory_pool();
    let first = Broker::<v2::Widget>::new(pool.clone()).unwrap();
    assert!(first.sync_report().has_changes());
    assert_eq!(first.sync_report().indexes_added, vec!["idx_widgets_color"]);

    let second = Broker::<v2::Widget>::new(pool).unwrap();
    assert!(!second.sync_report().has_changes());
}

#[test]
fn test_additive_migration_preserves_rows() {
    let pool = memory_pool();
    let old = Broker::<v1::Widget>::new(pool.clone()).unwrap();
    let saved = old
        .save(&mut v1::Widget {
            title: "gear".into(),
            ..Default::default()
        })
        .unwrap();

    let new = Broker::<v2::Widget>::new(pool.clone()).unwrap();
    let report = new.sync_report();
    assert!(!report.table_created);
    assert_eq!(report.columns_added, vec!["color"]);

    let migrated = new.find_by_id(saved.id).unwrap().unwrap();
    assert_eq!(migrated.title, "gear");
    assert_eq!(migrated.color, None);

    let conn = pool.get().unwrap();
    let columns = describe_table(conn.connection(), pool.dialect().as_ref(), "widgets").unwrap();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "title", "color"]);
    assert!(columns[2].nullable);
}

#[test]
fn test_create_mode_does_not_evolve() {
    let pool = memory_pool();
    Broker::<v1::Widget>::new(pool.clone()).unwrap();

    let frozen = Broker::<v2::Widget>::builder(pool.clone())
        .schema_sync(SchemaSyncMode::Create)
        .build()
        .unwrap();
    assert!(!frozen.sync_report().has_changes());

    let conn = pool.get().unwrap();
    let columns = describe_table(conn.connection(), pool.dialect().as_ref(), "widgets").unwrap();
    assert_eq!(columns.len(), 2);
}

#[test]
fn test_check_constraints_are_registered_and_enforced() {
    let pool = memory_pool();
    let synchronizer = Arc::new(SchemaSynchronizer::new());
    Broker::<Queue>::builder(pool.clone())
        .synchronizer(synchronizer.clone())
        .build()
        .unwrap();
    let tickets = Broker::<Ticket>::builder(pool)
        .synchronizer(synchronizer.clone())
        .build()
        .unwrap();

    assert_eq!(tickets.check_constraints().len(), 2);
    assert_eq!(synchronizer.check_constraints("tickets").len(), 2);
    assert!(synchronizer.check_constraints("queues").is_empty());

    let ok = tickets
        .save(&mut Ticket {
            state: "open".into(),
            priority: 3,
            ..Default::default()
        })
        .unwrap();
    assert!(ok.id > 0);

    let err = tickets
        .save(&mut Ticket {
            state: "bogus".into(),
            priority: 1,
            ..Default::default()
        })
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::DataIntegrity);

    let err = tickets
        .save(&mut Ticket {
            state: "closed".into(),
            priority: -1,
            ..Default::default()
        })
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::DataIntegrity);
}

#[test]
fn test_foreign_key_column_follows_target_id_type() {
    let pool = memory_pool();
    let tickets = Broker::<Ticket>::new(pool.clone()).unwrap();
    let column = tickets.metadata().table().column("queue_id").unwrap();
    assert!(column.references.is_some());

    let conn = pool.get().unwrap();
    let columns = describe_table(conn.connection(), pool.dialect().as_ref(), "tickets").unwrap();
    let queue_id = columns.iter().find(|c| c.name == "queue_id").unwrap();
    assert_eq!(queue_id.type_name, "INTEGER");
}
