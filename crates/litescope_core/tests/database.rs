use std::sync::Arc;

use litescope_core::{
    CoreConfig, Database, DbError, RelatedOptions, SchemaCategory, Value,
};

fn open_db(config: CoreConfig) -> (Arc<Database>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("test.db"), config).unwrap();
    (db, dir)
}

fn seed_shop(db: &Database) {
    db.execute_script(
        "CREATE TABLE customer (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         CREATE TABLE order_ (id INTEGER PRIMARY KEY,
                              customer_id INTEGER REFERENCES customer (id));
         CREATE INDEX idx_customer_name ON customer (name);
         CREATE TRIGGER trg_touch AFTER UPDATE ON customer
           BEGIN UPDATE order_ SET customer_id = NEW.id WHERE customer_id = OLD.id; END;
         CREATE VIEW big_orders AS SELECT * FROM order_ WHERE id > 100;",
        None,
    )
    .unwrap();
}

#[test]
fn open_scans_schema_without_parsing() {
    let (db, _dir) = open_db(CoreConfig::default());
    seed_shop(&db);
    let tables = db.get_category(SchemaCategory::Table).unwrap();
    let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["customer", "order_"]);
    assert_eq!(tables[0].columns.len(), 2);
}

#[test]
fn related_items_and_key_graph() {
    let (db, _dir) = open_db(CoreConfig::default());
    seed_shop(&db);

    let related = db
        .get_related(
            SchemaCategory::Table,
            "customer",
            RelatedOptions { own: false, data: true, clone: false },
        )
        .unwrap();
    assert!(related
        .related
        .contains(&(SchemaCategory::Table, "order_".to_string())));
    assert_eq!(related.data, vec![(SchemaCategory::Table, "order_".to_string())]);

    let own = db
        .get_related(
            SchemaCategory::Table,
            "customer",
            RelatedOptions { own: true, data: false, clone: false },
        )
        .unwrap();
    assert!(own.own.contains(&(SchemaCategory::Index, "idx_customer_name".to_string())));
    assert!(own.own.contains(&(SchemaCategory::Trigger, "trg_touch".to_string())));

    let (_local, foreign) = db.get_keys("order_").unwrap();
    assert_eq!(foreign.len(), 1);
    assert_eq!(foreign[0].columns, vec!["customer_id".to_string()]);
    assert_eq!(foreign[0].tables["customer"], vec!["id".to_string()]);

    let (local, _foreign) = db.get_keys("customer").unwrap();
    let pk = &local[0];
    assert_eq!(pk.columns, vec!["id".to_string()]);
    assert_eq!(pk.tables["order_"], vec!["customer_id".to_string()]);
}

#[test]
fn row_counts_follow_estimation_policy() {
    let config = CoreConfig {
        // File size always exceeds the bound, so MAX(ROWID) decides.
        max_db_size_for_full_count: 0,
        max_table_rowid_for_full_count: 100,
        ..CoreConfig::default()
    };
    let (db, _dir) = open_db(config);
    db.execute_script(
        "CREATE TABLE small (id INTEGER PRIMARY KEY, v TEXT);
         CREATE TABLE sparse (id INTEGER PRIMARY KEY, v TEXT);
         INSERT INTO small (v) VALUES ('a'), ('b'), ('c');
         INSERT INTO sparse (id, v) VALUES (2000, 'only one row');",
        None,
    )
    .unwrap();

    let (count, estimated) = db.count_rows("small").unwrap();
    assert_eq!((count, estimated), (3, false));

    // MAX(ROWID) exceeds the bound: the count is the rowid, estimated.
    let (count, estimated) = db.count_rows("sparse").unwrap();
    assert_eq!((count, estimated), (2000, true));
}

#[test]
fn without_rowid_tables_count_exactly_and_have_no_rowid() {
    let config = CoreConfig { max_db_size_for_full_count: 0, ..CoreConfig::default() };
    let (db, _dir) = open_db(config);
    db.execute_script(
        "CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT) WITHOUT ROWID;
         INSERT INTO kv VALUES ('a', '1'), ('b', '2');",
        None,
    )
    .unwrap();
    db.ensure_parsed().unwrap();
    assert_eq!(db.count_rows("kv").unwrap(), (2, false));
    assert_eq!(db.get_rowid("kv").unwrap(), None);

    db.execute_action("CREATE TABLE plain (a)", None).unwrap();
    assert_eq!(db.get_rowid("plain").unwrap(), Some("rowid"));
}

#[test]
fn full_schema_sql_is_dependency_ordered() {
    let (db, _dir) = open_db(CoreConfig::default());
    seed_shop(&db);
    db.execute_action(
        "CREATE VIEW biggest_orders AS SELECT * FROM big_orders WHERE id > 1000",
        None,
    )
    .unwrap();
    let sql = db.get_sql(None, None).unwrap();

    let at = |needle: &str| sql.find(needle).unwrap_or_else(|| panic!("missing {needle}"));
    assert!(at("CREATE TABLE customer") < at("CREATE INDEX idx_customer_name"));
    assert!(at("CREATE INDEX idx_customer_name") < at("CREATE TRIGGER trg_touch"));
    assert!(at("CREATE TRIGGER trg_touch") < at("CREATE VIEW big_orders"));
    assert!(at("CREATE VIEW big_orders") < at("CREATE VIEW biggest_orders"));
}

#[test]
fn execute_action_reports_counts_and_invalidates() {
    let (db, _dir) = open_db(CoreConfig::default());
    db.execute_action("CREATE TABLE t (a INTEGER)", Some("create")).unwrap();
    let insert = db
        .execute_action("INSERT INTO t (a) VALUES (1)", None)
        .unwrap();
    assert_eq!(insert.affected_rows, 1);
    assert_eq!(insert.last_insert_rowid, Some(1));

    db.execute_action("ALTER TABLE t ADD COLUMN b TEXT", None).unwrap();
    let item = db.get_item(SchemaCategory::Table, "t").unwrap().unwrap();
    assert_eq!(item.columns.len(), 2);

    let logged = db.with_history(|h| h.len()).unwrap();
    assert_eq!(logged, 3);
}

#[test]
fn rename_table_rewrites_dependents() {
    let (db, _dir) = open_db(CoreConfig::default());
    seed_shop(&db);
    db.rename_item(SchemaCategory::Table, "order_", "purchase", &[]).unwrap();

    assert!(db.get_item(SchemaCategory::Table, "order_").unwrap().is_none());
    assert!(db.get_item(SchemaCategory::Table, "purchase").unwrap().is_some());
    let view = db.get_item(SchemaCategory::View, "big_orders").unwrap().unwrap();
    assert!(view.sql.contains("purchase"));
    // The renamed table's data is reachable through the view again.
    db.execute("SELECT * FROM big_orders", &[]).unwrap();
}

#[test]
fn rename_conflicts_are_typed() {
    let (db, _dir) = open_db(CoreConfig::default());
    seed_shop(&db);
    let err = db
        .rename_item(SchemaCategory::Table, "customer", "order_", &[])
        .unwrap_err();
    assert!(matches!(err, DbError::SchemaConflict { .. }));
}

#[test]
fn rename_column_updates_trigger_and_view() {
    let (db, _dir) = open_db(CoreConfig::default());
    seed_shop(&db);
    db.rename_column("order_", "customer_id", "buyer_id", &[]).unwrap();
    let table = db.get_item(SchemaCategory::Table, "order_").unwrap().unwrap();
    assert!(table.columns.iter().any(|c| c.name == "buyer_id"));
    let trigger = db.get_item(SchemaCategory::Trigger, "trg_touch").unwrap().unwrap();
    assert!(trigger.sql.contains("buyer_id"));
}

#[test]
fn drop_column_recreates_and_reports_invalid_dependents() {
    let (db, _dir) = open_db(CoreConfig::default());
    db.execute_script(
        "CREATE TABLE t (a INTEGER, b TEXT, c TEXT);
         INSERT INTO t VALUES (1, 'x', 'y'), (2, 'p', 'q');
         CREATE INDEX idx_b ON t (b);
         CREATE INDEX idx_c ON t (c);
         CREATE VIEW v_b AS SELECT b FROM t;",
        None,
    )
    .unwrap();

    let dropped = db.drop_column("t", "b", &[]).unwrap();
    assert!(dropped.contains(&(SchemaCategory::Index, "idx_b".to_string())));
    assert!(dropped.contains(&(SchemaCategory::View, "v_b".to_string())));

    let table = db.get_item(SchemaCategory::Table, "t").unwrap().unwrap();
    let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["a", "c"]);
    // Survivors are restored, data is intact.
    assert!(db.get_item(SchemaCategory::Index, "idx_c").unwrap().is_some());
    let rows = db.execute("SELECT a, c FROM t ORDER BY a", &[]).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].values[1], Value::Text("q".to_string()));
}

#[test]
fn locks_refuse_mutations() {
    let (db, _dir) = open_db(CoreConfig::default());
    seed_shop(&db);
    let owner = db.register_consumer();
    db.locks().lock(
        Some(SchemaCategory::Table),
        Some("customer"),
        owner,
        "statistics analysis in progress",
    );

    let err = db
        .rename_item(SchemaCategory::Table, "customer", "client", &[])
        .unwrap_err();
    assert!(matches!(err, DbError::LockConflict { ref label }
        if label == "statistics analysis in progress"));

    // The lock owner itself may proceed.
    db.rename_item(SchemaCategory::Table, "customer", "client", &[owner]).unwrap();
}

#[test]
fn consumer_lifecycle_and_close() {
    let (db, _dir) = open_db(CoreConfig::default());
    let consumer = db.register_consumer();
    assert!(db.has_consumers());
    db.unregister_consumer(consumer);
    assert!(!db.has_consumers());

    db.close();
    let err = db.execute("SELECT 1", &[]).unwrap_err();
    assert!(matches!(err, DbError::Closed));
}

#[test]
fn temporary_database_is_deleted_on_close() {
    let db = Database::open_temporary(CoreConfig::default()).unwrap();
    let path = db.path();
    assert!(db.is_temporary());
    assert!(path.exists());
    db.close();
    assert!(!path.exists());
}

#[test]
fn integrity_check_is_clean_on_fresh_file() {
    let (db, _dir) = open_db(CoreConfig::default());
    seed_shop(&db);
    assert!(db.check_integrity().unwrap().is_empty());
}

#[test]
fn recover_data_rebuilds_a_database() {
    let (db, dir) = open_db(CoreConfig::default());
    seed_shop(&db);
    db.execute_script(
        "INSERT INTO customer (name) VALUES ('ada'), ('grace');
         INSERT INTO order_ (customer_id) VALUES (1), (1), (2);",
        None,
    )
    .unwrap();

    let recovered_path = dir.path().join("recovered.db");
    let errors = db.recover_data(&recovered_path).unwrap();
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");

    let copy = Database::open(&recovered_path, CoreConfig::default()).unwrap();
    let rows = copy.execute("SELECT COUNT(*) FROM order_", &[]).unwrap();
    assert_eq!(rows[0].values[0], Value::Integer(3));
    assert!(copy.get_item(SchemaCategory::View, "big_orders").unwrap().is_some());
}

#[test]
fn pragma_values_are_readable() {
    let (db, _dir) = open_db(CoreConfig::default());
    let values = db.get_pragma_values().unwrap();
    assert_eq!(values.get("foreign_keys"), Some(&Value::Integer(1)));
    assert!(values.contains_key("page_size"));
}

#[test]
fn not_a_database_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fake.db");
    std::fs::write(&path, b"definitely not sqlite content").unwrap();
    let err = Database::open(&path, CoreConfig::default()).unwrap_err();
    assert!(matches!(err, DbError::NotADatabase(_)));
}

#[test]
fn populate_progress_can_abort() {
    let (db, _dir) = open_db(CoreConfig::default());
    seed_shop(&db);
    let mut seen = 0;
    let err = db
        .populate_schema(None, None, false, false, Some(&mut |_p| {
            seen += 1;
            seen < 2
        }))
        .unwrap_err();
    assert!(matches!(err, DbError::Cancelled));
    assert_eq!(seen, 2);
}
