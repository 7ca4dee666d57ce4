use litescope_grammar::{
    FlagToggles, Renames, SchemaRename, Statement, StatementKind, generate, parse, quote,
    transform, unquote,
};

const CORPUS: &[&str] = &[
    "CREATE TABLE customer (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
    "CREATE TABLE \"order line\" (
        qty NUMERIC(10,2) DEFAULT 0 CHECK (qty >= 0),
        customer_id INTEGER REFERENCES customer (id) ON DELETE CASCADE,
        note TEXT COLLATE NOCASE,
        CONSTRAINT one_per CHECK (qty < 1000)
    ) WITHOUT ROWID",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_name ON customer (name COLLATE NOCASE DESC)
     WHERE name IS NOT NULL",
    "CREATE TRIGGER audit AFTER UPDATE OF name ON customer
     WHEN NEW.name != OLD.name
     BEGIN
       INSERT INTO audit_log (what) VALUES (OLD.name);
     END",
    "CREATE VIEW big_customers AS SELECT id, name FROM customer WHERE id IN
     (SELECT customer_id FROM \"order line\")",
    "CREATE VIRTUAL TABLE search USING fts5 (name, content = 'customer')",
];

#[test]
fn generate_then_parse_is_stable() {
    for sql in CORPUS {
        let first = parse(sql, None, None).unwrap();
        let generated = generate(&first, "  ").unwrap();
        let second = parse(&generated, None, None).unwrap();
        assert_eq!(first.kind(), second.kind(), "kind changed for: {sql}");
        assert_eq!(first.name(), second.name());
        assert_eq!(first.header().tables, second.header().tables);
        // A second generation must be byte-identical.
        assert_eq!(generated, generate(&second, "  ").unwrap());
    }
}

#[test]
fn schema_rename_and_back_is_identity() {
    for sql in CORPUS {
        let add = Renames {
            schema: Some(SchemaRename::Set("aux".to_string())),
            ..Default::default()
        };
        let drop = Renames { schema: Some(SchemaRename::Remove), ..Default::default() };
        let qualified = transform(sql, None, Some(&add), None).unwrap();
        let stmt = parse(&qualified, None, None).unwrap();
        assert_eq!(stmt.header().schema.as_deref(), Some("aux"), "in: {qualified}");
        let back = transform(&qualified, None, Some(&drop), None).unwrap();
        assert_eq!(back, *sql);
    }
}

#[test]
fn quote_round_trips_identifiers() {
    for name in ["plain", "with space", "SELECT", "1st", "we\"ird", "älyä"] {
        assert_eq!(unquote(&quote(name)), name);
    }
}

#[test]
fn trigger_rename_matches_reference_behavior() {
    let renames = Renames {
        table: [("t".to_string(), "t2".to_string())].into_iter().collect(),
        column: [(
            "t2".to_string(),
            [("a".to_string(), "a2".to_string()), ("b".to_string(), "b2".to_string())]
                .into_iter()
                .collect(),
        )]
        .into_iter()
        .collect(),
        ..Default::default()
    };
    let out = transform(
        "CREATE TRIGGER trg AFTER UPDATE OF a ON t BEGIN UPDATE t SET b = NEW.b; END",
        None,
        Some(&renames),
        None,
    )
    .unwrap();
    assert_eq!(
        out,
        "CREATE TRIGGER trg AFTER UPDATE OF a2 ON t2 BEGIN UPDATE t2 SET b2 = NEW.b2; END"
    );
}

#[test]
fn flags_toggle_through_transform() {
    let flags = FlagToggles { unique: Some(true), ..Default::default() };
    let out = transform("CREATE INDEX i ON t (a)", Some(&flags), None, Some("")).unwrap();
    assert_eq!(out, "CREATE UNIQUE INDEX i ON t (a)");
}

#[test]
fn dependency_names_are_lowercase() {
    let stmt = parse(
        "CREATE VIEW v AS SELECT * FROM Customer JOIN \"Order Line\"",
        Some(StatementKind::View),
        None,
    )
    .unwrap();
    assert_eq!(
        stmt.header().tables,
        vec!["customer".to_string(), "order line".to_string()]
    );
    let Statement::View(_) = stmt else { panic!() };
}
