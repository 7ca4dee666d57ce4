use std::sync::Arc;

use litescope_core::search::{SearchEmission, SearchInput, SearchMode, run_search};
use litescope_core::{CancelToken, CoreConfig, Database, SchemaCategory, Value, search_worker};

fn open_docs_db() -> (Arc<Database>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("docs.db"), CoreConfig::default()).unwrap();
    db.execute_script(
        "CREATE TABLE docs (title TEXT, notes TEXT, body TEXT, created DATETIME);
         INSERT INTO docs VALUES
           ('Alpha', 'foo in notes', 'plain body', '2012-05-14 10:00:00'),
           ('Beta', NULL, 'has foo bar inside', '2012-07-01 09:30:00'),
           ('Gamma', 'bar only', 'abXYcd pattern', '2012-09-20 17:45:00'),
           ('Delta FOO', 'nothing', 'nothing', '2013-01-05 08:00:00');
         CREATE TABLE other (label TEXT);
         INSERT INTO other VALUES ('foo elsewhere');",
        None,
    )
    .unwrap();
    (db, dir)
}

fn run(db: &Database, query: &str) -> (Vec<(String, Vec<Value>)>, usize, bool, Option<String>) {
    let input = SearchInput {
        query: query.to_string(),
        case_sensitive: false,
        mode: SearchMode::Data,
    };
    let mut rows = Vec::new();
    let mut summary = (0, false, None);
    run_search(db, &input, &CancelToken::new(), &mut |emission| match emission {
        SearchEmission::Chunk(chunk) => {
            for row in chunk.rows {
                rows.push((chunk.relation.clone(), row));
            }
        }
        SearchEmission::Done { total, cancelled, error } => summary = (total, cancelled, error),
        SearchEmission::MetaHit { .. } => {}
    });
    (rows, summary.0, summary.1, summary.2)
}

fn titles(rows: &[(String, Vec<Value>)]) -> Vec<String> {
    rows.iter()
        .filter(|(relation, _)| relation == "docs")
        .map(|(_, values)| values[0].to_display_string())
        .collect()
}

#[test]
fn single_word_matches_any_column_case_insensitively() {
    let (db, _dir) = open_docs_db();
    let (rows, total, cancelled, error) = run(&db, "foo");
    assert!(error.is_none());
    assert!(!cancelled);
    // Substring containment in any column, case-folded.
    assert_eq!(titles(&rows), vec!["Alpha", "Beta", "Delta FOO"]);
    // The `other` table matches too and counts toward the total.
    assert_eq!(total, 4);
}

#[test]
fn phrase_requires_adjacency() {
    let (db, _dir) = open_docs_db();
    let (rows, ..) = run(&db, "\"foo bar\"");
    assert_eq!(titles(&rows), vec!["Beta"]);
    // The separate words appear in Alpha ("foo") and Gamma ("bar") but
    // never adjacent there.
    let (rows, ..) = run(&db, "foo bar");
    assert_eq!(titles(&rows), vec!["Beta"]);
}

#[test]
fn wildcard_word_matches_any_run() {
    let (db, _dir) = open_docs_db();
    let (rows, ..) = run(&db, "ab*cd");
    assert_eq!(titles(&rows), vec!["Gamma"]);
}

#[test]
fn column_exclusion_never_increases_results() {
    let (db, _dir) = open_docs_db();
    let (all_rows, ..) = run(&db, "foo");
    let (filtered_rows, ..) = run(&db, "foo -column:notes");
    assert!(filtered_rows.len() <= all_rows.len());
    // "foo in notes" only matched through the excluded column.
    assert_eq!(titles(&filtered_rows), vec!["Beta", "Delta FOO"]);
}

#[test]
fn or_and_negation_combine() {
    let (db, _dir) = open_docs_db();
    let (rows, ..) = run(&db, "(alpha OR gamma) -pattern");
    assert_eq!(titles(&rows), vec!["Alpha"]);
}

#[test]
fn table_keyword_restricts_relations() {
    let (db, _dir) = open_docs_db();
    let (rows, total, ..) = run(&db, "foo table:docs");
    assert!(rows.iter().all(|(relation, _)| relation == "docs"));
    assert_eq!(total, 3);
}

#[test]
fn date_range_filters_datetime_columns() {
    let (db, _dir) = open_docs_db();
    let (rows, ..) = run(&db, "date:2012-06..2012-08");
    assert_eq!(titles(&rows), vec!["Beta"]);

    let (rows, ..) = run(&db, "date:2012");
    assert_eq!(titles(&rows), vec!["Alpha", "Beta", "Gamma"]);
}

#[test]
fn empty_query_reports_an_error() {
    let (db, _dir) = open_docs_db();
    let (rows, total, cancelled, error) = run(&db, "   ");
    assert!(rows.is_empty());
    assert_eq!(total, 0);
    assert!(!cancelled);
    assert!(error.is_some());
}

#[test]
fn cancelled_search_reports_cancelled() {
    let (db, _dir) = open_docs_db();
    let token = CancelToken::new();
    token.cancel();
    let input = SearchInput {
        query: "foo".to_string(),
        case_sensitive: false,
        mode: SearchMode::Data,
    };
    let mut terminal = None;
    run_search(&db, &input, &token, &mut |emission| {
        if let SearchEmission::Done { cancelled, .. } = emission {
            terminal = Some(cancelled);
        }
    });
    assert_eq!(terminal, Some(true));
}

#[test]
fn highlights_cover_matched_spans() {
    let (db, _dir) = open_docs_db();
    let input = SearchInput {
        query: "foo".to_string(),
        case_sensitive: false,
        mode: SearchMode::Data,
    };
    let mut checked = false;
    run_search(&db, &input, &CancelToken::new(), &mut |emission| {
        if let SearchEmission::Chunk(chunk) = emission
            && chunk.relation == "docs"
        {
            for (row, row_highlights) in chunk.rows.iter().zip(&chunk.highlights) {
                for (value, spans) in row.iter().zip(row_highlights) {
                    let text = value.to_display_string();
                    for (start, end) in spans {
                        assert_eq!(text[*start..*end].to_lowercase(), "foo");
                        checked = true;
                    }
                }
            }
        }
    });
    assert!(checked);
}

#[test]
fn meta_mode_matches_schema_text() {
    let (db, _dir) = open_docs_db();
    db.execute_action("CREATE INDEX idx_created ON docs (created)", None).unwrap();
    let input = SearchInput {
        query: "created".to_string(),
        case_sensitive: false,
        mode: SearchMode::Meta,
    };
    let mut hits = Vec::new();
    run_search(&db, &input, &CancelToken::new(), &mut |emission| {
        if let SearchEmission::MetaHit { category, name, .. } = emission {
            hits.push((category, name));
        }
    });
    assert!(hits.contains(&(SchemaCategory::Table, "docs".to_string())));
    assert!(hits.contains(&(SchemaCategory::Index, "idx_created".to_string())));
}

#[test]
fn worker_streams_and_terminates() {
    let (db, _dir) = open_docs_db();
    let (worker, receiver) = search_worker(db.clone());
    worker.work(SearchInput {
        query: "foo".to_string(),
        case_sensitive: false,
        mode: SearchMode::Data,
    });

    let mut chunks = 0;
    loop {
        match receiver.recv_timeout(std::time::Duration::from_secs(10)).unwrap() {
            SearchEmission::Chunk(_) => chunks += 1,
            SearchEmission::Done { total, cancelled, error } => {
                assert!(error.is_none());
                assert!(!cancelled);
                assert_eq!(total, 4);
                break;
            }
            SearchEmission::MetaHit { .. } => {}
        }
    }
    assert!(chunks >= 1);
}
