//! Structural renames applied as a byte splice over the source text.
//!
//! The parser records the role of every name token; this module rewrites
//! exactly those tokens and leaves every other byte (whitespace,
//! comments, casing of keywords) untouched. The spliced text is then
//! re-parsed so the resulting meta tree reflects post-rename state.

use std::collections::HashMap;

use crate::ast::{Renames, SchemaRename, StatementKind};
use crate::parser::{NameRole, ParseDetail};
use crate::quoting::{quote, unquote};
use crate::token::TokenKind;

/// A byte-range replacement in the original statement text.
struct Splice {
    start: usize,
    end: usize,
    text: String,
}

fn lower_map(map: &HashMap<String, String>) -> HashMap<String, &str> {
    map.iter()
        .map(|(k, v)| (k.to_lowercase(), v.as_str()))
        .collect()
}

/// Applies the rename request to the parsed statement, returning the
/// rewritten SQL text. Unrelated whitespace and comments are preserved.
pub(crate) fn apply_renames(detail: &ParseDetail<'_>, renames: &Renames) -> String {
    let sql = detail.tz.sql;
    let tokens = &detail.tz.tokens;
    let kind = detail.statement.kind();

    let tables = lower_map(&renames.table);
    let views = lower_map(&renames.view);
    let indexes = lower_map(&renames.index);
    let triggers = lower_map(&renames.trigger);
    // Column maps are keyed by the post-rename owner name.
    let columns: HashMap<String, HashMap<String, &str>> = renames
        .column
        .iter()
        .map(|(owner, map)| {
            (
                owner.to_lowercase(),
                map.iter()
                    .map(|(k, v)| (k.to_lowercase(), v.as_str()))
                    .collect(),
            )
        })
        .collect();

    // A relation's post-rename identity, for column-map lookup.
    let renamed_owner = |owner: &str| -> String {
        if let Some(new) = tables.get(owner).or_else(|| views.get(owner)) {
            new.to_lowercase()
        } else {
            owner.to_string()
        }
    };

    let mut splices: Vec<Splice> = Vec::new();
    let mut statement_name_token: Option<usize> = None;
    let mut schema_token: Option<usize> = None;

    for (index, role) in &detail.roles {
        let tok = tokens[*index];
        let current = unquote(&sql[tok.start..tok.end]);
        let lower = current.to_lowercase();
        match role {
            NameRole::Schema => schema_token = Some(*index),
            NameRole::StatementName => {
                statement_name_token = Some(*index);
                let map = match kind {
                    StatementKind::Table | StatementKind::VirtualTable => &tables,
                    StatementKind::Index => &indexes,
                    StatementKind::Trigger => &triggers,
                    StatementKind::View => &views,
                };
                if let Some(new) = map.get(&lower) {
                    splices.push(Splice { start: tok.start, end: tok.end, text: quote(new) });
                }
            }
            NameRole::TableRef => {
                if let Some(new) = tables.get(&lower).or_else(|| views.get(&lower)) {
                    splices.push(Splice { start: tok.start, end: tok.end, text: quote(new) });
                }
            }
            NameRole::ColumnRef { owner } => {
                if let Some(new) = columns
                    .get(&renamed_owner(owner))
                    .and_then(|map| map.get(&lower))
                {
                    splices.push(Splice { start: tok.start, end: tok.end, text: quote(new) });
                }
            }
        }
    }

    if let Some(schema_rename) = &renames.schema {
        apply_schema_rename(
            sql,
            tokens,
            schema_token,
            statement_name_token,
            schema_rename,
            &mut splices,
        );
    }

    splice_all(sql, splices)
}

fn apply_schema_rename(
    sql: &str,
    tokens: &[crate::token::Token],
    schema_token: Option<usize>,
    statement_name_token: Option<usize>,
    rename: &SchemaRename,
    splices: &mut Vec<Splice>,
) {
    match (schema_token, rename) {
        (Some(index), SchemaRename::Set(new)) => {
            let tok = tokens[index];
            splices.push(Splice { start: tok.start, end: tok.end, text: quote(new) });
        }
        (Some(index), SchemaRename::Remove) => {
            remove_schema(sql, tokens, index, splices);
        }
        (Some(index), SchemaRename::Map(map)) => {
            let tok = tokens[index];
            let current = unquote(&sql[tok.start..tok.end]).to_lowercase();
            let hit = map
                .iter()
                .find(|(k, _)| k.to_lowercase() == current)
                .map(|(_, v)| v);
            match hit {
                Some(Some(new)) => {
                    splices.push(Splice { start: tok.start, end: tok.end, text: quote(new) })
                }
                Some(None) => remove_schema(sql, tokens, index, splices),
                None => {}
            }
        }
        (None, SchemaRename::Set(new)) => {
            // No qualifier in the statement: insert one before the name.
            if let Some(name_index) = statement_name_token {
                let at = tokens[name_index].start;
                splices.push(Splice { start: at, end: at, text: format!("{}.", quote(new)) });
            }
        }
        (None, _) => {}
    }
}

/// Removes the schema token and the dot that follows it.
fn remove_schema(
    sql: &str,
    tokens: &[crate::token::Token],
    index: usize,
    splices: &mut Vec<Splice>,
) {
    let tok = tokens[index];
    let end = tokens
        .get(index + 1)
        .filter(|dot| dot.kind == TokenKind::Punct && &sql[dot.start..dot.end] == ".")
        .map(|dot| dot.end)
        .unwrap_or(tok.end);
    splices.push(Splice { start: tok.start, end, text: String::new() });
}

fn splice_all(sql: &str, mut splices: Vec<Splice>) -> String {
    // Zero-width insertions sort before replacements at the same spot.
    splices.sort_by_key(|s| (s.start, s.end));
    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0;
    for splice in splices {
        if splice.start < cursor {
            continue;
        }
        out.push_str(&sql[cursor..splice.start]);
        out.push_str(&splice.text);
        cursor = splice.end;
    }
    out.push_str(&sql[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_statement;

    fn rename(sql: &str, renames: &Renames) -> String {
        let detail = parse_statement(sql).unwrap();
        apply_renames(&detail, renames)
    }

    fn table_renames(pairs: &[(&str, &str)]) -> Renames {
        Renames {
            table: pairs
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn table_rename_preserves_layout() {
        let out = rename(
            "CREATE TABLE t (\n  a INTEGER -- pk\n)",
            &table_renames(&[("t", "t2")]),
        );
        assert_eq!(out, "CREATE TABLE t2 (\n  a INTEGER -- pk\n)");
    }

    #[test]
    fn trigger_rename_scopes_columns_to_owner() {
        let mut renames = table_renames(&[("t", "t2")]);
        renames.column.insert(
            "t2".to_string(),
            [("a".to_string(), "a2".to_string()), ("b".to_string(), "b2".to_string())]
                .into_iter()
                .collect(),
        );
        let out = rename(
            "CREATE TRIGGER trg AFTER UPDATE OF a ON t BEGIN UPDATE t SET b = NEW.b; END",
            &renames,
        );
        assert_eq!(
            out,
            "CREATE TRIGGER trg AFTER UPDATE OF a2 ON t2 BEGIN UPDATE t2 SET b2 = NEW.b2; END"
        );
    }

    #[test]
    fn old_new_pseudo_tables_are_untouched() {
        let renames = table_renames(&[("old", "ancient"), ("new", "modern")]);
        let out = rename(
            "CREATE TRIGGER trg AFTER UPDATE ON t BEGIN UPDATE t SET b = NEW.b WHERE a = OLD.a; END",
            &renames,
        );
        assert!(out.contains("NEW.b"));
        assert!(out.contains("OLD.a"));
    }

    #[test]
    fn column_rename_only_inside_owner() {
        let mut renames = Renames::default();
        renames.column.insert(
            "t1".to_string(),
            [("x".to_string(), "x1".to_string())].into_iter().collect(),
        );
        let out = rename(
            "CREATE TRIGGER trg AFTER INSERT ON t1 BEGIN
               UPDATE t1 SET x = 1;
               UPDATE t2 SET x = 2;
             END",
            &renames,
        );
        assert!(out.contains("UPDATE t1 SET x1 = 1"));
        assert!(out.contains("UPDATE t2 SET x = 2"));
    }

    #[test]
    fn schema_set_remove_and_replace() {
        let set = Renames {
            schema: Some(SchemaRename::Set("aux".to_string())),
            ..Default::default()
        };
        assert_eq!(
            rename("CREATE INDEX idx ON t (a)", &set),
            "CREATE INDEX aux.idx ON t (a)"
        );
        assert_eq!(
            rename("CREATE INDEX main.idx ON t (a)", &set),
            "CREATE INDEX aux.idx ON t (a)"
        );
        let remove = Renames {
            schema: Some(SchemaRename::Remove),
            ..Default::default()
        };
        assert_eq!(
            rename("CREATE INDEX main.idx ON t (a)", &remove),
            "CREATE INDEX idx ON t (a)"
        );
    }

    #[test]
    fn renamed_value_is_quoted_when_needed() {
        let out = rename("CREATE TABLE t (a)", &table_renames(&[("t", "my table")]));
        assert_eq!(out, "CREATE TABLE \"my table\" (a)");
    }

    #[test]
    fn schema_insertion_composes_with_name_rename() {
        let mut renames = table_renames(&[("t", "t2")]);
        renames.schema = Some(SchemaRename::Set("aux".to_string()));
        assert_eq!(
            rename("CREATE TABLE t (a)", &renames),
            "CREATE TABLE aux.t2 (a)"
        );
    }

    #[test]
    fn view_map_applies_in_table_positions() {
        let renames = Renames {
            view: [("v1".to_string(), "v2".to_string())].into_iter().collect(),
            ..Default::default()
        };
        let out = rename("CREATE VIEW agg AS SELECT a FROM v1", &renames);
        assert_eq!(out, "CREATE VIEW agg AS SELECT a FROM v2");
    }
}
