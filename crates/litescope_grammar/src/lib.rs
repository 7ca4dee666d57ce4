//! SQLite DDL parsing, regeneration and structural transforms.
//!
//! The grammar layer translates between raw CREATE statements and a
//! typed meta tree, renders canonical SQL back from the tree, and
//! applies renames over the original token stream so unrelated
//! formatting survives.

mod ast;
mod cache;
mod error;
mod generate;
mod parser;
mod quoting;
mod rename;
mod token;

pub use ast::{
    ColumnConstraint, ColumnConstraintKind, ColumnDef, ConflictAction, Deferrable, FlagToggles,
    ForeignKeyClause, IndexDef, IndexedColumn, Renames, SchemaRename, SortOrder, Statement,
    StatementHeader, StatementKind, TableConstraint, TableConstraintKind, TableDef, TriggerAction,
    TriggerDef, TriggerTiming, ViewDef, VirtualTableDef,
};
pub use cache::ParseCache;
pub use error::GrammarError;
pub use generate::generate;
pub use quoting::{
    RESERVED_KEYWORDS, format_blob, format_text, is_reserved, quote, quote_with, unquote,
};

use parser::parse_statement;

/// Parses one statement into its meta tree.
///
/// With `category` set, a statement of any other kind fails with
/// [`GrammarError::UnexpectedCategory`] (virtual tables satisfy an
/// expected `Table`, they live in the table category). Renames are
/// applied to the token stream first and the spliced text is re-parsed,
/// so the returned tree reflects post-rename state.
pub fn parse(
    sql: &str,
    category: Option<StatementKind>,
    renames: Option<&Renames>,
) -> Result<Statement, GrammarError> {
    let detail = parse_statement(sql)?;
    check_category(category, detail.statement.kind())?;
    match renames {
        Some(renames) if !renames.is_empty() => {
            let spliced = rename::apply_renames(&detail, renames);
            Ok(parse_statement(&spliced)?.statement)
        }
        _ => Ok(detail.statement),
    }
}

/// Transforms a statement: applies renames, toggles flags, optionally
/// re-renders with the given indentation.
///
/// Without flags and without an explicit indent the token-stream
/// rewritten text is returned, comments and formatting intact; otherwise
/// the statement is regenerated from the meta tree.
pub fn transform(
    sql: &str,
    flags: Option<&FlagToggles>,
    renames: Option<&Renames>,
    indent: Option<&str>,
) -> Result<String, GrammarError> {
    let detail = parse_statement(sql)?;
    let has_flags = flags.is_some_and(|f| !f.is_empty());

    let (text, mut statement) = match renames {
        Some(renames) if !renames.is_empty() => {
            let spliced = rename::apply_renames(&detail, renames);
            let statement = parse_statement(&spliced)?.statement;
            (spliced, statement)
        }
        _ => (sql.to_string(), detail.statement),
    };

    if !has_flags && indent.is_none() {
        return Ok(text);
    }
    if let Some(flags) = flags {
        statement.apply_flags(flags);
    }
    generate(&statement, indent.unwrap_or("  "))
}

fn check_category(
    expected: Option<StatementKind>,
    got: StatementKind,
) -> Result<(), GrammarError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let matches = expected == got
        || (expected == StatementKind::Table && got == StatementKind::VirtualTable);
    if matches {
        Ok(())
    } else {
        Err(GrammarError::UnexpectedCategory {
            expected: expected.sql_name().to_string(),
            got: got.sql_name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_check() {
        assert!(parse("CREATE TABLE t(a)", Some(StatementKind::Table), None).is_ok());
        assert!(parse(
            "CREATE VIRTUAL TABLE t USING fts5(a)",
            Some(StatementKind::Table),
            None
        )
        .is_ok());
        let err = parse("CREATE TABLE t(a)", Some(StatementKind::View), None).unwrap_err();
        assert!(matches!(err, GrammarError::UnexpectedCategory { .. }));
    }

    #[test]
    fn parse_applies_renames_to_meta() {
        let renames = Renames {
            table: [("t".to_string(), "t2".to_string())].into_iter().collect(),
            ..Default::default()
        };
        let statement = parse(
            "CREATE INDEX i ON t (a)",
            Some(StatementKind::Index),
            Some(&renames),
        )
        .unwrap();
        let Statement::Index(index) = statement else { panic!() };
        assert_eq!(index.table, "t2");
        assert_eq!(index.header.tables, vec!["t2".to_string()]);
    }

    #[test]
    fn transform_preserves_text_without_flags() {
        let sql = "CREATE TABLE t (\n  a INTEGER -- key\n)";
        let out = transform(sql, None, None, None).unwrap();
        assert_eq!(out, sql);
    }

    #[test]
    fn transform_with_flags_regenerates() {
        let flags = FlagToggles { if_not_exists: Some(true), ..Default::default() };
        let out = transform("CREATE TABLE t(a)", Some(&flags), None, None).unwrap();
        assert_eq!(out, "CREATE TABLE IF NOT EXISTS t (\n  a\n)");
    }

    #[test]
    fn transform_round_trips_schema_renames() {
        let set = Renames {
            schema: Some(SchemaRename::Set("aux".to_string())),
            ..Default::default()
        };
        let remove = Renames { schema: Some(SchemaRename::Remove), ..Default::default() };
        let sql = "CREATE VIEW v AS SELECT 1";
        let qualified = transform(sql, None, Some(&set), None).unwrap();
        assert_eq!(qualified, "CREATE VIEW aux.v AS SELECT 1");
        let back = transform(&qualified, None, Some(&remove), None).unwrap();
        assert_eq!(back, sql);
    }
}
