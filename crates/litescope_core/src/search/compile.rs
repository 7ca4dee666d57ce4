//! Compiles a parsed search query into parameterized SQL for one
//! candidate relation.

use regex::RegexBuilder;

use crate::schema::{ColumnInfo, SchemaCategory};
use crate::value::Value;

use super::parser::{Keyword, KeywordKind, QueryNode, SearchQuery};

/// Escape character for SQLite LIKE specials `%` and `_`.
pub const ESCAPE_LIKE: char = '\\';

/// A table or view the search may run against.
#[derive(Debug, Clone)]
pub struct RelationTarget {
    pub category: SchemaCategory,
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<(String, Value)>,
}

/// Substring match of a keyword value against a name; unquoted `*` is a
/// wildcard.
pub fn value_matches(value: &str, phrase: bool, name: &str, case: bool) -> bool {
    let mut pattern = regex::escape(value);
    if !phrase {
        pattern = pattern.replace("\\*", ".*");
    }
    RegexBuilder::new(&pattern)
        .case_insensitive(!case)
        .build()
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

fn matches_any(keywords: &[&Keyword], name: &str, case: bool) -> bool {
    keywords
        .iter()
        .any(|k| value_matches(&k.value, k.phrase, name, case))
}

/// Whether the relation passes the `table:`/`view:` keyword filters;
/// a filtered-out relation is skipped entirely.
pub fn relation_passes(query: &SearchQuery, target: &RelationTarget, case: bool) -> bool {
    let kind = match target.category {
        SchemaCategory::Table => KeywordKind::Table,
        SchemaCategory::View => KeywordKind::View,
        _ => return false,
    };
    let positive = query.keywords_of(kind, false);
    if !positive.is_empty() && !matches_any(&positive, &target.name, case) {
        return false;
    }
    let negative = query.keywords_of(kind, true);
    if matches_any(&negative, &target.name, case) {
        return false;
    }
    true
}

fn column_passes(query: &SearchQuery, column: &ColumnInfo, case: bool) -> bool {
    let positive = query.keywords_of(KeywordKind::Column, false);
    if !positive.is_empty() && !matches_any(&positive, &column.name, case) {
        return false;
    }
    let negative = query.keywords_of(KeywordKind::Column, true);
    if matches_any(&negative, &column.name, case) {
        return false;
    }
    true
}

/// LIKE escaping: `%` and `_` escaped with backslash; a user `*` in an
/// unquoted word becomes `%`.
fn escape_like(text: &str, phrase: bool) -> String {
    let mut escaped = text
        .replace('%', &format!("{ESCAPE_LIKE}%"))
        .replace('_', &format!("{ESCAPE_LIKE}_"));
    if !phrase {
        escaped = escaped.replace('*', "%");
    }
    escaped
}

/// GLOB escaping: `[` and `?` become single-char classes; `*` stays a
/// wildcard unless quoted.
fn escape_glob(text: &str, phrase: bool) -> String {
    let mut escaped = text.replace('[', "[[]").replace('?', "[?]");
    if phrase {
        escaped = escaped.replace('*', "[*]");
    }
    escaped
}

struct Compiler<'a> {
    query: &'a SearchQuery,
    target: &'a RelationTarget,
    case: bool,
    params: Vec<(String, Value)>,
    /// Word/phrase comparisons seen so far; parameter indexes are
    /// `term_index * column_count + column_index`.
    term_count: usize,
    date_range_count: usize,
    date_value_count: usize,
}

/// Compiles the query for one relation. `None` means the relation is
/// filtered out by a `table:`/`view:` keyword.
pub fn compile(query: &SearchQuery, target: &RelationTarget, case: bool) -> Option<CompiledQuery> {
    if !relation_passes(query, target, case) {
        return None;
    }
    let mut compiler = Compiler {
        query,
        target,
        case,
        params: Vec::new(),
        term_count: 0,
        date_range_count: 0,
        date_value_count: 0,
    };
    // A lone word or phrase needs no outer parentheses.
    let body = query.root.as_ref().map(|root| match root {
        QueryNode::Word(text) => compiler.comparison_sql(text, false).0,
        QueryNode::Phrase(text) => compiler.comparison_sql(text, true).0,
        other => compiler.node_sql(other),
    });
    let keyword_sql = compiler.keywords_sql();

    let mut clauses: Vec<String> = Vec::new();
    if let Some(body) = body.filter(|b| !b.is_empty()) {
        clauses.push(body);
    }
    if let Some(keyword_sql) = keyword_sql.filter(|k| !k.is_empty()) {
        clauses.push(keyword_sql);
    }
    let mut sql = format!("SELECT * FROM {}", litescope_grammar::quote(&target.name));
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    Some(CompiledQuery { sql, params: compiler.params })
}

impl Compiler<'_> {
    fn node_sql(&mut self, node: &QueryNode) -> String {
        match node {
            QueryNode::Word(text) => {
                let (sql, count) = self.comparison_sql(text, false);
                if count > 1 { format!("({sql})") } else { sql }
            }
            QueryNode::Phrase(text) => {
                let (sql, count) = self.comparison_sql(text, true);
                if count > 1 { format!("({sql})") } else { sql }
            }
            QueryNode::And(nodes) => self.join_sql(nodes, " AND "),
            QueryNode::Or(nodes) => self.join_sql(nodes, " OR "),
            QueryNode::Not(inner) => {
                let inner = self.node_sql(inner);
                if inner.is_empty() {
                    inner
                } else {
                    format!("NOT ({inner})")
                }
            }
        }
    }

    fn join_sql(&mut self, nodes: &[QueryNode], glue: &str) -> String {
        let parts: Vec<String> = nodes
            .iter()
            .map(|n| self.node_sql(n))
            .filter(|s| !s.is_empty())
            .collect();
        match parts.len() {
            0 => String::new(),
            1 => parts.into_iter().next().expect("one part"),
            _ => format!("({})", parts.join(glue)),
        }
    }

    /// One word or phrase compared against every participating column.
    /// Returns the OR-joined comparisons and how many columns joined.
    fn comparison_sql(&mut self, text: &str, phrase: bool) -> (String, usize) {
        let (op, wild) = if self.case { ("GLOB", "*") } else { ("LIKE", "%") };
        let escaped = if self.case {
            escape_glob(text, phrase)
        } else {
            escape_like(text, phrase)
        };
        let pattern = format!("{wild}{escaped}{wild}");

        let base = self.term_count * self.target.columns.len();
        self.term_count += 1;
        let mut parts: Vec<String> = Vec::new();
        let mut count = 0usize;
        for (index, column) in self.target.columns.iter().enumerate() {
            if !column_passes(self.query, column, self.case) {
                continue;
            }
            let param = format!("p{}", base + index);
            let mut reference = litescope_grammar::quote(&column.name);
            if !column.not_null {
                reference = format!("COALESCE({reference},'')");
            }
            let clause = if op == "LIKE" {
                format!("{reference} {op} :{param} ESCAPE '{ESCAPE_LIKE}'")
            } else {
                format!("{reference} {op} :{param}")
            };
            parts.push(clause);
            self.params.push((format!(":{param}"), Value::Text(pattern.clone())));
            count += 1;
        }
        if parts.is_empty() {
            return ("1 = 0".to_string(), 0);
        }
        let joined = parts
            .into_iter()
            .map(|p| format!("({p})"))
            .collect::<Vec<_>>()
            .join(" OR ");
        (joined, count)
    }

    // ------------------------------------------------------------------
    // date: keywords

    /// `(name, not_null)` of every DATE/DATETIME column passing the
    /// column filter.
    fn date_columns(&self) -> Vec<(String, bool)> {
        self.target
            .columns
            .iter()
            .filter(|c| {
                c.declared_type
                    .as_deref()
                    .is_some_and(|t| matches!(t.to_uppercase().as_str(), "DATE" | "DATETIME"))
            })
            .filter(|c| column_passes(self.query, c, self.case))
            .map(|c| (c.name.clone(), c.not_null))
            .collect()
    }

    /// SQL for the date keywords, `None` when there are none. An empty
    /// date-column set forces zero results.
    fn keywords_sql(&mut self) -> Option<String> {
        let has_dates = self
            .query
            .keywords
            .iter()
            .any(|k| k.kind == KeywordKind::Date);
        if !has_dates {
            return None;
        }
        if self.date_columns().is_empty() {
            return Some("1 = 0".to_string());
        }

        let mut positive: Vec<String> = Vec::new();
        let mut negative: Vec<String> = Vec::new();
        let keywords: Vec<Keyword> = self
            .query
            .keywords
            .iter()
            .filter(|k| k.kind == KeywordKind::Date)
            .cloned()
            .collect();
        for keyword in keywords {
            if let Some(sql) = self.date_sql(&keyword.value) {
                if keyword.negated {
                    negative.push(sql);
                } else {
                    positive.push(sql);
                }
            }
        }
        let mut out: Vec<String> = Vec::new();
        if !positive.is_empty() {
            out.push(format!("({})", positive.join(" OR ")));
        }
        if !negative.is_empty() {
            out.push(format!("NOT ({})", negative.join(" OR ")));
        }
        if out.is_empty() {
            None
        } else {
            Some(out.join(" AND "))
        }
    }

    fn date_sql(&mut self, value: &str) -> Option<String> {
        if let Some((low, high)) = value.split_once("..") {
            return self.date_range_sql(low, high);
        }
        self.date_value_sql(value)
    }

    /// Single value `YYYY[-MM[-DD]]`; `*` parts match any value of that
    /// part, via STRFTIME on the present parts only.
    fn date_value_sql(&mut self, value: &str) -> Option<String> {
        let parts: Vec<Option<u32>> = value
            .split('-')
            .take(3)
            .map(|p| p.parse::<u32>().ok())
            .collect();
        if parts.iter().all(Option::is_none) {
            return None;
        }
        let mut format = String::new();
        let mut rendered = String::new();
        for (index, part) in parts.iter().enumerate() {
            let Some(part) = part else { continue };
            if !format.is_empty() {
                format.push('-');
                rendered.push('-');
            }
            format.push_str(["%Y", "%m", "%d"][index]);
            if index == 0 {
                rendered.push_str(&format!("{part:04}"));
            } else {
                rendered.push_str(&format!("{part:02}"));
            }
        }
        let param = format!("d{}", self.date_value_count);
        self.date_value_count += 1;
        self.params.push((format!(":{param}"), Value::Text(rendered)));

        let columns = self.date_columns();
        let parts: Vec<String> = columns
            .iter()
            .map(|(name, not_null)| {
                let reference = litescope_grammar::quote(name);
                if *not_null {
                    format!("STRFTIME('{format}', {reference}) = :{param}")
                } else {
                    format!("COALESCE(STRFTIME('{format}', {reference}), '') = :{param}")
                }
            })
            .collect();
        Some(if parts.len() > 1 {
            format!("({})", parts.join(" OR "))
        } else {
            parts.into_iter().next().expect("non-empty")
        })
    }

    /// Range `a..b`, either endpoint optional, clamped to the calendar.
    fn date_range_sql(&mut self, low: &str, high: &str) -> Option<String> {
        let low_date = complete_date(low, false);
        let high_date = complete_date(high, true);
        if low_date.is_none() && high_date.is_none() {
            return None;
        }
        let suffix = if self.date_range_count == 0 {
            String::new()
        } else {
            self.date_range_count.to_string()
        };
        self.date_range_count += 1;

        let columns = self.date_columns();
        let mut sides: Vec<String> = Vec::new();
        for (date, side, op) in [(low_date, "lo", ">="), (high_date, "hi", "<=")] {
            let Some(date) = date else { continue };
            let param = format!("{side}{suffix}");
            self.params.push((format!(":{param}"), Value::Text(date)));
            let parts: Vec<String> = columns
                .iter()
                .map(|(name, not_null)| {
                    let mut reference = litescope_grammar::quote(name);
                    if !not_null {
                        reference = format!("COALESCE({reference},'')");
                    }
                    format!("{reference} {op} :{param}")
                })
                .collect();
            sides.push(if parts.len() > 1 {
                format!("({})", parts.join(" OR "))
            } else {
                parts.into_iter().next().expect("non-empty")
            });
        }
        Some(sides.join(" AND "))
    }
}

/// Completes a partial `YYYY[-MM[-DD]]` into a full date string, taking
/// range-start or range-end defaults and clamping into the calendar.
fn complete_date(text: &str, end_of_range: bool) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    let parts: Vec<Option<i32>> = text
        .split('-')
        .filter(|p| !p.is_empty())
        .take(3)
        .map(|p| p.parse::<i32>().ok())
        .collect();
    let year = (*parts.first()?)?;
    let year = year.clamp(1, 9999);
    let month = match parts.get(1).copied().flatten() {
        Some(month) => month.clamp(1, 12),
        None => {
            if end_of_range {
                12
            } else {
                1
            }
        }
    };
    let last_day = days_in_month(year, month as u32);
    let day = match parts.get(2).copied().flatten() {
        Some(day) => day.clamp(1, last_day as i32),
        None => {
            if end_of_range {
                last_day as i32
            } else {
                1
            }
        }
    };
    Some(format!("{year:04}-{month:02}-{day:02}"))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    use chrono::NaiveDate;
    let first = NaiveDate::from_ymd_opt(year, month, 1);
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match (first, next) {
        (Some(first), Some(next)) => next.signed_duration_since(first).num_days() as u32,
        _ => 28,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::parser::parse_query;

    fn column(name: &str, declared: Option<&str>) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            declared_type: declared.map(|d| d.to_string()),
            not_null: false,
            default_value: None,
            pk_position: None,
        }
    }

    fn target(columns: &[ColumnInfo]) -> RelationTarget {
        RelationTarget {
            category: SchemaCategory::Table,
            name: "docs".to_string(),
            columns: columns.to_vec(),
        }
    }

    #[test]
    fn phrase_with_column_exclusion() {
        let query = parse_query("\"foo bar\" -column:notes").unwrap();
        let target = target(&[
            column("title", Some("TEXT")),
            column("notes", Some("TEXT")),
            column("body", Some("TEXT")),
        ]);
        let compiled = compile(&query, &target, false).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT * FROM docs WHERE (COALESCE(title,'') LIKE :p0 ESCAPE '\\') OR \
             (COALESCE(body,'') LIKE :p2 ESCAPE '\\')"
        );
        assert_eq!(
            compiled.params,
            vec![
                (":p0".to_string(), Value::Text("%foo bar%".to_string())),
                (":p2".to_string(), Value::Text("%foo bar%".to_string())),
            ]
        );
    }

    #[test]
    fn wildcards_translate_for_like() {
        let query = parse_query("ab*cd under_score").unwrap();
        let target = target(&[column("a", None)]);
        let compiled = compile(&query, &target, false).unwrap();
        assert_eq!(compiled.params[0].1, Value::Text("%ab%cd%".to_string()));
        assert_eq!(compiled.params[1].1, Value::Text("%under\\_score%".to_string()));
    }

    #[test]
    fn case_sensitive_uses_glob() {
        let query = parse_query("Foo?").unwrap();
        let target = target(&[column("a", None)]);
        let compiled = compile(&query, &target, true).unwrap();
        assert!(compiled.sql.contains("GLOB :p0"));
        assert!(!compiled.sql.contains("ESCAPE"));
        assert_eq!(compiled.params[0].1, Value::Text("*Foo[?]*".to_string()));
    }

    #[test]
    fn negation_wraps_with_not() {
        let query = parse_query("-secret").unwrap();
        let target = target(&[column("a", None)]);
        let compiled = compile(&query, &target, false).unwrap();
        assert!(compiled.sql.contains("NOT ((COALESCE(a,'') LIKE :p0"));
    }

    #[test]
    fn table_filter_skips_relation() {
        let query = parse_query("word table:orders").unwrap();
        let target = target(&[column("a", None)]);
        assert!(compile(&query, &target, false).is_none());

        let query = parse_query("word -table:doc*").unwrap();
        assert!(compile(&query, &target, false).is_none());

        let query = parse_query("word table:doc*").unwrap();
        assert!(compile(&query, &target, false).is_some());
    }

    #[test]
    fn date_range_compiles_with_calendar_completion() {
        let query = parse_query("date:2012-06..2012-08").unwrap();
        let target = target(&[column("created", Some("DATETIME"))]);
        let compiled = compile(&query, &target, false).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT * FROM docs WHERE (COALESCE(created,'') >= :lo AND COALESCE(created,'') <= :hi)"
        );
        assert_eq!(
            compiled.params,
            vec![
                (":lo".to_string(), Value::Text("2012-06-01".to_string())),
                (":hi".to_string(), Value::Text("2012-08-31".to_string())),
            ]
        );
    }

    #[test]
    fn date_single_value_uses_strftime() {
        let query = parse_query("date:2012-06").unwrap();
        let target = target(&[column("created", Some("DATE"))]);
        let compiled = compile(&query, &target, false).unwrap();
        assert!(compiled.sql.contains("STRFTIME('%Y-%m', created)"));
        assert_eq!(compiled.params[0].1, Value::Text("2012-06".to_string()));
    }

    #[test]
    fn date_wildcard_parts_match_any() {
        let query = parse_query("date:*-*-24").unwrap();
        let target = target(&[column("created", Some("DATE"))]);
        let compiled = compile(&query, &target, false).unwrap();
        assert!(compiled.sql.contains("STRFTIME('%d', created)"));
        assert_eq!(compiled.params[0].1, Value::Text("24".to_string()));
    }

    #[test]
    fn date_without_date_columns_forces_empty() {
        let query = parse_query("date:2020").unwrap();
        let target = target(&[column("a", Some("TEXT"))]);
        let compiled = compile(&query, &target, false).unwrap();
        assert!(compiled.sql.ends_with("WHERE 1 = 0"));
    }

    #[test]
    fn no_matching_columns_is_always_false() {
        let query = parse_query("word -column:a").unwrap();
        let target = target(&[column("a", None)]);
        let compiled = compile(&query, &target, false).unwrap();
        assert!(compiled.sql.ends_with("WHERE 1 = 0"));
    }
}
