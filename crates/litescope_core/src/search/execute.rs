//! Streaming search execution over data rows and schema metadata.

use regex::{Regex, RegexBuilder};

use crate::database::Database;
use crate::schema::SchemaCategory;
use crate::value::Value;
use crate::worker::CancelToken;

use super::compile::{RelationTarget, compile, relation_passes, value_matches};
use super::parser::{KeywordKind, MatchTerm, QueryNode, SearchQuery, parse_query};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Match row data of tables and views.
    Data,
    /// Match schema item names, categories and SQL.
    Meta,
}

#[derive(Debug, Clone)]
pub struct SearchInput {
    pub query: String,
    pub case_sensitive: bool,
    pub mode: SearchMode,
}

/// Byte offsets of matched spans in a stringified value.
pub type HighlightSpans = Vec<(usize, usize)>;

#[derive(Debug, Clone)]
pub struct SearchResultsChunk {
    pub category: SchemaCategory,
    pub relation: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Per row, per cell.
    pub highlights: Vec<Vec<HighlightSpans>>,
}

#[derive(Debug, Clone)]
pub enum SearchEmission {
    Chunk(SearchResultsChunk),
    MetaHit {
        category: SchemaCategory,
        name: String,
        /// Name, category and canonical SQL, concatenated.
        text: String,
        highlights: HighlightSpans,
    },
    Done {
        total: usize,
        cancelled: bool,
        error: Option<String>,
    },
}

/// Compiled highlight patterns for the query's positive terms.
struct Highlighter {
    patterns: Vec<Regex>,
}

impl Highlighter {
    fn new(query: &SearchQuery, case: bool) -> Self {
        let patterns = query
            .terms
            .iter()
            .filter_map(|term| {
                let pattern = match term {
                    MatchTerm::Word(word) => regex::escape(word).replace("\\*", ".*"),
                    MatchTerm::Phrase(phrase) => regex::escape(phrase),
                };
                RegexBuilder::new(&pattern)
                    .case_insensitive(!case)
                    .build()
                    .ok()
            })
            .collect();
        Self { patterns }
    }

    fn spans(&self, text: &str) -> HighlightSpans {
        let mut spans: HighlightSpans = Vec::new();
        for pattern in &self.patterns {
            for hit in pattern.find_iter(text) {
                if hit.start() < hit.end() {
                    spans.push((hit.start(), hit.end()));
                }
            }
        }
        spans.sort_unstable();
        spans.dedup();
        spans
    }

    fn matches(&self, index: usize, text: &str) -> bool {
        self.patterns
            .get(index)
            .is_some_and(|pattern| pattern.is_match(text))
    }
}

/// Runs a search, emitting streaming chunks and exactly one terminal
/// `Done`. Cancellation is observed between chunks and relations.
pub fn run_search(
    db: &Database,
    input: &SearchInput,
    token: &CancelToken,
    emit: &mut dyn FnMut(SearchEmission),
) {
    let query = match parse_query(&input.query) {
        Ok(query) => query,
        Err(error) => {
            emit(SearchEmission::Done { total: 0, cancelled: false, error: Some(error.to_string()) });
            return;
        }
    };
    let highlighter = Highlighter::new(&query, input.case_sensitive);
    let result = match input.mode {
        SearchMode::Data => search_data(db, input, &query, &highlighter, token, emit),
        SearchMode::Meta => search_meta(db, input, &query, &highlighter, token, emit),
    };
    match result {
        Ok((total, cancelled)) => {
            emit(SearchEmission::Done { total, cancelled, error: None })
        }
        Err(error) => emit(SearchEmission::Done {
            total: 0,
            cancelled: false,
            error: Some(error.to_string()),
        }),
    }
}

/// Candidate relations in stable order: tables alphabetically, then
/// views alphabetically; positive `table:`/`view:` keywords restrict to
/// the relations they match, in keyword order.
fn candidate_relations(
    db: &Database,
    query: &SearchQuery,
    case: bool,
) -> Result<Vec<RelationTarget>, crate::error::DbError> {
    let mut targets = Vec::new();
    for category in [SchemaCategory::Table, SchemaCategory::View] {
        let kind = if category == SchemaCategory::Table {
            KeywordKind::Table
        } else {
            KeywordKind::View
        };
        let mut items = db.get_category(category)?;
        items.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        let positive = query.keywords_of(kind, false);
        if positive.is_empty() {
            targets.extend(items.into_iter().map(|item| RelationTarget {
                category,
                name: item.name,
                columns: item.columns,
            }));
        } else {
            let mut taken: Vec<String> = Vec::new();
            for keyword in positive {
                for item in &items {
                    if taken.iter().any(|t| t.eq_ignore_ascii_case(&item.name)) {
                        continue;
                    }
                    if value_matches(&keyword.value, keyword.phrase, &item.name, case) {
                        taken.push(item.name.clone());
                        targets.push(RelationTarget {
                            category,
                            name: item.name.clone(),
                            columns: item.columns.clone(),
                        });
                    }
                }
            }
        }
    }
    Ok(targets)
}

fn search_data(
    db: &Database,
    input: &SearchInput,
    query: &SearchQuery,
    highlighter: &Highlighter,
    token: &CancelToken,
    emit: &mut dyn FnMut(SearchEmission),
) -> Result<(usize, bool), crate::error::DbError> {
    db.ensure_parsed()?;
    let chunk_size = db.config().search_results_chunk.max(1);
    let max_results = db.config().max_search_results;
    let mut total = 0usize;

    for target in candidate_relations(db, query, input.case_sensitive)? {
        if token.is_cancelled() {
            return Ok((total, true));
        }
        let Some(compiled) = compile(query, &target, input.case_sensitive) else {
            continue;
        };
        let mut offset = 0usize;
        loop {
            if token.is_cancelled() {
                return Ok((total, true));
            }
            let page_sql = format!("{} LIMIT {chunk_size} OFFSET {offset}", compiled.sql);
            let page = match db.execute_named(&page_sql, &compiled.params) {
                Ok(page) => page,
                Err(error) => {
                    log::warn!("search skipped {} \"{}\": {error}", target.category, target.name);
                    break;
                }
            };
            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            let columns: Vec<String> = page[0].columns.as_ref().clone();
            let mut rows = Vec::with_capacity(page_len);
            let mut highlights = Vec::with_capacity(page_len);
            for row in page {
                let cell_spans: Vec<_> = row
                    .values
                    .iter()
                    .map(|value| highlighter.spans(&value.to_display_string()))
                    .collect();
                highlights.push(cell_spans);
                rows.push(row.values);
            }
            total += page_len;
            emit(SearchEmission::Chunk(SearchResultsChunk {
                category: target.category,
                relation: target.name.clone(),
                columns,
                rows,
                highlights,
            }));
            if total >= max_results {
                log::info!("search stopped at the {max_results}-hit cap");
                return Ok((total, false));
            }
            if page_len < chunk_size {
                break;
            }
            offset += chunk_size;
        }
    }
    Ok((total, false))
}

fn search_meta(
    db: &Database,
    input: &SearchInput,
    query: &SearchQuery,
    highlighter: &Highlighter,
    token: &CancelToken,
    emit: &mut dyn FnMut(SearchEmission),
) -> Result<(usize, bool), crate::error::DbError> {
    db.ensure_parsed()?;
    let mut total = 0usize;
    for category in SchemaCategory::ALL {
        for item in db.get_category(category)? {
            if token.is_cancelled() {
                return Ok((total, true));
            }
            if matches!(category, SchemaCategory::Table | SchemaCategory::View) {
                let target = RelationTarget {
                    category,
                    name: item.name.clone(),
                    columns: Vec::new(),
                };
                if !relation_passes(query, &target, input.case_sensitive) {
                    continue;
                }
            }
            let sql = db
                .get_sql(Some(category), Some(&item.name))
                .unwrap_or_else(|_| item.sql.clone());
            let text = format!("{} {} {}", item.name, category, sql);
            let matched = match &query.root {
                Some(root) => eval_text(root, highlighter, &text),
                // Keyword-only queries list every passing item.
                None => true,
            };
            if !matched {
                continue;
            }
            total += 1;
            let highlights = highlighter.spans(&text);
            emit(SearchEmission::MetaHit { category, name: item.name.clone(), text, highlights });
        }
    }
    Ok((total, false))
}

/// Evaluates the boolean tree against a text, using the positional
/// mapping between positive terms and compiled patterns.
fn eval_text(node: &QueryNode, highlighter: &Highlighter, text: &str) -> bool {
    fn eval(
        node: &QueryNode,
        highlighter: &Highlighter,
        text: &str,
        term_cursor: &mut usize,
    ) -> bool {
        match node {
            QueryNode::Word(_) | QueryNode::Phrase(_) => {
                let index = *term_cursor;
                *term_cursor += 1;
                highlighter.matches(index, text)
            }
            QueryNode::And(nodes) => {
                let mut all = true;
                for child in nodes {
                    all &= eval(child, highlighter, text, term_cursor);
                }
                all
            }
            QueryNode::Or(nodes) => {
                let mut any = false;
                for child in nodes {
                    any |= eval(child, highlighter, text, term_cursor);
                }
                any
            }
            QueryNode::Not(inner) => !eval_negated(inner, text),
        }
    }

    /// Negated terms have no precompiled pattern; build ad hoc.
    fn eval_negated(node: &QueryNode, text: &str) -> bool {
        match node {
            QueryNode::Word(word) => {
                let pattern = regex::escape(word).replace("\\*", ".*");
                RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|re| re.is_match(text))
                    .unwrap_or(false)
            }
            QueryNode::Phrase(phrase) => {
                text.to_lowercase().contains(&phrase.to_lowercase())
            }
            QueryNode::And(nodes) => nodes.iter().all(|n| eval_negated(n, text)),
            QueryNode::Or(nodes) => nodes.iter().any(|n| eval_negated(n, text)),
            QueryNode::Not(inner) => !eval_negated(inner, text),
        }
    }

    let mut cursor = 0usize;
    eval(node, highlighter, text, &mut cursor)
}
