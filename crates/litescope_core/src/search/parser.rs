//! Google-style search query parser.
//!
//! Words, quoted phrases, parenthesized groups, `OR` expressions,
//! `-` negations and `table:`/`view:`/`column:`/`date:` keywords.
//! Keywords are global: they constrain the whole search regardless of
//! grouping. A naive fallback splits on whitespace when the grammar
//! fails, so a malformed query still searches best-effort.

use litescope_grammar::GrammarError;
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    Word(String),
    /// Quoted literal; inner whitespace and `*` are matched as-is.
    Phrase(String),
    And(Vec<QueryNode>),
    Or(Vec<QueryNode>),
    Not(Box<QueryNode>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordKind {
    Table,
    View,
    Column,
    Date,
}

impl KeywordKind {
    fn from_str(key: &str) -> Option<Self> {
        match key.to_lowercase().as_str() {
            "table" => Some(Self::Table),
            "view" => Some(Self::View),
            "column" => Some(Self::Column),
            "date" => Some(Self::Date),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub kind: KeywordKind,
    pub negated: bool,
    pub value: String,
    /// Value was quoted: wildcards are literal.
    pub phrase: bool,
}

/// A positive word or phrase, kept for highlighting.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchTerm {
    Word(String),
    Phrase(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    /// The boolean match tree; `None` when the query is keywords only.
    pub root: Option<QueryNode>,
    pub keywords: Vec<Keyword>,
    /// Positive terms in query order, for highlighting.
    pub terms: Vec<MatchTerm>,
}

impl SearchQuery {
    pub fn keywords_of(&self, kind: KeywordKind, negated: bool) -> Vec<&Keyword> {
        self.keywords
            .iter()
            .filter(|k| k.kind == kind && k.negated == negated)
            .collect()
    }
}

/// Parses the query; an empty query is an error. A structurally broken
/// query falls back to naive word splitting.
pub fn parse_query(query: &str) -> Result<SearchQuery, GrammarError> {
    if query.trim().is_empty() {
        return Err(GrammarError::parse(1, 1, "empty search query"));
    }
    let parsed = match parse_grammar(query) {
        Ok(parsed) => parsed,
        Err(error) => {
            log::warn!("search grammar failed on \"{query}\": {error}; using naive parse");
            parse_naive(query)
        }
    };
    Ok(parsed)
}

// ----------------------------------------------------------------------
// Tokenizer

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Open { negated: bool },
    Close,
    Or,
    Word { text: String, negated: bool },
    Phrase { text: String, negated: bool },
    Keyword(Keyword),
}

fn tokenize(query: &str) -> Vec<Tok> {
    let chars: Vec<char> = query.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let mut negated = false;
        let mut start = i;
        if c == '-' && i + 1 < chars.len() && !chars[i + 1].is_whitespace() && chars[i + 1] != '-' {
            negated = true;
            i += 1;
            start = i;
        }
        match chars.get(i) {
            Some('(') => {
                tokens.push(Tok::Open { negated });
                i += 1;
            }
            Some(')') => {
                // A dangling negation before ')' is dropped.
                tokens.push(Tok::Close);
                i += 1;
            }
            Some('"') => {
                let (text, next) = scan_phrase(&chars, i + 1);
                tokens.push(Tok::Phrase { text, negated });
                i = next;
            }
            Some(_) => {
                let mut end = i;
                while end < chars.len()
                    && !chars[end].is_whitespace()
                    && !matches!(chars[end], '(' | ')' | '"')
                {
                    end += 1;
                }
                let text: String = chars[start..end].iter().collect();
                i = end;
                // key:"quoted value"
                if let Some(key) = text.strip_suffix(':')
                    && let Some(kind) = KeywordKind::from_str(key)
                    && chars.get(i) == Some(&'"')
                {
                    let (value, next) = scan_phrase(&chars, i + 1);
                    i = next;
                    tokens.push(Tok::Keyword(Keyword { kind, negated, value, phrase: true }));
                    continue;
                }
                if let Some((key, value)) = text.split_once(':')
                    && !value.is_empty()
                    && let Some(kind) = KeywordKind::from_str(key)
                {
                    tokens.push(Tok::Keyword(Keyword {
                        kind,
                        negated,
                        value: value.to_string(),
                        phrase: false,
                    }));
                    continue;
                }
                if text == "OR" && !negated {
                    tokens.push(Tok::Or);
                } else if !text.is_empty() {
                    tokens.push(Tok::Word { text, negated });
                }
            }
            None => {}
        }
    }
    tokens
}

fn scan_phrase(chars: &[char], mut i: usize) -> (String, usize) {
    let mut text = String::new();
    while i < chars.len() && chars[i] != '"' {
        text.push(chars[i]);
        i += 1;
    }
    (text, i.min(chars.len()) + 1)
}

// ----------------------------------------------------------------------
// Grammar parse

struct TreeParser {
    tokens: Vec<Tok>,
    pos: usize,
    keywords: Vec<Keyword>,
}

fn parse_grammar(query: &str) -> Result<SearchQuery, GrammarError> {
    let mut parser = TreeParser { tokens: tokenize(query), pos: 0, keywords: Vec::new() };
    let nodes = parser.parse_sequence(false)?;
    if parser.pos < parser.tokens.len() {
        return Err(GrammarError::parse(1, 1, "unbalanced parentheses"));
    }
    let root = match nodes.len() {
        0 => None,
        1 => Some(nodes.into_iter().next().expect("one node")),
        _ => Some(QueryNode::And(nodes)),
    };
    if root.is_none() && parser.keywords.is_empty() {
        return Err(GrammarError::parse(1, 1, "empty search query"));
    }
    let mut terms = Vec::new();
    if let Some(root) = &root {
        collect_terms(root, false, &mut terms);
    }
    Ok(SearchQuery { root, keywords: parser.keywords, terms })
}

impl TreeParser {
    fn parse_sequence(&mut self, in_group: bool) -> Result<Vec<QueryNode>, GrammarError> {
        let mut nodes: Vec<QueryNode> = Vec::new();
        while let Some(token) = self.tokens.get(self.pos).cloned() {
            match token {
                Tok::Close => {
                    if !in_group {
                        return Err(GrammarError::parse(1, 1, "unbalanced ')'"));
                    }
                    return Ok(nodes);
                }
                Tok::Or => {
                    self.pos += 1;
                    let Some(previous) = nodes.pop() else {
                        // Leading OR is literal noise; ignore it.
                        continue;
                    };
                    let Some(next) = self.parse_operand()? else {
                        nodes.push(previous);
                        continue;
                    };
                    match previous {
                        QueryNode::Or(mut alternatives) => {
                            alternatives.push(next);
                            nodes.push(QueryNode::Or(alternatives));
                        }
                        other => nodes.push(QueryNode::Or(vec![other, next])),
                    }
                }
                _ => {
                    if let Some(node) = self.parse_operand()? {
                        nodes.push(node);
                    }
                }
            }
        }
        if in_group {
            return Err(GrammarError::parse(1, 1, "unterminated '('"));
        }
        Ok(nodes)
    }

    /// One operand; keywords produce no node.
    fn parse_operand(&mut self) -> Result<Option<QueryNode>, GrammarError> {
        loop {
            let Some(token) = self.tokens.get(self.pos).cloned() else {
                return Ok(None);
            };
            self.pos += 1;
            return match token {
                Tok::Keyword(keyword) => {
                    self.keywords.push(keyword);
                    continue;
                }
                Tok::Word { text, negated } => Ok(Some(wrap(QueryNode::Word(text), negated))),
                Tok::Phrase { text, negated } => {
                    Ok(Some(wrap(QueryNode::Phrase(text), negated)))
                }
                Tok::Open { negated } => {
                    let inner = self.parse_sequence(true)?;
                    if self.tokens.get(self.pos) != Some(&Tok::Close) {
                        return Err(GrammarError::parse(1, 1, "unterminated '('"));
                    }
                    self.pos += 1;
                    match inner.len() {
                        0 => continue,
                        1 => Ok(Some(wrap(inner.into_iter().next().expect("one"), negated))),
                        _ => Ok(Some(wrap(QueryNode::And(inner), negated))),
                    }
                }
                Tok::Close => {
                    self.pos -= 1;
                    Ok(None)
                }
                Tok::Or => Ok(Some(QueryNode::Word("OR".to_string()))),
            };
        }
    }
}

fn wrap(node: QueryNode, negated: bool) -> QueryNode {
    if negated {
        QueryNode::Not(Box::new(node))
    } else {
        node
    }
}

fn collect_terms(node: &QueryNode, negated: bool, terms: &mut Vec<MatchTerm>) {
    match node {
        QueryNode::Word(w) if !negated => terms.push(MatchTerm::Word(w.clone())),
        QueryNode::Phrase(p) if !negated => terms.push(MatchTerm::Phrase(p.clone())),
        QueryNode::Word(_) | QueryNode::Phrase(_) => {}
        QueryNode::And(nodes) | QueryNode::Or(nodes) => {
            for child in nodes {
                collect_terms(child, negated, terms);
            }
        }
        QueryNode::Not(inner) => collect_terms(inner, true, terms),
    }
}

// ----------------------------------------------------------------------
// Naive fallback

fn keyword_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(-?)(table|view|column|date):(\S+)$").expect("static pattern")
    })
}

/// Splits on whitespace, extracts `-?key:value` keywords, keeps the rest
/// as plain AND-ed words.
fn parse_naive(query: &str) -> SearchQuery {
    let mut keywords = Vec::new();
    let mut words = Vec::new();
    for piece in query.split_whitespace() {
        if let Some(captures) = keyword_pattern().captures(piece) {
            let kind = KeywordKind::from_str(&captures[2]).expect("pattern filters kinds");
            keywords.push(Keyword {
                kind,
                negated: &captures[1] == "-",
                value: captures[3].to_string(),
                phrase: false,
            });
        } else {
            words.push(piece.trim_matches('"').to_string());
        }
    }
    let terms = words.iter().map(|w| MatchTerm::Word(w.clone())).collect();
    let nodes: Vec<QueryNode> = words.into_iter().map(QueryNode::Word).collect();
    let root = match nodes.len() {
        0 => None,
        1 => Some(nodes.into_iter().next().expect("one node")),
        _ => Some(QueryNode::And(nodes)),
    };
    SearchQuery { root, keywords, terms }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_and_phrases() {
        let q = parse_query("alpha \"two  words\"").unwrap();
        assert_eq!(
            q.root,
            Some(QueryNode::And(vec![
                QueryNode::Word("alpha".to_string()),
                QueryNode::Phrase("two  words".to_string()),
            ]))
        );
        assert_eq!(q.terms.len(), 2);
    }

    #[test]
    fn or_chains_group() {
        let q = parse_query("a OR b OR c d").unwrap();
        assert_eq!(
            q.root,
            Some(QueryNode::And(vec![
                QueryNode::Or(vec![
                    QueryNode::Word("a".to_string()),
                    QueryNode::Word("b".to_string()),
                    QueryNode::Word("c".to_string()),
                ]),
                QueryNode::Word("d".to_string()),
            ]))
        );
    }

    #[test]
    fn lowercase_or_is_a_word() {
        let q = parse_query("a or b").unwrap();
        assert_eq!(
            q.root,
            Some(QueryNode::And(vec![
                QueryNode::Word("a".to_string()),
                QueryNode::Word("or".to_string()),
                QueryNode::Word("b".to_string()),
            ]))
        );
    }

    #[test]
    fn negations_and_groups() {
        let q = parse_query("-bad (good OR fine) -\"not this\"").unwrap();
        let Some(QueryNode::And(nodes)) = q.root else { panic!() };
        assert!(matches!(&nodes[0], QueryNode::Not(inner)
            if **inner == QueryNode::Word("bad".to_string())));
        assert!(matches!(&nodes[1], QueryNode::Or(_)));
        // Negated terms do not highlight; grouped positives do.
        assert_eq!(
            q.terms,
            vec![
                MatchTerm::Word("good".to_string()),
                MatchTerm::Word("fine".to_string()),
            ]
        );
    }

    #[test]
    fn keywords_are_global() {
        let q = parse_query("(word table:customer) -column:notes date:2012").unwrap();
        assert_eq!(q.keywords.len(), 3);
        assert_eq!(q.keywords[0].kind, KeywordKind::Table);
        assert!(!q.keywords[0].negated);
        assert!(q.keywords[1].negated);
        assert_eq!(q.keywords[2].value, "2012");
        assert_eq!(q.root, Some(QueryNode::Word("word".to_string())));
    }

    #[test]
    fn quoted_keyword_value() {
        let q = parse_query("table:\"order line\"").unwrap();
        assert_eq!(q.keywords[0].value, "order line");
        assert!(q.keywords[0].phrase);
        assert!(q.root.is_none());
    }

    #[test]
    fn unknown_key_is_a_plain_word() {
        let q = parse_query("tables:whatever table:").unwrap();
        assert_eq!(
            q.root,
            Some(QueryNode::And(vec![
                QueryNode::Word("tables:whatever".to_string()),
                QueryNode::Word("table:".to_string()),
            ]))
        );
        assert!(q.keywords.is_empty());
    }

    #[test]
    fn empty_query_is_rejected() {
        assert!(parse_query("").is_err());
        assert!(parse_query("   ").is_err());
    }

    #[test]
    fn broken_query_falls_back() {
        let q = parse_query("table:parens in(anyword").unwrap();
        assert_eq!(q.keywords.len(), 1);
        assert_eq!(q.keywords[0].value, "parens");
        // Naive split keeps the rest as words.
        assert!(matches!(&q.root, Some(QueryNode::And(_) | QueryNode::Word(_))));
    }
}
