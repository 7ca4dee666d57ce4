//! Google-style full-text search over schema and row data.

mod compile;
mod execute;
mod parser;

pub use compile::{CompiledQuery, RelationTarget, compile, value_matches};
pub use execute::{
    HighlightSpans, SearchEmission, SearchInput, SearchMode, SearchResultsChunk, run_search,
};
pub use parser::{Keyword, KeywordKind, MatchTerm, QueryNode, SearchQuery, parse_query};
