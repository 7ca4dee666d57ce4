use thiserror::Error;

/// Grammar layer errors.
///
/// Parsing and generation are pure functions: callers get a typed error
/// back instead of a panic, so ambiguous SQL can be surfaced to the user
/// without losing the rest of the schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    /// Tokenizing or parsing failed. Line is 1-based, column 1-based.
    #[error("Line {line}:{column} {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// Parse succeeded but the statement is not of the expected category.
    #[error("Unexpected statement category: '{got}' (expected '{expected}')")]
    UnexpectedCategory { expected: String, got: String },

    /// SQL generation from a meta tree failed.
    #[error("Cannot generate SQL: {0}")]
    Generate(String),
}

impl GrammarError {
    pub fn parse(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            column,
            message: message.into(),
        }
    }
}
