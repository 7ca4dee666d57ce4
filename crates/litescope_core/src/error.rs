use litescope_grammar::GrammarError;
use thiserror::Error;

use crate::schema::SchemaCategory;

/// Database facade errors.
///
/// All expected failures are typed and carry a message suitable for
/// direct display; workers never raise these across the channel, they
/// deliver error emissions instead.
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite rejected a statement.
    #[error("Query failed: {message}")]
    Query { sql: String, message: String },

    /// Grammar failed to parse or regenerate a statement.
    #[error(transparent)]
    Grammar(#[from] GrammarError),

    /// A rename or clone target collides with an existing item.
    #[error("A {category} named \"{name}\" already exists")]
    SchemaConflict { category: SchemaCategory, name: String },

    /// An export target lacks an item a requested item depends on.
    #[error("{required_by} requires missing {category} \"{name}\"")]
    DependencyMissing {
        category: SchemaCategory,
        name: String,
        required_by: String,
    },

    /// A mutation was refused because of an active lock.
    #[error("Operation refused: {label}")]
    LockConflict { label: String },

    /// `PRAGMA integrity_check` reported problems.
    #[error("Integrity check failed with {} message(s)", messages.len())]
    IntegrityFailure { messages: Vec<String> },

    /// Operation attempted on a closed database.
    #[error("Database is closed")]
    Closed,

    /// A cooperative cancel was observed.
    #[error("Operation cancelled")]
    Cancelled,

    /// The file is not a SQLite database.
    #[error("Not a SQLite database: {0}")]
    NotADatabase(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    pub fn query(sql: impl Into<String>, error: &rusqlite::Error) -> Self {
        let message = match error {
            rusqlite::Error::SqliteFailure(code, Some(msg)) => {
                format!("{msg} ({:?})", code.code)
            }
            other => other.to_string(),
        };
        Self::Query { sql: sql.into(), message }
    }
}
