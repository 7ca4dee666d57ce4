use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default file extensions recognized as SQLite databases.
pub const DB_EXTENSIONS: &[&str] =
    &["db", "db3", "s3db", "sl3", "sqlite", "sqlite3", "sqlitedb"];

/// SQLite file magic.
pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Tuning inputs the core requires from its host.
///
/// The host owns persistence; the core only reads these values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Databases up to this size get exact row counts.
    pub max_db_size_for_full_count: u64,
    /// Tables whose MAX(ROWID) is at most this get exact row counts.
    pub max_table_rowid_for_full_count: i64,
    /// Rows fetched per streaming step in exports and recovery.
    pub seek_length: usize,
    /// Rows skipped per leap when scrolling far ahead.
    pub seek_leap_length: usize,
    /// Rows per emitted search result chunk.
    pub search_results_chunk: usize,
    /// Hard cap on search hits per query.
    pub max_search_results: usize,
    /// Bound for action and SQL history lists.
    pub max_history_size: usize,
    /// Bound for the memoized parse results.
    pub max_parse_cache: usize,
    /// Path to the sqlite3_analyzer binary, if installed.
    pub analyzer_path: Option<PathBuf>,
    /// Run checksums automatically when a database is opened.
    pub run_checksums: bool,
    /// Run the statistics analyzer automatically.
    pub run_statistics: bool,
    /// Recognized database file extensions, lower-case, without dots.
    pub db_extensions: Vec<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_db_size_for_full_count: 10_000_000,
            max_table_rowid_for_full_count: 1_000_000,
            seek_length: 1_000,
            seek_leap_length: 10_000,
            search_results_chunk: 50,
            max_search_results: 10_000,
            max_history_size: 1_000,
            max_parse_cache: 500,
            analyzer_path: None,
            run_checksums: false,
            run_statistics: false,
            db_extensions: DB_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CoreConfig {
    pub fn is_db_extension(&self, path: &std::path::Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                let ext = ext.to_lowercase();
                self.db_extensions.iter().any(|known| *known == ext)
            })
    }
}
